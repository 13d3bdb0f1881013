use saga_core::{RecordKind, Session};
use std::collections::{BTreeSet, HashSet};

/// Record indices immune from redaction. Computed per call, never
/// persisted, and passed to every classification task as an immutable
/// copy — a chunk is never trusted to respect protection itself.
pub type ProtectedIndexSet = BTreeSet<usize>;

/// A contiguous run of non-protected record indices handed to one
/// classification task. Carries the original indices so results can be
/// mapped back; exists only for the duration of one smart-trim call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub indices: Vec<usize>,
}

impl Chunk {
    /// Inclusive (first, last) original-index bounds.
    pub fn bounds(&self) -> (usize, usize) {
        (self.indices[0], self.indices[self.indices.len() - 1])
    }
}

/// Protected = excluded kinds ∪ the last `preserve_recent` records ∪
/// malformed/marker records ∪ the lineage-bearing record.
pub fn protected_indices(
    session: &Session,
    exclude_kinds: &HashSet<RecordKind>,
    preserve_recent: usize,
) -> ProtectedIndexSet {
    let total = session.record_count();
    let recent_floor = total.saturating_sub(preserve_recent);
    session
        .records
        .iter()
        .enumerate()
        .filter(|(i, r)| {
            exclude_kinds.contains(&r.kind)
                || *i >= recent_floor
                || r.kind.is_marker()
                || saga_lineage::carries_lineage(r)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Partition the complement of the protected set into contiguous chunks
/// of at most `max_lines` indices.
pub fn partition_chunks(
    total: usize,
    protected: &ProtectedIndexSet,
    max_lines: usize,
) -> Vec<Chunk> {
    let max_lines = max_lines.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for i in 0..total {
        if protected.contains(&i) {
            if !current.is_empty() {
                chunks.push(Chunk {
                    indices: std::mem::take(&mut current),
                });
            }
            continue;
        }
        if let Some(&last) = current.last() {
            if i != last + 1 || current.len() >= max_lines {
                chunks.push(Chunk {
                    indices: std::mem::take(&mut current),
                });
            }
        }
        current.push(i);
    }
    if !current.is_empty() {
        chunks.push(Chunk { indices: current });
    }
    chunks
}
