use saga_core::{
    ContentBlock, Derivation, DerivationKind, DerivationStats, LineageEdge, Placeholder, Record,
    RecordKind, SagaError, Session,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Which tool names qualify for tool-result trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFilter {
    All,
    Named(BTreeSet<String>),
}

impl ToolFilter {
    pub fn named<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        ToolFilter::Named(names.into_iter().map(Into::into).collect())
    }

    fn matches(&self, tool_name: Option<&str>) -> bool {
        match self {
            ToolFilter::All => true,
            // A result whose invoking tool cannot be resolved never
            // matches a named filter.
            ToolFilter::Named(names) => {
                tool_name.map(|n| names.contains(n)).unwrap_or(false)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrimOptions {
    pub tool_types: ToolFilter,
    /// Tool results longer than this are trimmed; 0 trims every matching
    /// result regardless of length.
    pub threshold_chars: usize,
    /// Assistant records to trim, counted in document order: first N when
    /// N ≥ 0, all but the last |N| when N < 0, none when 0.
    pub assistant_policy: i64,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            tool_types: ToolFilter::All,
            threshold_chars: crate::env_usize("SAGA_TRIM_THRESHOLD_CHARS", 500),
            assistant_policy: 0,
        }
    }
}

// ── Candidate selection ──

// call-id → tool name, built over tool_use blocks in document order.
fn tool_name_map(session: &Session) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for record in &session.records {
        for block in record.content.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                map.insert(id.clone(), name.clone());
            }
        }
    }
    map
}

fn over_threshold(len: usize, threshold: usize) -> bool {
    threshold == 0 || len > threshold
}

// Tool-result block positions to redact, per record index.
fn tool_result_candidates(
    session: &Session,
    opts: &TrimOptions,
) -> BTreeMap<usize, Vec<usize>> {
    let names = tool_name_map(session);
    let mut out: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, record) in session.records.iter().enumerate() {
        for (pos, block) in record.content.blocks().iter().enumerate() {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            else {
                continue;
            };
            if let Some(text) = content.as_str() {
                if Placeholder::is_placeholder(text) {
                    continue;
                }
            }
            let tool_name = names.get(tool_use_id).map(|s| s.as_str());
            if opts.tool_types.matches(tool_name)
                && over_threshold(block.payload_chars(), opts.threshold_chars)
            {
                out.entry(idx).or_default().push(pos);
            }
        }
    }
    out
}

// Assistant record indices selected by the policy, document order.
fn assistant_candidates(session: &Session, policy: i64) -> BTreeSet<usize> {
    let assistants: Vec<usize> = session
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.kind == RecordKind::Assistant)
        .map(|(i, _)| i)
        .collect();
    match policy {
        0 => BTreeSet::new(),
        n if n > 0 => assistants.iter().take(n as usize).copied().collect(),
        n => {
            let keep = n.unsigned_abs() as usize;
            let cut = assistants.len().saturating_sub(keep);
            assistants.iter().take(cut).copied().collect()
        }
    }
}

// ── Application ──

/// Deterministic threshold trim: pure transformation, identical record
/// count and order, placeholders in place of trimmed content.
pub fn apply_trim(session: &Session, opts: &TrimOptions) -> (Vec<Record>, DerivationStats) {
    let tool_blocks = tool_result_candidates(session, opts);
    let assistants = assistant_candidates(session, opts.assistant_policy);
    debug!(
        tool_records = tool_blocks.len(),
        assistant_records = assistants.len(),
        "trim candidates selected"
    );

    let mut stats = DerivationStats {
        records_total: session.record_count(),
        ..Default::default()
    };
    let records = session
        .records
        .iter()
        .map(|record| {
            let idx = record.index;
            if let Some(positions) = tool_blocks.get(&idx) {
                if let Some((redacted, saved)) =
                    record.redact_tool_results(session.family, positions, &session.path)
                {
                    stats.lines_redacted += 1;
                    stats.chars_saved += saved;
                    return redacted;
                }
            }
            if assistants.contains(&idx) && !already_placeholder(record) {
                if let Some((redacted, saved)) =
                    record.redact_content(session.family, &session.path)
                {
                    stats.lines_redacted += 1;
                    stats.chars_saved += saved;
                    return redacted;
                }
            }
            record.clone()
        })
        .collect();
    (records, stats)
}

/// Placeholder substitution over an arbitrary index set. Smart trim runs
/// its merged result through this so both trim paths redact identically:
/// tool-result bodies block-wise, prose whole.
pub fn apply_redactions(
    session: &Session,
    indices: &BTreeSet<usize>,
) -> (Vec<Record>, DerivationStats) {
    let mut stats = DerivationStats {
        records_total: session.record_count(),
        ..Default::default()
    };
    let records = session
        .records
        .iter()
        .map(|record| {
            if !indices.contains(&record.index) || already_placeholder(record) {
                return record.clone();
            }
            let blocks = record.content.blocks();
            let has_tool_results = blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
            let redacted = if has_tool_results {
                // Only results not already holding a placeholder; a fully
                // redacted carrier is left alone, its placeholders keep
                // citing the true original.
                let fresh: Vec<usize> = blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| match b {
                        ContentBlock::ToolResult { content, .. } => content
                            .as_str()
                            .map(|t| !Placeholder::is_placeholder(t))
                            .unwrap_or(true),
                        _ => false,
                    })
                    .map(|(pos, _)| pos)
                    .collect();
                if fresh.is_empty() {
                    None
                } else {
                    record.redact_tool_results(session.family, &fresh, &session.path)
                }
            } else {
                record.redact_content(session.family, &session.path)
            };
            match redacted {
                Some((redacted, saved)) => {
                    stats.lines_redacted += 1;
                    stats.chars_saved += saved;
                    redacted
                }
                None => record.clone(),
            }
        })
        .collect();
    (records, stats)
}

fn already_placeholder(record: &Record) -> bool {
    record
        .content
        .first_text()
        .map(Placeholder::is_placeholder)
        .unwrap_or(false)
}

/// Full deterministic trim: transform, inject lineage, persist atomically.
pub fn run_trim(session: &Session, opts: &TrimOptions) -> Result<Derivation, SagaError> {
    let (records, stats) = apply_trim(session, opts);
    let transformed = Session {
        records,
        ..session.clone()
    };
    let records =
        saga_lineage::inject_chain(&transformed, &session.path, DerivationKind::Trim)?;
    let written =
        saga_store::write_derivation(session.family, &records, session.storage_dir())?;
    Ok(Derivation {
        edge: LineageEdge::new(&written.session_id, session.path.clone(), DerivationKind::Trim),
        new_path: written.path,
        stats,
        warnings: Vec::new(),
    })
}
