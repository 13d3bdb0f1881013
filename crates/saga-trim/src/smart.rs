use crate::chunk::{partition_chunks, protected_indices, Chunk, ProtectedIndexSet};
use crate::engine::apply_redactions;
use saga_agent::{classification_prompt, ChunkClassifier, CliCollaborator};
use saga_core::{
    Derivation, DerivationKind, LineageEdge, RecordKind, SagaError, Session, Warning,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SmartTrimOptions {
    /// Record kinds never offered for redaction. Default: user records
    /// (actual human inputs; tool-result carriers stay eligible).
    pub exclude_kinds: HashSet<RecordKind>,
    /// The trailing window of records that is always protected.
    pub preserve_recent: usize,
    pub max_lines_per_chunk: usize,
    /// Concurrent classification calls in flight at once.
    pub concurrency: usize,
    /// One overall deadline for the whole fan-out; chunks still running
    /// when it expires are treated as failed.
    pub timeout: Duration,
}

impl Default for SmartTrimOptions {
    fn default() -> Self {
        Self {
            exclude_kinds: [RecordKind::User].into_iter().collect(),
            preserve_recent: crate::env_usize("SAGA_SMART_PRESERVE_RECENT", 10),
            max_lines_per_chunk: crate::env_usize("SAGA_SMART_CHUNK_LINES", 100),
            concurrency: crate::env_usize("SAGA_SMART_CONCURRENCY", 4),
            timeout: Duration::from_secs(crate::env_usize("SAGA_SMART_TIMEOUT_SEC", 120) as u64),
        }
    }
}

/// Classification fan-out: one task per chunk, join-all, fail-safe merge.
///
/// Failed, timed-out, or non-conforming chunks contribute the empty set
/// and a warning; the merged result is defensively re-filtered against
/// the protected set, whatever the chunks returned.
pub async fn classify_redactions(
    session: &Session,
    classifier: Arc<dyn ChunkClassifier>,
    opts: &SmartTrimOptions,
) -> (BTreeSet<usize>, Vec<Warning>) {
    let protected = protected_indices(session, &opts.exclude_kinds, opts.preserve_recent);
    let chunks = partition_chunks(
        session.record_count(),
        &protected,
        opts.max_lines_per_chunk,
    );
    debug!(
        chunks = chunks.len(),
        protected = protected.len(),
        "smart trim fan-out"
    );
    if chunks.is_empty() {
        return (BTreeSet::new(), Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks: JoinSet<((usize, usize), anyhow::Result<Vec<usize>>)> = JoinSet::new();
    let mut task_bounds: HashMap<tokio::task::Id, (usize, usize)> = HashMap::new();
    for chunk in &chunks {
        let bounds = chunk.bounds();
        let prompt = chunk_prompt(session, chunk);
        let classifier = Arc::clone(&classifier);
        let semaphore = Arc::clone(&semaphore);
        let handle = tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (bounds, classifier.classify_chunk(&prompt).await)
        });
        task_bounds.insert(handle.id(), bounds);
    }

    // Join-all under one overall deadline. Dropping the JoinSet at
    // timeout aborts whatever is still running.
    let mut settled = Vec::new();
    let deadline = tokio::time::sleep(opts.timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            joined = tasks.join_next_with_id() => {
                match joined {
                    Some(Ok((_, result))) => settled.push(result),
                    Some(Err(join_err)) => {
                        warn!(error = %join_err, "classification task panicked");
                        if let Some(&bounds) = task_bounds.get(&join_err.id()) {
                            settled.push((
                                bounds,
                                Err(anyhow::anyhow!("classification task panicked: {join_err}")),
                            ));
                        }
                    }
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }
    drop(tasks);

    let mut redact = BTreeSet::new();
    let mut warnings = Vec::new();
    let settled_bounds: HashSet<(usize, usize)> =
        settled.iter().map(|(bounds, _)| *bounds).collect();
    for chunk in &chunks {
        if !settled_bounds.contains(&chunk.bounds()) {
            let (lo, hi) = chunk.bounds();
            warnings.push(Warning::chunk(lo, hi, "timeout"));
        }
    }
    for (bounds, result) in settled {
        match result {
            Ok(indices) => {
                for idx in indices {
                    // Defensive re-filter: a chunk is never trusted to
                    // respect protection or its own bounds.
                    if idx < session.record_count() && !protected.contains(&idx) {
                        redact.insert(idx);
                    } else {
                        debug!(idx, "dropping out-of-bounds or protected index from chunk reply");
                    }
                }
            }
            Err(e) => {
                warnings.push(Warning::chunk(bounds.0, bounds.1, e.to_string()));
            }
        }
    }
    (redact, warnings)
}

fn chunk_prompt(session: &Session, chunk: &Chunk) -> String {
    let lines: Vec<(usize, String)> = chunk
        .indices
        .iter()
        .map(|&i| (i, session.records[i].wire_line()))
        .collect();
    classification_prompt(&lines)
}

/// Full smart trim: fan-out classification, fail-safe merge, placeholder
/// substitution, lineage injection, atomic write.
pub async fn run_smart_trim(
    session: &Session,
    classifier: Arc<dyn ChunkClassifier>,
    opts: &SmartTrimOptions,
) -> Result<Derivation, SagaError> {
    let (indices, warnings) = classify_redactions(session, classifier, opts).await;
    let (records, stats) = apply_redactions(session, &indices);
    let transformed = Session {
        records,
        ..session.clone()
    };
    let records =
        saga_lineage::inject_chain(&transformed, &session.path, DerivationKind::SmartTrim)?;
    let written =
        saga_store::write_derivation(session.family, &records, session.storage_dir())?;
    Ok(Derivation {
        edge: LineageEdge::new(
            &written.session_id,
            session.path.clone(),
            DerivationKind::SmartTrim,
        ),
        new_path: written.path,
        stats,
        warnings,
    })
}

/// Smart trim against the real agent CLI. Fails up front with
/// [`SagaError::ClassificationUnavailable`] when the collaborator binary
/// cannot be reached — the only fatal classification error.
pub async fn run_smart_trim_with_cli(
    session: &Session,
    opts: &SmartTrimOptions,
) -> Result<Derivation, SagaError> {
    let collaborator = CliCollaborator::new();
    collaborator
        .verify_available()
        .map_err(|e| SagaError::ClassificationUnavailable {
            reason: e.to_string(),
        })?;
    run_smart_trim(session, Arc::new(collaborator), opts).await
}
