//! Rollover: seed a fresh session that carries the full ancestor chain of
//! the one it replaces, optionally with extracted context. Also the two
//! whole-copy derivations, clone and continue.

use saga_agent::{extraction_prompt, ContextSummarizer};
use saga_core::{
    now_rfc3339, AgentFamily, Derivation, DerivationKind, DerivationStats, LineageEdge, Record,
    SagaError, Session, Warning,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverMode {
    /// Lineage-only seed; no collaborator call.
    Quick,
    /// Lineage seed plus extracted context from the summarization
    /// collaborator. Degrades to quick on failure.
    Context,
}

#[derive(Debug, Clone)]
pub struct RolloverOptions {
    pub mode: RolloverMode,
    pub target_family: AgentFamily,
    /// Extra instructions appended to the fixed extraction prompt, never
    /// substituted for it.
    pub custom_prompt: Option<String>,
    /// Where to write the new session. Defaults to the parent's own
    /// directory so indexers find it alongside its family.
    pub target_dir: Option<PathBuf>,
}

impl RolloverOptions {
    pub fn quick(target_family: AgentFamily) -> Self {
        Self {
            mode: RolloverMode::Quick,
            target_family,
            custom_prompt: None,
            target_dir: None,
        }
    }

    pub fn context(target_family: AgentFamily) -> Self {
        Self {
            mode: RolloverMode::Context,
            target_family,
            custom_prompt: None,
            target_dir: None,
        }
    }
}

/// Build and persist a rollover session.
///
/// The new session's chain is the parent's chain plus the parent's own
/// path — full history, never truncated to one hop. `summarizer` is only
/// consulted in context mode.
pub async fn rollover(
    session: &Session,
    summarizer: Option<Arc<dyn ContextSummarizer>>,
    opts: &RolloverOptions,
) -> Result<Derivation, SagaError> {
    let mut chain = saga_lineage::build_chain(session);
    if chain.contains(&session.path) {
        return Err(SagaError::LineageCycleDetected {
            path: session.path.clone(),
        });
    }
    chain.push(session.path.clone());

    let mut warnings = Vec::new();
    let (kind, context_text) = match opts.mode {
        RolloverMode::Quick => (DerivationKind::RolloverQuick, None),
        RolloverMode::Context => {
            match summarize_session(session, summarizer, opts.custom_prompt.as_deref()).await {
                Ok(text) => (DerivationKind::RolloverContext, Some(text)),
                Err(e) => {
                    warn!(error = %e, "context extraction failed, degrading to quick rollover");
                    warnings.push(Warning::general(format!(
                        "context extraction failed, rolled over without context: {e}"
                    )));
                    (DerivationKind::RolloverQuick, None)
                }
            }
        }
    };

    let block = saga_lineage::render_block(kind, &chain);
    let records = seed_records(
        opts.target_family,
        session,
        &block,
        context_text.as_deref(),
    );
    let target_dir = opts
        .target_dir
        .clone()
        .unwrap_or_else(|| session.storage_dir().to_path_buf());
    let written = saga_store::write_derivation(opts.target_family, &records, &target_dir)?;
    debug!(chain_len = chain.len(), kind = kind.as_str(), "rollover written");
    Ok(Derivation {
        edge: LineageEdge::new(&written.session_id, session.path.clone(), kind),
        new_path: written.path,
        stats: DerivationStats {
            records_total: records.len(),
            ..Default::default()
        },
        warnings,
    })
}

async fn summarize_session(
    session: &Session,
    summarizer: Option<Arc<dyn ContextSummarizer>>,
    custom: Option<&str>,
) -> anyhow::Result<String> {
    let summarizer = summarizer.ok_or_else(|| anyhow::anyhow!("no summarizer configured"))?;
    let mut prompt = extraction_prompt(custom);
    prompt.push_str("\n\n--- session log ---\n");
    for record in &session.records {
        prompt.push_str(&record.wire_line());
        prompt.push('\n');
    }
    summarizer.summarize(&prompt).await
}

// Seed records for the new session. The writer rebinds the session id;
// the placeholder id here only has to parse.
fn seed_records(
    family: AgentFamily,
    parent: &Session,
    lineage_block: &str,
    context: Option<&str>,
) -> Vec<Record> {
    let ts = now_rfc3339();
    match family {
        AgentFamily::ClaudeCode => {
            let mut blocks = vec![json!({ "type": "text", "text": lineage_block })];
            if let Some(context) = context {
                blocks.push(json!({ "type": "text", "text": context }));
            }
            let record = json!({
                "type": "user",
                "uuid": Uuid::new_v4().to_string(),
                "parentUuid": null,
                "sessionId": "pending",
                "timestamp": ts,
                "cwd": parent.cwd.clone().unwrap_or_default(),
                "gitBranch": parent.branch.clone().unwrap_or_default(),
                "message": { "role": "user", "content": blocks },
            });
            vec![Record::from_value(family, 0, record)]
        }
        AgentFamily::Codex => {
            let meta = json!({
                "timestamp": ts,
                "type": "session_meta",
                "payload": {
                    "id": "pending",
                    "timestamp": ts,
                    "cwd": parent.cwd.clone().unwrap_or_default(),
                    "originator": "saga",
                    "git": { "branch": parent.branch.clone().unwrap_or_default() },
                },
            });
            let mut blocks = vec![json!({ "type": "input_text", "text": lineage_block })];
            if let Some(context) = context {
                blocks.push(json!({ "type": "input_text", "text": context }));
            }
            let message = json!({
                "timestamp": ts,
                "type": "response_item",
                "payload": { "type": "message", "role": "user", "content": blocks },
            });
            vec![
                Record::from_value(family, 0, meta),
                Record::from_value(family, 1, message),
            ]
        }
    }
}

// ── Whole-copy derivations ──

/// Exact copy of the parent under a fresh id, chain extended by one.
pub fn clone_session(session: &Session) -> Result<Derivation, SagaError> {
    copy_derivation(session, DerivationKind::Clone)
}

/// Copy intended to be resumed by the agent; identical mechanics to
/// clone, distinct kind so tooling can tell intent apart.
pub fn continue_session(session: &Session) -> Result<Derivation, SagaError> {
    copy_derivation(session, DerivationKind::Continue)
}

fn copy_derivation(session: &Session, kind: DerivationKind) -> Result<Derivation, SagaError> {
    let records = saga_lineage::inject_chain(session, &session.path, kind)?;
    let written = saga_store::write_derivation(session.family, &records, session.storage_dir())?;
    Ok(Derivation {
        edge: LineageEdge::new(&written.session_id, session.path.clone(), kind),
        new_path: written.path,
        stats: DerivationStats {
            records_total: records.len(),
            ..Default::default()
        },
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_agent::{MockCollaborator, Scripted};
    use std::io::Write;
    use std::path::Path;

    fn parent_session(dir: &Path, chain: &[&str]) -> Session {
        let path = dir.join("parent.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"{{"type":"user","uuid":"u1","sessionId":"s1","cwd":"/work","gitBranch":"main","message":{{"role":"user","content":"start"}}}}"#
        )
        .unwrap();
        writeln!(
            f,
            r#"{{"type":"assistant","uuid":"a1","sessionId":"s1","message":{{"role":"assistant","content":[{{"type":"text","text":"ok"}}]}}}}"#
        )
        .unwrap();
        drop(f);
        let mut session = saga_store::parse(&path).unwrap();
        // Embed an existing chain to simulate a derived parent.
        for ancestor in chain {
            let records =
                saga_lineage::inject_chain(&session, Path::new(ancestor), DerivationKind::Trim)
                    .unwrap();
            session = Session { records, ..session };
        }
        session
    }

    #[tokio::test]
    async fn quick_rollover_extends_chain_without_collaborator() {
        let tmp = tempfile::tempdir().unwrap();
        // Scenario: existing chain has 2 entries.
        let session = parent_session(tmp.path(), &["/old/a.jsonl", "/old/b.jsonl"]);
        let mock = Arc::new(MockCollaborator::scripted(vec![Scripted::Fail(
            "must not be called".into(),
        )]));
        let opts = RolloverOptions {
            target_dir: Some(tmp.path().to_path_buf()),
            ..RolloverOptions::quick(AgentFamily::ClaudeCode)
        };
        let derivation = rollover(&session, Some(mock), &opts).await.unwrap();

        assert_eq!(derivation.edge.kind, DerivationKind::RolloverQuick);
        assert!(derivation.warnings.is_empty());
        let derived = saga_store::parse(&derivation.new_path).unwrap();
        let chain = saga_lineage::build_chain(&derived);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2], session.path);
        assert_eq!(chain[0], PathBuf::from("/old/a.jsonl"));
    }

    #[tokio::test]
    async fn context_rollover_inserts_summary_after_lineage() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let mock = Arc::new(MockCollaborator::scripted(vec![Scripted::Text(
            "goal: finish the parser".into(),
        )]));
        let opts = RolloverOptions {
            target_dir: Some(tmp.path().to_path_buf()),
            ..RolloverOptions::context(AgentFamily::ClaudeCode)
        };
        let derivation = rollover(&session, Some(mock), &opts).await.unwrap();

        assert_eq!(derivation.edge.kind, DerivationKind::RolloverContext);
        let derived = saga_store::parse(&derivation.new_path).unwrap();
        let blocks = derived.records[0].content.blocks().to_vec();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            &blocks[0],
            saga_core::ContentBlock::Text { text } if text.starts_with(saga_lineage::LINEAGE_HEADER)
        ));
        assert!(matches!(
            &blocks[1],
            saga_core::ContentBlock::Text { text } if text == "goal: finish the parser"
        ));
    }

    #[tokio::test]
    async fn failed_summary_degrades_to_quick_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let mock = Arc::new(MockCollaborator::scripted(vec![Scripted::Fail(
            "model overloaded".into(),
        )]));
        let opts = RolloverOptions {
            target_dir: Some(tmp.path().to_path_buf()),
            ..RolloverOptions::context(AgentFamily::ClaudeCode)
        };
        let derivation = rollover(&session, Some(mock), &opts).await.unwrap();

        assert_eq!(derivation.edge.kind, DerivationKind::RolloverQuick);
        assert_eq!(derivation.warnings.len(), 1);
        assert!(derivation.warnings[0].reason.contains("model overloaded"));
        let derived = saga_store::parse(&derivation.new_path).unwrap();
        assert_eq!(derived.records[0].content.blocks().len(), 1);
    }

    #[tokio::test]
    async fn rollover_to_codex_family() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let opts = RolloverOptions {
            target_dir: Some(tmp.path().to_path_buf()),
            ..RolloverOptions::quick(AgentFamily::Codex)
        };
        let derivation = rollover(&session, None, &opts).await.unwrap();

        let derived = saga_store::parse(&derivation.new_path).unwrap();
        assert_eq!(derived.family, AgentFamily::Codex);
        assert_eq!(derived.record_count(), 2);
        assert_eq!(
            saga_lineage::build_chain(&derived),
            vec![session.path.clone()]
        );
        assert_eq!(derived.cwd.as_deref(), Some("/work"));
    }

    #[tokio::test]
    async fn repeated_rollover_grows_chain_by_one_each_time() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let opts = RolloverOptions {
            target_dir: Some(tmp.path().to_path_buf()),
            ..RolloverOptions::quick(AgentFamily::ClaudeCode)
        };
        let first = rollover(&session, None, &opts).await.unwrap();
        let second = rollover(&session, None, &opts).await.unwrap();
        let c1 = saga_lineage::build_chain(&saga_store::parse(&first.new_path).unwrap());
        let c2 = saga_lineage::build_chain(&saga_store::parse(&second.new_path).unwrap());
        assert_eq!(c1.len(), 1);
        assert_eq!(c2.len(), 1);
        assert_ne!(first.new_path, second.new_path);
    }

    #[test]
    fn clone_copies_every_record() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let derivation = clone_session(&session).unwrap();
        assert_eq!(derivation.edge.kind, DerivationKind::Clone);
        let derived = saga_store::parse(&derivation.new_path).unwrap();
        assert_eq!(derived.record_count(), session.record_count());
        assert_eq!(
            saga_lineage::build_chain(&derived),
            vec![session.path.clone()]
        );
        assert_ne!(derived.session_id, session.session_id);
    }

    #[test]
    fn continue_records_distinct_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let session = parent_session(tmp.path(), &[]);
        let derivation = continue_session(&session).unwrap();
        assert_eq!(derivation.edge.kind, DerivationKind::Continue);
        assert_eq!(
            saga_lineage::derivation_kind(&derivation.new_path),
            Some(DerivationKind::Continue)
        );
    }
}
