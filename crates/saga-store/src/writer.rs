use saga_core::{AgentFamily, Record, SagaError};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// A derivation persisted to disk.
#[derive(Debug, Clone)]
pub struct WrittenSession {
    pub path: PathBuf,
    pub session_id: String,
}

/// Single write path shared by every derivation producer.
///
/// Assigns a fresh session id, rebinds the records to it, serializes to a
/// temp file in `target_dir`, re-validates the temp file with the same
/// checks as [`crate::parse`], and only then renames into place. On any
/// failure the temp file is dropped and the final path is never created.
pub fn write_derivation(
    family: AgentFamily,
    records: &[Record],
    target_dir: &Path,
) -> Result<WrittenSession, SagaError> {
    let session_id = Uuid::new_v4().to_string();
    let final_path = target_dir.join(derived_file_name(family, &session_id));
    debug!(
        family = family.as_str(),
        records = records.len(),
        path = %final_path.display(),
        "writing derivation"
    );

    std::fs::create_dir_all(target_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(target_dir)?;
    for record in records {
        let line = match record.raw_json() {
            Some(v) => rebind_session_id(family, v, &session_id).to_string(),
            // Malformed lines pass through byte for byte.
            None => record.wire_line(),
        };
        writeln!(tmp, "{line}")?;
    }
    tmp.flush()?;

    if !crate::is_valid(tmp.path()) {
        // NamedTempFile cleans itself up on drop.
        return Err(SagaError::write_failure(format!(
            "derived session failed validation, {} not written",
            final_path.display()
        )));
    }

    tmp.persist(&final_path)
        .map_err(|e| SagaError::write_failure(format!("persist failed: {e}")))?;
    info!(
        session_id = %session_id,
        path = %final_path.display(),
        "derivation written"
    );
    Ok(WrittenSession {
        path: final_path,
        session_id,
    })
}

fn derived_file_name(family: AgentFamily, session_id: &str) -> String {
    match family {
        AgentFamily::ClaudeCode => format!("{session_id}.jsonl"),
        AgentFamily::Codex => {
            let now = time::OffsetDateTime::now_utc();
            format!(
                "rollout-{:04}-{:02}-{:02}T{:02}-{:02}-{:02}-{session_id}.jsonl",
                now.year(),
                now.month() as u8,
                now.day(),
                now.hour(),
                now.minute(),
                now.second()
            )
        }
    }
}

// Rebind a wire object to the new session identity. Only identity fields
// change; everything else is carried verbatim.
fn rebind_session_id(family: AgentFamily, v: &Value, session_id: &str) -> Value {
    let mut v = v.clone();
    match family {
        AgentFamily::ClaudeCode => {
            if let Some(obj) = v.as_object_mut() {
                if obj.contains_key("sessionId") || obj.contains_key("message") {
                    obj.insert("sessionId".into(), Value::String(session_id.to_string()));
                }
            }
        }
        AgentFamily::Codex => {
            if v.get("type").and_then(|t| t.as_str()) == Some("session_meta") {
                if let Some(payload) = v.get_mut("payload").and_then(|p| p.as_object_mut()) {
                    payload.insert("id".into(), Value::String(session_id.to_string()));
                }
            }
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_records(lines: &[&str]) -> Vec<Record> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| Record::from_wire(AgentFamily::ClaudeCode, i, l))
            .collect()
    }

    #[test]
    fn written_session_passes_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let records = claude_records(&[
            r#"{"type":"user","uuid":"u1","sessionId":"old","message":{"role":"user","content":"hi"}}"#,
            r#"{"type":"assistant","uuid":"a1","sessionId":"old","message":{"role":"assistant","content":[{"type":"text","text":"ok"}]}}"#,
        ]);
        let written = write_derivation(AgentFamily::ClaudeCode, &records, tmp.path()).unwrap();
        assert!(crate::is_valid(&written.path));

        let parsed = crate::parse(&written.path).unwrap();
        assert_eq!(parsed.session_id, written.session_id);
        assert_ne!(parsed.session_id, "old");
        assert_eq!(parsed.record_count(), 2);
    }

    #[test]
    fn fresh_id_per_write() {
        let tmp = tempfile::tempdir().unwrap();
        let records = claude_records(&[
            r#"{"type":"user","uuid":"u1","sessionId":"old","message":{"role":"user","content":"hi"}}"#,
        ]);
        let a = write_derivation(AgentFamily::ClaudeCode, &records, tmp.path()).unwrap();
        let b = write_derivation(AgentFamily::ClaudeCode, &records, tmp.path()).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn invalid_output_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        // A lone snapshot record produces a marker-only session, which
        // fails validation.
        let records = claude_records(&[
            r#"{"type":"file-history-snapshot","sessionId":"old","messageId":"m1","snapshot":{}}"#,
        ]);
        let err = write_derivation(AgentFamily::ClaudeCode, &records, tmp.path()).unwrap_err();
        assert!(matches!(err, SagaError::DerivationWriteFailure { .. }));
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "jsonl").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn codex_write_rebinds_meta_only() {
        let tmp = tempfile::tempdir().unwrap();
        let records: Vec<Record> = [
            r#"{"timestamp":"t","type":"session_meta","payload":{"id":"old","cwd":"/w"}}"#,
            r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"hi"}]}}"#,
        ]
        .iter()
        .enumerate()
        .map(|(i, l)| Record::from_wire(AgentFamily::Codex, i, l))
        .collect();
        let written = write_derivation(AgentFamily::Codex, &records, tmp.path()).unwrap();
        assert!(written
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("rollout-"));
        let parsed = crate::parse(&written.path).unwrap();
        assert_eq!(parsed.session_id, written.session_id);
    }
}
