use saga_core::{AgentFamily, Record, RecordKind, SagaError, Session};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Parse and validate a session file.
///
/// Fails with [`SagaError::MalformedSession`] if the file is empty, the
/// first line is unparseable, the first line carries no session identity,
/// or the file holds nothing but marker records (no conversation to
/// resume).
pub fn parse(path: &Path) -> Result<Session, SagaError> {
    let text = fs::read_to_string(path)?;
    let family = detect_family(path, &text)?;

    let first_line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| SagaError::malformed(path, "empty file"))?;
    let first: Value = serde_json::from_str(first_line)
        .map_err(|e| SagaError::malformed(path, format!("first line unparseable: {e}")))?;

    let session_id = first_line_session_id(family, &first)
        .ok_or_else(|| SagaError::malformed(path, "first line lacks a session id"))?;

    let records: Vec<Record> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| Record::from_wire(family, i, line))
        .collect();

    if !records.iter().any(|r| !r.kind.is_marker()) {
        return Err(SagaError::malformed(
            path,
            "no conversation content, only marker records",
        ));
    }

    let cwd = records.iter().find_map(|r| r.cwd.clone());
    let branch = records.iter().find_map(|r| r.branch.clone());

    Ok(Session {
        path: path.to_path_buf(),
        family,
        session_id,
        records,
        cwd,
        branch,
    })
}

/// Pure validity predicate over the same checks as [`parse`]. Used as the
/// post-condition gate after every derivation write.
pub fn is_valid(path: &Path) -> bool {
    parse(path).is_ok()
}

/// Infer the agent family from structural cues in the record set.
pub fn agent_family(path: &Path) -> Result<AgentFamily, SagaError> {
    let text = fs::read_to_string(path)?;
    detect_family(path, &text)
}

// Structural detection, never path-based: codex rollouts wrap every line in
// a typed envelope (`session_meta` / `response_item`); claude-code records
// carry `uuid`/`sessionId` fields or claude-only type tags. A file with no
// parseable line is malformed, not "some family".
fn detect_family(path: &Path, text: &str) -> Result<AgentFamily, SagaError> {
    const PROBE_LINES: usize = 25;

    let mut saw_parseable = false;
    for line in text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(PROBE_LINES)
    {
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        saw_parseable = true;
        let type_tag = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match type_tag {
            "session_meta" | "response_item" | "event_msg" | "turn_context" | "compacted" => {
                return Ok(AgentFamily::Codex)
            }
            "summary" | "file-history-snapshot" | "queue-operation" => {
                return Ok(AgentFamily::ClaudeCode)
            }
            _ => {}
        }
        if v.get("uuid").is_some() || v.get("sessionId").is_some() {
            return Ok(AgentFamily::ClaudeCode);
        }
    }

    if !saw_parseable {
        return Err(SagaError::malformed(path, "no parseable records"));
    }
    Err(SagaError::UnknownAgentFamily {
        path: path.to_path_buf(),
    })
}

fn first_line_session_id(family: AgentFamily, first: &Value) -> Option<String> {
    match family {
        AgentFamily::ClaudeCode => first
            .get("sessionId")
            .and_then(|s| s.as_str())
            .map(String::from),
        AgentFamily::Codex => first
            .get("payload")
            .and_then(|p| p.get("id"))
            .and_then(|s| s.as_str())
            .map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_session(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn parse_claude_session() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "s.jsonl",
            &[
                r#"{"type":"user","uuid":"u1","sessionId":"sess-1","cwd":"/w","gitBranch":"main","message":{"role":"user","content":"hi"}}"#,
                r#"{"type":"assistant","uuid":"a1","parentUuid":"u1","sessionId":"sess-1","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#,
            ],
        );
        let session = parse(&path).unwrap();
        assert_eq!(session.family, AgentFamily::ClaudeCode);
        assert_eq!(session.session_id, "sess-1");
        assert_eq!(session.record_count(), 2);
        assert_eq!(session.cwd.as_deref(), Some("/w"));
        assert_eq!(session.branch.as_deref(), Some("main"));
        assert!(is_valid(&path));
    }

    #[test]
    fn parse_codex_session() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "rollout-x.jsonl",
            &[
                r#"{"timestamp":"t","type":"session_meta","payload":{"id":"abc","cwd":"/w","git":{"branch":"dev"}}}"#,
                r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"hi"}]}}"#,
            ],
        );
        let session = parse(&path).unwrap();
        assert_eq!(session.family, AgentFamily::Codex);
        assert_eq!(session.session_id, "abc");
        assert_eq!(session.branch.as_deref(), Some("dev"));
    }

    #[test]
    fn empty_file_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(tmp.path(), "e.jsonl", &[]);
        assert!(matches!(
            parse(&path),
            Err(SagaError::MalformedSession { .. })
        ));
        assert!(!is_valid(&path));
    }

    #[test]
    fn unparseable_first_line_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "bad.jsonl",
            &[
                "garbage not json",
                r#"{"type":"user","uuid":"u1","sessionId":"s","message":{"role":"user","content":"hi"}}"#,
            ],
        );
        assert!(matches!(
            parse(&path),
            Err(SagaError::MalformedSession { .. })
        ));
    }

    #[test]
    fn missing_session_id_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "noid.jsonl",
            &[r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"hi"}}"#],
        );
        assert!(matches!(
            parse(&path),
            Err(SagaError::MalformedSession { .. })
        ));
    }

    #[test]
    fn marker_only_session_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "snap.jsonl",
            &[r#"{"type":"file-history-snapshot","sessionId":"s1","messageId":"m1","snapshot":{}}"#],
        );
        assert!(matches!(
            parse(&path),
            Err(SagaError::MalformedSession { .. })
        ));
    }

    #[test]
    fn family_detection_is_structural() {
        let tmp = tempfile::tempdir().unwrap();
        // codex content in a file named like a claude session
        let path = write_session(
            tmp.path(),
            "0f2c-claude-looking.jsonl",
            &[r#"{"timestamp":"t","type":"session_meta","payload":{"id":"abc"}}"#],
        );
        assert_eq!(agent_family(&path).unwrap(), AgentFamily::Codex);
    }

    #[test]
    fn unknown_family_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(tmp.path(), "other.jsonl", &[r#"{"role":"user","text":"hi"}"#]);
        assert!(matches!(
            agent_family(&path),
            Err(SagaError::UnknownAgentFamily { .. })
        ));
    }

    #[test]
    fn malformed_file_never_classified() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(tmp.path(), "junk.jsonl", &["%%%", "^^^"]);
        assert!(matches!(
            agent_family(&path),
            Err(SagaError::MalformedSession { .. })
        ));
    }

    #[test]
    fn malformed_middle_lines_survive_parse() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_session(
            tmp.path(),
            "mixed.jsonl",
            &[
                r#"{"type":"user","uuid":"u1","sessionId":"s","message":{"role":"user","content":"hi"}}"#,
                "{broken",
                r#"{"type":"assistant","uuid":"a1","sessionId":"s","message":{"role":"assistant","content":[{"type":"text","text":"ok"}]}}"#,
            ],
        );
        let session = parse(&path).unwrap();
        assert_eq!(session.record_count(), 3);
        assert!(session.records[1].is_malformed());
        assert_eq!(session.records[1].wire_line(), "{broken");
    }
}
