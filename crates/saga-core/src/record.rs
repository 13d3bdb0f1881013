use crate::placeholder::Placeholder;
use crate::session::AgentFamily;
use serde_json::{json, Value};
use std::path::Path;

// ── Record kinds ──

/// Wire-level record classification, unified across both agent families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    User,
    Assistant,
    System,
    Summary,
    /// A user-side record whose blocks carry tool results back to the
    /// model (claude `tool_result` blocks, codex `function_call_output`).
    ToolResultCarrier,
    FileHistorySnapshot,
    /// Codex rollout header line (`session_meta`).
    SessionMeta,
    /// Parseable JSON whose type tag matches neither schema. Preserved
    /// verbatim and never a trim candidate.
    Unknown,
    /// Unparseable line. Preserved verbatim, byte for byte.
    Malformed,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::User => "user",
            RecordKind::Assistant => "assistant",
            RecordKind::System => "system",
            RecordKind::Summary => "summary",
            RecordKind::ToolResultCarrier => "tool-result-carrier",
            RecordKind::FileHistorySnapshot => "file-history-snapshot",
            RecordKind::SessionMeta => "session-meta",
            RecordKind::Unknown => "unknown",
            RecordKind::Malformed => "malformed",
        }
    }

    /// Marker kinds carry bookkeeping, not conversation. A session made of
    /// nothing but these is not resumable and fails validation.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            RecordKind::FileHistorySnapshot
                | RecordKind::SessionMeta
                | RecordKind::Summary
                | RecordKind::Unknown
                | RecordKind::Malformed
        )
    }
}

// ── Content model ──

/// One typed block inside a record's content sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    /// Unrecognized block shape, preserved verbatim.
    Other(Value),
}

impl ContentBlock {
    /// Serialized length of the block's payload, used against trim
    /// thresholds and recorded in placeholders.
    pub fn payload_chars(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::Thinking { thinking } => thinking.len(),
            ContentBlock::ToolUse { input, .. } => input.to_string().len(),
            ContentBlock::ToolResult { content, .. } => match content {
                Value::String(s) => s.len(),
                other => other.to_string().len(),
            },
            ContentBlock::Other(v) => v.to_string().len(),
        }
    }
}

/// A record's content payload: legacy plain string, typed block sequence,
/// or absent (marker records).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Absent,
}

impl RecordContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            RecordContent::Blocks(b) => b,
            _ => &[],
        }
    }

    pub fn char_len(&self) -> usize {
        match self {
            RecordContent::Text(s) => s.len(),
            RecordContent::Blocks(b) => b.iter().map(|blk| blk.payload_chars()).sum(),
            RecordContent::Absent => 0,
        }
    }

    /// First text-block payload (or the plain string), if any.
    pub fn first_text(&self) -> Option<&str> {
        match self {
            RecordContent::Text(s) => Some(s.as_str()),
            RecordContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
            RecordContent::Absent => None,
        }
    }
}

// ── Record ──

#[derive(Debug, Clone, PartialEq)]
enum RawLine {
    Json(Value),
    /// Unparseable input, kept byte-for-byte so the line survives any
    /// number of derivations unchanged.
    Text(String),
}

/// One line of a session file: the full wire object plus parsed views.
///
/// The wire object is the source of truth. Transformations rewrite the
/// content payload inside it and re-derive the parsed views, so every
/// non-malformed record round-trips to the same wire shape with at most
/// its content replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub index: usize,
    pub kind: RecordKind,
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub branch: Option<String>,
    pub content: RecordContent,
    raw: RawLine,
}

impl Record {
    /// Parse one wire line. Never fails: an unparseable line becomes a
    /// `Malformed` record wrapping the original text.
    pub fn from_wire(family: AgentFamily, index: usize, line: &str) -> Record {
        let value: Value = match serde_json::from_str(line) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                return Record {
                    index,
                    kind: RecordKind::Malformed,
                    id: None,
                    parent_id: None,
                    session_id: None,
                    timestamp: None,
                    cwd: None,
                    branch: None,
                    content: RecordContent::Absent,
                    raw: RawLine::Text(line.to_string()),
                }
            }
        };
        match family {
            AgentFamily::ClaudeCode => Self::from_claude(index, value),
            AgentFamily::Codex => Self::from_codex(index, value),
        }
    }

    /// Rebuild a record from an already-modified wire object.
    pub fn from_value(family: AgentFamily, index: usize, value: Value) -> Record {
        match family {
            AgentFamily::ClaudeCode => Self::from_claude(index, value),
            AgentFamily::Codex => Self::from_codex(index, value),
        }
    }

    // ── claude-code schema ──
    //
    // One object per line: type/uuid/parentUuid/sessionId/timestamp/cwd/
    // gitBranch, content under message.content (string or block array).

    fn from_claude(index: usize, v: Value) -> Record {
        let type_tag = str_field(&v, "type");
        let content = parse_claude_content(&v);
        let kind = match type_tag.as_deref() {
            Some("user") => {
                if content
                    .blocks()
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
                {
                    RecordKind::ToolResultCarrier
                } else {
                    RecordKind::User
                }
            }
            Some("assistant") => RecordKind::Assistant,
            Some("system") => RecordKind::System,
            Some("summary") => RecordKind::Summary,
            Some("file-history-snapshot") => RecordKind::FileHistorySnapshot,
            _ => RecordKind::Unknown,
        };
        Record {
            index,
            kind,
            id: str_field(&v, "uuid"),
            parent_id: str_field(&v, "parentUuid"),
            session_id: str_field(&v, "sessionId"),
            timestamp: str_field(&v, "timestamp"),
            cwd: str_field(&v, "cwd"),
            branch: str_field(&v, "gitBranch"),
            content,
            raw: RawLine::Json(v),
        }
    }

    // ── codex rollout schema ──
    //
    // First line `session_meta` with payload.id; conversation lines are
    // `response_item` envelopes with typed payloads.

    fn from_codex(index: usize, v: Value) -> Record {
        let timestamp = str_field(&v, "timestamp");
        let payload = v.get("payload").cloned().unwrap_or(Value::Null);
        let (kind, id, session_id, cwd, branch, content) = match str_field(&v, "type").as_deref() {
            Some("session_meta") => (
                RecordKind::SessionMeta,
                None,
                str_field(&payload, "id"),
                str_field(&payload, "cwd"),
                payload
                    .get("git")
                    .and_then(|g| g.get("branch"))
                    .and_then(|b| b.as_str())
                    .map(String::from),
                RecordContent::Absent,
            ),
            Some("response_item") => {
                let (kind, content) = parse_codex_payload(&payload);
                (
                    kind,
                    str_field(&payload, "id"),
                    None,
                    None,
                    None,
                    content,
                )
            }
            _ => (RecordKind::Unknown, None, None, None, None, RecordContent::Absent),
        };
        Record {
            index,
            kind,
            id,
            parent_id: None,
            session_id,
            timestamp,
            cwd,
            branch,
            content,
            raw: RawLine::Json(v),
        }
    }

    /// The exact line to write back out.
    pub fn wire_line(&self) -> String {
        match &self.raw {
            RawLine::Json(v) => v.to_string(),
            RawLine::Text(s) => s.clone(),
        }
    }

    pub fn raw_json(&self) -> Option<&Value> {
        match &self.raw {
            RawLine::Json(v) => Some(v),
            RawLine::Text(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, RecordKind::Malformed)
    }

    // ── Redaction ──

    /// Replace the bodies of the given block positions (claude tool_result
    /// blocks / the codex function_call_output payload) with placeholders.
    /// Returns the rewritten record and the characters saved, or `None` if
    /// the record has no redactable shape at those positions.
    pub fn redact_tool_results(
        &self,
        family: AgentFamily,
        block_positions: &[usize],
        parent_path: &Path,
    ) -> Option<(Record, usize)> {
        let mut v = self.raw_json()?.clone();
        let before = v.to_string().len();
        let mut touched = false;
        match family {
            AgentFamily::ClaudeCode => {
                let blocks = v
                    .get_mut("message")
                    .and_then(|m| m.get_mut("content"))
                    .and_then(|c| c.as_array_mut())?;
                for &pos in block_positions {
                    let Some(block) = blocks.get_mut(pos) else {
                        continue;
                    };
                    if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                        continue;
                    }
                    let original = block.get("content").cloned().unwrap_or(Value::Null);
                    let chars = match &original {
                        Value::String(s) => s.len(),
                        other => other.to_string().len(),
                    };
                    let ph = Placeholder::new(chars, parent_path, self.index);
                    block
                        .as_object_mut()?
                        .insert("content".into(), Value::String(ph.render()));
                    touched = true;
                }
            }
            AgentFamily::Codex => {
                let payload = v.get_mut("payload")?;
                if payload.get("type").and_then(|t| t.as_str()) != Some("function_call_output") {
                    return None;
                }
                let original = payload.get("output").cloned().unwrap_or(Value::Null);
                let chars = match &original {
                    Value::String(s) => s.len(),
                    other => other.to_string().len(),
                };
                let ph = Placeholder::new(chars, parent_path, self.index);
                payload
                    .as_object_mut()?
                    .insert("output".into(), Value::String(ph.render()));
                touched = true;
            }
        }
        if !touched {
            return None;
        }
        let after = v.to_string().len();
        let rec = Record::from_value(family, self.index, v);
        Some((rec, before.saturating_sub(after)))
    }

    /// Replace the record's prose content with a placeholder.
    ///
    /// Tool-invocation blocks are kept: a later tool_result must still
    /// find its matching tool_use, or the derived session stops being
    /// resumable. The placeholder counts only the characters actually
    /// removed.
    pub fn redact_content(&self, family: AgentFamily, parent_path: &Path) -> Option<(Record, usize)> {
        let mut v = self.raw_json()?.clone();
        let before = v.to_string().len();
        let removed_chars: usize = match &self.content {
            RecordContent::Text(s) => s.len(),
            RecordContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| !matches!(b, ContentBlock::ToolUse { .. }))
                .map(|b| b.payload_chars())
                .sum(),
            RecordContent::Absent => 0,
        };
        let ph = Placeholder::new(removed_chars, parent_path, self.index);
        match family {
            AgentFamily::ClaudeCode => {
                let message = v.get_mut("message")?.as_object_mut()?;
                let replacement = match message.get("content") {
                    Some(Value::String(_)) => Value::String(ph.render()),
                    Some(Value::Array(items)) => {
                        let mut kept: Vec<Value> =
                            vec![json!({ "type": "text", "text": ph.render() })];
                        kept.extend(
                            items
                                .iter()
                                .filter(|b| {
                                    b.get("type").and_then(|t| t.as_str()) == Some("tool_use")
                                })
                                .cloned(),
                        );
                        Value::Array(kept)
                    }
                    _ => return None,
                };
                message.insert("content".into(), replacement);
            }
            AgentFamily::Codex => {
                let payload = v.get_mut("payload")?.as_object_mut()?;
                match payload.get("type").and_then(|t| t.as_str()) {
                    Some("message") => {
                        let tag = if payload.get("role").and_then(|r| r.as_str()) == Some("user") {
                            "input_text"
                        } else {
                            "output_text"
                        };
                        payload.insert(
                            "content".into(),
                            json!([{ "type": tag, "text": ph.render() }]),
                        );
                    }
                    Some("function_call_output") => {
                        payload.insert("output".into(), Value::String(ph.render()));
                    }
                    Some("reasoning") => {
                        payload.insert(
                            "summary".into(),
                            json!([{ "type": "summary_text", "text": ph.render() }]),
                        );
                    }
                    _ => return None,
                }
            }
        }
        let after = v.to_string().len();
        let rec = Record::from_value(family, self.index, v);
        Some((rec, before.saturating_sub(after)))
    }

    /// Swap in a new content payload (typed blocks) without placeholders.
    /// Used by lineage injection and rollover context insertion.
    pub fn with_wire_value(&self, family: AgentFamily, value: Value) -> Record {
        Record::from_value(family, self.index, value)
    }
}

// ── Wire parsing helpers ──

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(String::from)
}

fn parse_claude_content(v: &Value) -> RecordContent {
    match v.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(s)) => RecordContent::Text(s.clone()),
        Some(Value::Array(items)) => {
            RecordContent::Blocks(items.iter().map(parse_claude_block).collect())
        }
        _ => RecordContent::Absent,
    }
}

fn parse_claude_block(block: &Value) -> ContentBlock {
    match block.get("type").and_then(|t| t.as_str()) {
        Some("text") => ContentBlock::Text {
            text: str_field(block, "text").unwrap_or_default(),
        },
        Some("thinking") => ContentBlock::Thinking {
            thinking: str_field(block, "thinking").unwrap_or_default(),
        },
        Some("tool_use") => ContentBlock::ToolUse {
            id: str_field(block, "id").unwrap_or_default(),
            name: str_field(block, "name").unwrap_or_default(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        },
        Some("tool_result") => ContentBlock::ToolResult {
            tool_use_id: str_field(block, "tool_use_id").unwrap_or_default(),
            content: block.get("content").cloned().unwrap_or(Value::Null),
            is_error: block
                .get("is_error")
                .and_then(|e| e.as_bool())
                .unwrap_or(false),
        },
        _ => ContentBlock::Other(block.clone()),
    }
}

fn parse_codex_payload(payload: &Value) -> (RecordKind, RecordContent) {
    match payload.get("type").and_then(|t| t.as_str()) {
        Some("message") => {
            let kind = match payload.get("role").and_then(|r| r.as_str()) {
                Some("user") => RecordKind::User,
                Some("assistant") => RecordKind::Assistant,
                Some("system") | Some("developer") => RecordKind::System,
                _ => RecordKind::Unknown,
            };
            let blocks = payload
                .get("content")
                .and_then(|c| c.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|b| match b.get("type").and_then(|t| t.as_str()) {
                            Some("input_text") | Some("output_text") => ContentBlock::Text {
                                text: str_field(b, "text").unwrap_or_default(),
                            },
                            _ => ContentBlock::Other(b.clone()),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            (kind, RecordContent::Blocks(blocks))
        }
        Some("reasoning") => {
            let blocks = payload
                .get("summary")
                .and_then(|s| s.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|b| ContentBlock::Thinking {
                            thinking: str_field(b, "text").unwrap_or_default(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            (RecordKind::Assistant, RecordContent::Blocks(blocks))
        }
        Some("function_call") => {
            let block = ContentBlock::ToolUse {
                id: str_field(payload, "call_id").unwrap_or_default(),
                name: str_field(payload, "name").unwrap_or_default(),
                input: payload.get("arguments").cloned().unwrap_or(Value::Null),
            };
            (RecordKind::Assistant, RecordContent::Blocks(vec![block]))
        }
        Some("function_call_output") => {
            let block = ContentBlock::ToolResult {
                tool_use_id: str_field(payload, "call_id").unwrap_or_default(),
                content: payload.get("output").cloned().unwrap_or(Value::Null),
                is_error: false,
            };
            (
                RecordKind::ToolResultCarrier,
                RecordContent::Blocks(vec![block]),
            )
        }
        _ => (RecordKind::Unknown, RecordContent::Absent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude(line: &str) -> Record {
        Record::from_wire(AgentFamily::ClaudeCode, 0, line)
    }

    fn codex(line: &str) -> Record {
        Record::from_wire(AgentFamily::Codex, 0, line)
    }

    #[test]
    fn claude_user_plain_text() {
        let r = claude(
            r#"{"type":"user","uuid":"u1","sessionId":"s1","cwd":"/w","gitBranch":"main","message":{"role":"user","content":"hello"}}"#,
        );
        assert_eq!(r.kind, RecordKind::User);
        assert_eq!(r.id.as_deref(), Some("u1"));
        assert_eq!(r.session_id.as_deref(), Some("s1"));
        assert_eq!(r.content, RecordContent::Text("hello".into()));
    }

    #[test]
    fn claude_tool_result_carrier() {
        let r = claude(
            r#"{"type":"user","uuid":"u2","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"out"}]}}"#,
        );
        assert_eq!(r.kind, RecordKind::ToolResultCarrier);
        assert!(matches!(
            r.content.blocks()[0],
            ContentBlock::ToolResult { .. }
        ));
    }

    #[test]
    fn claude_assistant_blocks() {
        let r = claude(
            r#"{"type":"assistant","uuid":"a1","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hm"},{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"bash","input":{"command":"ls"}}]}}"#,
        );
        assert_eq!(r.kind, RecordKind::Assistant);
        let blocks = r.content.blocks();
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], ContentBlock::Thinking { .. }));
        assert!(
            matches!(&blocks[2], ContentBlock::ToolUse { name, .. } if name == "bash")
        );
    }

    #[test]
    fn malformed_line_round_trips_verbatim() {
        let line = "{not json at all";
        let r = claude(line);
        assert!(r.is_malformed());
        assert_eq!(r.wire_line(), line);
    }

    #[test]
    fn codex_session_meta() {
        let r = codex(
            r#"{"timestamp":"2026-01-01T00:00:00Z","type":"session_meta","payload":{"id":"abc","cwd":"/w","git":{"branch":"main"}}}"#,
        );
        assert_eq!(r.kind, RecordKind::SessionMeta);
        assert_eq!(r.session_id.as_deref(), Some("abc"));
        assert_eq!(r.branch.as_deref(), Some("main"));
    }

    #[test]
    fn codex_function_call_output_is_carrier() {
        let r = codex(
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"long output"}}"#,
        );
        assert_eq!(r.kind, RecordKind::ToolResultCarrier);
        assert_eq!(r.content.char_len(), "long output".len());
    }

    #[test]
    fn redact_tool_result_block_preserves_shape() {
        let r = claude(
            r#"{"type":"user","uuid":"u2","sessionId":"s1","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"0123456789"}]}}"#,
        );
        let (redacted, saved) = r
            .redact_tool_results(AgentFamily::ClaudeCode, &[0], Path::new("/orig.jsonl"))
            .unwrap();
        assert_eq!(redacted.kind, RecordKind::ToolResultCarrier);
        assert_eq!(redacted.id.as_deref(), Some("u2"));
        let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = &redacted.content.blocks()[0]
        else {
            panic!("expected tool_result block");
        };
        assert_eq!(tool_use_id, "t1");
        let ph = Placeholder::parse(content.as_str().unwrap()).unwrap();
        assert_eq!(ph.original_chars, 10);
        assert_eq!(ph.parent_index, 0);
        // Saved only when the placeholder is shorter than the original.
        assert_eq!(
            saved,
            r.wire_line().len().saturating_sub(redacted.wire_line().len())
        );
    }

    #[test]
    fn redact_assistant_content_keeps_fields() {
        let r = claude(
            r#"{"type":"assistant","uuid":"a1","parentUuid":"u1","sessionId":"s1","message":{"role":"assistant","content":[{"type":"text","text":"a very long answer"}]}}"#,
        );
        let (redacted, _) = r
            .redact_content(AgentFamily::ClaudeCode, Path::new("/orig.jsonl"))
            .unwrap();
        assert_eq!(redacted.id.as_deref(), Some("a1"));
        assert_eq!(redacted.parent_id.as_deref(), Some("u1"));
        assert_eq!(redacted.session_id.as_deref(), Some("s1"));
        assert!(Placeholder::is_placeholder(
            redacted.content.first_text().unwrap()
        ));
    }

    #[test]
    fn redact_codex_output() {
        let r = codex(
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}}"#,
        );
        let (redacted, _) = r
            .redact_tool_results(AgentFamily::Codex, &[0], Path::new("/o.jsonl"))
            .unwrap();
        let ContentBlock::ToolResult { content, .. } = &redacted.content.blocks()[0] else {
            panic!("expected tool_result");
        };
        assert!(Placeholder::is_placeholder(content.as_str().unwrap()));
    }

    #[test]
    fn redact_content_keeps_tool_use_blocks() {
        let r = claude(
            r#"{"type":"assistant","uuid":"a1","message":{"role":"assistant","content":[{"type":"text","text":"running a command"},{"type":"tool_use","id":"t1","name":"bash","input":{"command":"ls"}}]}}"#,
        );
        let (redacted, _) = r
            .redact_content(AgentFamily::ClaudeCode, Path::new("/o.jsonl"))
            .unwrap();
        let blocks = redacted.content.blocks();
        assert_eq!(blocks.len(), 2);
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected placeholder text block");
        };
        let ph = Placeholder::parse(text).unwrap();
        assert_eq!(ph.original_chars, "running a command".len());
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { id, .. } if id == "t1"));
    }

    #[test]
    fn redact_refuses_marker_records() {
        let r = claude(r#"{"type":"file-history-snapshot","messageId":"m1","snapshot":{}}"#);
        assert!(r
            .redact_content(AgentFamily::ClaudeCode, Path::new("/o.jsonl"))
            .is_none());
    }
}
