//! Lineage chains: every derived session embeds the ordered list of its
//! ancestor file paths (oldest first) as a single synthetic text block in
//! its first user record. The block header also names the derivation kind,
//! so the kind is recoverable by reading a handful of lines, never a full
//! content scan.

use saga_core::{AgentFamily, ContentBlock, DerivationKind, Record, RecordContent, SagaError, Session};
use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Header prefix of the embedded lineage block.
pub const LINEAGE_HEADER: &str = "[saga-lineage v1";

// ── Block rendering/parsing ──

/// Render the synthetic lineage block: header with kind, then ancestor
/// paths oldest first, one per line.
pub fn render_block(kind: DerivationKind, chain: &[PathBuf]) -> String {
    let mut out = format!("{LINEAGE_HEADER} kind={}]", kind.as_str());
    for path in chain {
        out.push('\n');
        out.push_str(&path.to_string_lossy());
    }
    out
}

/// Parse a lineage block back into its kind and chain. The block ends at
/// the first blank line (plain-string embedding appends conversation text
/// after a blank separator).
pub fn parse_block(text: &str) -> Option<(Option<DerivationKind>, Vec<PathBuf>)> {
    let mut lines = text.lines();
    let header = lines.next()?.trim();
    if !header.starts_with(LINEAGE_HEADER) || !header.ends_with(']') {
        return None;
    }
    let kind = header
        .trim_end_matches(']')
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("kind="))
        .and_then(DerivationKind::from_str);
    let mut chain = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        chain.push(PathBuf::from(line));
    }
    Some((kind, chain))
}

// ── Chain construction ──

/// Read the chain embedded in the session's first user record. Absent
/// block means the session is original: empty chain.
pub fn build_chain(session: &Session) -> Vec<PathBuf> {
    let Some(idx) = session.first_user_index() else {
        return Vec::new();
    };
    lineage_text(&session.records[idx])
        .and_then(|t| parse_block(&t))
        .map(|(_, chain)| chain)
        .unwrap_or_default()
}

/// The first entry of the chain, or the session itself if original.
pub fn find_original(session: &Session) -> PathBuf {
    build_chain(session)
        .into_iter()
        .next()
        .unwrap_or_else(|| session.path.clone())
}

/// Cheap metadata probe: derivation kind of a session file, read from the
/// lineage header within the first few lines. `None` for originals.
pub fn derivation_kind(path: &Path) -> Option<DerivationKind> {
    const PROBE_LINES: usize = 8;
    let file = fs::File::open(path).ok()?;
    let reader = BufReader::new(file);
    for line in reader.lines().take(PROBE_LINES) {
        let line = line.ok()?;
        if let Some(pos) = line.find(LINEAGE_HEADER) {
            // The header lives inside a JSON string; grab up to the
            // escaped newline or closing bracket.
            let rest = &line[pos..];
            let header_end = rest.find(']')?;
            return parse_block(&rest[..=header_end].replace("\\n", "\n"))
                .and_then(|(kind, _)| kind);
        }
    }
    None
}

/// Sessions under `search_root` whose chain ends at `session`'s path,
/// i.e. its direct children.
pub fn find_derived(session: &Session, search_root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut candidates = Vec::new();
    collect_jsonl(search_root, &mut candidates)?;
    for candidate in candidates {
        if candidate == session.path {
            continue;
        }
        let Ok(child) = saga_store::parse(&candidate) else {
            continue;
        };
        if build_chain(&child).last() == Some(&session.path) {
            out.push(candidate);
        }
    }
    out.sort();
    Ok(out)
}

fn collect_jsonl(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_jsonl(&path, out)?;
        } else if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

// ── Chain injection ──

/// Append `new_parent` to the session's chain and re-embed the block into
/// the first user record, exactly once.
///
/// Idempotent for a repeated parent: if the chain already ends with
/// `new_parent` the chain is unchanged (only the kind header is
/// refreshed). A parent appearing anywhere earlier in the chain is a
/// cycle and fails.
pub fn inject_chain(
    session: &Session,
    new_parent: &Path,
    kind: DerivationKind,
) -> Result<Vec<Record>, SagaError> {
    let mut chain = build_chain(session);
    if chain.iter().rev().skip(1).any(|p| p == new_parent) {
        return Err(SagaError::LineageCycleDetected {
            path: new_parent.to_path_buf(),
        });
    }
    if chain.last().map(|p| p.as_path()) != Some(new_parent) {
        chain.push(new_parent.to_path_buf());
    }

    let idx = session.first_user_index().ok_or_else(|| {
        SagaError::malformed(&session.path, "no user record to carry lineage")
    })?;
    let block = render_block(kind, &chain);
    debug!(chain_len = chain.len(), kind = kind.as_str(), "injecting lineage chain");

    let mut records = session.records.clone();
    records[idx] = embed_block(&records[idx], session.family, &block)?;
    Ok(records)
}

/// Rewrite a record's content so its first block is `block` and any older
/// lineage block is gone.
fn embed_block(record: &Record, family: AgentFamily, block: &str) -> Result<Record, SagaError> {
    let raw = record.raw_json().ok_or_else(|| {
        SagaError::malformed("<record>", "cannot embed lineage into a malformed record")
    })?;
    let mut v = raw.clone();
    match family {
        AgentFamily::ClaudeCode => {
            let content = v
                .get_mut("message")
                .and_then(|m| m.get_mut("content"))
                .ok_or_else(|| SagaError::malformed("<record>", "user record has no content"))?;
            match content {
                Value::String(s) => {
                    let rest = strip_plain_block(s);
                    *content = Value::String(join_plain(block, &rest));
                }
                Value::Array(items) => {
                    items.retain(|b| !is_lineage_block(b, "text"));
                    items.insert(0, json!({ "type": "text", "text": block }));
                }
                _ => {
                    return Err(SagaError::malformed(
                        "<record>",
                        "user record content is neither string nor blocks",
                    ))
                }
            }
        }
        AgentFamily::Codex => {
            let payload = v
                .get_mut("payload")
                .and_then(|p| p.as_object_mut())
                .ok_or_else(|| SagaError::malformed("<record>", "user record has no payload"))?;
            let items = payload
                .entry("content")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = items {
                items.retain(|b| !is_lineage_block(b, "input_text"));
                items.insert(0, json!({ "type": "input_text", "text": block }));
            }
        }
    }
    Ok(record.with_wire_value(family, v))
}

fn is_lineage_block(block: &Value, text_type: &str) -> bool {
    block.get("type").and_then(|t| t.as_str()) == Some(text_type)
        && block
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.starts_with(LINEAGE_HEADER))
            .unwrap_or(false)
}

fn strip_plain_block(s: &str) -> String {
    if !s.starts_with(LINEAGE_HEADER) {
        return s.to_string();
    }
    match s.split_once("\n\n") {
        Some((_, rest)) => rest.to_string(),
        None => String::new(),
    }
}

fn join_plain(block: &str, rest: &str) -> String {
    if rest.is_empty() {
        block.to_string()
    } else {
        format!("{block}\n\n{rest}")
    }
}

/// Extract the full text of a record's lineage-bearing content, if any.
fn lineage_text(record: &Record) -> Option<String> {
    match &record.content {
        RecordContent::Text(s) if s.starts_with(LINEAGE_HEADER) => Some(s.clone()),
        RecordContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
            ContentBlock::Text { text } if text.starts_with(LINEAGE_HEADER) => Some(text.clone()),
            _ => None,
        }),
        _ => None,
    }
}

/// True when the record index holds the session's lineage block. Smart
/// trim protects it unconditionally.
pub fn carries_lineage(record: &Record) -> bool {
    lineage_text(record).is_some()
}

/// Check the chronological invariant: every chain entry strictly older
/// (by mtime) than its successor, and the terminal child younger than the
/// whole chain.
pub fn is_chronological(chain: &[PathBuf], child: &Path) -> std::io::Result<bool> {
    let mut last = None;
    for path in chain.iter().chain(std::iter::once(&child.to_path_buf())) {
        let mtime = fs::metadata(path)?.modified()?;
        if let Some(prev) = last {
            if mtime <= prev {
                return Ok(false);
            }
        }
        last = Some(mtime);
    }
    Ok(true)
}
