use crate::record::{Record, RecordKind};
use std::path::{Path, PathBuf};

/// Supported session wire schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentFamily {
    ClaudeCode,
    Codex,
}

impl AgentFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentFamily::ClaudeCode => "claude-code",
            AgentFamily::Codex => "codex",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "claude-code" | "claude" => Some(AgentFamily::ClaudeCode),
            "codex" => Some(AgentFamily::Codex),
            _ => None,
        }
    }
}

/// A parsed session: ordered records plus derived metadata.
///
/// Immutable once parsed. Transformations build a new record vector and
/// hand it to the derivation writer; the in-memory session is never
/// mutated in place.
#[derive(Debug, Clone)]
pub struct Session {
    pub path: PathBuf,
    pub family: AgentFamily,
    pub session_id: String,
    pub records: Vec<Record>,
    pub cwd: Option<String>,
    pub branch: Option<String>,
}

impl Session {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Index of the first user record, where the lineage block lives.
    pub fn first_user_index(&self) -> Option<usize> {
        self.records
            .iter()
            .position(|r| matches!(r.kind, RecordKind::User | RecordKind::ToolResultCarrier))
    }

    /// Directory the session lives in. Derivations are written next to
    /// their parent so external indexers discover them without special
    /// casing.
    pub fn storage_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}
