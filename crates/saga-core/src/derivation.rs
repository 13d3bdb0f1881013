use crate::now_rfc3339;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a derived session was produced from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationKind {
    Trim,
    SmartTrim,
    RolloverQuick,
    RolloverContext,
    Clone,
    Continue,
}

impl DerivationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivationKind::Trim => "trim",
            DerivationKind::SmartTrim => "smart-trim",
            DerivationKind::RolloverQuick => "rollover-quick",
            DerivationKind::RolloverContext => "rollover-context",
            DerivationKind::Clone => "clone",
            DerivationKind::Continue => "continue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trim" => Some(DerivationKind::Trim),
            "smart-trim" => Some(DerivationKind::SmartTrim),
            "rollover-quick" => Some(DerivationKind::RolloverQuick),
            "rollover-context" => Some(DerivationKind::RolloverContext),
            "clone" => Some(DerivationKind::Clone),
            "continue" => Some(DerivationKind::Continue),
            _ => None,
        }
    }
}

/// One parent→child derivation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    /// `edge_<ulid>`
    pub edge_id: String,
    pub child_session_id: String,
    pub parent_path: PathBuf,
    pub kind: DerivationKind,
    pub ts: String,
}

impl LineageEdge {
    pub fn new(child_session_id: &str, parent_path: PathBuf, kind: DerivationKind) -> Self {
        Self {
            edge_id: format!("edge_{}", ulid::Ulid::new()),
            child_session_id: child_session_id.to_string(),
            parent_path,
            kind,
            ts: now_rfc3339(),
        }
    }
}

/// Size accounting for one derivation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivationStats {
    pub records_total: usize,
    pub lines_redacted: usize,
    pub chars_saved: usize,
}

/// Non-fatal problem surfaced alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Inclusive original-index range of the chunk this concerns, if any.
    pub chunk: Option<(usize, usize)>,
    pub reason: String,
}

impl Warning {
    pub fn chunk(lo: usize, hi: usize, reason: impl Into<String>) -> Self {
        Self {
            chunk: Some((lo, hi)),
            reason: reason.into(),
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            chunk: None,
            reason: reason.into(),
        }
    }
}

/// Result of a successful derivation: the new file plus accounting.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub new_path: PathBuf,
    pub edge: LineageEdge,
    pub stats: DerivationStats,
    pub warnings: Vec<Warning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for kind in [
            DerivationKind::Trim,
            DerivationKind::SmartTrim,
            DerivationKind::RolloverQuick,
            DerivationKind::RolloverContext,
            DerivationKind::Clone,
            DerivationKind::Continue,
        ] {
            assert_eq!(DerivationKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(DerivationKind::from_str("compact"), None);
    }

    #[test]
    fn edge_ids_are_unique() {
        let a = LineageEdge::new("s1", PathBuf::from("/p"), DerivationKind::Trim);
        let b = LineageEdge::new("s1", PathBuf::from("/p"), DerivationKind::Trim);
        assert_ne!(a.edge_id, b.edge_id);
        assert!(a.edge_id.starts_with("edge_"));
    }
}
