use std::path::{Path, PathBuf};

/// Marker prefix for redacted content. Anything the engine redacts starts
/// with this, so consumers (and the engine itself) can recognize a
/// placeholder without guessing.
pub const PLACEHOLDER_PREFIX: &str = "[saga-redacted";

/// Replacement payload for redacted content.
///
/// Carries the original serialized length and a back-reference to the
/// parent file + record index, so the redacted text can be retrieved from
/// the ancestor on demand. Replaces the content payload only; the record's
/// type and positional fields are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub original_chars: usize,
    pub parent_path: PathBuf,
    pub parent_index: usize,
}

impl Placeholder {
    pub fn new(original_chars: usize, parent_path: &Path, parent_index: usize) -> Self {
        Self {
            original_chars,
            parent_path: parent_path.to_path_buf(),
            parent_index,
        }
    }

    /// Render the wire form, e.g.
    /// `[saga-redacted 5000 chars; original at /path/abc.jsonl#4]`.
    pub fn render(&self) -> String {
        format!(
            "{} {} chars; original at {}#{}]",
            PLACEHOLDER_PREFIX,
            self.original_chars,
            self.parent_path.display(),
            self.parent_index
        )
    }

    /// Parse a rendered placeholder back into its parts.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix(PLACEHOLDER_PREFIX)?.trim_start();
        let (chars_part, rest) = rest.split_once(" chars; original at ")?;
        let rest = rest.strip_suffix(']')?;
        let (path_part, index_part) = rest.rsplit_once('#')?;
        Some(Self {
            original_chars: chars_part.trim().parse().ok()?,
            parent_path: PathBuf::from(path_part),
            parent_index: index_part.parse().ok()?,
        })
    }

    pub fn is_placeholder(text: &str) -> bool {
        text.starts_with(PLACEHOLDER_PREFIX)
    }
}
