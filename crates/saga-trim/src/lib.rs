mod chunk;
mod engine;
mod smart;

pub use chunk::{partition_chunks, protected_indices, Chunk, ProtectedIndexSet};
pub use engine::{apply_redactions, apply_trim, run_trim, ToolFilter, TrimOptions};
pub use smart::{classify_redactions, run_smart_trim, run_smart_trim_with_cli, SmartTrimOptions};

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
