mod parse;
mod writer;

pub use parse::{agent_family, is_valid, parse};
pub use writer::{write_derivation, WrittenSession};

use saga_core::AgentFamily;
use std::path::{Path, PathBuf};

/// Per-family storage root. Paths are supplied by callers for individual
/// sessions; the roots exist so derivations and `find_derived` scans stay
/// inside the directories the agents themselves use.
pub fn family_root(family: AgentFamily) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    match family {
        AgentFamily::ClaudeCode => home.join(".claude").join("projects"),
        AgentFamily::Codex => home.join(".codex").join("sessions"),
    }
}

/// claude-code munges the working directory into a project directory name:
/// every non-alphanumeric byte becomes `-`.
pub fn munge_project_dir(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn munge_replaces_separators() {
        assert_eq!(
            munge_project_dir(Path::new("/home/me/my_repo")),
            "-home-me-my-repo"
        );
    }

    #[test]
    fn family_roots_differ() {
        assert_ne!(
            family_root(AgentFamily::ClaudeCode),
            family_root(AgentFamily::Codex)
        );
    }
}
