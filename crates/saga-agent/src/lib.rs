//! The external collaborator boundary. The engine never interprets
//! conversation semantics itself; judging what is safe to redact and
//! summarizing context are delegated to an agent CLI invoked as a black
//! box, one process per call.

use anyhow::Result;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

// ── Prompts ──

/// Fixed prompt for per-chunk redaction classification. The chunk lines
/// are appended, each prefixed with its original record index.
pub const CLASSIFY_PROMPT: &str = "You are reviewing a slice of a coding-agent session log. \
Each line below is prefixed with its record index. Identify records whose content is safe to \
redact because it is bulky mechanical output (long tool results, file dumps, repeated logs) \
that the conversation no longer depends on. Reply with ONLY a JSON array of the integer \
indices that are safe to redact, e.g. [12, 14, 15]. Reply [] if nothing qualifies.";

/// Fixed prompt for rollover context extraction.
pub const EXTRACT_PROMPT: &str = "Summarize the following coding-agent session so a fresh \
session can continue the work: current goal, key decisions, files touched, and unresolved \
issues. Be concise and concrete.";

/// Append the caller's extra instructions without letting them replace
/// the fixed extraction prompt.
pub fn extraction_prompt(custom: Option<&str>) -> String {
    match custom {
        Some(extra) if !extra.trim().is_empty() => format!(
            "{EXTRACT_PROMPT}\n\n--- user instructions (additional) ---\n{}\n--- end user instructions ---",
            extra.trim()
        ),
        _ => EXTRACT_PROMPT.to_string(),
    }
}

/// Build the classification prompt for one chunk.
pub fn classification_prompt(lines: &[(usize, String)]) -> String {
    let mut prompt = String::from(CLASSIFY_PROMPT);
    prompt.push_str("\n\n");
    for (index, line) in lines {
        prompt.push_str(&format!("{index}: {line}\n"));
    }
    prompt
}

// ── Collaborator traits ──

/// Per-chunk redaction judge. Returns the subset of the chunk's original
/// indices that are safe to redact.
#[async_trait::async_trait]
pub trait ChunkClassifier: Send + Sync {
    async fn classify_chunk(&self, prompt: &str) -> Result<Vec<usize>>;
}

/// Free-form context extraction for rollover.
#[async_trait::async_trait]
pub trait ContextSummarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

// ── Response parsing ──

/// Parse the collaborator's reply as a JSON array of integer indices.
/// Tolerates surrounding prose, but the array itself must conform; a
/// malformed array is an error, never coerced.
pub fn parse_index_array(reply: &str) -> Result<Vec<usize>> {
    let start = reply
        .find('[')
        .ok_or_else(|| anyhow::anyhow!("no JSON array in reply"))?;
    let end = reply[start..]
        .find(']')
        .map(|e| start + e)
        .ok_or_else(|| anyhow::anyhow!("unterminated JSON array in reply"))?;
    let value: serde_json::Value = serde_json::from_str(&reply[start..=end])?;
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("reply is not a JSON array"))?;
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| anyhow::anyhow!("non-integer index in reply: {v}"))
        })
        .collect()
}

// ── CLI-backed collaborator ──

/// Invokes the agent CLI (`claude -p <prompt>`) once per call, stdout
/// captured. One subprocess per chunk; no state shared between calls.
pub struct CliCollaborator {
    pub bin: PathBuf,
}

impl Default for CliCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl CliCollaborator {
    pub fn new() -> Self {
        let bin = std::env::var("SAGA_COLLAB_BIN").unwrap_or_else(|_| "claude".to_string());
        Self {
            bin: PathBuf::from(bin),
        }
    }

    pub fn with_bin(bin: PathBuf) -> Self {
        Self { bin }
    }

    /// Check that the collaborator binary is reachable. Smart trim calls
    /// this before spawning any chunk task: if the collaborator is
    /// unavailable the whole classification phase cannot start.
    pub fn verify_available(&self) -> Result<()> {
        let status = std::process::Command::new(&self.bin)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => anyhow::bail!("collaborator CLI not found (looked for {:?})", self.bin),
        }
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        debug!(bin = %self.bin.display(), prompt_len = prompt.len(), "invoking collaborator");
        let output = tokio::process::Command::new(&self.bin)
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("text")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!("collaborator exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl ChunkClassifier for CliCollaborator {
    async fn classify_chunk(&self, prompt: &str) -> Result<Vec<usize>> {
        let reply = self.invoke(prompt).await?;
        parse_index_array(&reply)
    }
}

#[async_trait::async_trait]
impl ContextSummarizer for CliCollaborator {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let reply = self.invoke(prompt).await?;
        if reply.trim().is_empty() {
            anyhow::bail!("collaborator returned empty summary");
        }
        Ok(reply.trim().to_string())
    }
}

// ── Mocks for tests ──

/// Scripted reply for one mock call.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Well-formed reply carrying these indices.
    Indices(Vec<usize>),
    /// Free-form text reply (summaries, or malformed classification).
    Text(String),
    /// The call fails outright.
    Fail(String),
    /// The call never completes (exercises the fan-out timeout).
    Hang,
}

/// Mock collaborator for tests. Replies are either keyed on a prompt
/// substring (stable under concurrent calls) or popped from a sequential
/// script. When nothing matches it replies `[]` / a stub summary.
pub struct MockCollaborator {
    script: std::sync::Mutex<Vec<Scripted>>,
    keyed: std::sync::Mutex<Vec<(String, Scripted)>>,
}

impl Default for MockCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCollaborator {
    pub fn new() -> Self {
        Self {
            script: std::sync::Mutex::new(Vec::new()),
            keyed: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().unwrap().push(step);
    }

    pub fn scripted(steps: Vec<Scripted>) -> Self {
        Self {
            script: std::sync::Mutex::new(steps),
            keyed: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Reply with `step` to the first call whose prompt contains `key`.
    pub fn respond_when(&self, key: &str, step: Scripted) {
        self.keyed.lock().unwrap().push((key.to_string(), step));
    }

    fn take(&self, prompt: &str) -> Option<Scripted> {
        let mut keyed = self.keyed.lock().unwrap();
        if let Some(pos) = keyed.iter().position(|(key, _)| prompt.contains(key)) {
            return Some(keyed.remove(pos).1);
        }
        drop(keyed);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            None
        } else {
            Some(script.remove(0))
        }
    }
}

#[async_trait::async_trait]
impl ChunkClassifier for MockCollaborator {
    async fn classify_chunk(&self, prompt: &str) -> Result<Vec<usize>> {
        match self.take(prompt) {
            None => Ok(Vec::new()),
            Some(Scripted::Indices(v)) => Ok(v),
            Some(Scripted::Text(t)) => parse_index_array(&t),
            Some(Scripted::Fail(reason)) => anyhow::bail!("{reason}"),
            Some(Scripted::Hang) => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("hung call should be cut off by the fan-out timeout")
            }
        }
    }
}

#[async_trait::async_trait]
impl ContextSummarizer for MockCollaborator {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        match self.take(prompt) {
            None => Ok("(mock) summary".to_string()),
            Some(Scripted::Text(t)) => Ok(t),
            Some(Scripted::Indices(_)) => Ok("(mock) summary".to_string()),
            Some(Scripted::Fail(reason)) => anyhow::bail!("{reason}"),
            Some(Scripted::Hang) => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("hung call should be cut off by the caller's timeout")
            }
        }
    }
}
