//! External review generator boundary.
//!
//! The generator is a subprocess: prompt on stdin, review text on stdout,
//! non-zero exit or timeout is a failure. Failure is a tagged outcome,
//! never an `Err` — the orchestrator records it as a failed version and
//! moves on.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use patrol_core::types::{Candidate, ReviewVersion};

/// Result of one generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorOutcome {
    Success { body: String },
    Failed { reason: String },
}

/// Produces review text for a checked-out worktree.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, worktree: &Path, prompt: &str) -> GeneratorOutcome;
}

// ---------------------------------------------------------------------------
// Subprocess implementation
// ---------------------------------------------------------------------------

/// Runs the configured generator command with the worktree as its working
/// directory. The child is spawned with `kill_on_drop` so a timed-out
/// invocation does not linger.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    cmd: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(cmd: Vec<String>, timeout: Duration) -> Self {
        Self { cmd, timeout }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, worktree: &Path, prompt: &str) -> GeneratorOutcome {
        let Some((program, args)) = self.cmd.split_first() else {
            return GeneratorOutcome::Failed {
                reason: "generator command is empty".to_string(),
            };
        };

        let spawned = Command::new(program)
            .args(args)
            .current_dir(worktree)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                return GeneratorOutcome::Failed {
                    reason: format!("failed to spawn `{program}`: {err}"),
                }
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                return GeneratorOutcome::Failed {
                    reason: format!("failed to write prompt: {err}"),
                };
            }
            // Close stdin so the generator sees EOF.
            drop(stdin);
        }

        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return GeneratorOutcome::Failed {
                    reason: format!("generator I/O error: {err}"),
                }
            }
            Err(_) => {
                return GeneratorOutcome::Failed {
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                }
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return GeneratorOutcome::Failed {
                reason: format!("exit {}: {}", output.status, stderr.trim()),
            };
        }

        let body = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if body.is_empty() {
            return GeneratorOutcome::Failed {
                reason: "generator produced no output".to_string(),
            };
        }
        GeneratorOutcome::Success { body }
    }
}

/// Re-reads the generator command and timeout from settings on every
/// call, so operator updates apply without a daemon restart.
#[derive(Debug, Clone)]
pub struct SettingsGenerator {
    home: std::path::PathBuf,
}

impl SettingsGenerator {
    pub fn new(home: impl Into<std::path::PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

#[async_trait]
impl Generator for SettingsGenerator {
    async fn generate(&self, worktree: &Path, prompt: &str) -> GeneratorOutcome {
        let settings = patrol_core::settings::load_at(&self.home);
        CommandGenerator::new(
            settings.generator_cmd,
            Duration::from_secs(settings.generator_timeout_secs),
        )
        .generate(worktree, prompt)
        .await
    }
}

// ---------------------------------------------------------------------------
// Prompt assembly
// ---------------------------------------------------------------------------

/// Build the generator prompt from item metadata, the changed-file list,
/// a bounded window of prior reviews, and operator instructions.
pub fn build_prompt(
    candidate: &Candidate,
    changed_files: &[String],
    prior: &[ReviewVersion],
    instructions: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Review pull request {} — \"{}\" by {}.\n",
        candidate.key, candidate.title, candidate.author
    ));
    prompt.push_str(&format!("URL: {}\n", candidate.url));
    prompt.push_str(&format!(
        "Head: {} ({} -> {})\n\n",
        candidate.head_sha, candidate.head_ref, candidate.base_ref
    ));

    if let Some(body) = &candidate.body {
        prompt.push_str("## Description\n\n");
        prompt.push_str(body);
        prompt.push_str("\n\n");
    }

    if !changed_files.is_empty() {
        prompt.push_str("## Changed files\n\n");
        for path in changed_files {
            prompt.push_str(&format!("- {path}\n"));
        }
        prompt.push('\n');
    }

    if !prior.is_empty() {
        prompt.push_str("## Previous reviews (newest first)\n\n");
        for version in prior {
            prompt.push_str(&format!(
                "### {} at {}\n\n{}\n\n",
                version.revision,
                version.created_at.to_rfc3339(),
                version.body
            ));
        }
    }

    if !instructions.is_empty() {
        prompt.push_str("## Instructions\n\n");
        prompt.push_str(instructions);
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "Write a focused code review of the checked-out changes in the \
         current working directory. Cite files and lines.\n",
    );
    prompt
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
