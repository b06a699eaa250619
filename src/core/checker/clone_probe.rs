// src/core/checker/clone_probe.rs

//! Clone-ability probe for recovered git remotes.
//!
//! A remote counts as public when an unauthenticated `git clone` exits with
//! status 0. Credential prompts are answered by a helper that does not exist,
//! so any mention of a password, a username or the helper itself in the
//! clone's output means the remote wants credentials.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::debug;

pub const ASKPASS_SENTINEL: &str = "invalid-ask-pass";
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_LINE_LENGTH: usize = 8 * 1024;

#[async_trait]
pub trait CloneProbe: Send + Sync {
    /// `true` only when `url` could be cloned without credentials.
    async fn is_cloneable(&self, url: &str) -> bool;
}

/// Runs the real `git` binary in a throwaway directory.
#[derive(Debug, Clone)]
pub struct GitCloneProbe {
    program: String,
    timeout: Duration,
}

impl GitCloneProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("git", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn clone_once(&self, url: &str) -> std::io::Result<bool> {
        let workdir = tempfile::Builder::new().prefix("git-checker").tempdir()?;
        let mut child = Command::new(&self.program)
            .arg("clone")
            .arg(url)
            .arg(workdir.path())
            .env("GIT_SSH_COMMAND", "ssh -o StrictHostKeyChecking=no")
            .env("GIT_SSL_NO_VERIFY", "true")
            .env("GIT_ASKPASS", ASKPASS_SENTINEL)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let watch = async {
            if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
                let output = futures::stream::select(
                    FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
                    FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
                );
                if asks_for_credentials(output).await {
                    return Ok(false);
                }
            }
            child.wait().await.map(|status| status.success())
        };

        let verdict = match tokio::time::timeout(self.timeout, watch).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                debug!(url, "Clone asked for credentials or failed.");
                false
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                debug!(url, timeout_secs = self.timeout.as_secs(), "Clone timed out.");
                false
            }
        };
        if !verdict {
            // Already exited processes make this a no-op.
            let _ = child.start_kill();
        }
        Ok(verdict)
    }
}

#[async_trait]
impl CloneProbe for GitCloneProbe {
    async fn is_cloneable(&self, url: &str) -> bool {
        debug!(url, "Testing if the repository is publicly accessible.");
        match self.clone_once(url).await {
            Ok(cloneable) => cloneable,
            Err(err) => {
                debug!(url, error = %err, "Clone probe could not run.");
                false
            }
        }
    }
}

/// Reads clone output to the end, stopping early at a credential prompt.
///
/// Unreadable lines are skipped; the pipes have to keep draining or the
/// child blocks on a full buffer.
async fn asks_for_credentials<S>(mut output: S) -> bool
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    while let Some(line) = output.next().await {
        match line {
            Ok(line) if mentions_credentials(&line) => return true,
            Ok(_) => {}
            Err(err) => debug!(error = %err, "Skipping unreadable clone output."),
        }
    }
    false
}

/// Whether one line of clone output reveals a credential prompt.
pub fn mentions_credentials(line: &str) -> bool {
    let line = line.to_lowercase();
    line.contains("password") || line.contains("username") || line.contains(ASKPASS_SENTINEL)
}
