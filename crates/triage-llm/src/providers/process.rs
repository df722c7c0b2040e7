//! Subprocess boundary for the local-process provider.
//!
//! The provider only ever needs "run this program with these arguments,
//! feed it stdin, give up after a deadline". Keeping that behind
//! [`CommandRunner`] lets tests substitute a scripted runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error while running child process: {0}")]
    Io(#[from] std::io::Error),

    #[error("child process timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

/// Runs a program to completion under a deadline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...`, write `stdin`, and collect its output.
    ///
    /// The child must be killed if `timeout` elapses first.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let pipe = child.stdin.take();
        let input = stdin.as_bytes().to_vec();
        let feed = async move {
            if let Some(mut pipe) = pipe {
                // A child that exits without reading stdin closes the pipe;
                // its exit status is what matters.
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "child closed stdin early");
                }
            }
        };

        // Dropping the future on timeout drops `child`, which kills it.
        let run = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        match tokio::time::timeout(timeout, run).await {
            Err(_) => Err(RunError::Timeout(timeout)),
            Ok(Err(e)) => Err(RunError::Io(e)),
            Ok(Ok(output)) => Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn pipes_stdin_through_to_stdout() {
        let out = TokioCommandRunner
            .run(Path::new("cat"), &[], "hello from stdin", Duration::from_secs(5))
            .await
            .expect("cat runs");
        assert!(out.success());
        assert_eq!(out.stdout, "hello from stdin");
        assert!(out.stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let out = TokioCommandRunner
            .run(Path::new("sh"), &args, "", Duration::from_secs(5))
            .await
            .expect("sh runs");
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_child_times_out() {
        let args = vec!["5".to_string()];
        let err = TokioCommandRunner
            .run(Path::new("sleep"), &args, "", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = TokioCommandRunner
            .run(
                Path::new("/nonexistent/definitely-not-a-binary"),
                &[],
                "",
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
