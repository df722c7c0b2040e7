//! Local model served by the Ollama CLI.
//!
//! Availability is decided once at construction: the executable is resolved
//! from an explicit path, then `PATH`, then the platform's default install
//! location. Each call runs `ollama run <model>` with the prompt on stdin.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use triage_resilience::LlmError;

use super::process::{CommandRunner, RunError, TokioCommandRunner};
use super::Provider;
use crate::config::LocalProviderConfig;

pub const NAME: &str = "ollama";

#[cfg(windows)]
const EXECUTABLE: &str = "ollama.exe";
#[cfg(not(windows))]
const EXECUTABLE: &str = "ollama";

/// Provider backed by a locally installed `ollama` binary.
pub struct LocalProcessProvider {
    model: String,
    binary: Option<PathBuf>,
    runner: Box<dyn CommandRunner>,
    hint: String,
}

impl LocalProcessProvider {
    /// Resolve the executable and use the real process runner.
    pub fn from_config(config: &LocalProviderConfig) -> Self {
        let binary = resolve_binary(config.binary.as_deref());
        debug!(binary = ?binary, model = %config.model, "resolved local model executable");
        Self::with_runner(&config.model, binary, Box::new(TokioCommandRunner))
    }

    /// Build with an already-resolved binary (or none) and a custom runner.
    pub fn with_runner(
        model: impl Into<String>,
        binary: Option<PathBuf>,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        let model = model.into();
        let hint = format!("Install Ollama from https://ollama.ai/ and run: ollama pull {model}");
        Self {
            model,
            binary,
            runner,
            hint,
        }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl Provider for LocalProcessProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let Some(binary) = self.binary.as_deref() else {
            return Err(LlmError::unavailable(NAME, "ollama executable not found"));
        };

        let args = vec!["run".to_string(), self.model.clone()];
        match self.runner.run(binary, &args, prompt, timeout).await {
            Ok(output) if output.success() => Ok(output.stdout.trim().to_string()),
            Ok(output) => {
                let stderr = output.stderr.trim();
                let reason = match (output.code, stderr.is_empty()) {
                    (Some(code), true) => format!("exited with status {code}"),
                    (None, true) => "terminated by signal".to_string(),
                    (_, false) => stderr.to_string(),
                };
                Err(LlmError::response(NAME, reason))
            }
            Err(RunError::Timeout(_)) => Err(LlmError::timeout(NAME, timeout)),
            Err(e) => Err(LlmError::transport(NAME, e.to_string())),
        }
    }

    fn setup_hint(&self) -> &str {
        &self.hint
    }
}

/// Locate the executable: explicit path, then `PATH`, then the default install.
pub fn resolve_binary(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.is_file().then(|| path.to_path_buf());
    }
    if let Some(found) = env::var_os("PATH").and_then(|paths| find_in_path(&paths, EXECUTABLE)) {
        return Some(found);
    }
    default_install_path().filter(|p| p.is_file())
}

fn find_in_path(paths: &std::ffi::OsStr, executable: &str) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn default_install_path() -> Option<PathBuf> {
    env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .map(|base| base.join("Programs").join("Ollama").join(EXECUTABLE))
}

#[cfg(not(windows))]
fn default_install_path() -> Option<PathBuf> {
    Some(PathBuf::from("/usr/local/bin").join(EXECUTABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::process::{CommandOutput, MockCommandRunner};
    use triage_resilience::ErrorKind;

    fn provider(runner: MockCommandRunner) -> LocalProcessProvider {
        LocalProcessProvider::with_runner(
            "llama3",
            Some(PathBuf::from("/opt/ollama/bin/ollama")),
            Box::new(runner),
        )
    }

    #[tokio::test]
    async fn runs_model_with_prompt_on_stdin() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, stdin, timeout| {
                program == Path::new("/opt/ollama/bin/ollama")
                    && args.len() == 2
                    && args[0] == "run"
                    && args[1] == "llama3"
                    && stdin == "summarize the alert"
                    && *timeout == Duration::from_secs(30)
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(CommandOutput {
                    code: Some(0),
                    stdout: "  disk is full\n".to_string(),
                    stderr: String::new(),
                })
            });

        let text = provider(runner)
            .call("summarize the alert", Duration::from_secs(30))
            .await
            .expect("call succeeds");
        assert_eq!(text, "disk is full");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _, _| {
            Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "Error: model 'llama3' not found\n".to_string(),
            })
        });

        let err = provider(runner)
            .call("hi", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Response);
        assert!(err.to_string().contains("model 'llama3' not found"));
    }

    #[tokio::test]
    async fn runner_timeout_maps_to_timeout() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _, t| Err(RunError::Timeout(t)));

        let err = provider(runner)
            .call("hi", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable_and_never_runs() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let provider = LocalProcessProvider::with_runner("llama3", None, Box::new(runner));

        assert!(!provider.is_available());
        let err = provider.call("hi", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn setup_hint_names_the_model() {
        let provider = LocalProcessProvider::with_runner(
            "mistral",
            None,
            Box::new(MockCommandRunner::new()),
        );
        assert!(provider.setup_hint().contains("ollama pull mistral"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("ollama");
        assert_eq!(resolve_binary(Some(&bin)), None);

        std::fs::write(&bin, "#!/bin/sh\n").expect("write fake binary");
        assert_eq!(resolve_binary(Some(&bin)), Some(bin));
    }

    #[test]
    fn path_search_finds_first_match() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        let bin = second.path().join(EXECUTABLE);
        std::fs::write(&bin, "").expect("write fake binary");

        let paths = env::join_paths([first.path(), second.path()]).expect("join paths");
        assert_eq!(find_in_path(&paths, EXECUTABLE), Some(bin));
    }
}
