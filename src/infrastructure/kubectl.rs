//! kubectl invocation
//!
//! All cluster mutations go through [`CommandRunner`] so the orchestrator can
//! be driven by a scripted runner in tests.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::KubectlError;
use crate::tools::{get_tool_path, KUBECTL};

/// Captured result of one kubectl invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs the cluster CLI: `run(args) -> output`
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with `args`. A non-zero exit is reported through the output, only
    /// failing to run at all is an error.
    async fn run(&self, args: &[String]) -> Result<CommandOutput, KubectlError>;

    /// Run with `args`, turning a non-zero exit into an error
    async fn run_checked(&self, args: &[String]) -> Result<CommandOutput, KubectlError> {
        let output = self.run(args).await?;
        ensure_success(args, output)
    }
}

/// Convert a non-zero exit into [`KubectlError::Failed`]
pub fn ensure_success(args: &[String], output: CommandOutput) -> Result<CommandOutput, KubectlError> {
    if output.success() {
        Ok(output)
    } else {
        Err(KubectlError::Failed {
            command: format!("kubectl {}", args.join(" ")),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// kubectl binary resolved through `KUBECTL_BIN`
pub struct Kubectl {
    binary: String,
}

impl Kubectl {
    pub fn new() -> Self {
        Self {
            binary: get_tool_path(KUBECTL),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for Kubectl {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, KubectlError> {
        debug!("Running: {} {}", self.binary, args.join(" "));

        // dropping the future on cancellation must not leave kubectl running
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| KubectlError::Spawn {
                command: format!("{} {}", self.binary, args.join(" ")),
                source,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("Exit code: {:?}", result.code);
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted runner recording every invocation.
    ///
    /// A response applies to the first recorded call whose joined arguments
    /// start with its prefix; unscripted calls succeed with empty output.
    #[derive(Default)]
    pub struct FakeRunner {
        calls: Mutex<Vec<String>>,
        responses: Mutex<Vec<(String, CommandOutput)>>,
        hang_on: Mutex<Option<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((prefix.to_string(), output));
            self
        }

        /// Block forever on calls starting with `prefix`
        pub fn hang_on(self, prefix: &str) -> Self {
            *self.hang_on.lock().unwrap() = Some(prefix.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn position(&self, prefix: &str) -> Option<usize> {
            self.calls().iter().position(|c| c.starts_with(prefix))
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, args: &[String]) -> Result<CommandOutput, KubectlError> {
            let joined = args.join(" ");
            self.calls.lock().unwrap().push(joined.clone());

            let hang = self
                .hang_on
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|p| joined.starts_with(p.as_str()));
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .find(|(prefix, _)| joined.starts_with(prefix.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_else(|| CommandOutput::ok("")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_ensure_success_reports_command() {
        let err = ensure_success(&args("apply -f x.yaml"), CommandOutput::failed(1, "nope\n"))
            .unwrap_err();
        assert_eq!(err.to_string(), "`kubectl apply -f x.yaml` exited with 1: nope");
    }

    #[tokio::test]
    async fn test_run_checked_uses_scripted_output() {
        let runner = FakeRunner::new().respond("diff", CommandOutput::failed(1, ""));
        assert!(runner.run_checked(&args("diff -f a.yaml")).await.is_err());
        assert!(runner.run_checked(&args("apply -f a.yaml")).await.is_ok());
        assert_eq!(runner.calls(), vec!["diff -f a.yaml", "apply -f a.yaml"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let kubectl = Kubectl::with_binary("/nonexistent/kubectl-for-tests");
        let err = kubectl.run(&args("version")).await.unwrap_err();
        assert!(matches!(err, KubectlError::Spawn { .. }));
    }
}
