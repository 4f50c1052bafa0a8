//! Build service used by the repair loop.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{ForgeError, Result};
use crate::io::process::run_command_with_timeout;

/// Outcome of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub success: bool,
    /// Raw diagnostic text; line lists are joined with newlines.
    pub diagnostics: String,
}

impl BuildOutput {
    pub fn passed() -> Self {
        Self {
            success: true,
            diagnostics: String::new(),
        }
    }

    pub fn failed(diagnostics: impl Into<Diagnostics>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into().0,
        }
    }
}

/// Diagnostic text supplied either as one string or as separate lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub String);

impl From<String> for Diagnostics {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Diagnostics {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<Vec<String>> for Diagnostics {
    fn from(lines: Vec<String>) -> Self {
        Self(lines.join("\n"))
    }
}

impl From<&[&str]> for Diagnostics {
    fn from(lines: &[&str]) -> Self {
        Self(lines.join("\n"))
    }
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn build(&self) -> Result<BuildOutput>;
}

/// Runs a build command inside the project directory.
#[derive(Debug, Clone)]
pub struct CommandBuildService {
    workdir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandBuildService {
    pub fn new(
        workdir: impl Into<PathBuf>,
        command: Vec<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            command,
            timeout,
            output_limit_bytes,
        }
    }
}

#[async_trait]
impl BuildService for CommandBuildService {
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    async fn build(&self) -> Result<BuildOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ForgeError::Config("build command is empty".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        let timeout = self.timeout;
        let limit = self.output_limit_bytes;
        let workdir = self.workdir.clone();
        let output = tokio::task::spawn_blocking(move || run_command_with_timeout(cmd, timeout, limit))
            .await
            .map_err(|err| ForgeError::io(&workdir, std::io::Error::other(err)))?
            .map_err(|err| ForgeError::io(&workdir, std::io::Error::other(format!("{err:#}"))))?;

        let success = output.success();
        info!(success, exit_code = ?output.status.code(), "build finished");
        Ok(BuildOutput {
            success,
            diagnostics: if success {
                String::new()
            } else {
                output.combined_text()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_lists_and_strings_normalize_alike() {
        let from_lines = BuildOutput::failed(vec!["a(1,1): error TS1: x".to_string(), "  more".to_string()]);
        let from_text = BuildOutput::failed("a(1,1): error TS1: x\n  more");
        assert_eq!(from_lines, from_text);
        assert!(!from_lines.success);
        assert!(BuildOutput::passed().success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_failure_captures_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service = CommandBuildService::new(
            temp.path(),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'src/App.tsx(1,1): error TS2307: Cannot find module.'; exit 1".to_string(),
            ],
            Duration::from_secs(10),
            10_000,
        );
        let output = service.build().await.expect("build");
        assert!(!output.success);
        assert!(output.diagnostics.contains("TS2307"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_success_has_no_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service = CommandBuildService::new(
            temp.path(),
            vec!["true".to_string()],
            Duration::from_secs(10),
            1_000,
        );
        assert_eq!(service.build().await.expect("build"), BuildOutput::passed());
    }

    #[tokio::test]
    async fn empty_command_is_a_config_error() {
        let service = CommandBuildService::new(".", Vec::new(), Duration::from_secs(1), 10);
        assert!(service.build().await.expect_err("empty").is_run_fatal());
    }
}
