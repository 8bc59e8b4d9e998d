//! External programs as collaborators.
//!
//! A command line comes from the `[tools]` table as a list of strings, program
//! first. Stage options are appended as `--key=value` flags (see
//! [`option_flags`](super::option_flags)).

use super::{LintProblem, LintReport, Linter, TextTransform, ToolError, option_flags};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

fn split_command(
    role: &'static str,
    command: &[String],
) -> Result<(String, Vec<String>), ToolError> {
    let (program, args) = command.split_first().ok_or(ToolError::NoCommand(role))?;
    Ok((program.clone(), args.to_vec()))
}

/// Pipes text through a program's stdin and reads the result from stdout.
#[derive(Debug, Clone)]
pub struct CommandTool {
    role: &'static str,
    command: Vec<String>,
}

impl CommandTool {
    pub fn new(role: &'static str, command: Vec<String>) -> Self {
        Self { role, command }
    }
}

#[async_trait]
impl TextTransform for CommandTool {
    async fn transform(
        &self,
        source: &Path,
        input: &str,
        options: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        let (program, mut args) = split_command(self.role, &self.command)?;
        args.extend(option_flags(options));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = source.parent()
            && !dir.as_os_str().is_empty()
        {
            cmd.current_dir(dir);
        }
        tracing::debug!(program = %program, ?args, file = %source.display(), "running transform");

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_owned();
            // Written from a separate task so a program that streams output
            // before reading all input cannot block on a full pipe.
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
            });
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ToolError::Command {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| ToolError::Utf8 { program })
    }
}

/// Runs a checker program over files. A non-zero exit is a lint failure.
///
/// Batch linters (`eslint`, `stylelint`) get every file in one invocation;
/// per-file checkers (`node --check`) are run once per file so failures can
/// be attributed.
#[derive(Debug, Clone)]
pub struct CommandLinter {
    role: &'static str,
    command: Vec<String>,
    per_file: bool,
}

impl CommandLinter {
    pub fn batch(role: &'static str, command: Vec<String>) -> Self {
        Self {
            role,
            command,
            per_file: false,
        }
    }

    pub fn per_file(role: &'static str, command: Vec<String>) -> Self {
        Self {
            role,
            command,
            per_file: true,
        }
    }

    async fn run(
        &self,
        root: &Path,
        files: &[PathBuf],
        config_path: Option<&Path>,
    ) -> Result<Option<String>, ToolError> {
        let (program, mut args) = split_command(self.role, &self.command)?;
        if let Some(config) = config_path {
            args.push("--config".into());
            args.push(config.display().to_string());
        }
        args.extend(files.iter().map(|f| f.display().to_string()));

        let output = Command::new(&program)
            .args(&args)
            .current_dir(root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(None);
        }
        let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(stderr.trim());
        }
        if message.is_empty() {
            message = format!("{program} exited with {}", output.status);
        }
        Ok(Some(message))
    }
}

#[async_trait]
impl Linter for CommandLinter {
    async fn lint(
        &self,
        root: &Path,
        files: &[PathBuf],
        config_path: Option<&Path>,
    ) -> Result<LintReport, ToolError> {
        let tool = self
            .command
            .first()
            .cloned()
            .unwrap_or_else(|| self.role.to_string());
        let mut report = LintReport {
            tool,
            problems: Vec::new(),
        };
        if files.is_empty() {
            return Ok(report);
        }
        if self.per_file {
            for file in files {
                if let Some(message) = self
                    .run(root, std::slice::from_ref(file), config_path)
                    .await?
                {
                    report.problems.push(LintProblem {
                        file: crate::pattern::slash_path(file),
                        message,
                    });
                }
            }
        } else if let Some(message) = self.run(root, files, config_path).await? {
            report.problems.push(LintProblem {
                file: files
                    .iter()
                    .map(|f| crate::pattern::slash_path(f))
                    .collect::<Vec<_>>()
                    .join(", "),
                message,
            });
        }
        Ok(report)
    }
}
