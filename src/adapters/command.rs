//! Generation through a local command.
//!
//! Spawns the configured program, writes the rendered prompt to its stdin and
//! collects stdout. Works with any CLI that reads a prompt from stdin (for
//! example `ollama run <model>` or `fabric -p <pattern>`).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::Generator;
use crate::domain::PromptTemplate;

/// Generator backed by a subprocess
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn generation command '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => {}
                // Child exited without reading; its exit status tells the story
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(e).context("Failed to write prompt to generation command");
                }
            }
            // Dropping stdin signals EOF
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Generation command '{}' timed out after {:?}",
                    self.program, self.timeout
                )
            })?
            .with_context(|| format!("Failed to wait for generation command '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Generation command '{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("Generation output is not valid UTF-8")
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        "command"
    }

    async fn generate(&self, template: &PromptTemplate, text: &str) -> Result<String> {
        self.run(&template.render(text)).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::TemplateKind;

    #[tokio::test]
    async fn test_prompt_is_piped_to_stdin() {
        let generator = CommandGenerator::new("cat", Vec::new(), Duration::from_secs(5));
        let template = PromptTemplate::new(TemplateKind::Mp, "Letter: {{TRANSCRIPT}}").unwrap();

        let output = generator.generate(&template, "cuts to PIP").await.unwrap();
        assert_eq!(output, "Letter: cuts to PIP");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            Duration::from_secs(5),
        );
        let template = PromptTemplate::new(TemplateKind::Mp, "{{TRANSCRIPT}}").unwrap();

        let err = generator.generate(&template, "x").await.unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let template = PromptTemplate::new(TemplateKind::Mp, "{{TRANSCRIPT}}").unwrap();

        let err = generator.generate(&template, "x").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
