//! Command adapter: reaches a provider through an external CLI.
//!
//! The prompt is piped to the command's stdin and the reply is read from
//! stdout, e.g. `ollama run gemma3:12b` or `llm -m gemini-2.5-pro`.
//! Arguments may contain `{model}`, `{max_tokens}` and `{temperature}`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{AdapterError, AiAdapter, GenerationOptions, ProviderKind};
use crate::config::ProviderConfig;

/// Provider adapter using subprocess mode
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    provider: ProviderKind,
    program: String,
    args: Vec<String>,
    model: Option<String>,
    request_timeout: Duration,
}

impl CommandAdapter {
    pub fn new(provider: ProviderKind, program: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            provider,
            program: program.into(),
            args: Vec::new(),
            model: None,
            request_timeout,
        }
    }

    /// Build from the provider's config entry; fails when no command is set
    pub fn from_config(
        provider: ProviderKind,
        config: &ProviderConfig,
        request_timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let program = config
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AdapterError::NotConfigured(provider.as_str().to_string()))?;

        Ok(Self {
            args: config.args.clone(),
            model: config.model.clone(),
            ..Self::new(provider, program, request_timeout)
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn render_args(&self, options: GenerationOptions) -> Vec<String> {
        let model = self.model.as_deref().unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{model}", model)
                    .replace("{max_tokens}", &options.max_tokens.to_string())
                    .replace("{temperature}", &options.temperature.to_string())
            })
            .collect()
    }

    async fn run(&self, args: &[String], input: Option<&str>) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AdapterError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        // The prompt is written while output is collected, and both share the
        // deadline. Dropping the child on timeout kills it.
        let program = self.program.as_str();
        let stdin = child.stdin.take();
        // stdin is dropped when this finishes, signalling EOF
        let write_prompt = async move {
            let (Some(mut stdin), Some(input)) = (stdin, input) else {
                return Ok(());
            };
            match stdin.write_all(input.as_bytes()).await {
                // exited without reading; the exit status is checked below
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let exchange = async move {
            let (written, output) = tokio::join!(write_prompt, child.wait_with_output());
            written.with_context(|| format!("Failed to write prompt to {}", program))?;
            output.with_context(|| format!("Failed to wait for {}", program))
        };

        let output = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| AdapterError::Timeout {
                provider: self.provider.to_string(),
                timeout: self.request_timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdapterError::ExitStatus {
                provider: self.provider.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("{} output is not valid UTF-8", self.program))
    }
}

#[async_trait]
impl AiAdapter for CommandAdapter {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<String> {
        debug!(
            provider = %self.provider,
            prompt_chars = prompt.chars().count(),
            max_tokens = options.max_tokens,
            "Sending prompt"
        );

        let reply = self.run(&self.render_args(options), Some(prompt)).await?;
        if reply.trim().is_empty() {
            return Err(AdapterError::EmptyOutput(self.provider.to_string()).into());
        }
        Ok(reply)
    }

    async fn health_check(&self) -> Result<()> {
        self.run(&["--help".to_string()], None)
            .await
            .with_context(|| format!("{} health check failed", self.provider))?;
        Ok(())
    }
}
