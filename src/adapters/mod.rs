//! Adapter interfaces for AI providers.
//!
//! Every enrichment step talks to a provider through [`AiAdapter`]. Providers
//! are reached through a configured command (see [`CommandAdapter`]); dry runs
//! use canned replies from [`DryRunAdapter`].

pub mod command;
pub mod dry_run;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::AiSettings;

pub use command::CommandAdapter;
pub use dry_run::DryRunAdapter;

/// Supported AI providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    Claude,
    Openai,
    Ollama,
    #[default]
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [Self::Claude, Self::Openai, Self::Ollama, Self::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Openai => "openai",
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
        }
    }

    /// Whether one request may return both English and Russian
    pub fn uses_combined_translation(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "openai" => Ok(Self::Openai),
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            other => Err(AdapterError::UnknownProvider(other.to_string())),
        }
    }
}

/// Sampling parameters for one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationOptions {
    pub const fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::new(8000, 0.3)
    }
}

/// Errors raised by adapters
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Unknown AI provider: {0} (expected claude, openai, ollama or gemini)")]
    UnknownProvider(String),

    #[error("AI provider '{0}' is not configured: set ai.providers.{0}.command in config.yaml")]
    NotConfigured(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{provider} request timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("{provider} exited with code {code}: {stderr}")]
    ExitStatus {
        provider: String,
        code: i32,
        stderr: String,
    },

    #[error("{0} returned an empty response")]
    EmptyOutput(String),
}

/// An AI text generation backend
#[async_trait]
pub trait AiAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Send a prompt, return the raw reply
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<String>;

    async fn health_check(&self) -> Result<()>;
}

/// Build the adapter a step should use
///
/// Dry runs never touch a provider. Otherwise the provider must have a
/// command configured, which is checked here so that misconfiguration is
/// reported before any step runs.
pub fn build_adapter(
    settings: &AiSettings,
    provider: ProviderKind,
    dry_run: bool,
) -> Result<Arc<dyn AiAdapter>> {
    if dry_run {
        return Ok(Arc::new(DryRunAdapter::new(provider)));
    }

    let config = settings.provider_config(provider);
    let adapter = CommandAdapter::from_config(
        provider,
        &config,
        Duration::from_secs(settings.request_timeout_seconds),
    )?;
    Ok(Arc::new(adapter))
}
