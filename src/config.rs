//! Configuration for the pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RIIGIKOGU_HOME, RIIGIKOGU_DATABASE,
//!    PARLIAMENT_API_BASE_URL, AI_PROVIDER)
//! 2. Config file (.riigikogu/config.yaml)
//! 3. Defaults (~/.riigikogu)
//!
//! Config file discovery:
//! - Searches current directory and parents for .riigikogu/config.yaml
//! - `paths.home` is relative to the .riigikogu/ directory, `paths.database`
//!   to the project root (the parent of .riigikogu/)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::ProviderKind;
use crate::core::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_API_BASE_URL: &str = "https://api.riigikogu.ee";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub ai: Option<AiConfig>,
    #[serde(default)]
    pub routine: Option<RoutineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory holding run logs and the routine lock
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub verbatims_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub provider: Option<String>,
    pub request_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// How to reach one AI provider
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderConfig {
    /// Executable that reads a prompt on stdin and prints the reply
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Informational; passed through `{model}` in args
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutineConfig {
    pub batch_size: Option<usize>,
    pub retry: Option<RetryPolicy>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// Absolute path to the SQLite database
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub api: ApiSettings,
    pub ai: AiSettings,
    pub routine: RoutineSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub verbatims_timeout_seconds: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_seconds: 30,
            verbatims_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub provider: ProviderKind,
    pub request_timeout_seconds: u64,
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            request_timeout_seconds: 300,
            providers: HashMap::new(),
        }
    }
}

impl AiSettings {
    /// Provider entry for a kind, empty if the config file has none
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        self.providers
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct RoutineSettings {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for RoutineSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".riigikogu").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Overlay a parsed config file onto defaults (env vars are applied later)
fn resolve_from_file(config_path: &Path, config: ConfigFile, default_home: PathBuf) -> Result<ResolvedConfig> {
    let state_dir = config_path.parent().unwrap_or(Path::new("."));
    let base_dir = state_dir.parent().unwrap_or(Path::new("."));

    let home = match config.paths.home {
        Some(ref home_path) => resolve_path(state_dir, home_path),
        None => default_home,
    };
    let database = match config.paths.database {
        Some(ref db_path) => resolve_path(base_dir, db_path),
        None => home.join("parliament.db"),
    };

    let defaults = ApiSettings::default();
    let api = match config.api {
        Some(api) => ApiSettings {
            base_url: api.base_url.unwrap_or(defaults.base_url),
            timeout_seconds: api.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            verbatims_timeout_seconds: api
                .verbatims_timeout_seconds
                .unwrap_or(defaults.verbatims_timeout_seconds),
        },
        None => defaults,
    };

    let ai = match config.ai {
        Some(ai) => {
            let provider = match ai.provider {
                Some(ref name) => name.parse::<ProviderKind>()?,
                None => ProviderKind::default(),
            };
            AiSettings {
                provider,
                request_timeout_seconds: ai.request_timeout_seconds.unwrap_or(300),
                providers: ai.providers,
            }
        }
        None => AiSettings::default(),
    };

    let routine = match config.routine {
        Some(r) => RoutineSettings {
            batch_size: r.batch_size.unwrap_or(1000),
            retry: r.retry.unwrap_or_default(),
        },
        None => RoutineSettings::default(),
    };

    Ok(ResolvedConfig {
        home,
        database,
        config_file: Some(config_path.to_path_buf()),
        api,
        ai,
        routine,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".riigikogu");

    let mut resolved = match find_config_file() {
        Some(config_path) => {
            let config = load_config_file(&config_path)?;
            resolve_from_file(&config_path, config, default_home)?
        }
        None => ResolvedConfig {
            database: default_home.join("parliament.db"),
            home: default_home,
            config_file: None,
            api: ApiSettings::default(),
            ai: AiSettings::default(),
            routine: RoutineSettings::default(),
        },
    };

    // Environment overrides
    if let Some(home) = env_var("RIIGIKOGU_HOME") {
        let home = PathBuf::from(home);
        if env_var("RIIGIKOGU_DATABASE").is_none() && resolved.database == resolved.home.join("parliament.db") {
            resolved.database = home.join("parliament.db");
        }
        resolved.home = home;
    }
    if let Some(db) = env_var("RIIGIKOGU_DATABASE") {
        resolved.database = PathBuf::from(db);
    }
    if let Some(url) = env_var("PARLIAMENT_API_BASE_URL") {
        resolved.api.base_url = url;
    }
    if let Some(provider) = env_var("AI_PROVIDER") {
        resolved.ai.provider = provider.parse()?;
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| {
        load_config().map_err(|e| e.to_string())
    });

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let state_dir = temp.path().join(".riigikogu");
        std::fs::create_dir_all(&state_dir).unwrap();

        let config_path = state_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  database: data/parliament.db
api:
  base_url: http://localhost:8080
  verbatims_timeout_seconds: 120
ai:
  provider: ollama
  providers:
    ollama:
      command: ollama
      args: ["run", "{model}"]
      model: gemma3:12b
routine:
  batch_size: 50
  retry:
    max_attempts: 5
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./state".to_string()));
        assert_eq!(config.paths.database, Some("data/parliament.db".to_string()));

        let ollama = &config.ai.as_ref().unwrap().providers["ollama"];
        assert_eq!(ollama.command.as_deref(), Some("ollama"));
        assert_eq!(ollama.args, vec!["run", "{model}"]);
        assert_eq!(config.routine.as_ref().unwrap().retry.as_ref().unwrap().max_attempts, 5);
    }

    #[test]
    fn test_resolve_from_file_applies_defaults() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
api:
  base_url: http://localhost:8080
ai:
  provider: claude
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        let resolved = resolve_from_file(&config_path, config, PathBuf::from("/default/home")).unwrap();

        assert_eq!(resolved.home, PathBuf::from("/default/home"));
        assert_eq!(resolved.database, PathBuf::from("/default/home/parliament.db"));
        assert_eq!(resolved.api.base_url, "http://localhost:8080");
        assert_eq!(resolved.api.timeout_seconds, 30);
        assert_eq!(resolved.api.verbatims_timeout_seconds, 60);
        assert_eq!(resolved.ai.provider, ProviderKind::Claude);
        assert_eq!(resolved.routine.batch_size, 1000);
        assert_eq!(resolved.routine.retry.max_attempts, 3);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
ai:
  provider: mistral
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert!(resolve_from_file(&config_path, config, PathBuf::from("/h")).is_err());
    }

    #[test]
    fn test_missing_provider_entry_is_empty() {
        let settings = AiSettings::default();
        let entry = settings.provider_config(ProviderKind::Gemini);
        assert!(entry.command.is_none());
        assert!(entry.args.is_empty());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
