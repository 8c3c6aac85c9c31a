//! Configuration for ccms paths and deployment settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CCMS_HOME, CCMS_ENV)
//! 2. Config file (.ccms/config.yaml)
//! 3. Defaults (~/.ccms, production)
//!
//! Config file discovery:
//! - Searches current directory and parents for .ccms/config.yaml
//! - `paths.home` is relative to the .ccms/ directory; the other paths are
//!   relative to the project root (the parent of .ccms/)

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::pipeline::{Environment, PipelineSettings, ReviewMode};

pub use paths::{
    ccms_home, config_store_dir, metrics_db_path, research_dir, review_log_path, runs_dir,
};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub fabric: Option<FabricConfig>,
    #[serde(default)]
    pub wordpress: Option<WordPressConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .ccms/)
    pub home: Option<String>,
    /// YAML config layers (relative to project root)
    pub config_store: Option<String>,
    /// Research JSON files (relative to project root)
    pub research: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub review_mode: Option<ReviewMode>,
    pub review_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    pub binary: Option<String>,
}

/// Non-secret WordPress settings; the application password only comes from
/// WORDPRESS_APP_PASSWORD.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WordPressConfig {
    pub url: Option<String>,
    pub username: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state: runs, review tickets, metrics
    pub home: PathBuf,
    pub config_store: PathBuf,
    pub research: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub settings: PipelineSettings,
    pub fabric_binary: Option<String>,
    pub wordpress: WordPressConfig,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".ccms").join("config.yaml");
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

/// Environment overrides, read once so resolution stays testable
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    environment: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("CCMS_HOME").ok(),
            environment: std::env::var("CCMS_ENV").ok(),
        }
    }
}

fn resolve(
    file: Option<(&Path, ConfigFile)>,
    env: &EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let env_home = env.home.as_ref().map(PathBuf::from);

    let Some((config_path, file)) = file else {
        let home = env_home.unwrap_or(default_home);
        let mut settings = PipelineSettings::default();
        if let Some(name) = &env.environment {
            settings.environment = parse_environment(name)?;
        }
        return Ok(ResolvedConfig {
            config_store: home.join("config"),
            research: home.join("research"),
            home,
            config_file: None,
            settings,
            fabric_binary: None,
            wordpress: WordPressConfig::default(),
        });
    };

    let ccms_dir = config_path.parent().unwrap_or(Path::new("."));
    let base_dir = ccms_dir.parent().unwrap_or(Path::new("."));

    let home = match (env_home, &file.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) => resolve_path(ccms_dir, home),
        (None, None) => default_home,
    };

    let config_store = file
        .paths
        .config_store
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("config"));
    let research = file
        .paths
        .research
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("research"));

    let environment = match env.environment.as_deref().or(file.environment.as_deref()) {
        Some(name) => parse_environment(name)?,
        None => Environment::default(),
    };
    let pipeline = file.pipeline.as_ref();
    let settings = PipelineSettings {
        environment,
        review_mode: pipeline.and_then(|p| p.review_mode).unwrap_or_default(),
        review_timeout_seconds: pipeline.and_then(|p| p.review_timeout_seconds),
    };

    Ok(ResolvedConfig {
        home,
        config_store,
        research,
        config_file: Some(config_path.to_path_buf()),
        settings,
        fabric_binary: file.fabric.and_then(|f| f.binary),
        wordpress: file.wordpress.unwrap_or_default(),
    })
}

fn parse_environment(name: &str) -> Result<Environment> {
    name.parse::<Environment>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Invalid CCMS_ENV / environment setting")
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".ccms");

    let env = EnvOverrides::from_env();
    match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            resolve(Some((&path, file)), &env, default_home)
        }
        None => resolve(None, &env, default_home),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
