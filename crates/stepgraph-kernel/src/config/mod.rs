//! Configuration Loading
//!
//! File-based loading of [`GraphConfig`] and other serde types.
//!
//! ## Features
//!
//! - Format detection from the file extension (TOML, YAML, JSON)
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Environment overrides with a prefix and `__` nesting

use config::{Config as Cfg, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{KernelError, KernelResult};
use crate::workflow::GraphConfig;

/// Environment prefix used for graph config overrides, e.g. `STEPGRAPH_MAX_STEPS`
pub const ENV_PREFIX: &str = "STEPGRAPH";

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// Supported: `.toml`, `.yaml`/`.yml`, `.json`.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

fn braced_var() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex")
    })
}

fn bare_var() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("static regex")
    })
}

/// Substitute environment variables in a string
///
/// `${VAR}` is replaced first, then `$VAR`. Unset variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &Captures| std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string());
    let braced = braced_var().replace_all(content, lookup);
    bare_var().replace_all(&braced, lookup).into_owned()
}

fn build<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);
    build(Cfg::builder().add_source(File::from_str(&substituted, format)))
}

/// Load configuration from a file, detecting the format from its extension
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Load configuration with environment variable overrides
///
/// Variables are prefixed with `env_prefix` and use `__` for nesting,
/// e.g. `STEPGRAPH_MAX_STEPS=50`.
pub fn load_with_env<T>(path: &str, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    build(
        Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("interrupt_before")
                    .with_list_parse_key("interrupt_after"),
            ),
    )
}

/// Load a [`GraphConfig`] from a file, applying `STEPGRAPH_*` overrides
pub fn load_graph_config(path: &str) -> KernelResult<GraphConfig> {
    if !Path::new(path).exists() {
        return Err(Report::new(KernelError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("config file not found: {}", path),
        ))));
    }
    let config: GraphConfig = load_with_env(path, ENV_PREFIX)
        .map_err(KernelError::from)
        .attach(format!("while loading graph config from {}", path))?;

    if config.max_steps == 0 {
        return Err(Report::new(KernelError::Config(ConfigError::Parse(
            "max_steps must be at least 1".to_string(),
        ))))
        .attach(format!("in {}", path));
    }
    Ok(config)
}
