use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::logging::{LogFormat, LogLevel};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blobs: BlobConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub heuristic: HeuristicConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where attachment payloads are externalized.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BlobConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

fn default_page_size() -> usize {
    500
}
fn default_flush_threshold() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeuristicConfig {
    /// Content-type substrings that flag a multipart row as RCS.
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
    /// Whether to consult the secondary chat provider at all.
    #[serde(default = "default_secondary")]
    pub secondary: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            secondary: default_secondary(),
        }
    }
}

fn default_markers() -> Vec<String> {
    vec!["application/vnd.gsma.rcs".to_string(), "rcs".to_string()]
}
fn default_secondary() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    /// JSON provider dump read by `relay ingest`.
    #[serde(default)]
    pub dump: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

impl Config {
    /// Attachment directory, defaulting to `blobs/` next to the database.
    pub fn blob_dir(&self) -> PathBuf {
        match &self.blobs.dir {
            Some(dir) => dir.clone(),
            None => self
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("blobs"),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.ingest.page_size == 0 {
        anyhow::bail!("ingest.page_size must be > 0");
    }
    if config.ingest.flush_threshold == 0 {
        anyhow::bail!("ingest.flush_threshold must be > 0");
    }

    if config.heuristic.markers.is_empty() {
        anyhow::bail!("heuristic.markers must not be empty");
    }
    if config
        .heuristic
        .markers
        .iter()
        .any(|m| m.trim().is_empty())
    {
        anyhow::bail!("heuristic.markers must not contain blank entries");
    }

    Ok(config)
}
