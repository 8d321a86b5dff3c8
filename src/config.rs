use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("csr.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Trailing chunks shorter than this are merged into the previous
    /// chunk when the combined length still fits `max_chars`.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_min_chars() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks pulled per source type when assembling section context.
    #[serde(default = "default_chunks_per_source")]
    pub chunks_per_source: i64,
    /// Budget for all retrieved context text combined, in characters.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunks_per_source: default_chunks_per_source(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_chunks_per_source() -> i64 {
    5
}
fn default_max_context_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `stub` (deterministic placeholder text, no network) or `real`
    /// (POST to `endpoint`).
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            endpoint: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_mode() -> String {
    "stub".to_string()
}
fn default_model() -> String {
    "stub-model-v0".to_string()
}
fn default_max_tokens() -> i64 {
    1024
}
fn default_temperature() -> f64 {
    0.2
}
fn default_timeout_secs() -> u64 {
    60
}

/// Load and validate configuration. A missing file yields the defaults so
/// `csr init` works in an empty directory; a present-but-invalid file is
/// an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
    } else {
        Config::default()
    };

    if config.chunking.max_chars == 0 {
        return Err(Error::Config("chunking.max_chars must be > 0".to_string()));
    }
    if config.chunking.min_chars >= config.chunking.max_chars {
        return Err(Error::Config(
            "chunking.min_chars must be < chunking.max_chars".to_string(),
        ));
    }
    if config.retrieval.chunks_per_source < 1 {
        return Err(Error::Config(
            "retrieval.chunks_per_source must be >= 1".to_string(),
        ));
    }
    if config.retrieval.max_context_chars == 0 {
        return Err(Error::Config(
            "retrieval.max_context_chars must be > 0".to_string(),
        ));
    }

    match config.generation.mode.as_str() {
        "stub" => {}
        "real" => {
            if config.generation.endpoint.trim().is_empty() {
                return Err(Error::Config(
                    "generation.endpoint must be set when generation.mode is 'real'".to_string(),
                ));
            }
        }
        other => {
            return Err(Error::Config(format!(
                "unknown generation.mode: '{}'. Must be stub or real.",
                other
            )));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/csr.toml")).unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.chunking.min_chars, 300);
        assert_eq!(config.retrieval.chunks_per_source, 5);
        assert_eq!(config.generation.mode, "stub");
    }

    #[test]
    fn test_real_mode_requires_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csr.toml");
        std::fs::write(&path, "[generation]\nmode = \"real\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_min_chars_must_be_below_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csr.toml");
        std::fs::write(&path, "[chunking]\nmax_chars = 100\nmin_chars = 200\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csr.toml");
        std::fs::write(&path, "[generation]\nmode = \"other\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("generation.mode"));
    }
}
