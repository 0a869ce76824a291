use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Upper bound on rows scanned for the fuzzy branch.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_fuzzy_weight")]
    pub fuzzy_weight: f64,
    #[serde(default = "default_position_weight")]
    pub position_weight: f64,
    #[serde(default = "default_co_occurrence_bonus")]
    pub co_occurrence_bonus: f64,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_fuzzy_distance")]
    pub fuzzy_distance: usize,
    #[serde(default = "default_min_match_chars")]
    pub min_match_chars: usize,
    /// Metadata column treated as the row's display name.
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_superlative_fetch")]
    pub superlative_fetch: usize,
    #[serde(default = "default_budget_fetch")]
    pub budget_fetch: usize,
    #[serde(default = "default_fetch")]
    pub default_fetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            scan_limit: default_scan_limit(),
            vector_weight: default_vector_weight(),
            fuzzy_weight: default_fuzzy_weight(),
            position_weight: default_position_weight(),
            co_occurrence_bonus: default_co_occurrence_bonus(),
            fuzzy_threshold: default_fuzzy_threshold(),
            fuzzy_distance: default_fuzzy_distance(),
            min_match_chars: default_min_match_chars(),
            name_field: default_name_field(),
            superlative_fetch: default_superlative_fetch(),
            budget_fetch: default_budget_fetch(),
            default_fetch: default_fetch(),
        }
    }
}

fn default_scan_limit() -> usize {
    500
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_fuzzy_weight() -> f64 {
    0.4
}
fn default_position_weight() -> f64 {
    0.1
}
fn default_co_occurrence_bonus() -> f64 {
    0.1
}
fn default_fuzzy_threshold() -> f64 {
    0.4
}
fn default_fuzzy_distance() -> usize {
    100
}
fn default_min_match_chars() -> usize {
    2
}
fn default_name_field() -> String {
    "nama_produk".to_string()
}
fn default_superlative_fetch() -> usize {
    10
}
fn default_budget_fetch() -> usize {
    20
}
fn default_fetch() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: default_ollama_url(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Model used to answer the user.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Smaller model used for the intent extraction fallback.
    #[serde(default = "default_intent_model")]
    pub intent_model: String,
    #[serde(default = "default_intent_temperature")]
    pub intent_temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            chat_model: default_chat_model(),
            intent_model: default_intent_model(),
            intent_temperature: default_intent_temperature(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "qwen3:1.7b".to_string()
}
fn default_intent_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_intent_temperature() -> f32 {
    0.1
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// A valid configuration that needs no file on disk.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/trag.sqlite"),
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;

    if r.scan_limit == 0 {
        anyhow::bail!("retrieval.scan_limit must be >= 1");
    }

    for (name, value) in [
        ("vector_weight", r.vector_weight),
        ("fuzzy_weight", r.fuzzy_weight),
        ("position_weight", r.position_weight),
        ("co_occurrence_bonus", r.co_occurrence_bonus),
        ("fuzzy_threshold", r.fuzzy_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    if r.superlative_fetch == 0 || r.budget_fetch == 0 || r.default_fetch == 0 {
        anyhow::bail!("retrieval fetch sizes must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trag.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let (_dir, path) = write_config("[db]\npath = \"./data/x.sqlite\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.retrieval.scan_limit, 500);
        assert_eq!(cfg.retrieval.name_field, "nama_produk");
        assert_eq!(cfg.embedding.model, "nomic-embed-text");
        assert_eq!(cfg.embedding.dims, 768);
        assert_eq!(cfg.generation.chat_model, "qwen3:1.7b");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn test_rejects_weight_out_of_range() {
        let (_dir, path) =
            write_config("[db]\npath = \"x.sqlite\"\n[retrieval]\nvector_weight = 1.5\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("vector_weight"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let (_dir, path) =
            write_config("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_config(Path::new("/nonexistent/trag.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
