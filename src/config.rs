//! TOML configuration for the `psearch` binary and HTTP server.
//!
//! Every section except `[db]` and `[server]` is optional and falls back
//! to defaults. [`load_config`] parses and validates the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use product_search_core::intent::FilterStage;
use product_search_core::lexical::Bm25Params;
use product_search_core::search::SearchParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub candidate_k_vector: Option<usize>,
    #[serde(default)]
    pub candidate_k_lexical: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            top_k: default_top_k(),
            candidate_k_vector: None,
            candidate_k_lexical: None,
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_top_k() -> usize {
    5
}

impl RetrievalConfig {
    /// Request parameters, with per-request overrides applied.
    pub fn params(&self, top_k: Option<usize>, semantic_weight: Option<f64>) -> SearchParams {
        SearchParams {
            semantic_weight: semantic_weight.unwrap_or(self.semantic_weight),
            top_k: top_k.unwrap_or(self.top_k),
            candidate_k_vector: self.candidate_k_vector,
            candidate_k_lexical: self.candidate_k_lexical,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    #[serde(flatten)]
    pub bm25: Bm25Params,
    /// Maximum number of products pulled into one corpus snapshot.
    #[serde(default = "default_corpus_limit")]
    pub corpus_limit: usize,
    /// Payload fields concatenated into each document's searchable text.
    #[serde(default = "default_text_fields")]
    pub text_fields: Vec<String>,
    /// Build the index before the server starts accepting requests.
    #[serde(default = "default_true")]
    pub warm_on_startup: bool,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            corpus_limit: default_corpus_limit(),
            text_fields: default_text_fields(),
            warm_on_startup: true,
        }
    }
}

fn default_corpus_limit() -> usize {
    1000
}
fn default_text_fields() -> Vec<String> {
    ["title", "description", "brand", "category"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `rules` (regex fallbacks only) or `http` (external NER service).
    #[serde(default = "default_tagger")]
    pub tagger: String,
    #[serde(default)]
    pub tagger_url: Option<String>,
    #[serde(default = "default_tagger_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub filter_stage: FilterStage,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tagger: default_tagger(),
            tagger_url: None,
            timeout_secs: default_tagger_timeout(),
            filter_stage: FilterStage::default(),
        }
    }
}

fn default_tagger() -> String {
    "rules".to_string()
}
fn default_tagger_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }

    // Lexical
    let bm25 = &config.lexical.bm25;
    if !(bm25.k1.is_finite() && bm25.k1 >= 0.0) {
        bail!("lexical.k1 must be >= 0");
    }
    if !(0.0..=1.0).contains(&bm25.b) {
        bail!("lexical.b must be in [0.0, 1.0]");
    }
    if !(bm25.epsilon.is_finite() && bm25.epsilon >= 0.0) {
        bail!("lexical.epsilon must be >= 0");
    }
    if config.lexical.corpus_limit == 0 {
        bail!("lexical.corpus_limit must be > 0");
    }
    if config.lexical.text_fields.is_empty() {
        bail!("lexical.text_fields must name at least one field");
    }

    // Embedding. The local provider knows its models' names and sizes.
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() {
            bail!(
                "embedding.dims must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Intent
    match config.intent.tagger.as_str() {
        "rules" => {}
        "http" => {
            if config.intent.tagger_url.is_none() {
                bail!("intent.tagger_url must be specified when tagger is 'http'");
            }
        }
        other => bail!("Unknown intent tagger: '{}'. Must be rules or http.", other),
    }

    Ok(())
}
