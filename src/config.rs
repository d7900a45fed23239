use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default)]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            overlap_words: 0,
        }
    }
}

fn default_chunk_words() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `keyword` (word overlap) or `semantic` (embedding similarity).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_keyword_score")]
    pub min_keyword_score: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            limit: default_limit(),
            min_keyword_score: default_min_keyword_score(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_backend() -> String {
    "keyword".to_string()
}
fn default_limit() -> usize {
    5
}
fn default_min_keyword_score() -> usize {
    2
}
fn default_min_similarity() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
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
fn default_embed_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `ollama` or `openai` (any OpenAI-compatible chat completions API).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Upper bound for a single generate call, enforced by the pipeline.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Intent strategy: `model` (trained label model) or `prompt` (LLM).
    #[serde(default = "default_intent_strategy")]
    pub intent: String,
    /// JSONL file of `{"text", "label"}` records for the `model` strategy.
    #[serde(default)]
    pub intent_data: Option<PathBuf>,
    /// Continuation strategy: `rewrite` (LLM) or `anchor` (active subject).
    #[serde(default = "default_resolver_strategy")]
    pub resolver: String,
    /// Grounding strategy: `llm` or `lexical`.
    #[serde(default = "default_grounding_strategy")]
    pub grounding: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intent: default_intent_strategy(),
            intent_data: None,
            resolver: default_resolver_strategy(),
            grounding: default_grounding_strategy(),
        }
    }
}

fn default_intent_strategy() -> String {
    "model".to_string()
}
fn default_resolver_strategy() -> String {
    "rewrite".to_string()
}
fn default_grounding_strategy() -> String {
    "llm".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_max_turns() -> usize {
    3
}
fn default_idle_timeout_secs() -> u64 {
    600
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
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Default configuration for a vault rooted at `root`.
    pub fn for_vault(root: impl Into<PathBuf>) -> Self {
        Self {
            vault: VaultConfig {
                root: root.into(),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            context: ContextConfig::default(),
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

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_words == 0 {
        anyhow::bail!("chunking.chunk_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.chunk_words {
        anyhow::bail!("chunking.overlap_words must be < chunking.chunk_words");
    }

    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    match config.retrieval.backend.as_str() {
        "keyword" => {}
        "semantic" => {
            if !config.embedding.is_enabled() {
                anyhow::bail!(
                    "retrieval.backend 'semantic' requires embeddings. Set [embedding] provider in config."
                );
            }
        }
        other => anyhow::bail!(
            "Unknown retrieval backend: '{}'. Must be keyword or semantic.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    match config.pipeline.intent.as_str() {
        "model" | "prompt" => {}
        other => anyhow::bail!("Unknown intent strategy: '{}'. Must be model or prompt.", other),
    }
    match config.pipeline.resolver.as_str() {
        "rewrite" | "anchor" => {}
        other => anyhow::bail!(
            "Unknown resolver strategy: '{}'. Must be rewrite or anchor.",
            other
        ),
    }
    match config.pipeline.grounding.as_str() {
        "llm" | "lexical" => {}
        other => anyhow::bail!(
            "Unknown grounding strategy: '{}'. Must be llm or lexical.",
            other
        ),
    }

    if config.context.max_turns == 0 {
        anyhow::bail!("context.max_turns must be > 0");
    }

    Ok(())
}
