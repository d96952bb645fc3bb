//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or
//! [`Config::minimal`]) describes the local setup: Ollama on
//! `localhost:11434` for both embeddings and generation, Qdrant on
//! `localhost:6333`, and the chat server on `127.0.0.1:7860`.
//!
//! Secrets are never read from the file. Providers that need an API key
//! name the environment variable holding it (`api_key_env`), and the key is
//! resolved at client construction time.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

// ============ [llm] ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `ollama`, `openai` or `azure_openai`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model name, or the deployment name for `azure_openai`.
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            api_key_env: None,
            api_version: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "phi4-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    2
}

impl LlmConfig {
    pub fn endpoint(&self) -> String {
        provider_endpoint(&self.provider, self.url.as_deref())
    }

    pub fn api_key(&self) -> Result<Option<String>> {
        resolve_api_key(&self.provider, self.api_key_env.as_deref())
    }
}

// ============ [embedding] ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai` or `azure_openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected output size. When unset, ingestion takes the size of the
    /// first vector the provider returns; when set, a provider returning a
    /// different size is an error.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            api_key_env: None,
            api_version: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_embedding_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn endpoint(&self) -> String {
        provider_endpoint(&self.provider, self.url.as_deref())
    }

    pub fn api_key(&self) -> Result<Option<String>> {
        resolve_api_key(&self.provider, self.api_key_env.as_deref())
    }
}

// ============ [vector_store] ============

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `qdrant`, `azure_search` or `memory`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Qdrant collection name, or Azure AI Search index name.
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    /// Name of the vector field in an Azure AI Search index.
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: None,
            collection: default_collection(),
            api_key_env: None,
            api_version: default_search_api_version(),
            vector_field: default_vector_field(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_provider() -> String {
    "qdrant".to_string()
}
fn default_collection() -> String {
    "healthcare_docs".to_string()
}
fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}
fn default_vector_field() -> String {
    "content_vector".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

impl VectorStoreConfig {
    pub fn endpoint(&self) -> String {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, "qdrant") => "http://localhost:6333".to_string(),
            (None, _) => String::new(),
        }
    }

    /// Resolve the store API key. Qdrant runs unauthenticated locally, so a
    /// missing key is only an error for Azure AI Search.
    pub fn api_key(&self) -> Result<Option<String>> {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(var), _) => read_env_key(var).map(Some),
            (None, "azure_search") => read_env_key("AZURE_SEARCH_KEY").map(Some),
            (None, _) => Ok(None),
        }
    }
}

// ============ [retrieval] ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Upper bound on the formatted context block handed to the model.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.3
}
fn default_max_context_chars() -> usize {
    12_000
}

// ============ [chunking] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    256
}

// ============ [server] ============

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
    "127.0.0.1:7860".to_string()
}

// ============ [agents] ============

#[derive(Debug, Deserialize, Clone)]
pub struct AgentsConfig {
    /// Overrides `llm.model` for the agent workflow.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_agent_temperature")]
    pub temperature: f32,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_agent_temperature(),
            max_tokens: default_agent_max_tokens(),
        }
    }
}

fn default_agent_temperature() -> f32 {
    0.3
}
fn default_agent_max_tokens() -> u32 {
    1200
}

// ============ [logging] ============

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty`, `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// ============ [corpus] ============

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Ingest the bundled healthcare sample documents.
    #[serde(default = "default_true")]
    pub include_builtin: bool,
    /// Optional directory of `.md` / `.txt` documents to ingest as well.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

// ============ Helpers ============

fn provider_endpoint(provider: &str, url: Option<&str>) -> String {
    if let Some(url) = url {
        return url.trim_end_matches('/').to_string();
    }
    match provider {
        "ollama" => "http://localhost:11434".to_string(),
        "openai" => "https://api.openai.com/v1".to_string(),
        _ => String::new(),
    }
}

fn resolve_api_key(provider: &str, env_name: Option<&str>) -> Result<Option<String>> {
    let var = match (env_name, provider) {
        (Some(var), _) => var,
        (None, "openai") => "OPENAI_API_KEY",
        (None, "azure_openai") => "AZURE_OPENAI_API_KEY",
        (None, _) => return Ok(None),
    };
    read_env_key(var).map(Some)
}

fn read_env_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", var),
    }
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Model used by the agent workflow.
    pub fn agent_model(&self) -> &str {
        self.agents.model.as_deref().unwrap_or(&self.llm.model)
    }

    pub fn validate(&self) -> Result<()> {
        for (section, provider) in [
            ("llm", self.llm.provider.as_str()),
            ("embedding", self.embedding.provider.as_str()),
        ] {
            match provider {
                "ollama" | "openai" | "azure_openai" => {}
                other => bail!(
                    "Unknown {} provider: '{}'. Must be ollama, openai, or azure_openai.",
                    section,
                    other
                ),
            }
        }

        match self.vector_store.provider.as_str() {
            "qdrant" | "azure_search" | "memory" => {}
            other => bail!(
                "Unknown vector_store provider: '{}'. Must be qdrant, azure_search, or memory.",
                other
            ),
        }

        if self.llm.provider == "azure_openai" && self.llm.url.is_none() {
            bail!("llm.url must be set to the Azure OpenAI endpoint when provider is 'azure_openai'");
        }
        if self.embedding.provider == "azure_openai" && self.embedding.url.is_none() {
            bail!("embedding.url must be set to the Azure OpenAI endpoint when provider is 'azure_openai'");
        }
        if self.vector_store.provider == "azure_search" && self.vector_store.url.is_none() {
            bail!("vector_store.url must be set when provider is 'azure_search'");
        }

        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if !(0.0..=2.0).contains(&self.agents.temperature) {
            bail!("agents.temperature must be in [0.0, 2.0]");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
        }
        if self.retrieval.max_context_chars == 0 {
            bail!("retrieval.max_context_chars must be > 0");
        }
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => bail!(
                "Unknown logging.format: '{}'. Must be pretty, compact, or json.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.llm.model, "phi4-mini");
        assert_eq!(cfg.embedding.model, "nomic-embed-text");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!((cfg.retrieval.score_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.vector_store.collection, "healthcare_docs");
        assert_eq!(cfg.vector_store.endpoint(), "http://localhost:6333");
        assert_eq!(cfg.llm.endpoint(), "http://localhost:11434");
        assert_eq!(cfg.server.bind, "127.0.0.1:7860");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[retrieval]
top_k = 3

[llm]
model = "llama3.2"
url = "http://gpu-box:11434/"
"#,
        )
        .unwrap();
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.retrieval.max_context_chars, 12_000);
        assert_eq!(cfg.llm.endpoint(), "http://gpu-box:11434");
        assert_eq!(cfg.agent_model(), "llama3.2");
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let cfg: Config = toml::from_str("[llm]\nprovider = \"bard\"").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("Unknown llm provider"), "{}", err);
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let cfg: Config = toml::from_str("[retrieval]\ntop_k = 0").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let cfg: Config = toml::from_str("[retrieval]\nscore_threshold = 1.5").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_azure_requires_url() {
        let cfg: Config = toml::from_str("[vector_store]\nprovider = \"azure_search\"").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("vector_store.url"), "{}", err);
    }

    #[test]
    fn test_agent_model_override() {
        let cfg: Config = toml::from_str("[agents]\nmodel = \"gpt-4o\"").unwrap();
        assert_eq!(cfg.agent_model(), "gpt-4o");
    }

    #[test]
    fn test_api_key_from_named_env() {
        std::env::set_var("HRAG_TEST_LLM_KEY", "sk-test");
        let cfg: Config = toml::from_str(
            "[llm]\nprovider = \"openai\"\napi_key_env = \"HRAG_TEST_LLM_KEY\"",
        )
        .unwrap();
        assert_eq!(cfg.llm.api_key().unwrap().as_deref(), Some("sk-test"));
        assert_eq!(cfg.llm.endpoint(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_missing_api_key_is_error() {
        let cfg: Config = toml::from_str(
            "[embedding]\nprovider = \"openai\"\napi_key_env = \"HRAG_TEST_UNSET_KEY\"",
        )
        .unwrap();
        let err = cfg.embedding.api_key().unwrap_err().to_string();
        assert!(err.contains("HRAG_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let cfg = Config::minimal();
        assert!(cfg.llm.api_key().unwrap().is_none());
        assert!(cfg.vector_store.api_key().unwrap().is_none());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = load_or_default(Path::new("/nonexistent/hrag.toml")).unwrap();
        assert_eq!(cfg.llm.provider, "ollama");
    }
}
