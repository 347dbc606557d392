use crate::pii::PiiCategory;
use crate::retrieval::SearchMode;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_COLLECTION: &str = "documents";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was installed twice.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the Synapse server and its worker pool.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance holding the hybrid document collection.
    pub qdrant_url: String,
    /// Name of the Qdrant collection searched by the Researcher.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to build dense query vectors.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the dense vectors stored in the collection.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime serving generation and embeddings.
    pub ollama_url: String,
    /// Model used for every agent and routing call.
    pub llm_model: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Number of concurrent job workers.
    pub worker_count: usize,
    /// Maximum Critic rounds before the Admin forces an unverified answer.
    pub agent_max_rounds: u32,
    /// Number of chunks retrieved per Researcher turn.
    pub retrieval_top_k: usize,
    /// Retrieval strategy used by the Researcher.
    pub retrieval_mode: SearchMode,
    /// Deadline applied to each retrieval call, in milliseconds.
    pub retrieval_timeout_ms: u64,
    /// Attempts made for a transient model failure within one turn.
    pub llm_max_retries: u32,
    /// Wall-clock budget for one job's agent loop, in seconds.
    pub job_deadline_secs: u64,
    /// Age after which a `running` job without progress is requeued, in seconds.
    pub visibility_timeout_secs: u64,
    /// Age after which terminal jobs are purged, in seconds.
    pub job_retention_secs: u64,
    /// Entity categories recognised by the PII gate.
    pub pii_categories: Vec<PiiCategory>,
    /// Whether callers may opt into restoring PII in final answers.
    pub pii_restore_allowed: bool,
    /// Optional HTTP collector receiving agent traces.
    pub trace_sink_url: Option<String>,
}

/// Supported embedding backends for dense query vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic in-process hashing encoder (offline development).
    Hashing,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Ollama),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            llm_model: load_env("LLM_MODEL")?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            worker_count: parse_or("WORKER_COUNT", 4)?,
            agent_max_rounds: parse_or("AGENT_MAX_ROUNDS", 3)?,
            retrieval_top_k: parse_or("RETRIEVAL_TOP_K", 5)?,
            retrieval_mode: load_env_optional("RETRIEVAL_MODE")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("RETRIEVAL_MODE".into()))
                })
                .transpose()?
                .unwrap_or(SearchMode::Hybrid),
            retrieval_timeout_ms: parse_or("RETRIEVAL_TIMEOUT_MS", 10_000)?,
            llm_max_retries: parse_or("LLM_MAX_RETRIES", 3)?,
            job_deadline_secs: parse_or("JOB_DEADLINE_SECS", 300)?,
            visibility_timeout_secs: parse_or("VISIBILITY_TIMEOUT_SECS", 600)?,
            job_retention_secs: parse_or("JOB_RETENTION_SECS", 3600)?,
            pii_categories: load_env_optional("PII_CATEGORIES")
                .map(|value| parse_categories(&value))
                .transpose()?
                .unwrap_or_else(|| PiiCategory::ALL.to_vec()),
            pii_restore_allowed: load_env_optional("PII_RESTORE_ALLOWED")
                .map(|value| parse_flag("PII_RESTORE_ALLOWED", &value))
                .transpose()?
                .unwrap_or(false),
            trace_sink_url: load_env_optional("TRACE_SINK_URL"),
        };
        check_visibility(config.job_deadline_secs, config.visibility_timeout_secs)?;
        Ok(config)
    }

    /// Deadline applied to each retrieval call.
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    /// Wall-clock budget for one job.
    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    /// Visibility timeout for stale `running` jobs.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Retention window for terminal jobs.
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

/// A job still within its deadline must never look stale to the visibility sweep.
fn check_visibility(
    job_deadline_secs: u64,
    visibility_timeout_secs: u64,
) -> Result<(), ConfigError> {
    if visibility_timeout_secs <= job_deadline_secs {
        return Err(ConfigError::InvalidValue(format!(
            "VISIBILITY_TIMEOUT_SECS ({visibility_timeout_secs}) must exceed JOB_DEADLINE_SECS ({job_deadline_secs})"
        )));
    }
    Ok(())
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

fn parse_categories(value: &str) -> Result<Vec<PiiCategory>, ConfigError> {
    let mut categories = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let category: PiiCategory = item
            .parse()
            .map_err(|()| ConfigError::InvalidValue(format!("PII_CATEGORIES ({item})")))?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    if categories.is_empty() {
        return Err(ConfigError::InvalidValue("PII_CATEGORIES".into()));
    }
    Ok(categories)
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hashing" | "local" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment, let `adjust` apply command-line overrides, and
/// install the result in the global cache.
pub fn init_config(adjust: impl FnOnce(&mut Config)) -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let mut config = Config::from_env()?;
    adjust(&mut config);
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(get_config())
}
