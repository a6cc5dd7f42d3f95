use crate::callback::CallbackPolicy;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_UPLOAD_MB: u64 = 50;
const DEFAULT_STORAGE_DIR: &str = "data/documents";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docrag server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Upload ceiling for a single document, in MiB.
    pub max_document_upload_size_mb: u64,
    /// Root directory of the local document object store.
    pub document_storage_dir: PathBuf,
    /// Bearer token used against the LLM provider.
    pub openai_api_key: Option<String>,
    /// Base URL of the LLM provider REST API.
    pub openai_base_url: String,
    /// Delay between vector store file-batch polls.
    pub vector_store_poll_interval_ms: u64,
    /// Number of polls before a file batch is considered stuck.
    pub vector_store_poll_attempts: u32,
    /// Base URL of the Langfuse trace store.
    pub langfuse_host: String,
    /// Langfuse public key (basic-auth user).
    pub langfuse_public_key: Option<String>,
    /// Langfuse secret key (basic-auth password).
    pub langfuse_secret_key: Option<String>,
    /// Maximum number of traces fetched concurrently.
    pub trace_fetch_concurrency: usize,
    /// Callback connect timeout in seconds.
    pub callback_connect_timeout_secs: u64,
    /// Callback total timeout in seconds.
    pub callback_read_timeout_secs: u64,
    /// Accept `http` callbacks and hosts on loopback or private networks.
    pub callback_allow_private_networks: bool,
    /// Optional JSON file with evaluation runs loaded at startup.
    pub evaluation_seed_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_document_upload_size_mb = parse_optional("MAX_DOCUMENT_UPLOAD_SIZE_MB")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_MB);
        upload_bytes(max_document_upload_size_mb)?;
        Ok(Self {
            server_port: parse_optional("SERVER_PORT")?,
            max_document_upload_size_mb,
            document_storage_dir: load_env_optional("DOCUMENT_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            vector_store_poll_interval_ms: parse_optional("VECTOR_STORE_POLL_INTERVAL_MS")?
                .unwrap_or(1000),
            vector_store_poll_attempts: parse_optional("VECTOR_STORE_POLL_ATTEMPTS")?
                .unwrap_or(120),
            langfuse_host: load_env_optional("LANGFUSE_HOST")
                .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string()),
            langfuse_public_key: load_env_optional("LANGFUSE_PUBLIC_KEY"),
            langfuse_secret_key: load_env_optional("LANGFUSE_SECRET_KEY"),
            trace_fetch_concurrency: parse_optional("TRACE_FETCH_CONCURRENCY")?
                .unwrap_or(8)
                .max(1),
            callback_connect_timeout_secs: parse_optional("CALLBACK_CONNECT_TIMEOUT")?
                .unwrap_or(3),
            callback_read_timeout_secs: parse_optional("CALLBACK_READ_TIMEOUT")?.unwrap_or(10),
            callback_allow_private_networks: parse_optional("CALLBACK_ALLOW_PRIVATE_NETWORKS")?
                .unwrap_or(false),
            evaluation_seed_file: load_env_optional("EVALUATION_SEED_FILE").map(PathBuf::from),
        })
    }

    /// Upload ceiling expressed in bytes; saturates for values `from_env` would reject.
    pub fn max_document_upload_bytes(&self) -> u64 {
        upload_bytes(self.max_document_upload_size_mb).unwrap_or(u64::MAX)
    }

    /// Which callback targets the callback sender accepts.
    pub fn callback_policy(&self) -> CallbackPolicy {
        if self.callback_allow_private_networks {
            CallbackPolicy::AllowPrivateNetworks
        } else {
            CallbackPolicy::PublicHttpsOnly
        }
    }

    /// Polling interval for vector store file batches.
    pub fn vector_store_poll_interval(&self) -> Duration {
        Duration::from_millis(self.vector_store_poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: None,
            max_document_upload_size_mb: DEFAULT_MAX_UPLOAD_MB,
            document_storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            vector_store_poll_interval_ms: 1000,
            vector_store_poll_attempts: 120,
            langfuse_host: DEFAULT_LANGFUSE_HOST.to_string(),
            langfuse_public_key: None,
            langfuse_secret_key: None,
            trace_fetch_concurrency: 8,
            callback_connect_timeout_secs: 3,
            callback_read_timeout_secs: 10,
            callback_allow_private_networks: false,
            evaluation_seed_file: None,
        }
    }
}

fn upload_bytes(size_mb: u64) -> Result<u64, ConfigError> {
    size_mb
        .checked_mul(BYTES_PER_MB)
        .ok_or_else(|| ConfigError::InvalidValue("MAX_DOCUMENT_UPLOAD_SIZE_MB".to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        server_port = ?config.server_port,
        max_upload_mb = config.max_document_upload_size_mb,
        storage_dir = %config.document_storage_dir.display(),
        openai_base_url = %config.openai_base_url,
        langfuse_host = %config.langfuse_host,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
