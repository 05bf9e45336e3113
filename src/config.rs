//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::storage::{KeyStyle, ReferenceMode, RetryPolicy};

/// 50 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Origins allowed to call the API from a browser; empty allows any
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Object storage (Backblaze B2) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Service root used for account authorization
    pub service_url: String,
    /// Application key id; may be absent until the first upload
    pub key_id: Option<String>,
    /// Application key secret; may be absent until the first upload
    pub application_key: Option<String>,
    /// Bucket receiving all assets
    pub bucket_name: String,
    /// Bucket id, required for keys that cannot list buckets
    pub bucket_id: Option<String>,
    /// Value handed back for persistence: full URL or bare key
    #[serde(default)]
    pub reference_mode: ReferenceMode,
    #[serde(default)]
    pub key_style: KeyStyle,
    /// Timeout for control-plane requests
    pub request_timeout_seconds: u64,
    /// Timeout for the upload request itself
    pub upload_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl StorageConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }
}

/// Backoff for idempotent storage calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Upload route constraints
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum payload size in bytes
    pub max_bytes: usize,
    /// Accepted MIME types
    pub allowed_content_types: Vec<String>,
    /// Folder used when the form omits one
    pub default_folder: String,
    /// Folders a client may target
    pub allowed_folders: Vec<String>,
}

impl UploadConfig {
    pub fn is_allowed_content_type(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }

    pub fn is_allowed_folder(&self, folder: &str) -> bool {
        self.allowed_folders.iter().any(|allowed| allowed == folder)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Environment keys read as plain strings
const VERBATIM_ENV_KEYS: [&str; 3] = [
    "FURNIAR__STORAGE__KEY_ID",
    "FURNIAR__STORAGE__APPLICATION_KEY",
    "FURNIAR__STORAGE__BUCKET_ID",
];

fn verbatim_env(env: &config::Map<String, String>) -> config::Map<String, String> {
    env.iter()
        .filter(|(name, _)| {
            VERBATIM_ENV_KEYS
                .iter()
                .any(|key| key.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

impl AppConfig {
    /// Load configuration from the working directory and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FURNIAR__*, plus B2_KEY_ID,
    ///    B2_APPLICATION_KEY and B2_BUCKET_ID as fallbacks)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        Self::load_from(Path::new("config"))
    }

    /// Load configuration with files taken from `config_dir`
    pub fn load_from(config_dir: &Path) -> Result<Self, crate::error::AppError> {
        Self::load_with_env(config_dir, std::env::vars().collect())
    }

    fn load_with_env(
        config_dir: &Path,
        env: config::Map<String, String>,
    ) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let mut builder = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.allowed_origins", Vec::<String>::new())?
            .set_default("storage.service_url", "https://api.backblazeb2.com")?
            .set_default("storage.bucket_name", "furniar-assets")?
            .set_default("storage.reference_mode", "url")?
            .set_default("storage.key_style", "random")?
            .set_default("storage.request_timeout_seconds", 30)?
            .set_default("storage.upload_timeout_seconds", 120)?
            .set_default("storage.retry.max_attempts", 3)?
            .set_default("storage.retry.base_delay_ms", 200)?
            .set_default("storage.retry.max_delay_ms", 2000)?
            .set_default("upload.max_bytes", DEFAULT_MAX_UPLOAD_BYTES as i64)?
            .set_default(
                "upload.allowed_content_types",
                vec![
                    "image/jpeg",
                    "image/png",
                    "image/webp",
                    "model/gltf-binary",
                    "model/vnd.usdz+zip",
                ],
            )?
            .set_default("upload.default_folder", "products")?
            .set_default(
                "upload.allowed_folders",
                vec!["products", "ar-models", "logos"],
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        // Credentials under the names the dashboard deployment already uses
        for (key, var) in [
            ("storage.key_id", "B2_KEY_ID"),
            ("storage.application_key", "B2_APPLICATION_KEY"),
            ("storage.bucket_id", "B2_BUCKET_ID"),
        ] {
            if let Some(value) = env.get(var) {
                builder = builder.set_default(key, value.clone())?;
            }
        }

        let config = builder
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join("local")).required(false))
            // Load from environment variables (FURNIAR__*)
            .add_source(
                Environment::with_prefix("FURNIAR")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("upload.allowed_content_types")
                    .with_list_parse_key("upload.allowed_folders")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            // Ids and secrets stay verbatim; "0051..." must not become a number
            .add_source(
                Environment::with_prefix("FURNIAR")
                    .separator("__")
                    .source(Some(verbatim_env(&env))),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.storage.bucket_name.trim().is_empty() {
            return Err(AppError::Config(
                "storage.bucket_name must not be empty".to_string(),
            ));
        }

        if url::Url::parse(&self.storage.service_url).is_err() {
            return Err(AppError::Config(format!(
                "storage.service_url is not a valid URL: {}",
                self.storage.service_url
            )));
        }

        if self.storage.request_timeout_seconds == 0 || self.storage.upload_timeout_seconds == 0 {
            return Err(AppError::Config(
                "storage timeouts must be greater than 0".to_string(),
            ));
        }

        if self.storage.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "storage.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.upload.max_bytes == 0 {
            return Err(AppError::Config(
                "upload.max_bytes must be greater than 0".to_string(),
            ));
        }

        if !self.upload.is_allowed_folder(&self.upload.default_folder) {
            return Err(AppError::Config(format!(
                "upload.default_folder '{}' must be one of upload.allowed_folders",
                self.upload.default_folder
            )));
        }

        Ok(())
    }
}
