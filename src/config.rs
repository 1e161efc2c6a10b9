use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::models::Example;
use crate::llm::templates::Language;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on executions per question, counting the first one
    pub max_attempts: u32,
    pub language: Language,
    pub business_context: Option<String>,
    pub custom_instructions: Vec<String>,
    pub examples: Vec<Example>,
    /// How long a fetched schema snapshot is reused, 0 refetches on every call
    pub schema_ttl_secs: u64,
    /// Cleaned text-mode SQL shorter than this falls back to the raw completion
    pub min_sql_length: usize,
    pub explanation_row_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub cleanup_interval_secs: u64,
    /// TTL of plain row queries; aggregates get 3x, metadata queries 12x
    pub short_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// DuckDB database file to query
    #[arg(long)]
    pub database: Option<String>,

    /// Answer a single question, print the result as JSON and exit
    #[arg(long, value_name = "QUESTION")]
    pub ask: Option<String>,

    /// Disable the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NL_SQL__CACHE__MAX_SIZE=500 and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_SQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }
        if args.no_cache {
            config.cache.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::Message(
                "pipeline.max_attempts must be a positive integer".to_string(),
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::Message(
                "cache.max_size must be a positive integer".to_string(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Message(
                "database.pool_size must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "nl-sql.duckdb".to_string(),
            pool_size: 5,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "remote".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            language: Language::English,
            business_context: None,
            custom_instructions: Vec::new(),
            examples: Vec::new(),
            schema_ttl_secs: 300,
            min_sql_length: 10,
            explanation_row_limit: 20,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            cleanup_interval_secs: 300,
            short_ttl_secs: 300,
        }
    }
}
