use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::llm::ProviderConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Engine tunables. This is the single normalized schema for flags the
/// source environment spread over differently-cased variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Let the LLM select catalog queries for ambiguous questions.
    pub use_llm_for_query_selection: bool,
    /// Let the LLM write the dashboard narrative.
    pub use_llm_for_narrative: bool,
    /// Result-cache TTL (default: 900 = 15 minutes).
    pub cache_ttl_seconds: u64,
    /// Per-stage retry budget.
    pub max_retries: u32,
    /// Whole-request wall clock budget.
    pub request_deadline_seconds: u64,
    /// Parallel catalog queries per request (the selection cap is 3).
    pub query_concurrency: usize,
    /// Per-query database timeout.
    pub query_timeout_seconds: u64,
    /// Ask back on ambiguous questions instead of best-guessing.
    pub clarify_on_ambiguity: bool,
    /// Turns of chat context rendered into classifier prompts.
    pub context_messages: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: Option<ProviderConfig>,
    pub fallback: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Persist chat memory to the database; in-process best-effort buffer
    /// otherwise.
    pub persist: bool,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "panorama")]
#[command(version, about = "Panorama - Conversational Analytics Engine")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g. "info,insight_engine=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Use the LLM for query selection (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub use_llm_for_query_selection: Option<bool>,

    /// Use the LLM for narrative generation (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub use_llm_for_narrative: Option<bool>,

    /// Result cache TTL in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Per-stage retry budget (overrides config file)
    #[arg(long, value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Whole-request deadline in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub request_deadline_seconds: Option<u64>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(cli_args)
    }

    pub fn load_with_args(cli_args: CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_LOG_LEVEL
    /// - APP_USE_LLM_FOR_QUERY_SELECTION / APP_USE_LLM_FOR_NARRATIVE
    /// - APP_CACHE_TTL_SECONDS / APP_MAX_RETRIES
    /// - APP_REQUEST_DEADLINE_SECONDS / APP_QUERY_CONCURRENCY
    /// - APP_LLM_API_BASE / APP_LLM_MODEL / APP_LLM_API_KEY (primary provider)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(v) = std::env::var("APP_USE_LLM_FOR_QUERY_SELECTION")
            && let Ok(v) = v.parse()
        {
            self.engine.use_llm_for_query_selection = v;
            tracing::info!("Override engine.use_llm_for_query_selection from env: {}", v);
        }

        if let Ok(v) = std::env::var("APP_USE_LLM_FOR_NARRATIVE")
            && let Ok(v) = v.parse()
        {
            self.engine.use_llm_for_narrative = v;
            tracing::info!("Override engine.use_llm_for_narrative from env: {}", v);
        }

        if let Ok(v) = std::env::var("APP_CACHE_TTL_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.engine.cache_ttl_seconds = v;
            tracing::info!("Override engine.cache_ttl_seconds from env: {}", v);
        }

        if let Ok(v) = std::env::var("APP_MAX_RETRIES")
            && let Ok(v) = v.parse()
        {
            self.engine.max_retries = v;
            tracing::info!("Override engine.max_retries from env: {}", v);
        }

        if let Ok(v) = std::env::var("APP_REQUEST_DEADLINE_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.engine.request_deadline_seconds = v;
            tracing::info!("Override engine.request_deadline_seconds from env: {}", v);
        }

        if let Ok(v) = std::env::var("APP_QUERY_CONCURRENCY")
            && let Ok(v) = v.parse()
        {
            self.engine.query_concurrency = v;
            tracing::info!("Override engine.query_concurrency from env: {}", v);
        }

        // Primary provider credentials are commonly supplied via env only.
        if let (Ok(api_base), Ok(model), Ok(api_key)) = (
            std::env::var("APP_LLM_API_BASE"),
            std::env::var("APP_LLM_MODEL"),
            std::env::var("APP_LLM_API_KEY"),
        ) {
            tracing::info!("Override llm.primary from env (model: {})", model);
            self.llm.primary = Some(ProviderConfig {
                name: "env-primary".to_string(),
                api_base,
                model_name: model,
                api_key,
                max_tokens: 2048,
                temperature: 0.1,
                timeout_seconds: 60,
            });
        }
    }

    /// Apply command line argument overrides (highest priority).
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(v) = args.use_llm_for_query_selection {
            self.engine.use_llm_for_query_selection = v;
            tracing::info!("Override engine.use_llm_for_query_selection from CLI: {}", v);
        }

        if let Some(v) = args.use_llm_for_narrative {
            self.engine.use_llm_for_narrative = v;
            tracing::info!("Override engine.use_llm_for_narrative from CLI: {}", v);
        }

        if let Some(v) = args.cache_ttl_seconds {
            self.engine.cache_ttl_seconds = v;
            tracing::info!("Override engine.cache_ttl_seconds from CLI: {}", v);
        }

        if let Some(v) = args.max_retries {
            self.engine.max_retries = v;
            tracing::info!("Override engine.max_retries from CLI: {}", v);
        }

        if let Some(v) = args.request_deadline_seconds {
            self.engine.request_deadline_seconds = v;
            tracing::info!("Override engine.request_deadline_seconds from CLI: {}", v);
        }
    }

    /// Validate configuration.
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.engine.cache_ttl_seconds == 0 {
            anyhow::bail!("engine.cache_ttl_seconds must be > 0");
        }

        if self.engine.query_concurrency == 0 {
            anyhow::bail!("engine.query_concurrency must be > 0");
        }

        if self.engine.request_deadline_seconds == 0 {
            anyhow::bail!("engine.request_deadline_seconds must be > 0");
        }

        if self.engine.use_llm_for_query_selection && self.llm.primary.is_none() {
            tracing::warn!(
                "engine.use_llm_for_query_selection is on but no LLM provider is configured; \
                 the heuristic path will be used"
            );
        }

        if self.engine.use_llm_for_narrative && self.llm.primary.is_none() {
            tracing::warn!(
                "engine.use_llm_for_narrative is on but no LLM provider is configured; \
                 the rule-based narrative will be used"
            );
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/panorama.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,insight_engine=debug".to_string(),
            file: Some("logs/panorama.log".to_string()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_llm_for_query_selection: false,
            use_llm_for_narrative: false,
            cache_ttl_seconds: 900,
            max_retries: 3,
            request_deadline_seconds: 180,
            query_concurrency: 3,
            query_timeout_seconds: 30,
            clarify_on_ambiguity: true,
            context_messages: 6,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}
