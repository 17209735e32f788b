use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub explorer: ExplorerConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    pub base_url: String,
    /// Sent as `X-API-KEY`; absence is reported per request, not at startup
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
    pub default_row_limit: u32,
}

impl ExplorerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub mcp_url: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("explorer.base_url", "https://api.allium.so/api/v1/explorer")?
            .set_default("explorer.request_timeout_secs", 30)?
            .set_default("explorer.poll_interval_ms", 2000)?
            .set_default("explorer.deadline_secs", 50)?
            .set_default("explorer.default_row_limit", crate::models::DEFAULT_ROW_LIMIT)?
            .set_default("agent.api_url", "https://api.anthropic.com")?
            .set_default("agent.model", "claude-sonnet-4-20250514")?
            .set_default("agent.mcp_url", "https://mcp-oauth.allium.so")?
            .set_default("agent.max_tokens", 8192)?
            .set_default("agent.request_timeout_secs", 55)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| config::ConfigError::Message(format!("Invalid PORT '{}': {}", port, e)))?;
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(base_url) = env::var("EXPLORER_BASE_URL") {
            builder = builder.set_override("explorer.base_url", base_url)?;
        }

        if let Ok(api_key) = env::var("EXPLORER_API_KEY") {
            builder = builder.set_override("explorer.api_key", Some(api_key))?;
        }

        for (var, key) in [
            ("EXPLORER_REQUEST_TIMEOUT_SECS", "explorer.request_timeout_secs"),
            ("EXPLORER_POLL_INTERVAL_MS", "explorer.poll_interval_ms"),
            ("EXPLORER_DEADLINE_SECS", "explorer.deadline_secs"),
            ("AGENT_REQUEST_TIMEOUT_SECS", "agent.request_timeout_secs"),
        ] {
            if let Ok(value) = env::var(var) {
                let value = value
                    .parse::<u64>()
                    .map_err(|e| config::ConfigError::Message(format!("Invalid {} '{}': {}", var, value, e)))?;
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(api_url) = env::var("AGENT_API_URL") {
            builder = builder.set_override("agent.api_url", api_url)?;
        }

        if let Ok(api_key) = env::var("AGENT_API_KEY") {
            builder = builder.set_override("agent.api_key", Some(api_key))?;
        }

        if let Ok(model) = env::var("AGENT_MODEL") {
            builder = builder.set_override("agent.model", model)?;
        }

        if let Ok(mcp_url) = env::var("AGENT_MCP_URL") {
            builder = builder.set_override("agent.mcp_url", mcp_url)?;
        }

        if let Ok(max_tokens) = env::var("AGENT_MAX_TOKENS") {
            let max_tokens = max_tokens.parse::<u32>().map_err(|e| {
                config::ConfigError::Message(format!("Invalid AGENT_MAX_TOKENS '{}': {}", max_tokens, e))
            })?;
            builder = builder.set_override("agent.max_tokens", max_tokens)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        for (name, value) in [
            ("explorer.base_url", &self.explorer.base_url),
            ("agent.api_url", &self.agent.api_url),
            ("agent.mcp_url", &self.agent.mcp_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| config::ConfigError::Message(format!("Invalid {} '{}': {}", name, value, e)))?;
        }

        if self.explorer.poll_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "explorer.poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.explorer.deadline_secs == 0 {
            return Err(config::ConfigError::Message(
                "explorer.deadline_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
