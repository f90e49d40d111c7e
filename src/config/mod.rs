//! Configuration management for teller

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub context: ContextConfig,
    pub cache: CacheConfig,
    pub market: MarketConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider selected at startup: "openai" or "local"
    pub default_provider: String,
    pub openai: OpenAiConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "local".to_string(),
            openai: OpenAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Symmetric signing secret. Overridden by TELLER_JWT_SECRET when set.
    pub jwt_secret: String,
    pub token_expire_minutes: i64,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            token_expire_minutes: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl AuthConfig {
    /// Resolve the signing secret, preferring the environment
    pub fn secret(&self) -> String {
        std::env::var("TELLER_JWT_SECRET").unwrap_or_else(|_| self.jwt_secret.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Seconds since last update after which a conversation expires
    pub ttl_secs: i64,
    /// Maximum turns retained per conversation (oldest evicted first)
    pub max_turns: usize,
    /// Interval for the background expiry sweep
    pub sweep_interval_secs: u64,
    /// Optional path for restart continuity snapshots
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_turns: 10,
            sweep_interval_secs: 600,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, an in-process cache is used instead of Redis
    pub redis_enabled: bool,
    /// Overridden by REDIS_URL when set
    pub redis_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_enabled: false,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn url(&self) -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| self.redis_url.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub base_url: String,
    /// API key env var name; the key itself never lives in the config file
    pub api_key_env: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.marketdata.example.com/v1".to_string(),
            api_key_env: "TELLER_MARKET_API_KEY".to_string(),
        }
    }
}

impl MarketConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory that fine-tune jobs write their outputs under
    pub output_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("models"),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "teller") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let config = Config::default();
        assert_eq!(config.context.ttl_secs, 3600);
        assert_eq!(config.context.max_turns, 10);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.auth.token_expire_minutes, 30);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [rate_limit]
            max_requests = 3
            window_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.context.max_turns, 10);
    }
}
