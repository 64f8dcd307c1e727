use config::{Config, ConfigError, File};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Shortest HMAC secret accepted for signing session tokens.
pub const MIN_SECRET_LEN: usize = 32;

/// Shortest shared key accepted on the internal routes.
pub const MIN_SERVICE_KEY_LEN: usize = 16;

fn deserialize_allowed_origins<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }
    match StringOrVec::deserialize(deserializer) {
        Ok(StringOrVec::String(s)) => Ok(s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()),
        Ok(StringOrVec::Vec(v)) => Ok(v),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub admission: AdmissionConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
    #[serde(default = "default_cookie_max_age_secs")]
    pub cookie_max_age_secs: i64,
    #[serde(default)]
    pub cookie_secure: bool,
}

impl JwtConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days)
    }
}

fn default_ttl_days() -> i64 {
    30
}

fn default_cookie_name() -> String {
    "token".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_cookie_max_age_secs() -> i64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u64,
    pub window_secs: u64,
    /// Route scope folded into every counter key, usually the service name.
    pub scope: String,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationSource {
    Redis,
    Idm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    pub backend_timeout_ms: u64,
    pub revocation_source: RevocationSource,
    pub idm_url: Option<String>,
    /// Presented by callers of `/internal/*` in the `x-service-key` header.
    /// Those routes refuse every caller while it is unset.
    #[serde(default)]
    pub service_key: Option<String>,
}

impl AdmissionConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(deserialize_with = "deserialize_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Defaults first, then config.toml, then CLINIC__SECTION__KEY env vars
        let config = Config::builder()
            .set_default("rate_limit.requests", 10)?
            .set_default("rate_limit.window_secs", 60)?
            .set_default("rate_limit.scope", "idm")?
            .set_default("admission.backend_timeout_ms", 2000)?
            .set_default("admission.revocation_source", "redis")?
            .set_default("logging.level", "info")?
            .set_default("logging.directory", "./logs")?
            .add_source(File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("CLINIC").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // JWT settings
        if self.jwt.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.jwt.ttl_days <= 0 {
            return Err(ConfigError::Message("jwt.ttl_days must be positive".into()));
        }

        // Rate limiting
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Message("rate_limit.window_secs must be positive".into()));
        }

        // Admission backends
        if self.admission.revocation_source == RevocationSource::Idm {
            if self.admission.idm_url.is_none() {
                return Err(ConfigError::Message(
                    "admission.idm_url is required when revocation_source = \"idm\"".into(),
                ));
            }
            if self.admission.service_key.is_none() {
                return Err(ConfigError::Message(
                    "admission.service_key is required when revocation_source = \"idm\"".into(),
                ));
            }
        }
        if let Some(key) = &self.admission.service_key {
            if key.len() < MIN_SERVICE_KEY_LEN {
                return Err(ConfigError::Message(format!(
                    "admission.service_key must be at least {} bytes",
                    MIN_SERVICE_KEY_LEN
                )));
            }
        }
        Ok(())
    }
}
