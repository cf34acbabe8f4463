use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub renderer: RendererConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_shipping_topic")]
    pub shipping_topic: String,
}

fn default_shipping_topic() -> String {
    "fulfilment.shipped".to_string()
}

/// Credentials are optional: a missing key is surfaced as NotConfigured when
/// the provider is actually used, not as a startup failure.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub printful: ProviderConfig,
    pub blurb: ProviderConfig,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Base configuration, then the environment-specific file, then a
            // local file kept out of version control.
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // FABLE__PROVIDERS__PRINTFUL__API_KEY=... style overrides.
            .add_source(config::Environment::with_prefix("FABLE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
