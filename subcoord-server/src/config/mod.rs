//! Configuration module for subcoord-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::FileConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use subcoord_core::config::{
    ConfigStore, GatewayConfig, IntakeConfig, PollerConfig, ServerConfig, SharedConfig,
    SweeperConfig,
};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub sweeper: SweeperConfig,
    pub poller: PollerConfig,
    pub intake: IntakeConfig,
}

impl LoadedConfig {
    /// Wrap each reloadable section in its own [`ConfigStore`].
    pub fn into_shared(self) -> SharedConfig {
        SharedConfig {
            server: ConfigStore::new(self.server),
            gateway: ConfigStore::new(self.gateway),
            sweeper: ConfigStore::new(self.sweeper),
            poller: ConfigStore::new(self.poller),
            intake: self.intake,
        }
    }

    /// Push reloaded sections into a running [`SharedConfig`].
    ///
    /// The listen address and intake budget only take effect on restart.
    pub async fn apply_to(self, shared: &SharedConfig) {
        if shared.server.read().await.listen != self.server.listen {
            tracing::warn!(
                listen = %self.server.listen,
                "Listen address changed; restart to apply"
            );
        }
        if shared.intake != self.intake {
            tracing::warn!("Intake settings changed; restart to apply");
        }
        shared.gateway.update(self.gateway).await;
        shared.sweeper.update(self.sweeper).await;
        shared.poller.update(self.poller).await;
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn load_str(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let gateway = &config.gateway;
    if gateway.callback_secret.is_empty() {
        return Err(invalid("gateway.callback_secret must not be empty"));
    }
    if let Some(base_url) = &gateway.base_url {
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "gateway.base_url must be http or https, got {}",
                base_url.scheme()
            )));
        }
        if gateway.api_key.is_empty() {
            return Err(invalid("gateway.api_key is required when base_url is set"));
        }
    }
    if gateway.initiate_timeout_secs == 0 {
        return Err(invalid("gateway.initiate_timeout_secs must be positive"));
    }
    if gateway.signature_tolerance_secs <= 0 {
        return Err(invalid("gateway.signature_tolerance_secs must be positive"));
    }

    if config.sweeper.interval_secs == 0 || config.sweeper.batch_size == 0 {
        return Err(invalid("sweeper.interval_secs and sweeper.batch_size must be positive"));
    }

    let poller = &config.poller;
    if poller.interval_secs == 0 || poller.batch_size == 0 {
        return Err(invalid("poller.interval_secs and poller.batch_size must be positive"));
    }
    if poller.grace_secs >= poller.cap_secs {
        return Err(invalid("poller.grace_secs must be below poller.cap_secs"));
    }

    let intake = &config.intake;
    if intake.base_delay_ms == 0 || intake.base_delay_ms > intake.max_delay_ms {
        return Err(invalid(
            "intake.base_delay_ms must be positive and at most intake.max_delay_ms",
        ));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let FileConfig {
        server,
        gateway,
        sweeper,
        poller,
        intake,
    } = file_config;

    let mut gateway_config = GatewayConfig::new(
        gateway.base_url,
        gateway.api_key,
        gateway.callback_secret.into_bytes(),
    );
    gateway_config.initiate_timeout = Duration::from_secs(gateway.initiate_timeout_secs);
    gateway_config.signature_tolerance_secs = gateway.signature_tolerance_secs;

    LoadedConfig {
        server: ServerConfig {
            listen: server.listen,
        },
        gateway: gateway_config,
        sweeper: SweeperConfig {
            interval: Duration::from_secs(sweeper.interval_secs),
            batch_size: sweeper.batch_size,
        },
        poller: PollerConfig {
            interval: Duration::from_secs(poller.interval_secs),
            grace: Duration::from_secs(poller.grace_secs),
            cap: Duration::from_secs(poller.cap_secs),
            batch_size: poller.batch_size,
        },
        intake: IntakeConfig {
            max_attempts: intake.max_attempts,
            base_delay: Duration::from_millis(intake.base_delay_ms),
            max_delay: Duration::from_millis(intake.max_delay_ms),
        },
    }
}

/// Get the database URL from the environment, if one is set.
pub fn get_database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|url| !url.is_empty())
}
