//! TOML file configuration structures.
//!
//! These structs directly map to the `subcoord-config.toml` file format.
//! Every section except `[gateway]` may be omitted.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Payment processor section.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Processor API root. Leave out to run against the built-in sandbox.
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default)]
    pub api_key: String,
    /// Shared secret the processor signs callbacks with.
    pub callback_secret: String,
    #[serde(default = "default_initiate_timeout_secs")]
    pub initiate_timeout_secs: u64,
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

fn default_initiate_timeout_secs() -> u64 {
    10
}

fn default_signature_tolerance_secs() -> i64 {
    subcoord_sdk::signature::DEFAULT_SIGNATURE_TOLERANCE
}

/// Expiry sweeper section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            batch_size: 100,
        }
    }
}

/// Payment poller section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    /// Minimum age before a payment is polled.
    pub grace_secs: u64,
    /// Age after which a payment is no longer polled.
    pub cap_secs: u64,
    pub batch_size: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            grace_secs: 5 * 60,
            cap_secs: 24 * 60 * 60,
            batch_size: 100,
        }
    }
}

/// Event intake re-delivery section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}
