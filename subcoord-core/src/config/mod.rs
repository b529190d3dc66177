//! Runtime configuration types.
//!
//! These are the validated values the core runs on. Parsing the TOML file
//! and CLI arguments into them is the server crate's job.

mod config_store;
mod gateway;
mod intake;
mod schedule;
mod server;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use gateway::GatewayConfig;
pub use intake::IntakeConfig;
pub use schedule::{PollerConfig, SweeperConfig};
pub use server::ServerConfig;

/// Configuration shared between the server and background tasks.
///
/// Sections that can change on reload sit in their own [`ConfigStore`] so
/// each consumer watches only what it uses.
#[derive(Clone)]
pub struct SharedConfig {
    pub server: ConfigStore<ServerConfig>,
    pub gateway: ConfigStore<GatewayConfig>,
    pub sweeper: ConfigStore<SweeperConfig>,
    pub poller: ConfigStore<PollerConfig>,
    /// Read once at startup.
    pub intake: IntakeConfig,
}
