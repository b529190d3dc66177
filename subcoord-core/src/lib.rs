#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod entities;
pub mod events;
pub mod framework;
pub mod gateway;
pub mod hub;
pub mod intake;
pub mod processors;
pub mod store;
pub mod utils;

pub use coordinator::{BackgroundTasks, Coordinator};
