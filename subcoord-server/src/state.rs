//! Application state shared across all request handlers.

use std::sync::Arc;
use subcoord_core::Coordinator;
use subcoord_core::gateway::GatewayAdapter;
use subcoord_core::intake::EventIntake;
use subcoord_core::store::StateStore;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub fn adapter(&self) -> &GatewayAdapter {
        &self.coordinator.adapter
    }

    pub fn intake(&self) -> &EventIntake {
        &self.coordinator.intake
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.coordinator.store
    }
}
