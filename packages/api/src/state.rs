// ABOUTME: Shared application state for API handlers
// ABOUTME: Carries the control plane built once at process start

use crucible_sandboxes::ControlPlane;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlPlane>,
}

impl AppState {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}
