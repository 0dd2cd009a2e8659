use std::sync::Arc;

use parchment_core::ServerComponents;
use parchment_plot::PlotEngine;
use r2e::prelude::*;

/// Application state injected into every controller. `components` owns
/// every core subsystem built once at startup; there is no other mutable
/// package-level state.
#[derive(Clone, BeanState)]
pub struct AppState {
    pub components: Arc<ServerComponents>,
    pub plots: Arc<PlotEngine>,
    pub config: R2eConfig,
}
