use std::sync::Arc;

use parchment_core::config::DocConfig;
use parchment_core::ServerComponents;
use parchment_plot::PlotEngine;
use parchment_server::controllers::discovery_controller::DiscoveryController;
use parchment_server::controllers::image_controller::ImageController;
use parchment_server::controllers::proxy_controller::ProxyController;
use parchment_server::controllers::render_controller::RenderController;
use parchment_server::controllers::session_controller::SessionController;
use parchment_server::state::AppState;
use r2e::prelude::*;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let doc_config = DocConfig::load();
    let components = ServerComponents::build(doc_config, "GOFR_DOC_AUTH_SECRET")
        .await
        .expect("failed to load document-assembly engine from disk");
    let plots = Arc::new(PlotEngine::new(components.storage.clone()));
    let _housekeeper = components.spawn_housekeeper();
    let components = Arc::new(components);

    let config = R2eConfig::load("dev").unwrap_or_else(|_| R2eConfig::empty());

    AppBuilder::new()
        .provide(components)
        .provide(plots)
        .provide(config.clone())
        .build_state::<AppState, _>()
        .await
        .with_config(config)
        .with(Health)
        .with(Cors::permissive())
        .with(Tracing)
        .with(ErrorHandling)
        .register_controller::<DiscoveryController>()
        .register_controller::<SessionController>()
        .register_controller::<RenderController>()
        .register_controller::<ProxyController>()
        .register_controller::<ImageController>()
        .serve("0.0.0.0:3000")
        .await
        .unwrap();
}
