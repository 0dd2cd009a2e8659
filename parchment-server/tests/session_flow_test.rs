use std::sync::Arc;

use parchment_core::config::DocConfig;
use parchment_core::ServerComponents;
use parchment_plot::PlotEngine;
use parchment_server::controllers::discovery_controller::DiscoveryController;
use parchment_server::controllers::session_controller::SessionController;
use parchment_server::state::AppState;
use r2e::prelude::*;
use r2e_test::TestApp;

const TEST_SECRET_VAR: &str = "PARCHMENT_TEST_AUTH_SECRET";

async fn setup() -> (TestApp, String) {
    std::env::set_var(TEST_SECRET_VAR, "integration-test-secret");

    let dir = tempfile::tempdir().expect("tempdir");
    let config = DocConfig {
        data_dir: dir.path().join("data"),
        templates_dir: dir.path().join("templates"),
        styles_dir: dir.path().join("styles"),
        fragments_dir: dir.path().join("fragments"),
        images_dir: dir.path().join("images"),
        max_storage_mb: 1024,
        housekeeping_interval_mins: 60,
        housekeeper_lock_stale_seconds: 3600,
        image_max_size_mb: 10,
        image_validation_timeout: std::time::Duration::from_secs(10),
        image_require_https: true,
    };

    let components = ServerComponents::build(config, TEST_SECRET_VAR).await.expect("components build");
    let plots = Arc::new(PlotEngine::new(components.storage.clone()));
    let state = AppState { components: Arc::new(components), plots, config: R2eConfig::empty() };

    let app = TestApp::from_builder(
        AppBuilder::new()
            .with_state(state)
            .with(ErrorHandling)
            .register_controller::<DiscoveryController>()
            .register_controller::<SessionController>(),
    );

    let token = mint_token("acme");
    (app, token)
}

fn mint_token(group: &str) -> String {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    let now = chrono::Utc::now();
    let claims = serde_json::json!({
        "group": group,
        "aud": "gofr-api",
        "iat": now.timestamp(),
        "exp": (now + chrono::Duration::hours(1)).timestamp(),
    });
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"integration-test-secret")).expect("mint token")
}

#[tokio::test]
async fn ping_requires_no_auth() {
    let (app, _token) = setup().await;
    let resp = app.get("/ping").await.assert_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn list_templates_is_empty_for_a_fresh_install() {
    let (app, _token) = setup().await;
    let resp = app.get("/templates").await.assert_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn creating_a_session_without_a_token_is_rejected() {
    let (app, _token) = setup().await;
    let body = serde_json::json!({ "template_id": "whatever", "alias": "my-doc" });
    app.post_json("/sessions", &body).await.assert_unauthorized();
}

#[tokio::test]
async fn creating_a_session_against_an_unknown_template_is_not_found() {
    let (app, token) = setup().await;
    let body = serde_json::json!({ "template_id": "does-not-exist", "alias": "my-doc" });
    app.post_json_authenticated("/sessions", &body, &token).await.assert_not_found();
}

#[tokio::test]
async fn list_active_sessions_starts_empty_for_a_group() {
    let (app, token) = setup().await;
    let resp = app.get_authenticated("/sessions", &token).await.assert_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn session_status_for_a_missing_session_is_not_found() {
    let (app, token) = setup().await;
    app.get_authenticated("/sessions/does-not-exist", &token).await.assert_not_found();
}
