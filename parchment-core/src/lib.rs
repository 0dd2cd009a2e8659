//! Core document-assembly engine: storage, auth, registry, validation,
//! session lifecycle, rendering, image validation, and housekeeping.
//!
//! Consumers construct a single [`ServerComponents`] at startup and thread
//! it explicitly into every handler. There is no package-level mutable
//! state (spec §9).

pub mod auth;
pub mod config;
pub mod error;
pub mod housekeeper;
pub mod image;
pub mod model;
pub mod registry;
pub mod rendering;
pub mod session;
pub mod storage;
pub mod validation;

use std::sync::Arc;

use auth::{AuthService, EnvSecretSource, SecretProvider, TokenRegistry};
use config::DocConfig;
use error::DocResult;
use housekeeper::Housekeeper;
use image::ImageValidator;
use registry::{FragmentRegistry, StyleRegistry, TemplateRegistry};
use rendering::RenderingPipeline;
use session::SessionEngine;
use storage::Storage;

/// Everything a handler needs, built once at startup.
pub struct ServerComponents {
    pub config: DocConfig,
    pub storage: Arc<Storage>,
    pub auth: AuthService,
    pub tokens: Arc<TokenRegistry>,
    pub templates: TemplateRegistry,
    pub fragments: FragmentRegistry,
    pub styles: StyleRegistry,
    pub sessions: SessionEngine,
    pub images: ImageValidator,
    pub housekeeper: Housekeeper,
}

impl ServerComponents {
    /// Load every registry and engine from disk under `config`. Fails hard
    /// on the first unrecoverable load error (e.g. a group mismatch),
    /// matching the "startup catalogue, not runtime reflection" design
    /// note in spec §9.
    pub async fn build(config: DocConfig, secret_env_var: &str) -> DocResult<Self> {
        let storage = Arc::new(Storage::new(config.storage_dir()));
        let secrets = SecretProvider::new(Arc::new(EnvSecretSource::new(secret_env_var)));
        let tokens = Arc::new(TokenRegistry::new(config.auth_dir()));
        let auth = AuthService::new(secrets, tokens.clone());

        let templates = TemplateRegistry::load(&config.templates_dir).await?;
        let fragments = FragmentRegistry::load(&config.fragments_dir).await?;
        let styles = StyleRegistry::load(&config.styles_dir).await?;
        let sessions = SessionEngine::load(config.sessions_dir()).await?;
        let images = ImageValidator::new(&config);
        let housekeeper = Housekeeper::new(&config);

        Ok(ServerComponents {
            config,
            storage,
            auth,
            tokens,
            templates,
            fragments,
            styles,
            sessions,
            images,
            housekeeper,
        })
    }

    pub fn rendering(&self) -> RenderingPipeline<'_> {
        RenderingPipeline {
            templates: &self.templates,
            fragments: &self.fragments,
            styles: &self.styles,
            storage: &self.storage,
        }
    }

    /// Start the periodic housekeeper sweep. The returned handle aborts the
    /// loop when dropped.
    pub fn spawn_housekeeper(&self) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.housekeeping_interval_mins * 60);
        Housekeeper::new(&self.config).spawn_periodic(self.storage.clone(), interval)
    }
}
