use std::sync::Arc;

use parchment_core::ServerComponents;
use r2e::prelude::*;

use crate::error_map::to_app_error;
use crate::handlers;
use crate::state::AppState;

/// No-auth stock-image catalogue served straight from `images_dir`.
#[derive(Controller)]
#[controller(path = "/images", state = AppState)]
pub struct ImageController {
    #[inject]
    components: Arc<ServerComponents>,
}

#[routes]
impl ImageController {
    #[get("")]
    async fn list(&self) -> Result<Json<serde_json::Value>, AppError> {
        handlers::list_stock_images(&self.components).await.map(Json).map_err(to_app_error)
    }

    #[get("/{*path}")]
    async fn get(&self, Path(path): Path<String>) -> Result<([(&'static str, &'static str); 2], Vec<u8>), AppError> {
        let (bytes, media_type) = handlers::get_stock_image(&self.components, &path).await.map_err(to_app_error)?;
        Ok(([("content-type", media_type), ("cache-control", "public, max-age=3600")], bytes))
    }
}
