use std::sync::Arc;

use parchment_core::rendering::OutputFormat;
use parchment_core::ServerComponents;
use r2e::prelude::*;

use crate::error_map::to_app_error;
use crate::handlers;
use crate::http_util::bearer_token;
use crate::state::AppState;

/// Streams previously-rendered documents stashed by `get_document(proxy=true)`.
#[derive(Controller)]
#[controller(path = "/proxy", state = AppState)]
pub struct ProxyController {
    #[inject]
    components: Arc<ServerComponents>,
}

#[routes]
impl ProxyController {
    #[get("/{proxy_guid}")]
    async fn get(
        &self,
        headers: HeaderMap,
        Path(proxy_guid): Path<String>,
    ) -> Result<([(&'static str, &'static str); 1], Vec<u8>), AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        let (format, bytes) = handlers::get_proxy_document(&self.components, &proxy_guid, Some(group)).await.map_err(to_app_error)?;
        let media_type = OutputFormat::parse(&format).map_err(to_app_error)?.media_type();
        Ok(([("content-type", media_type)], bytes))
    }
}
