use std::sync::Arc;

use parchment_core::ServerComponents;
use r2e::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error_map::to_app_error;
use crate::handlers;
use crate::http_util::bearer_token;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RenderDocumentBody {
    #[serde(default = "default_format")]
    pub format: String,
    pub style_id: Option<String>,
    #[serde(default)]
    pub proxy: bool,
}

fn default_format() -> String {
    "html".to_string()
}

#[derive(Deserialize)]
pub struct ValidateParametersBody {
    pub template_id: String,
    pub parameters_type: String,
    pub fragment_id: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Auth-required rendering and validation endpoints.
#[derive(Controller)]
#[controller(path = "", state = AppState)]
pub struct RenderController {
    #[inject]
    components: Arc<ServerComponents>,
}

#[routes]
impl RenderController {
    #[post("/sessions/{session_id}/render")]
    async fn get_document(
        &self,
        headers: HeaderMap,
        Path(session_id): Path<String>,
        Json(body): Json<RenderDocumentBody>,
    ) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::get_document(&self.components, &session_id, &body.format, body.style_id.as_deref(), body.proxy, Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }

    #[post("/validate")]
    async fn validate_parameters(&self, headers: HeaderMap, Json(body): Json<ValidateParametersBody>) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::validate_parameters(
            &self.components,
            &body.template_id,
            &body.parameters_type,
            body.fragment_id.as_deref(),
            &body.parameters,
            Some(group),
        )
        .await
        .map(Json)
        .map_err(to_app_error)
    }
}
