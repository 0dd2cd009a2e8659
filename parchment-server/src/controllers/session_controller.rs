use std::sync::Arc;

use parchment_core::ServerComponents;
use r2e::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error_map::to_app_error;
use crate::handlers::{self, AddImageFragmentArgs};
use crate::http_util::bearer_token;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSessionBody {
    pub template_id: String,
    pub alias: String,
}

#[derive(Deserialize)]
pub struct SetGlobalParametersBody {
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct AddFragmentBody {
    pub fragment_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub position: Option<String>,
}

#[derive(Deserialize)]
pub struct AddImageFragmentBody {
    pub image_url: String,
    pub alignment: Option<String>,
    pub position: Option<String>,
    pub require_https: Option<bool>,
}

/// Auth-required session-lifecycle and content-building endpoints.
#[derive(Controller)]
#[controller(path = "/sessions", state = AppState)]
pub struct SessionController {
    #[inject]
    components: Arc<ServerComponents>,
}

#[routes]
impl SessionController {
    #[post("")]
    async fn create(&self, headers: HeaderMap, Json(body): Json<CreateSessionBody>) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::create_document_session(&self.components, &body.template_id, &body.alias, Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }

    #[get("")]
    async fn list_active(&self, headers: HeaderMap) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::list_active_sessions(&self.components, Some(group)).await.map(Json).map_err(to_app_error)
    }

    #[get("/{session_id}")]
    async fn status(&self, headers: HeaderMap, Path(session_id): Path<String>) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::get_session_status(&self.components, &session_id, Some(group)).await.map(Json).map_err(to_app_error)
    }

    #[delete("/{session_id}")]
    async fn abort(&self, headers: HeaderMap, Path(session_id): Path<String>) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::abort_document_session(&self.components, &session_id, Some(group)).await.map(Json).map_err(to_app_error)
    }

    #[post("/{session_id}/parameters")]
    async fn set_global_parameters(
        &self,
        headers: HeaderMap,
        Path(session_id): Path<String>,
        Json(body): Json<SetGlobalParametersBody>,
    ) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::set_global_parameters(&self.components, &session_id, body.parameters, Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }

    #[post("/{session_id}/fragments")]
    async fn add_fragment(
        &self,
        headers: HeaderMap,
        Path(session_id): Path<String>,
        Json(body): Json<AddFragmentBody>,
    ) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::add_fragment(&self.components, &session_id, &body.fragment_id, body.parameters, body.position.as_deref(), Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }

    #[post("/{session_id}/fragments/images")]
    async fn add_image_fragment(
        &self,
        headers: HeaderMap,
        Path(session_id): Path<String>,
        Json(body): Json<AddImageFragmentBody>,
    ) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        let args = AddImageFragmentArgs {
            image_url: &body.image_url,
            alignment: body.alignment.as_deref(),
            position: body.position.as_deref(),
            require_https: body.require_https,
        };
        handlers::add_image_fragment(&self.components, &session_id, args, Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }

    #[get("/{session_id}/fragments")]
    async fn list_fragments(&self, headers: HeaderMap, Path(session_id): Path<String>) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::list_session_fragments(&self.components, &session_id, Some(group)).await.map(Json).map_err(to_app_error)
    }

    #[delete("/{session_id}/fragments/{instance_guid}")]
    async fn remove_fragment(
        &self,
        headers: HeaderMap,
        Path((session_id, instance_guid)): Path<(String, String)>,
    ) -> Result<Json<Value>, AppError> {
        let group = handlers::resolve_group_http(&self.components, bearer_token(&headers)).await.map_err(to_app_error)?;
        handlers::remove_fragment(&self.components, &session_id, &instance_guid, Some(group))
            .await
            .map(Json)
            .map_err(to_app_error)
    }
}
