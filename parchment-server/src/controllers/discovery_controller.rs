use std::sync::Arc;

use parchment_core::ServerComponents;
use r2e::prelude::*;
use serde::Deserialize;

use crate::error_map::to_app_error;
use crate::handlers;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct GroupQuery {
    pub group: Option<String>,
}

/// No-auth discovery endpoints: template/fragment/style catalogues.
#[derive(Controller)]
#[controller(path = "", state = AppState)]
pub struct DiscoveryController {
    #[inject]
    components: Arc<ServerComponents>,
}

#[routes]
impl DiscoveryController {
    #[get("/ping")]
    async fn ping(&self) -> Json<serde_json::Value> {
        Json(handlers::ping())
    }

    #[get("/help")]
    async fn help(&self) -> Json<serde_json::Value> {
        Json(handlers::help())
    }

    #[get("/templates")]
    async fn list_templates(&self, Query(q): Query<GroupQuery>) -> Json<serde_json::Value> {
        Json(handlers::list_templates(&self.components, q.group.as_deref()))
    }

    #[get("/templates/{template_id}")]
    async fn get_template_details(
        &self,
        Path(template_id): Path<String>,
        Query(q): Query<GroupQuery>,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let group = q.group.as_deref().unwrap_or("public");
        handlers::get_template_details(&self.components, &template_id, group)
            .map(Json)
            .map_err(to_app_error)
    }

    #[get("/templates/{template_id}/fragments")]
    async fn list_template_fragments(
        &self,
        Path(template_id): Path<String>,
        Query(q): Query<GroupQuery>,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let group = q.group.as_deref().unwrap_or("public");
        handlers::list_template_fragments(&self.components, &template_id, group)
            .map(Json)
            .map_err(to_app_error)
    }

    #[get("/templates/{template_id}/fragments/{fragment_id}")]
    async fn get_fragment_details(
        &self,
        Path((template_id, fragment_id)): Path<(String, String)>,
        Query(q): Query<GroupQuery>,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let group = q.group.as_deref().unwrap_or("public");
        handlers::get_fragment_details(&self.components, &template_id, &fragment_id, group)
            .map(Json)
            .map_err(to_app_error)
    }

    #[get("/styles")]
    async fn list_styles(&self, Query(q): Query<GroupQuery>) -> Json<serde_json::Value> {
        Json(handlers::list_styles(&self.components, q.group.as_deref()))
    }
}
