//! C7 — transport-agnostic operation handlers. Every entry in the tool
//! catalogue and every REST endpoint in the spec table bottoms out in one
//! of these functions; `dispatch.rs` and `controllers/*.rs` are thin
//! wrappers that extract arguments and shape the transport-specific
//! response around the same call.

use std::path::{Component, Path, PathBuf};

use parchment_core::auth::resolve_token;
use parchment_core::error::{DocError, DocResult};
use parchment_core::model::Group;
use parchment_core::rendering::OutputFormat;
use parchment_core::session::Position;
use parchment_core::ServerComponents;
use parchment_plot::{PlotEngine, PlotFormat, PlotKind, PlotRequest, PlotTheme, SeriesSpec};
use serde_json::{json, Map, Value};

/// Resolve the caller's group from a bearer token, honoring the
/// token-optional tool list. Returns `None` for anonymous discovery calls.
pub async fn resolve_group(
    components: &ServerComponents,
    args: &Map<String, Value>,
    bearer_header: Option<&str>,
    requires_auth: bool,
) -> DocResult<Option<Group>> {
    let token = resolve_token(args, bearer_header);
    match (requires_auth, token) {
        (false, None) => Ok(None),
        (_, None) => Err(DocError::AuthRequired),
        (_, Some(tok)) => {
            let info = components.auth.verify(tok).await?;
            Ok(Some(info.group))
        }
    }
}

fn require_group(group: Option<Group>) -> DocResult<Group> {
    group.ok_or(DocError::AuthRequired)
}

/// Verify a bearer token extracted straight from an HTTP `Authorization`
/// header, for REST endpoints that always require auth.
pub async fn resolve_group_http(components: &ServerComponents, bearer_header: Option<&str>) -> DocResult<Group> {
    let token = bearer_header.ok_or(DocError::AuthRequired)?;
    let info = components.auth.verify(token).await?;
    Ok(info.group)
}

// ---- Discovery -----------------------------------------------------------

pub fn ping() -> Value {
    json!({ "status": "ok", "service": "parchment" })
}

pub fn help() -> Value {
    json!({
        "workflow": [
            "list_templates to discover a template_id",
            "create_document_session with that template_id and a unique alias",
            "set_global_parameters to satisfy the template's global schema",
            "add_fragment / add_image_fragment / add_plot_fragment to build the body",
            "get_document to render html, pdf, or md",
        ],
    })
}

pub fn list_templates(components: &ServerComponents, group: Option<&str>) -> Value {
    json!(components.templates.list(group))
}

pub fn get_template_details(components: &ServerComponents, template_id: &str, group: &str) -> DocResult<Value> {
    let template = components
        .templates
        .get(template_id, group)
        .ok_or_else(|| DocError::TemplateNotFound(template_id.to_string()))?;
    Ok(json!(template))
}

pub fn list_template_fragments(components: &ServerComponents, template_id: &str, group: &str) -> DocResult<Value> {
    let template = components
        .templates
        .get(template_id, group)
        .ok_or_else(|| DocError::TemplateNotFound(template_id.to_string()))?;
    Ok(json!(template.embedded_fragments))
}

pub fn get_fragment_details(
    components: &ServerComponents,
    template_id: &str,
    fragment_id: &str,
    group: &str,
) -> DocResult<Value> {
    let template = components
        .templates
        .get(template_id, group)
        .ok_or_else(|| DocError::TemplateNotFound(template_id.to_string()))?;
    let fragment = template
        .embedded_fragment(fragment_id)
        .or_else(|| components.fragments.get(fragment_id, group))
        .ok_or_else(|| DocError::FragmentNotFound(fragment_id.to_string()))?;
    Ok(json!(fragment))
}

pub fn list_styles(components: &ServerComponents, group: Option<&str>) -> Value {
    json!(components.styles.list(group))
}

pub fn list_themes() -> Value {
    json!(["light", "dark", "bizlight", "bizdark"])
}

pub fn list_handlers() -> Value {
    json!({
        "discovery": ["ping", "help", "list_templates", "get_template_details", "list_template_fragments", "get_fragment_details", "list_styles"],
        "session": ["create_document_session", "set_global_parameters", "add_fragment", "add_image_fragment", "remove_fragment", "list_session_fragments", "get_session_status", "list_active_sessions", "abort_document_session"],
        "render": ["get_document", "validate_parameters"],
        "plot": ["render_graph", "get_image", "list_images", "add_plot_fragment"],
    })
}

// ---- Session lifecycle ----------------------------------------------------

pub async fn create_document_session(
    components: &ServerComponents,
    template_id: &str,
    alias: &str,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let session = components.sessions.create_session(&components.templates, template_id, alias, &group).await?;
    Ok(json!({
        "session_id": session.session_id,
        "alias": session.alias,
        "template_id": session.template_id,
        "created_at": session.created_at,
    }))
}

pub async fn set_global_parameters(
    components: &ServerComponents,
    session_id: &str,
    parameters: Map<String, Value>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let session = components
        .sessions
        .set_global_parameters(session_id, parameters, &group, &components.templates)
        .await?;
    Ok(json!({
        "session_id": session.session_id,
        "parameters": session.global_parameters,
        "updated_at": session.updated_at,
    }))
}

pub async fn add_fragment(
    components: &ServerComponents,
    session_id: &str,
    fragment_id: &str,
    parameters: Map<String, Value>,
    position: Option<&str>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let out = components
        .sessions
        .add_fragment(session_id, fragment_id, parameters, Position::parse(position), &group, &components.templates)
        .await?;
    Ok(json!({ "instance_guid": out.instance_guid, "position_index": out.position_index }))
}

pub struct AddImageFragmentArgs<'a> {
    pub image_url: &'a str,
    pub alignment: Option<&'a str>,
    pub position: Option<&'a str>,
    pub require_https: Option<bool>,
}

pub async fn add_image_fragment(
    components: &ServerComponents,
    session_id: &str,
    args: AddImageFragmentArgs<'_>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let mut params = Map::new();
    params.insert("image_url".into(), json!(args.image_url));
    if let Some(alignment) = args.alignment {
        params.insert("alignment".into(), json!(alignment));
    }
    let issues = parchment_core::validation::validate_image_fragment(&params);
    if !issues.is_empty() {
        return Err(DocError::InvalidFragmentParameters(issues));
    }

    let data_uri = components.images.validate_and_embed(args.image_url, args.require_https).await?;

    let instance = parchment_core::model::FragmentInstance {
        fragment_instance_guid: uuid::Uuid::new_v4().to_string(),
        fragment_id: "image_from_url".to_string(),
        parameters: params,
        created_at: chrono::Utc::now(),
        embedded_data_uri: Some(data_uri),
    };
    let out = components
        .sessions
        .insert_instance(session_id, instance, Position::parse(args.position), &group)
        .await?;
    Ok(json!({ "instance_guid": out.instance_guid }))
}

pub async fn remove_fragment(
    components: &ServerComponents,
    session_id: &str,
    instance_guid: &str,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    components.sessions.remove_fragment(session_id, instance_guid, &group).await?;
    Ok(json!({}))
}

pub async fn list_session_fragments(components: &ServerComponents, session_id: &str, group: Option<Group>) -> DocResult<Value> {
    let group = require_group(group)?;
    let fragments = components.sessions.list_session_fragments(session_id, &group).await?;
    Ok(json!(fragments))
}

pub async fn get_session_status(components: &ServerComponents, session_id: &str, group: Option<Group>) -> DocResult<Value> {
    let group = require_group(group)?;
    let session = components.sessions.get(session_id, &group).await?;
    Ok(json!(session.summary()))
}

pub async fn list_active_sessions(components: &ServerComponents, group: Option<Group>) -> DocResult<Value> {
    let group = require_group(group)?;
    let summaries = components.sessions.list_active_sessions(&group).await;
    Ok(json!(summaries))
}

pub async fn abort_document_session(components: &ServerComponents, session_id: &str, group: Option<Group>) -> DocResult<Value> {
    let group = require_group(group)?;
    components.sessions.abort_session(session_id, &group).await?;
    Ok(json!({}))
}

// ---- Rendering -------------------------------------------------------------

pub async fn get_document(
    components: &ServerComponents,
    session_id: &str,
    format: &str,
    style_id: Option<&str>,
    proxy: bool,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let session = components.sessions.get(session_id, &group).await?;
    let format = OutputFormat::parse(format)?;
    let output = components.rendering().render(&session, format, style_id, proxy).await?;

    if let Some(proxy_guid) = output.proxy_guid {
        Ok(json!({
            "proxy_guid": proxy_guid,
            "format": format.as_str(),
            "download_url": format!("/proxy/{proxy_guid}"),
            "content": "",
        }))
    } else {
        Ok(json!({
            "format": format.as_str(),
            "content": parchment_core::rendering::base64_encode(&output.content),
            "media_type": output.media_type,
            "size": output.size,
        }))
    }
}

pub async fn get_proxy_document(components: &ServerComponents, proxy_guid: &str, group: Option<Group>) -> DocResult<(String, Vec<u8>)> {
    let group = require_group(group)?;
    components.rendering().get_proxy_document(proxy_guid, &group).await
}

pub async fn validate_parameters(
    components: &ServerComponents,
    template_id: &str,
    parameters_type: &str,
    fragment_id: Option<&str>,
    parameters: &Map<String, Value>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let template = components
        .templates
        .get(template_id, &group)
        .ok_or_else(|| DocError::TemplateNotFound(template_id.to_string()))?;

    let issues = match parameters_type {
        "global" => parchment_core::validation::validate_against_schema(&template.global_parameters, parameters),
        "fragment" => {
            let fragment_id = fragment_id.ok_or_else(|| DocError::InvalidArguments("fragment_id is required when parameters_type=fragment".into()))?;
            let def = template
                .embedded_fragment(fragment_id)
                .or_else(|| components.fragments.get(fragment_id, &group))
                .ok_or_else(|| DocError::FragmentNotFound(fragment_id.to_string()))?;
            parchment_core::validation::validate_against_schema(&def.parameters, parameters)
        }
        other => return Err(DocError::InvalidArguments(format!("unsupported parameters_type '{other}'"))),
    };

    Ok(json!({ "is_valid": issues.is_empty(), "errors": issues }))
}

// ---- Plot renderer ----------------------------------------------------------

pub struct PlotArgs {
    pub title: Option<String>,
    pub x: Vec<f64>,
    pub series: Vec<SeriesSpec>,
    pub kind: String,
    pub theme: String,
    pub format: String,
    pub x_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
}

impl PlotArgs {
    fn into_request(self) -> DocResult<PlotRequest> {
        Ok(PlotRequest {
            title: self.title,
            x: self.x,
            series: self.series,
            kind: PlotKind::parse(&self.kind)?,
            theme: PlotTheme::parse(&self.theme)?,
            format: PlotFormat::parse(&self.format)?,
            x_min: self.x_min,
            x_max: self.x_max,
            y_min: self.y_min,
            y_max: self.y_max,
        })
    }
}

pub async fn render_graph(
    plots: &PlotEngine,
    args: PlotArgs,
    persist: bool,
    alias: Option<&str>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let req = args.into_request()?;
    let out = plots.render_plot(&req, &group, persist, alias).await?;
    Ok(match out.guid {
        Some(guid) => json!({ "guid": guid, "media_type": out.media_type }),
        None => json!({
            "content": parchment_core::rendering::base64_encode(&out.content),
            "media_type": out.media_type,
        }),
    })
}

pub async fn get_image(plots: &PlotEngine, identifier: &str, group: Option<Group>) -> DocResult<(Vec<u8>, &'static str)> {
    let group = require_group(group)?;
    let (bytes, meta) = plots.get_image(identifier, &group).await?;
    let media_type = match meta.format.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    };
    Ok((bytes, media_type))
}

pub async fn list_images(components: &ServerComponents, group: Option<Group>) -> DocResult<Value> {
    let group = require_group(group)?;
    let metas = components.storage.list(&group, |m| m.artifact_type() == Some("plot_image")).await?;
    Ok(json!(metas))
}

pub async fn add_plot_fragment(
    components: &ServerComponents,
    plots: &PlotEngine,
    session_id: &str,
    fragment_id: &str,
    plot_guid: Option<&str>,
    inline: Option<PlotArgs>,
    position: Option<&str>,
    group: Option<Group>,
) -> DocResult<Value> {
    let group = require_group(group)?;
    let inline_req = inline.map(|a| a.into_request()).transpose()?;
    let instance = plots
        .build_plot_fragment_instance(fragment_id, plot_guid, inline_req.as_ref(), &group)
        .await?;
    let out = components
        .sessions
        .insert_instance(session_id, instance, Position::parse(position), &group)
        .await?;
    Ok(json!({ "instance_guid": out.instance_guid }))
}

// ---- Stock images -----------------------------------------------------------

/// Reject any relative path that escapes `images_dir` (`..`, absolute
/// segments, or anything that isn't a plain file-name component).
fn sanitize_relative_path(requested: &str) -> DocResult<PathBuf> {
    let mut safe = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => safe.push(part),
            _ => return Err(DocError::InvalidArguments("path must not contain '..' or be absolute".into())),
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(DocError::InvalidArguments("path must not be empty".into()));
    }
    Ok(safe)
}

pub async fn list_stock_images(components: &ServerComponents) -> DocResult<Value> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(&components.config.images_dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(json!(names)),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(json!(names))
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub async fn get_stock_image(components: &ServerComponents, requested_path: &str) -> DocResult<(Vec<u8>, &'static str)> {
    let relative = sanitize_relative_path(requested_path)?;
    let full_path = components.config.images_dir.join(&relative);
    let bytes = tokio::fs::read(&full_path).await.map_err(|_| DocError::NotFound("stock image".into()))?;
    let media_type = full_path
        .extension()
        .and_then(|e| e.to_str())
        .map(content_type_for_extension)
        .unwrap_or("application/octet-stream");
    Ok((bytes, media_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_parent_traversal() {
        assert!(sanitize_relative_path("../../etc/passwd").is_err());
    }

    #[test]
    fn sanitize_rejects_absolute_path() {
        assert!(sanitize_relative_path("/etc/passwd").is_err());
    }

    #[test]
    fn sanitize_accepts_plain_filename() {
        let path = sanitize_relative_path("logo.png").unwrap();
        assert_eq!(path, PathBuf::from("logo.png"));
    }

    #[test]
    fn content_type_is_inferred_from_extension() {
        assert_eq!(content_type_for_extension("PNG"), "image/png");
        assert_eq!(content_type_for_extension("bin"), "application/octet-stream");
    }
}
