//! Tool-catalogue dispatcher (spec §4.7). Resolves a tool name + raw JSON
//! arguments to a handler call, enforcing the auth requirement and group
//! injection before the handler ever runs, and shaping the uniform
//! `{status, ...}` envelope around its result. The wire transport that
//! carries these calls (stdio/SSE JSON-RPC) is assembled elsewhere; this
//! module is the transport-agnostic core the transport calls into.

use parchment_core::auth::TOKEN_OPTIONAL_TOOLS;
use parchment_core::error::DocError;
use parchment_core::ServerComponents;
use parchment_plot::{PlotEngine, SeriesSpec};
use serde_json::{json, Map, Value};

use crate::handlers::{self, AddImageFragmentArgs, PlotArgs};

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, DocError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DocError::InvalidArguments(format!("'{key}' is required and must be a string")))
}

fn obj_arg(args: &Map<String, Value>, key: &str) -> Map<String, Value> {
    args.get(key).and_then(|v| v.as_object()).cloned().unwrap_or_default()
}

fn f64_array_arg(args: &Map<String, Value>, key: &str) -> Vec<f64> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default()
}

fn plot_args_from(args: &Map<String, Value>) -> PlotArgs {
    let mut series = Vec::new();
    for i in 1..=5 {
        let key = format!("y{i}");
        let Some(values) = args.get(&key).and_then(|v| v.as_array()) else { continue };
        let values: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        let label = args.get(&format!("{key}_label")).and_then(|v| v.as_str()).map(String::from);
        let color = args.get(&format!("{key}_color")).and_then(|v| v.as_str()).map(String::from);
        series.push(SeriesSpec { label, color, values });
    }
    PlotArgs {
        title: args.get("title").and_then(|v| v.as_str()).map(String::from),
        x: f64_array_arg(args, "x"),
        series,
        kind: args.get("kind").and_then(|v| v.as_str()).unwrap_or("line").to_string(),
        theme: args.get("theme").and_then(|v| v.as_str()).unwrap_or("light").to_string(),
        format: args.get("format").and_then(|v| v.as_str()).unwrap_or("png").to_string(),
        x_min: args.get("x_min").and_then(|v| v.as_f64()),
        x_max: args.get("x_max").and_then(|v| v.as_f64()),
        y_min: args.get("y_min").and_then(|v| v.as_f64()),
        y_max: args.get("y_max").and_then(|v| v.as_f64()),
    }
}

/// Invoke `tool` with `args`, returning the uniform success/error envelope
/// described in spec §4.7/§7. Never returns `Err`: domain errors are
/// caught and folded into the error envelope, matching what every
/// transport needs to ship back to the caller unchanged.
pub async fn dispatch(
    components: &ServerComponents,
    plots: &PlotEngine,
    tool: &str,
    args: Map<String, Value>,
    bearer_header: Option<&str>,
) -> Value {
    let requires_auth = !TOKEN_OPTIONAL_TOOLS.contains(&tool);
    let result = run(components, plots, tool, args, bearer_header, requires_auth).await;
    match result {
        Ok(data) => json!({ "status": "success", "data": data }),
        Err(err) => err.to_response_body(),
    }
}

async fn run(
    components: &ServerComponents,
    plots: &PlotEngine,
    tool: &str,
    mut args: Map<String, Value>,
    bearer_header: Option<&str>,
    requires_auth: bool,
) -> Result<Value, DocError> {
    let group = handlers::resolve_group(components, &args, bearer_header, requires_auth).await?;
    if let Some(group) = &group {
        args.insert("group".into(), json!(group));
    }
    let group_str = group.clone();

    match tool {
        "ping" => Ok(handlers::ping()),
        "help" => Ok(handlers::help()),
        "list_templates" => Ok(handlers::list_templates(components, group_str.as_deref())),
        "get_template_details" => handlers::get_template_details(
            components,
            str_arg(&args, "template_id")?,
            group_str.as_deref().unwrap_or("public"),
        ),
        "list_template_fragments" => handlers::list_template_fragments(
            components,
            str_arg(&args, "template_id")?,
            group_str.as_deref().unwrap_or("public"),
        ),
        "get_fragment_details" => handlers::get_fragment_details(
            components,
            str_arg(&args, "template_id")?,
            str_arg(&args, "fragment_id")?,
            group_str.as_deref().unwrap_or("public"),
        ),
        "list_styles" => Ok(handlers::list_styles(components, group_str.as_deref())),
        "list_themes" => Ok(handlers::list_themes()),
        "list_handlers" => Ok(handlers::list_handlers()),

        "create_document_session" => {
            handlers::create_document_session(components, str_arg(&args, "template_id")?, str_arg(&args, "alias")?, group).await
        }
        "set_global_parameters" => {
            handlers::set_global_parameters(components, str_arg(&args, "session_id")?, obj_arg(&args, "parameters"), group).await
        }
        "add_fragment" => {
            handlers::add_fragment(
                components,
                str_arg(&args, "session_id")?,
                str_arg(&args, "fragment_id")?,
                obj_arg(&args, "parameters"),
                args.get("position").and_then(|v| v.as_str()),
                group,
            )
            .await
        }
        "add_image_fragment" => {
            let session_id = str_arg(&args, "session_id")?.to_string();
            let image_url = str_arg(&args, "image_url")?.to_string();
            let img_args = AddImageFragmentArgs {
                image_url: &image_url,
                alignment: args.get("alignment").and_then(|v| v.as_str()),
                position: args.get("position").and_then(|v| v.as_str()),
                require_https: args.get("require_https").and_then(|v| v.as_bool()),
            };
            handlers::add_image_fragment(components, &session_id, img_args, group).await
        }
        "remove_fragment" => {
            handlers::remove_fragment(components, str_arg(&args, "session_id")?, str_arg(&args, "instance_guid")?, group).await
        }
        "list_session_fragments" => handlers::list_session_fragments(components, str_arg(&args, "session_id")?, group).await,
        "get_session_status" => handlers::get_session_status(components, str_arg(&args, "session_id")?, group).await,
        "list_active_sessions" => handlers::list_active_sessions(components, group).await,
        "abort_document_session" => handlers::abort_document_session(components, str_arg(&args, "session_id")?, group).await,

        "get_document" => {
            handlers::get_document(
                components,
                str_arg(&args, "session_id")?,
                args.get("format").and_then(|v| v.as_str()).unwrap_or("html"),
                args.get("style_id").and_then(|v| v.as_str()),
                args.get("proxy").and_then(|v| v.as_bool()).unwrap_or(false),
                group,
            )
            .await
        }
        "validate_parameters" => {
            handlers::validate_parameters(
                components,
                str_arg(&args, "template_id")?,
                str_arg(&args, "parameters_type")?,
                args.get("fragment_id").and_then(|v| v.as_str()),
                &obj_arg(&args, "parameters"),
                group,
            )
            .await
        }

        "render_graph" => {
            let persist = args.get("persist").and_then(|v| v.as_bool()).unwrap_or(false);
            let alias = args.get("alias").and_then(|v| v.as_str());
            handlers::render_graph(plots, plot_args_from(&args), persist, alias, group).await
        }
        "get_image" => {
            let (bytes, media_type) = handlers::get_image(plots, str_arg(&args, "identifier")?, group).await?;
            Ok(json!({ "content": parchment_core::rendering::base64_encode(&bytes), "media_type": media_type }))
        }
        "list_images" => handlers::list_images(components, group).await,
        "add_plot_fragment" => {
            let plot_guid = args.get("plot_guid").and_then(|v| v.as_str());
            let inline = if plot_guid.is_none() { Some(plot_args_from(&args)) } else { None };
            handlers::add_plot_fragment(
                components,
                plots,
                str_arg(&args, "session_id")?,
                str_arg(&args, "fragment_id")?,
                plot_guid,
                inline,
                args.get("position").and_then(|v| v.as_str()),
                group,
            )
            .await
        }

        other => Err(DocError::InvalidArguments(format!("unknown tool '{other}'"))),
    }
}
