//! C6 — Rendering pipeline. Template + ordered fragments + style → HTML →
//! PDF/Markdown, with an optional server-stored proxy artefact.

use std::collections::HashMap;

use base64::Engine;
use tera::{Context, Tera};

use crate::error::{DocError, DocResult};
use crate::model::{FragmentInstance, Session};
use crate::registry::{FragmentRegistry, StyleRegistry, TemplateRegistry};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Html,
    Pdf,
    Md,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> DocResult<Self> {
        match raw {
            "html" => Ok(OutputFormat::Html),
            "pdf" => Ok(OutputFormat::Pdf),
            "md" => Ok(OutputFormat::Md),
            other => Err(DocError::InvalidArguments(format!("unsupported format '{other}'"))),
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Html => "text/html",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Md => "text/markdown",
        }
    }

    /// The format identifier as requested by callers (`"html"`/`"pdf"`/`"md"`),
    /// as opposed to [`Self::media_type`]'s MIME string.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Md => "md",
        }
    }
}

pub struct RenderedDocument {
    pub format: OutputFormat,
    pub content: Vec<u8>,
}

pub struct RenderOutput {
    pub proxy_guid: Option<String>,
    pub content: Vec<u8>,
    pub media_type: &'static str,
    pub size: usize,
}

/// Sandboxed, loader-free text expansion: `Tera::one_off` never resolves
/// `{% include %}`/`{% extends %}`/`{% import %}` against a filesystem, so
/// there is no path for a template to escape its own variables.
fn expand(template_text: &str, vars: &serde_json::Value) -> DocResult<String> {
    let context = Context::from_value(vars.clone()).map_err(|e| DocError::RenderFailed(e.to_string()))?;
    Tera::one_off(template_text, &context, true).map_err(|e| DocError::RenderFailed(e.to_string()))
}

fn fragment_html(
    instance: &FragmentInstance,
    template_id: &str,
    group: &str,
    templates: &TemplateRegistry,
    fragments: &FragmentRegistry,
) -> DocResult<String> {
    // Embedded fragment defs always win for a template's own fragments
    // (spec §9): look there first, then the standalone catalogue.
    let def = templates
        .get(template_id, group)
        .and_then(|t| t.embedded_fragment(&instance.fragment_id))
        .cloned()
        .or_else(|| fragments.get(&instance.fragment_id, group).cloned())
        .ok_or_else(|| DocError::FragmentNotFound(instance.fragment_id.clone()))?;

    let mut vars = serde_json::Value::Object(instance.parameters.clone());
    if let (Some(uri), Some(obj)) = (&instance.embedded_data_uri, vars.as_object_mut()) {
        obj.insert("embedded_data_uri".into(), serde_json::json!(uri));
    }
    expand(&def.template_text, &vars)
}

pub struct RenderingPipeline<'a> {
    pub templates: &'a TemplateRegistry,
    pub fragments: &'a FragmentRegistry,
    pub styles: &'a StyleRegistry,
    pub storage: &'a Storage,
}

impl<'a> RenderingPipeline<'a> {
    /// Compose `(session, output_format, style_id?)` into a rendered
    /// document, optionally persisting it as a proxy artefact.
    pub async fn render(
        &self,
        session: &Session,
        format: OutputFormat,
        style_id: Option<&str>,
        proxy: bool,
    ) -> DocResult<RenderOutput> {
        if !session.render_ready {
            return Err(DocError::SessionNotReady);
        }

        let template = self
            .templates
            .get(&session.template_id, &session.group)
            .ok_or_else(|| DocError::TemplateNotFound(session.template_id.clone()))?;

        let mut fragment_blocks = Vec::with_capacity(session.fragments.len());
        for instance in &session.fragments {
            let html = fragment_html(instance, &session.template_id, &session.group, self.templates, self.fragments)?;
            fragment_blocks.push(html);
        }
        let fragments_html = fragment_blocks.join("\n");

        let style = match style_id {
            Some(id) => self
                .styles
                .get(id, &session.group)
                .ok_or_else(|| DocError::StyleNotFound(id.to_string()))?,
            None => self
                .styles
                .default_for_group(&session.group)
                .ok_or_else(|| DocError::StyleNotFound("(no default style loaded)".to_string()))?,
        };

        let mut vars: serde_json::Value = serde_json::Value::Object(session.global_parameters.clone());
        if let Some(obj) = vars.as_object_mut() {
            obj.insert("fragments_html".into(), serde_json::json!(fragments_html));
            obj.insert("style_css".into(), serde_json::json!(style.css));
        }
        let html = expand(&template.document_text, &vars)?;

        let (bytes, media_type) = match format {
            OutputFormat::Html => (html.into_bytes(), "text/html"),
            OutputFormat::Pdf => (render_pdf(&html)?, "application/pdf"),
            OutputFormat::Md => (html2md::parse_html(&html).into_bytes(), "text/markdown"),
        };

        if proxy {
            let mut extra = HashMap::new();
            extra.insert("artifact_type".into(), serde_json::json!("document_proxy"));
            extra.insert("format".into(), serde_json::json!(format_ext(format)));
            let ext = format_ext(format);
            let guid = self.storage.save(&bytes, ext, &session.group, extra).await?;
            Ok(RenderOutput { proxy_guid: Some(guid), content: Vec::new(), media_type, size: 0 })
        } else {
            let size = bytes.len();
            Ok(RenderOutput { proxy_guid: None, content: bytes, media_type, size })
        }
    }

    /// Retrieve a previously persisted proxy artefact, group-checked.
    pub async fn get_proxy_document(&self, proxy_guid: &str, group: &str) -> DocResult<(String, Vec<u8>)> {
        let (bytes, meta) = self.storage.get(proxy_guid, group).await?;
        if meta.artifact_type() != Some("document_proxy") {
            return Err(DocError::NotFound("proxy document".into()));
        }
        let format = meta.extra.get("format").and_then(|v| v.as_str()).unwrap_or("html").to_string();
        Ok((format, bytes))
    }
}

fn format_ext(format: OutputFormat) -> &'static str {
    format.as_str()
}

/// Minimal HTML→PDF pathway: lays out the stripped text content of the
/// rendered HTML into a PDF page. Full CSS-aware layout is an external
/// collaborator per spec §9 and is out of scope for this engine.
fn render_pdf(html: &str) -> DocResult<Vec<u8>> {
    use printpdf::{BuiltinFont, Mm, PdfDocument};

    let text = html2md::parse_html(html);
    let (doc, page1, layer1) = PdfDocument::new("parchment-document", Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| DocError::RenderFailed(e.to_string()))?;
    let layer = doc.get_page(page1).get_layer(layer1);

    let mut y = 280.0;
    for line in text.lines() {
        if y < 10.0 {
            break;
        }
        layer.use_text(line, 11.0, Mm(10.0), Mm(y), &font);
        y -= 6.0;
    }

    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer).map_err(|e| DocError::RenderFailed(e.to_string()))?;
    }
    Ok(buffer)
}

pub fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn html_render_contains_markers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("templates/acme/basic_report/fragments")).await.unwrap();
        tokio::fs::write(
            root.join("templates/acme/basic_report/template.yaml"),
            "template_id: basic_report\ngroup: acme\nembedded_fragments:\n  - fragment_id: paragraph\n    parameters:\n      - name: text\n        kind: string\n        required: true\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            root.join("templates/acme/basic_report/document.html"),
            "<html><body><h1>{{ title }}</h1>{{ fragments_html | safe }}</body></html>",
        )
        .await
        .unwrap();
        tokio::fs::write(
            root.join("templates/acme/basic_report/fragments/paragraph.html"),
            "<p>{{ text }}</p>",
        )
        .await
        .unwrap();
        tokio::fs::create_dir_all(root.join("styles/acme/default")).await.unwrap();
        tokio::fs::write(root.join("styles/acme/default/style.yaml"), "style_id: default\ngroup: acme\n").await.unwrap();
        tokio::fs::write(root.join("styles/acme/default/style.css"), "").await.unwrap();

        let templates = TemplateRegistry::load(root.join("templates")).await.unwrap();
        let fragments = FragmentRegistry::load(root.join("fragments")).await.unwrap();
        let styles = StyleRegistry::load(root.join("styles")).await.unwrap();
        let storage = Storage::new(root.join("storage"));

        let session = Session {
            session_id: "s1".into(),
            alias: "q4".into(),
            group: "acme".into(),
            template_id: "basic_report".into(),
            global_parameters: serde_json::json!({"title": "Q4 Report"}).as_object().unwrap().clone(),
            fragments: vec![FragmentInstance {
                fragment_instance_guid: "g1".into(),
                fragment_id: "paragraph".into(),
                parameters: serde_json::json!({"text": "Intro"}).as_object().unwrap().clone(),
                created_at: Utc::now(),
                embedded_data_uri: None,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            render_ready: true,
        };

        let pipeline = RenderingPipeline { templates: &templates, fragments: &fragments, styles: &styles, storage: &storage };
        let out = pipeline.render(&session, OutputFormat::Html, None, false).await.unwrap();
        let html = String::from_utf8(out.content).unwrap();
        assert!(html.find("Q4 Report").unwrap() < html.find("Intro").unwrap());
    }

    #[tokio::test]
    async fn render_fails_when_not_ready() {
        let templates = TemplateRegistry::load("/nonexistent-root-for-test").await.unwrap();
        let fragments = FragmentRegistry::load("/nonexistent-root-for-test").await.unwrap();
        let styles = StyleRegistry::load("/nonexistent-root-for-test").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let pipeline = RenderingPipeline { templates: &templates, fragments: &fragments, styles: &styles, storage: &storage };

        let session = Session {
            session_id: "s1".into(),
            alias: "q4".into(),
            group: "acme".into(),
            template_id: "basic_report".into(),
            global_parameters: serde_json::Map::new(),
            fragments: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            render_ready: false,
        };
        let err = pipeline.render(&session, OutputFormat::Html, None, false).await.unwrap_err();
        assert_eq!(err.error_code(), "SESSION_NOT_READY");
    }
}
