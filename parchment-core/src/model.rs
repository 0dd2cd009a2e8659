//! Shared data-model types for the document-assembly engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tenancy boundary. Opaque lowercase slug; every persisted entity except
/// the group catalogue itself is owned by exactly one group.
pub type Group = String;

/// Semantic parameter type for a `Parameter` schema entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// A typed parameter schema entry, shared by global parameters, fragment
/// parameters, table/image/plot fragment parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub examples: Vec<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

/// A fragment definition, standalone or embedded inside a template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentDef {
    pub fragment_id: String,
    pub group: Group,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSchema>,
    /// Rendering template text, expanded with the fragment's materialized
    /// parameters at render time.
    #[serde(default)]
    pub template_text: String,
}

/// A document skeleton: global parameters plus embedded fragment
/// definitions, immutable once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub group: Group,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub global_parameters: Vec<ParamSchema>,
    #[serde(default)]
    pub embedded_fragments: Vec<FragmentDef>,
    /// Structural document rendering text, referencing globals and the
    /// concatenated fragment HTML block.
    #[serde(default)]
    pub document_text: String,
}

impl Template {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            template_id: self.template_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            group: self.group.clone(),
        }
    }

    /// Look up a fragment definition embedded directly in this template.
    pub fn embedded_fragment(&self, fragment_id: &str) -> Option<&FragmentDef> {
        self.embedded_fragments
            .iter()
            .find(|f| f.fragment_id == fragment_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub group: Group,
}

/// A CSS bundle chosen at render time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Style {
    pub style_id: String,
    pub group: Group,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub css: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StyleSummary {
    pub style_id: String,
    pub name: String,
    pub group: Group,
}

/// One entry in a session's ordered body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentInstance {
    pub fragment_instance_guid: String,
    pub fragment_id: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Pre-downloaded `data:<mime>;base64,...` URI for image fragments,
    /// populated at add-time so renders are offline-safe.
    #[serde(default)]
    pub embedded_data_uri: Option<String>,
}

/// A stateful document-assembly workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub alias: String,
    pub group: Group,
    pub template_id: String,
    #[serde(default)]
    pub global_parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub fragments: Vec<FragmentInstance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sticky flag, tripped by the first successful `set_global_parameters`.
    #[serde(default)]
    pub render_ready: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub alias: String,
    pub template_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fragment_count: usize,
    pub render_ready: bool,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            alias: self.alias.clone(),
            template_id: self.template_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            fragment_count: self.fragments.len(),
            render_ready: self.render_ready,
        }
    }
}

/// Metadata record for a blob held by the storage backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobMeta {
    pub guid: String,
    pub group: Group,
    pub format: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BlobMeta {
    pub fn artifact_type(&self) -> Option<&str> {
        self.extra.get("artifact_type").and_then(|v| v.as_str())
    }

    pub fn alias(&self) -> Option<&str> {
        self.extra.get("alias").and_then(|v| v.as_str())
    }
}

/// A registered bearer token and the group it resolves to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub group: Group,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

/// Verified outcome of a bearer token.
#[derive(Clone, Debug)]
pub struct TokenInfo {
    pub group: Group,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
