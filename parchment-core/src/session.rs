//! C5 — Session engine. Session lifecycle, alias↔UUID mapping, ordered
//! fragment list, positional insertion, persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::{DocError, DocResult};
use crate::model::{FragmentInstance, Session, SessionSummary};
use crate::registry::TemplateRegistry;
use crate::validation::validate_against_schema;

static ALIAS_RE_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

fn is_valid_alias(alias: &str) -> bool {
    (3..=64).contains(&alias.len()) && alias.chars().all(|c| ALIAS_RE_CHARS.contains(c))
}

/// Where to insert a new fragment instance, per the position grammar
/// `start | end | before:<guid> | after:<guid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Start,
    End,
    Before(String),
    After(String),
}

impl Position {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Position::End,
            Some("start") => Position::Start,
            Some("end") => Position::End,
            Some(s) if s.starts_with("before:") => Position::Before(s["before:".len()..].to_string()),
            Some(s) if s.starts_with("after:") => Position::After(s["after:".len()..].to_string()),
            Some(_) => Position::End,
        }
    }
}

pub struct AddFragmentOutput {
    pub instance_guid: String,
    pub position_index: usize,
}

/// Per-session mutex guarding read-modify-persist cycles. Serializes
/// mutations on a single session while leaving cross-session operations
/// fully concurrent.
struct SessionCell {
    session: RwLock<Session>,
    write_lock: Mutex<()>,
}

pub struct SessionEngine {
    sessions_dir: std::path::PathBuf,
    cells: DashMap<String, Arc<SessionCell>>,
    /// group -> alias -> session_id
    alias_index: DashMap<String, HashMap<String, String>>,
    /// session_id -> alias
    reverse_alias: DashMap<String, String>,
    /// Serializes alias registration across the whole group namespace.
    alias_registration_lock: Mutex<()>,
}

impl SessionEngine {
    /// Load all persisted sessions from disk at startup.
    pub async fn load(sessions_dir: impl Into<std::path::PathBuf>) -> DocResult<Self> {
        let sessions_dir = sessions_dir.into();
        let engine = SessionEngine {
            sessions_dir: sessions_dir.clone(),
            cells: DashMap::new(),
            alias_index: DashMap::new(),
            reverse_alias: DashMap::new(),
            alias_registration_lock: Mutex::new(()),
        };

        if let Ok(mut entries) = tokio::fs::read_dir(&sessions_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await?;
                let session: Session = serde_json::from_slice(&bytes)?;
                engine
                    .alias_index
                    .entry(session.group.clone())
                    .or_default()
                    .insert(session.alias.clone(), session.session_id.clone());
                engine.reverse_alias.insert(session.session_id.clone(), session.alias.clone());
                engine.cells.insert(
                    session.session_id.clone(),
                    Arc::new(SessionCell {
                        session: RwLock::new(session),
                        write_lock: Mutex::new(()),
                    }),
                );
            }
        }

        Ok(engine)
    }

    fn session_path(&self, session_id: &str) -> std::path::PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    async fn persist(&self, session: &Session) -> DocResult<()> {
        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        let bytes = serde_json::to_vec_pretty(session)?;
        let tmp = self.session_path(&session.session_id).with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.session_path(&session.session_id)).await?;
        Ok(())
    }

    pub async fn create_session(
        &self,
        templates: &TemplateRegistry,
        template_id: &str,
        alias: &str,
        group: &str,
    ) -> DocResult<Session> {
        if !is_valid_alias(alias) {
            return Err(DocError::InvalidAlias(alias.to_string()));
        }
        if templates.get(template_id, group).is_none() {
            return Err(DocError::TemplateNotFound(template_id.to_string()));
        }

        let _guard = self.alias_registration_lock.lock().await;
        {
            let index = self.alias_index.entry(group.to_string()).or_default();
            if index.contains_key(alias) {
                return Err(DocError::AliasInUse(alias.to_string()));
            }
        }

        let now = Utc::now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            alias: alias.to_string(),
            group: group.to_string(),
            template_id: template_id.to_string(),
            global_parameters: serde_json::Map::new(),
            fragments: Vec::new(),
            created_at: now,
            updated_at: now,
            render_ready: false,
        };

        self.persist(&session).await?;
        self.alias_index.entry(group.to_string()).or_default().insert(alias.to_string(), session.session_id.clone());
        self.reverse_alias.insert(session.session_id.clone(), alias.to_string());
        self.cells.insert(
            session.session_id.clone(),
            Arc::new(SessionCell {
                session: RwLock::new(session.clone()),
                write_lock: Mutex::new(()),
            }),
        );

        Ok(session)
    }

    /// Resolve an alias or UUID to a session id, scoped by group.
    pub async fn resolve(&self, identifier: &str, group: &str) -> Option<String> {
        self.resolve_async(identifier, group).await
    }

    async fn resolve_checked(&self, identifier: &str, group: &str) -> DocResult<Arc<SessionCell>> {
        let session_id = self.resolve_async(identifier, group).await.ok_or(DocError::SessionNotFound)?;
        self.cells.get(&session_id).map(|c| c.clone()).ok_or(DocError::SessionNotFound)
    }

    async fn resolve_async(&self, identifier: &str, group: &str) -> Option<String> {
        if let Some(cell) = self.cells.get(identifier) {
            let session = cell.session.read().await;
            return (session.group == group).then(|| identifier.to_string());
        }
        self.alias_index.get(group).and_then(|idx| idx.get(identifier).cloned())
    }

    /// Fetch a session by id, group-checked: any mismatch is surfaced as
    /// the generic `SessionNotFound` to avoid leaking cross-group existence.
    pub async fn get(&self, identifier: &str, group: &str) -> DocResult<Session> {
        let cell = self.resolve_checked(identifier, group).await?;
        Ok(cell.session.read().await.clone())
    }

    pub async fn abort_session(&self, identifier: &str, group: &str) -> DocResult<()> {
        let session_id = self.resolve_async(identifier, group).await.ok_or(DocError::SessionNotFound)?;
        let cell = self.cells.get(&session_id).map(|c| c.clone()).ok_or(DocError::SessionNotFound)?;
        let _write_guard = cell.write_lock.lock().await;

        let _alias_guard = self.alias_registration_lock.lock().await;
        let alias = {
            let session = cell.session.read().await;
            session.alias.clone()
        };

        let _ = tokio::fs::remove_file(self.session_path(&session_id)).await;
        self.cells.remove(&session_id);
        self.reverse_alias.remove(&session_id);
        if let Some(mut idx) = self.alias_index.get_mut(group) {
            idx.remove(&alias);
        }
        Ok(())
    }

    pub async fn set_global_parameters(
        &self,
        identifier: &str,
        params: serde_json::Map<String, serde_json::Value>,
        group: &str,
        templates: &TemplateRegistry,
    ) -> DocResult<Session> {
        let cell = self.resolve_checked(identifier, group).await?;
        let _write_guard = cell.write_lock.lock().await;

        let mut session = cell.session.write().await;
        let template = templates
            .get(&session.template_id, group)
            .ok_or_else(|| DocError::TemplateNotFound(session.template_id.clone()))?;

        let mut merged = session.global_parameters.clone();
        for (k, v) in params {
            merged.insert(k, v);
        }
        let issues = validate_against_schema(&template.global_parameters, &merged);
        if !issues.is_empty() {
            return Err(DocError::InvalidGlobalParameters(issues));
        }

        session.global_parameters = merged;
        session.render_ready = true;
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(session);
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    fn compute_insertion_index(fragments: &[FragmentInstance], position: &Position) -> DocResult<usize> {
        match position {
            Position::Start => Ok(0),
            Position::End => Ok(fragments.len()),
            Position::Before(guid) => fragments
                .iter()
                .position(|f| &f.fragment_instance_guid == guid)
                .ok_or_else(|| DocError::InvalidPosition(guid.clone())),
            Position::After(guid) => fragments
                .iter()
                .position(|f| &f.fragment_instance_guid == guid)
                .map(|i| i + 1)
                .ok_or_else(|| DocError::InvalidPosition(guid.clone())),
        }
    }

    pub async fn add_fragment(
        &self,
        identifier: &str,
        fragment_id: &str,
        params: serde_json::Map<String, serde_json::Value>,
        position: Position,
        group: &str,
        templates: &TemplateRegistry,
    ) -> DocResult<AddFragmentOutput> {
        let cell = self.resolve_checked(identifier, group).await?;
        let _write_guard = cell.write_lock.lock().await;

        let mut session = cell.session.write().await;
        let template = templates
            .get(&session.template_id, group)
            .ok_or_else(|| DocError::TemplateNotFound(session.template_id.clone()))?;
        let fragment_def = template
            .embedded_fragment(fragment_id)
            .cloned()
            .ok_or_else(|| DocError::FragmentNotFound(fragment_id.to_string()))?;

        let issues = validate_against_schema(&fragment_def.parameters, &params);
        if !issues.is_empty() {
            return Err(DocError::InvalidFragmentParameters(issues));
        }

        let index = Self::compute_insertion_index(&session.fragments, &position)?;
        let instance = FragmentInstance {
            fragment_instance_guid: uuid::Uuid::new_v4().to_string(),
            fragment_id: fragment_id.to_string(),
            parameters: params,
            created_at: Utc::now(),
            embedded_data_uri: None,
        };
        let guid = instance.fragment_instance_guid.clone();
        session.fragments.insert(index, instance);
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(session);
        self.persist(&snapshot).await?;

        Ok(AddFragmentOutput { instance_guid: guid, position_index: index })
    }

    /// Insert a pre-materialized fragment instance (used by
    /// `add_image_fragment`/`add_plot_fragment`, which compute
    /// `embedded_data_uri` before insertion).
    pub async fn insert_instance(
        &self,
        identifier: &str,
        instance: FragmentInstance,
        position: Position,
        group: &str,
    ) -> DocResult<AddFragmentOutput> {
        let cell = self.resolve_checked(identifier, group).await?;
        let _write_guard = cell.write_lock.lock().await;

        let mut session = cell.session.write().await;
        let index = Self::compute_insertion_index(&session.fragments, &position)?;
        let guid = instance.fragment_instance_guid.clone();
        session.fragments.insert(index, instance);
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(session);
        self.persist(&snapshot).await?;

        Ok(AddFragmentOutput { instance_guid: guid, position_index: index })
    }

    pub async fn remove_fragment(&self, identifier: &str, instance_guid: &str, group: &str) -> DocResult<()> {
        let cell = self.resolve_checked(identifier, group).await?;
        let _write_guard = cell.write_lock.lock().await;

        let mut session = cell.session.write().await;
        let before = session.fragments.len();
        session.fragments.retain(|f| f.fragment_instance_guid != instance_guid);
        if session.fragments.len() == before {
            return Err(DocError::FragmentNotFound(instance_guid.to_string()));
        }
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(session);
        self.persist(&snapshot).await
    }

    pub async fn list_session_fragments(&self, identifier: &str, group: &str) -> DocResult<Vec<FragmentInstance>> {
        let cell = self.resolve_checked(identifier, group).await?;
        Ok(cell.session.read().await.fragments.clone())
    }

    pub async fn list_active_sessions(&self, group: &str) -> Vec<SessionSummary> {
        let cells: Vec<Arc<SessionCell>> = self.cells.iter().map(|e| e.value().clone()).collect();
        let mut summaries = Vec::new();
        for cell in cells {
            let session = cell.session.read().await;
            if session.group == group {
                summaries.push(session.summary());
            }
        }
        summaries
    }

    pub async fn validate_session_for_render(&self, identifier: &str, group: &str) -> DocResult<bool> {
        let cell = self.resolve_checked(identifier, group).await?;
        Ok(cell.session.read().await.render_ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FragmentDef, ParamKind, ParamSchema, Template};

    async fn registry_with_basic_report(root: &std::path::Path) -> TemplateRegistry {
        let template_dir = root.join("acme/basic_report");
        tokio::fs::create_dir_all(template_dir.join("fragments")).await.unwrap();
        tokio::fs::write(
            template_dir.join("template.yaml"),
            "template_id: basic_report\ngroup: acme\nname: Basic Report\nembedded_fragments:\n  - fragment_id: paragraph\n    parameters: []\n  - fragment_id: section\n    parameters: []\n",
        )
        .await
        .unwrap();
        tokio::fs::write(template_dir.join("document.html"), "<html>{{ body }}</html>").await.unwrap();
        TemplateRegistry::load(root).await.unwrap()
    }

    #[tokio::test]
    async fn create_and_resolve_by_alias() {
        let dir = tempfile::tempdir().unwrap();
        let templates = registry_with_basic_report(dir.path()).await;
        let engine = SessionEngine::load(dir.path().join("sessions")).await.unwrap();

        let session = engine.create_session(&templates, "basic_report", "q4-report", "acme").await.unwrap();
        assert_eq!(session.alias, "q4-report");

        let resolved = engine.resolve("q4-report", "acme").await.unwrap();
        assert_eq!(resolved, session.session_id);
    }

    #[tokio::test]
    async fn duplicate_alias_in_group_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let templates = registry_with_basic_report(dir.path()).await;
        let engine = SessionEngine::load(dir.path().join("sessions")).await.unwrap();
        engine.create_session(&templates, "basic_report", "abc", "acme").await.unwrap();
        let err = engine.create_session(&templates, "basic_report", "abc", "acme").await.unwrap_err();
        assert_eq!(err.error_code(), "ALIAS_IN_USE");
    }

    #[tokio::test]
    async fn cross_group_get_is_generic_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let templates = registry_with_basic_report(dir.path()).await;
        let engine = SessionEngine::load(dir.path().join("sessions")).await.unwrap();
        let session = engine.create_session(&templates, "basic_report", "abc", "acme").await.unwrap();
        let err = engine.get(&session.session_id, "research").await.unwrap_err();
        assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let templates = registry_with_basic_report(dir.path()).await;
        let engine = SessionEngine::load(dir.path().join("sessions")).await.unwrap();

        let session = engine.create_session(&templates, "basic_report", "q4-report", "acme").await.unwrap();
        engine
            .set_global_parameters(
                &session.session_id,
                serde_json::json!({"title": "Q4 Report"}).as_object().unwrap().clone(),
                "acme",
                &templates,
            )
            .await
            .unwrap();

        let g1 = engine
            .add_fragment(&session.session_id, "paragraph", serde_json::Map::new(), Position::parse(None), "acme", &templates)
            .await
            .unwrap();
        assert_eq!(g1.position_index, 0);

        let g2 = engine
            .add_fragment(&session.session_id, "section", serde_json::Map::new(), Position::parse(Some("end")), "acme", &templates)
            .await
            .unwrap();
        assert_eq!(g2.position_index, 1);

        let fragments = engine.list_session_fragments(&session.session_id, "acme").await.unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].fragment_instance_guid, g1.instance_guid);
        assert_eq!(fragments[1].fragment_instance_guid, g2.instance_guid);

        engine.abort_session(&session.session_id, "acme").await.unwrap();
        assert!(engine.get(&session.session_id, "acme").await.is_err());
    }
}
