//! C3 — Registry. Group-partitioned catalogues of templates, fragments, and
//! styles loaded from a directory hierarchy, with directory↔metadata
//! consistency enforcement and one-time flat-layout migration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DocError, DocResult};
use crate::model::{FragmentDef, ParamSchema, Style, StyleSummary, Template, TemplateSummary};

#[derive(Deserialize)]
struct TemplateMeta {
    template_id: String,
    group: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    global_parameters: Vec<ParamSchema>,
    #[serde(default)]
    embedded_fragments: Vec<EmbeddedFragmentMeta>,
}

#[derive(Deserialize)]
struct EmbeddedFragmentMeta {
    fragment_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ParamSchema>,
}

#[derive(Deserialize)]
struct FragmentMeta {
    fragment_id: String,
    group: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ParamSchema>,
}

#[derive(Deserialize)]
struct StyleMeta {
    style_id: String,
    group: String,
    #[serde(default)]
    name: String,
}

fn parse_meta<T: serde::de::DeserializeOwned>(path: &Path, bytes: &[u8]) -> DocResult<T> {
    serde_yaml::from_slice(bytes)
        .map_err(|e| DocError::LoadError(format!("{}: {e}", path.display())))
}

/// Discover immediate subdirectories, skipping ones whose name starts with
/// `_`, and handling the one-time flat-layout migration if no group
/// subdirectories are present but item directories are.
async fn discover_groups(root: &Path) -> DocResult<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut subdirs = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                subdirs.push(name.to_string());
            }
        }
    }

    // Heuristic for "flat layout": none of the discovered subdirectories
    // look like groups already, but each contains a metadata-bearing file
    // one level down. We detect this by checking whether `root` itself
    // contains item directories with a metadata file directly inside them,
    // i.e. `root/<id>/template.yaml` rather than `root/<group>/<id>/...`.
    let looks_flat = !subdirs.is_empty()
        && subdirs.iter().all(|d| !d.starts_with('_'))
        && {
            let mut flat = true;
            for d in &subdirs {
                let candidate = root.join(d);
                let has_nested_group_items = has_metadata_one_level_down(&candidate).await?;
                if !has_nested_group_items {
                    flat = false;
                    break;
                }
            }
            flat
        };

    if looks_flat {
        migrate_flat_layout(root, &subdirs).await?;
        return Ok(vec!["public".to_string()]);
    }

    Ok(subdirs.into_iter().filter(|d| !d.starts_with('_')).collect())
}

async fn has_metadata_one_level_down(item_dir: &Path) -> DocResult<bool> {
    for name in ["template.yaml", "template.yml", "fragment.yaml", "fragment.yml", "style.yaml", "style.yml"] {
        if tokio::fs::try_exists(item_dir.join(name)).await.unwrap_or(false) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Move each item directory found directly at `root` into `root/public/<id>`
/// and inject `group: public` into its metadata file. Idempotent: running
/// it again on an already-migrated layout is a no-op because
/// `discover_groups` will see the `public` subdirectory and stop treating
/// the layout as flat.
async fn migrate_flat_layout(root: &Path, item_ids: &[String]) -> DocResult<()> {
    let public_dir = root.join("public");
    tokio::fs::create_dir_all(&public_dir).await?;

    for id in item_ids {
        let src = root.join(id);
        let dst = public_dir.join(id);
        if tokio::fs::try_exists(&dst).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::rename(&src, &dst).await?;
        inject_group_public(&dst).await?;
        tracing::info!(item_id = %id, from = %src.display(), to = %dst.display(), "migrated flat-layout item to group public");
    }
    Ok(())
}

async fn inject_group_public(item_dir: &Path) -> DocResult<()> {
    for name in ["template.yaml", "fragment.yaml", "style.yaml"] {
        let path = item_dir.join(name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|e| DocError::LoadError(format!("{}: {e}", path.display())))?;
        if let serde_yaml::Value::Mapping(map) = &mut value {
            map.insert(
                serde_yaml::Value::String("group".into()),
                serde_yaml::Value::String("public".into()),
            );
        }
        let rewritten = serde_yaml::to_string(&value)
            .map_err(|e| DocError::LoadError(format!("{}: {e}", path.display())))?;
        tokio::fs::write(&path, rewritten).await?;
        return Ok(());
    }
    Ok(())
}

fn check_group_match(item_id: &str, dir_group: &str, meta_group: &str) -> DocResult<()> {
    if dir_group != meta_group {
        return Err(DocError::GroupMismatch {
            item_id: item_id.to_string(),
            expected: dir_group.to_string(),
            actual: meta_group.to_string(),
        });
    }
    Ok(())
}

/// Template catalogue.
pub struct TemplateRegistry {
    root: PathBuf,
    by_key: HashMap<(String, String), Template>,
}

impl TemplateRegistry {
    pub async fn load(root: impl Into<PathBuf>) -> DocResult<Self> {
        let root = root.into();
        let groups = discover_groups(&root).await?;
        let mut by_key = HashMap::new();

        for group in groups {
            let group_dir = root.join(&group);
            let mut entries = match tokio::fs::read_dir(&group_dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let item_dir = entry.path();
                let meta_path = find_existing(&item_dir, &["template.yaml", "template.yml"]).await;
                let Some(meta_path) = meta_path else { continue };
                let bytes = tokio::fs::read(&meta_path).await?;
                let meta: TemplateMeta = parse_meta(&meta_path, &bytes)?;
                check_group_match(&meta.template_id, &group, &meta.group)?;

                let document_text = read_text_if_exists(&item_dir, &["document.html", "document.txt", "document"]).await?;
                let mut embedded_fragments = Vec::new();
                for ef in meta.embedded_fragments {
                    let frag_path = item_dir.join("fragments").join(format!("{}.html", ef.fragment_id));
                    let template_text = tokio::fs::read_to_string(&frag_path).await.unwrap_or_default();
                    embedded_fragments.push(FragmentDef {
                        fragment_id: ef.fragment_id,
                        group: group.clone(),
                        name: ef.name,
                        description: ef.description,
                        parameters: ef.parameters,
                        template_text,
                    });
                }

                let template = Template {
                    template_id: meta.template_id.clone(),
                    group: group.clone(),
                    name: meta.name,
                    description: meta.description,
                    global_parameters: meta.global_parameters,
                    embedded_fragments,
                    document_text,
                };
                by_key.insert((group.clone(), template.template_id.clone()), template);
            }
        }

        Ok(TemplateRegistry { root, by_key })
    }

    pub fn list(&self, group: Option<&str>) -> Vec<TemplateSummary> {
        self.by_key
            .values()
            .filter(|t| group.map(|g| g == t.group).unwrap_or(true))
            .map(Template::summary)
            .collect()
    }

    pub fn get(&self, template_id: &str, group: &str) -> Option<&Template> {
        self.by_key.get(&(group.to_string(), template_id.to_string()))
    }

    pub fn list_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.by_key.keys().map(|(g, _)| g.clone()).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    pub fn items_by_group(&self, group: &str) -> Vec<&Template> {
        self.by_key.values().filter(|t| t.group == group).collect()
    }

    /// Sandboxed document rendering-text loader root for a template's group.
    pub fn templates_root(&self) -> &Path {
        &self.root
    }
}

async fn find_existing(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    for name in names {
        let path = dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

async fn read_text_if_exists(dir: &Path, names: &[&str]) -> DocResult<String> {
    match find_existing(dir, names).await {
        Some(path) => Ok(tokio::fs::read_to_string(path).await?),
        None => Ok(String::new()),
    }
}

/// Standalone fragment catalogue (embedded fragments live only on their
/// owning template, per spec §9 — never merged into this catalogue).
pub struct FragmentRegistry {
    by_key: HashMap<(String, String), FragmentDef>,
}

impl FragmentRegistry {
    pub async fn load(root: impl Into<PathBuf>) -> DocResult<Self> {
        let root = root.into();
        let groups = discover_groups(&root).await?;
        let mut by_key = HashMap::new();

        for group in groups {
            let group_dir = root.join(&group);
            let mut entries = match tokio::fs::read_dir(&group_dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let item_dir = entry.path();
                let Some(meta_path) = find_existing(&item_dir, &["fragment.yaml", "fragment.yml"]).await else { continue };
                let bytes = tokio::fs::read(&meta_path).await?;
                let meta: FragmentMeta = parse_meta(&meta_path, &bytes)?;
                check_group_match(&meta.fragment_id, &group, &meta.group)?;

                let template_text = read_text_if_exists(&item_dir, &["fragment.html", "fragment.txt"]).await?;
                let def = FragmentDef {
                    fragment_id: meta.fragment_id.clone(),
                    group: group.clone(),
                    name: meta.name,
                    description: meta.description,
                    parameters: meta.parameters,
                    template_text,
                };
                by_key.insert((group.clone(), def.fragment_id.clone()), def);
            }
        }

        Ok(FragmentRegistry { by_key })
    }

    pub fn list(&self, group: Option<&str>) -> Vec<&FragmentDef> {
        self.by_key
            .values()
            .filter(|f| group.map(|g| g == f.group).unwrap_or(true))
            .collect()
    }

    pub fn get(&self, fragment_id: &str, group: &str) -> Option<&FragmentDef> {
        self.by_key.get(&(group.to_string(), fragment_id.to_string()))
    }
}

/// Style catalogue.
pub struct StyleRegistry {
    by_key: HashMap<(String, String), Style>,
    /// `(group, style_id)` pairs in the order they were loaded from disk,
    /// so `default_for_group` can return the group's first loaded style
    /// rather than an alphabetically-first one.
    load_order: Vec<(String, String)>,
}

impl StyleRegistry {
    pub async fn load(root: impl Into<PathBuf>) -> DocResult<Self> {
        let root = root.into();
        let groups = discover_groups(&root).await?;
        let mut by_key = HashMap::new();
        let mut load_order = Vec::new();

        for group in groups {
            let group_dir = root.join(&group);
            let mut entries = match tokio::fs::read_dir(&group_dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let item_dir = entry.path();
                let Some(meta_path) = find_existing(&item_dir, &["style.yaml", "style.yml"]).await else { continue };
                let bytes = tokio::fs::read(&meta_path).await?;
                let meta: StyleMeta = parse_meta(&meta_path, &bytes)?;
                check_group_match(&meta.style_id, &group, &meta.group)?;

                let css = read_text_if_exists(&item_dir, &["style.css"]).await?;
                let style = Style {
                    style_id: meta.style_id.clone(),
                    group: group.clone(),
                    name: meta.name,
                    css,
                };
                let key = (group.clone(), style.style_id.clone());
                by_key.insert(key.clone(), style);
                load_order.push(key);
            }
        }

        Ok(StyleRegistry { by_key, load_order })
    }

    pub fn list(&self, group: Option<&str>) -> Vec<StyleSummary> {
        self.by_key
            .values()
            .filter(|s| group.map(|g| g == s.group).unwrap_or(true))
            .map(|s| StyleSummary { style_id: s.style_id.clone(), name: s.name.clone(), group: s.group.clone() })
            .collect()
    }

    pub fn get(&self, style_id: &str, group: &str) -> Option<&Style> {
        self.by_key.get(&(group.to_string(), style_id.to_string()))
    }

    /// First successfully loaded style for a group, used as the render
    /// default when no `style_id` is supplied.
    pub fn default_for_group(&self, group: &str) -> Option<&Style> {
        self.load_order.iter().find(|(g, _)| g == group).and_then(|key| self.by_key.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn loads_grouped_template() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(
            &root.join("acme/basic_report/template.yaml"),
            "template_id: basic_report\ngroup: acme\nname: Basic Report\n",
        )
        .await;
        write_file(&root.join("acme/basic_report/document.html"), "<html>{{ title }}</html>").await;

        let registry = TemplateRegistry::load(root).await.unwrap();
        let tmpl = registry.get("basic_report", "acme").unwrap();
        assert_eq!(tmpl.name, "Basic Report");
        assert!(tmpl.document_text.contains("title"));
    }

    #[tokio::test]
    async fn group_mismatch_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(
            &root.join("public/invoice/template.yaml"),
            "template_id: invoice\ngroup: research\n",
        )
        .await;

        let err = TemplateRegistry::load(root).await.unwrap_err();
        assert_eq!(err.error_code(), "GROUP_MISMATCH");
    }

    #[tokio::test]
    async fn flat_layout_migrates_to_public() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("basic_report/template.yaml"), "template_id: basic_report\ngroup: whatever\n").await;

        let registry = TemplateRegistry::load(root).await.unwrap();
        assert!(registry.get("basic_report", "public").is_some());
        assert!(tokio::fs::try_exists(root.join("public/basic_report/template.yaml")).await.unwrap());
    }

    #[tokio::test]
    async fn default_style_is_first_loaded() {
        // "zebra" is written (and therefore loaded) before "apple", which
        // alphabetically sorts after it — this only passes if the default
        // tracks true load order rather than falling back to `style_id`
        // ordering.
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("acme/zebra/style.yaml"), "style_id: zebra\ngroup: acme\n").await;
        write_file(&root.join("acme/zebra/style.css"), "body{color:white}").await;
        write_file(&root.join("acme/apple/style.yaml"), "style_id: apple\ngroup: acme\n").await;
        write_file(&root.join("acme/apple/style.css"), "body{color:black}").await;

        let registry = StyleRegistry::load(root).await.unwrap();
        assert_eq!(registry.load_order, vec![("acme".to_string(), "zebra".to_string()), ("acme".to_string(), "apple".to_string())]);
        let default = registry.default_for_group("acme").unwrap();
        assert_eq!(default.style_id, "zebra");
    }
}
