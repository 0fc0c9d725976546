//! Resource and template projections over the project descriptor.
//!
//! Commands may declare a Markdown `resource`; templates describe
//! parameterized views of those files. Everything here is read-only.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::core::config::{ProjectDescriptor, TemplateEntry, resolve_against};
use crate::core::error::ResourceError;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub name: String,
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResourceContents {
    pub uri: String,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TemplateArgument {
    pub name: String,
    pub description: String,
    pub default: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResourceTemplate {
    pub name: String,
    pub description: String,
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    pub arguments: Vec<TemplateArgument>,
}

#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    base_dir: PathBuf,
    /// (command key, declared resource path)
    resources: Vec<(String, String)>,
    templates: Vec<(String, TemplateEntry)>,
}

impl ResourceCatalog {
    pub fn from_descriptor(descriptor: &ProjectDescriptor, base_dir: impl Into<PathBuf>) -> Self {
        let resources = descriptor
            .commands
            .iter()
            .filter_map(|(key, entry)| {
                entry
                    .resource
                    .as_ref()
                    .filter(|r| !r.is_empty())
                    .map(|r| (key.clone(), r.clone()))
            })
            .collect();
        let templates = descriptor
            .templates
            .iter()
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect();
        Self {
            base_dir: base_dir.into(),
            resources,
            templates,
        }
    }

    /// Declared resource files as `file://` URIs.
    pub fn list(&self) -> Vec<ResourceEntry> {
        self.resources
            .iter()
            .filter_map(|(name, path)| {
                let abs = resolve_against(&self.base_dir, path);
                let uri = Url::from_file_path(&abs).ok()?;
                Some(ResourceEntry {
                    name: name.clone(),
                    uri: uri.to_string(),
                    mime_type: "text/markdown".to_string(),
                })
            })
            .collect()
    }

    /// Read a `file://` resource. Query parameters, when present, are
    /// rendered as a note appended to the text.
    pub async fn read(&self, uri: Option<&str>) -> Result<ResourceContents, ResourceError> {
        let raw = match uri {
            Some(u) if u.starts_with("file://") => u,
            other => return Err(ResourceError::InvalidUri(other.unwrap_or("").to_string())),
        };
        let parsed = Url::parse(raw).map_err(|_| ResourceError::InvalidUri(raw.to_string()))?;
        let path = parsed
            .to_file_path()
            .map_err(|_| ResourceError::InvalidUri(raw.to_string()))?;

        let mut text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ResourceError::Read {
                uri: raw.to_string(),
                source,
            })?;

        let query: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        if !query.is_empty() {
            let args = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!("\n\n---\n*Template arguments applied:* {}\n", args));
        }

        Ok(ResourceContents {
            uri: raw.to_string(),
            text,
        })
    }

    /// Resource templates: `file://<base>/resources/<command>.md` with one
    /// `name={name}` query pair per declared argument.
    pub fn templates(&self) -> Vec<ResourceTemplate> {
        let base = resolve_against(&self.base_dir, "resources");
        self.templates
            .iter()
            .map(|(name, tmpl)| {
                let arguments: Vec<TemplateArgument> = tmpl
                    .args
                    .iter()
                    .map(|(arg, default)| TemplateArgument {
                        name: arg.clone(),
                        description: format!("Argument for {}", tmpl.command),
                        default: default.clone(),
                    })
                    .collect();
                let mut uri_template = format!("file://{}/{}.md", base.display(), tmpl.command);
                if !arguments.is_empty() {
                    let query = arguments
                        .iter()
                        .map(|a| format!("{0}={{{0}}}", a.name))
                        .collect::<Vec<_>>()
                        .join("&");
                    uri_template.push('?');
                    uri_template.push_str(&query);
                }
                ResourceTemplate {
                    name: name.clone(),
                    description: tmpl.description.clone().unwrap_or_default(),
                    uri_template,
                    arguments,
                }
            })
            .collect()
    }
}
