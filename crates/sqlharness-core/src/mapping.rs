//! Entity mapping documents and the sources they are loaded from.
//!
//! A mapping document is JSON describing the entities a fixture persists:
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "name": "Parent",
//!       "id": { "composite": [
//!         { "name": "prop1", "type": { "var_char": 32 } },
//!         { "name": "prop2", "type": { "var_char": 32 } }
//!       ] },
//!       "properties": [ { "name": "name", "type": "text" } ]
//!     }
//!   ]
//! }
//! ```
//!
//! Documents are fetched by logical name from a [`MappingSource`], which is
//! injected into the configuration builder instead of being discovered.

use crate::error::{Error, MappingError, MappingErrorKind, Result};
use crate::identifiers::is_valid_identifier;
use crate::types::SqlType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Mapping sources
// ============================================================================

/// Capability: given a logical resource name, return its mapping content.
pub trait MappingSource: Send + Sync + fmt::Debug {
    /// Load the raw content of the resource called `name`.
    fn load(&self, name: &str) -> Result<String>;
}

fn not_found(name: &str, message: impl Into<String>) -> Error {
    Error::Mapping(MappingError {
        kind: MappingErrorKind::NotFound,
        resource: Some(name.to_string()),
        message: message.into(),
    })
}

/// Mapping resources held in memory, typically via `include_str!`.
#[derive(Debug, Clone, Default)]
pub struct StaticMappingSource {
    resources: HashMap<String, String>,
}

impl StaticMappingSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(name, content);
        self
    }

    /// Add or replace a resource.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.resources.insert(name.into(), content.into());
    }
}

impl MappingSource for StaticMappingSource {
    fn load(&self, name: &str) -> Result<String> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name, "no such mapping resource"))
    }
}

/// Mapping resources stored as files under a root directory.
///
/// `issues.NH3841.mappings.json` resolves to `<root>/issues.NH3841.mappings.json`
/// if that file exists, and to `<root>/issues/NH3841/mappings.json` otherwise.
#[derive(Debug, Clone)]
pub struct DirectoryMappingSource {
    root: PathBuf,
}

impl DirectoryMappingSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn nested_path(&self, name: &str) -> PathBuf {
        match name.rsplit_once('.') {
            Some((stem, ext)) => {
                let mut path = self.root.clone();
                for segment in stem.split('.') {
                    path.push(segment);
                }
                path.set_extension(ext);
                path
            }
            None => self.root.join(name),
        }
    }
}

impl MappingSource for DirectoryMappingSource {
    fn load(&self, name: &str) -> Result<String> {
        let flat = self.root.join(name);
        let path = if flat.is_file() {
            flat
        } else {
            self.nested_path(name)
        };
        std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_found(name, format!("file not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })
    }
}

// ============================================================================
// Document model
// ============================================================================

/// A parsed mapping resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDocument {
    pub entities: Vec<EntityMapping>,
}

/// One mapped entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityMapping {
    pub name: String,
    /// Table name; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    /// Identifier; subclasses inherit their root's identifier and omit it.
    #[serde(default)]
    pub id: Option<IdMapping>,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
    /// Name of the mapped superclass (joined-table inheritance).
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionMapping>,
}

/// Identifier of a root entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdMapping {
    Single(PropertyMapping),
    /// Component identifier made of several columns.
    Composite(Vec<PropertyMapping>),
}

impl IdMapping {
    /// The identifier's columns in declaration order.
    pub fn parts(&self) -> &[PropertyMapping] {
        match self {
            IdMapping::Single(p) => std::slice::from_ref(p),
            IdMapping::Composite(parts) => parts,
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// A mapped scalar property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyMapping {
    pub name: String,
    /// Column name; defaults to the property name.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl PropertyMapping {
    /// The column this property is stored in.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// A mapped collection of values owned by an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionMapping {
    /// Property name on the owning entity.
    pub name: String,
    /// Collection table; defaults to `<owner table>_<name>`.
    #[serde(default)]
    pub table: Option<String>,
    pub element: PropertyMapping,
}

impl MappingDocument {
    /// Parse and validate the content of the resource called `resource`.
    pub fn parse(resource: &str, content: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(content).map_err(|e| {
            Error::Mapping(MappingError {
                kind: MappingErrorKind::Parse,
                resource: Some(resource.to_string()),
                message: e.to_string(),
            })
        })?;
        doc.validate(resource)?;
        Ok(doc)
    }

    /// Check the rules a single document must satisfy on its own.
    ///
    /// Cross-document rules (unknown superclasses, duplicate entity names
    /// across resources) are checked when the configuration is built.
    pub fn validate(&self, resource: &str) -> Result<()> {
        let invalid = |message: String| {
            Error::Mapping(MappingError {
                kind: MappingErrorKind::Invalid,
                resource: Some(resource.to_string()),
                message,
            })
        };

        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.name.as_str()) {
                return Err(invalid(format!("entity '{}' mapped twice", entity.name)));
            }

            let mut names: Vec<&str> = vec![entity.name.as_str()];
            if let Some(table) = &entity.table {
                names.push(table);
            }
            if let Some(parent) = &entity.extends {
                names.push(parent);
            }
            let id_parts = entity.id.as_ref().map(IdMapping::parts).unwrap_or_default();
            for p in id_parts.iter().chain(&entity.properties) {
                names.push(&p.name);
                names.push(p.column_name());
            }
            for c in &entity.collections {
                names.push(&c.name);
                if let Some(table) = &c.table {
                    names.push(table);
                }
                names.push(c.element.column_name());
            }
            if let Some(bad) = names.into_iter().find(|n| !is_valid_identifier(n)) {
                return Err(invalid(format!(
                    "'{}' in entity '{}' is not a plain identifier",
                    bad, entity.name
                )));
            }

            match (&entity.id, &entity.extends) {
                (None, None) => {
                    return Err(invalid(format!("entity '{}' has no identifier", entity.name)));
                }
                (Some(_), Some(parent)) => {
                    return Err(invalid(format!(
                        "subclass '{}' must inherit the identifier of '{}'",
                        entity.name, parent
                    )));
                }
                (Some(id), None) if id.parts().is_empty() => {
                    return Err(invalid(format!(
                        "entity '{}' has an empty composite identifier",
                        entity.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
