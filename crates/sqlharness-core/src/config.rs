//! Configuration building.
//!
//! A [`ConfigurationBuilder`] collects the connection settings, the mapping
//! resources and the cache strategies for a fixture. [`ConfigurationBuilder::build`]
//! resolves the mappings (inheritance, collection tables) and freezes the
//! result into an immutable [`Configuration`].

use crate::dialect::Dialect;
use crate::error::{Error, MappingError, MappingErrorKind, Result};
use crate::mapping::{EntityMapping, MappingDocument, MappingSource, PropertyMapping};
use crate::provider::{Driver, DriverConnectionProvider};
use crate::types::SqlType;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Second-level cache concurrency strategy.
///
/// Strategies are recorded on class and collection mappings; the harness
/// applies one to every eligible mapping at setup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheConcurrencyStrategy {
    ReadOnly,
    ReadWrite,
    #[default]
    NonstrictReadWrite,
    Transactional,
}

impl CacheConcurrencyStrategy {
    /// Name used in mapping files and fixture overrides.
    pub const fn name(self) -> &'static str {
        match self {
            CacheConcurrencyStrategy::ReadOnly => "read-only",
            CacheConcurrencyStrategy::ReadWrite => "read-write",
            CacheConcurrencyStrategy::NonstrictReadWrite => "nonstrict-read-write",
            CacheConcurrencyStrategy::Transactional => "transactional",
        }
    }
}

impl fmt::Display for CacheConcurrencyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheConcurrencyStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-only" | "readonly" => Ok(CacheConcurrencyStrategy::ReadOnly),
            "read-write" | "readwrite" => Ok(CacheConcurrencyStrategy::ReadWrite),
            "nonstrict-read-write" | "nonstrictreadwrite" => {
                Ok(CacheConcurrencyStrategy::NonstrictReadWrite)
            }
            "transactional" => Ok(CacheConcurrencyStrategy::Transactional),
            other => Err(Error::config(format!(
                "unknown cache concurrency strategy '{other}'"
            ))),
        }
    }
}

/// A resolved entity mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMapping {
    pub entity_name: String,
    pub table: String,
    /// Identifier columns; inherited from the root for subclasses.
    pub id: Vec<PropertyMapping>,
    /// Properties declared on this class only.
    pub properties: Vec<PropertyMapping>,
    pub superclass: Option<String>,
    pub cache_strategy: Option<CacheConcurrencyStrategy>,
}

impl ClassMapping {
    /// Whether this class is a subclass in an inheritance hierarchy.
    pub fn is_inherited(&self) -> bool {
        self.superclass.is_some()
    }

    /// Whether the identifier spans more than one column.
    pub fn has_composite_id(&self) -> bool {
        self.id.len() > 1
    }

    /// Identifier columns followed by the declared properties.
    pub fn columns(&self) -> impl Iterator<Item = &PropertyMapping> {
        self.id.iter().chain(&self.properties)
    }

    /// Whether any column holds a large binary value.
    pub fn has_large_binary_property(&self) -> bool {
        self.columns().any(|p| p.sql_type.is_large_binary())
    }
}

/// A resolved collection mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBinding {
    /// `<Entity>.<property>`
    pub role: String,
    pub owner: String,
    pub table: String,
    /// Foreign key columns referencing the owner's identifier.
    pub key_columns: Vec<PropertyMapping>,
    pub element_column: String,
    pub element_type: SqlType,
    pub cache_strategy: Option<CacheConcurrencyStrategy>,
}

/// Mutable configuration under construction.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    connection_string: Option<String>,
    dialect: Option<Dialect>,
    driver: Option<Arc<dyn Driver>>,
    properties: BTreeMap<String, String>,
    mapping_source: Option<Arc<dyn MappingSource>>,
    documents: Vec<(String, MappingDocument)>,
    class_strategies: HashMap<String, CacheConcurrencyStrategy>,
    collection_strategies: HashMap<String, CacheConcurrencyStrategy>,
}

impl ConfigurationBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string.
    pub fn connection_string(&mut self, connection_string: impl Into<String>) -> &mut Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Set the dialect. Defaults to the driver's dialect.
    pub fn dialect(&mut self, dialect: Dialect) -> &mut Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set the driver used to open connections.
    pub fn driver(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.driver = Some(driver);
        self
    }

    /// Set a free-form property.
    pub fn property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the source mapping resources are loaded from.
    pub fn mapping_source(&mut self, source: Arc<dyn MappingSource>) -> &mut Self {
        self.mapping_source = Some(source);
        self
    }

    /// Load, parse and add the mapping resource called `name`.
    pub fn add_resource(&mut self, name: &str) -> Result<&mut Self> {
        let source = self.mapping_source.as_ref().ok_or_else(|| {
            Error::config(format!("no mapping source to load '{name}' from"))
        })?;
        let content = source.load(name)?;
        let document = MappingDocument::parse(name, &content)?;
        tracing::debug!(resource = name, entities = document.entities.len(), "Added mapping resource");
        Ok(self.add_document(name, document))
    }

    /// Add an already-parsed mapping document.
    pub fn add_document(&mut self, name: impl Into<String>, document: MappingDocument) -> &mut Self {
        self.documents.push((name.into(), document));
        self
    }

    /// Names of the mapping resources added so far.
    pub fn mapping_resources(&self) -> Vec<&str> {
        self.documents.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Resolve the class mappings added so far.
    pub fn class_mappings(&self) -> Result<Vec<ClassMapping>> {
        Ok(self.resolve()?.0)
    }

    /// Resolve the collection mappings added so far.
    pub fn collection_mappings(&self) -> Result<Vec<CollectionBinding>> {
        Ok(self.resolve()?.1)
    }

    /// Record the cache strategy for an entity.
    pub fn set_cache_concurrency_strategy(
        &mut self,
        entity_name: &str,
        strategy: CacheConcurrencyStrategy,
    ) -> Result<&mut Self> {
        if !self.entities().any(|(_, e)| e.name == entity_name) {
            return Err(Error::config(format!("no mapped entity '{entity_name}'")));
        }
        self.class_strategies.insert(entity_name.to_string(), strategy);
        Ok(self)
    }

    /// Record the cache strategy for a collection role.
    pub fn set_collection_cache_concurrency_strategy(
        &mut self,
        role: &str,
        strategy: CacheConcurrencyStrategy,
    ) -> Result<&mut Self> {
        let known = self.entities().any(|(_, e)| {
            e.collections
                .iter()
                .any(|c| role_name(&e.name, &c.name) == role)
        });
        if !known {
            return Err(Error::config(format!("no mapped collection '{role}'")));
        }
        self.collection_strategies.insert(role.to_string(), strategy);
        Ok(self)
    }

    /// Freeze the builder into a [`Configuration`].
    pub fn build(&self) -> Result<Configuration> {
        let connection_string = self
            .connection_string
            .clone()
            .ok_or_else(|| Error::config("connection string not set"))?;
        let dialect = self
            .dialect
            .or_else(|| self.driver.as_ref().map(|d| d.dialect()))
            .unwrap_or_default();
        let (classes, collections) = self.resolve()?;

        Ok(Configuration {
            connection_string,
            dialect,
            driver: self.driver.clone(),
            properties: self.properties.clone(),
            resources: self.documents.iter().map(|(name, _)| name.clone()).collect(),
            classes,
            collections,
        })
    }

    fn entities(&self) -> impl Iterator<Item = (&str, &EntityMapping)> {
        self.documents
            .iter()
            .flat_map(|(name, doc)| doc.entities.iter().map(move |e| (name.as_str(), e)))
    }

    fn resolve(&self) -> Result<(Vec<ClassMapping>, Vec<CollectionBinding>)> {
        let mut by_name: HashMap<&str, (&str, &EntityMapping)> = HashMap::new();
        for (resource, entity) in self.entities() {
            if by_name.insert(&entity.name, (resource, entity)).is_some() {
                return Err(invalid(resource, format!("entity '{}' mapped twice", entity.name)));
            }
        }

        let mut classes = Vec::with_capacity(by_name.len());
        for (resource, entity) in self.entities() {
            let (root, depth) = root_of(entity, &by_name, resource)?;
            let id = root
                .id
                .as_ref()
                .map(|id| id.parts().to_vec())
                .unwrap_or_default()
                .into_iter()
                .map(|mut p| {
                    if entity.extends.is_some() {
                        p.nullable = false;
                    }
                    p
                })
                .collect();
            classes.push((
                depth,
                ClassMapping {
                    entity_name: entity.name.clone(),
                    table: table_of(entity).to_string(),
                    id,
                    properties: entity.properties.clone(),
                    superclass: entity.extends.clone(),
                    cache_strategy: self.class_strategies.get(&entity.name).copied(),
                },
            ));
        }
        // Superclass tables come before the tables that reference them.
        classes.sort_by_key(|(depth, _)| *depth);
        let classes: Vec<ClassMapping> = classes.into_iter().map(|(_, c)| c).collect();

        let mut collections = Vec::new();
        for (resource, entity) in self.entities() {
            let Some(owner) = classes.iter().find(|c| c.entity_name == entity.name) else {
                continue;
            };
            for collection in &entity.collections {
                let role = role_name(&entity.name, &collection.name);
                let key_columns: Vec<PropertyMapping> = owner
                    .id
                    .iter()
                    .cloned()
                    .map(|mut p| {
                        p.nullable = false;
                        p
                    })
                    .collect();
                let element_column = collection.element.column_name().to_string();
                if key_columns.iter().any(|k| k.column_name() == element_column) {
                    return Err(invalid(
                        resource,
                        format!("collection '{role}' element column clashes with its key"),
                    ));
                }
                collections.push(CollectionBinding {
                    table: collection
                        .table
                        .clone()
                        .unwrap_or_else(|| format!("{}_{}", owner.table, collection.name)),
                    cache_strategy: self.collection_strategies.get(&role).copied(),
                    role,
                    owner: entity.name.clone(),
                    key_columns,
                    element_column,
                    element_type: collection.element.sql_type.clone(),
                });
            }
        }

        let mut tables = HashSet::new();
        for table in classes
            .iter()
            .map(|c| c.table.as_str())
            .chain(collections.iter().map(|c| c.table.as_str()))
        {
            if !tables.insert(table.to_ascii_lowercase()) {
                return Err(Error::Mapping(MappingError {
                    kind: MappingErrorKind::Invalid,
                    resource: None,
                    message: format!("table '{table}' mapped twice"),
                }));
            }
        }

        Ok((classes, collections))
    }
}

fn role_name(entity: &str, property: &str) -> String {
    format!("{entity}.{property}")
}

fn table_of(entity: &EntityMapping) -> &str {
    entity.table.as_deref().unwrap_or(&entity.name)
}

fn invalid(resource: &str, message: String) -> Error {
    Error::Mapping(MappingError {
        kind: MappingErrorKind::Invalid,
        resource: Some(resource.to_string()),
        message,
    })
}

/// Walk `extends` links up to the root entity, returning it and the depth.
fn root_of<'a>(
    entity: &'a EntityMapping,
    by_name: &HashMap<&str, (&str, &'a EntityMapping)>,
    resource: &str,
) -> Result<(&'a EntityMapping, usize)> {
    let mut current = entity;
    let mut visited = HashSet::new();
    let mut depth = 0;
    while let Some(parent) = &current.extends {
        if !visited.insert(current.name.as_str()) {
            return Err(invalid(
                resource,
                format!("inheritance cycle through '{}'", entity.name),
            ));
        }
        current = by_name
            .get(parent.as_str())
            .map(|(_, e)| *e)
            .ok_or_else(|| {
                invalid(
                    resource,
                    format!("'{}' extends unknown entity '{}'", current.name, parent),
                )
            })?;
        depth += 1;
    }
    Ok((current, depth))
}

/// An immutable, fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    connection_string: String,
    dialect: Dialect,
    driver: Option<Arc<dyn Driver>>,
    properties: BTreeMap<String, String>,
    resources: Vec<String>,
    classes: Vec<ClassMapping>,
    collections: Vec<CollectionBinding>,
}

impl Configuration {
    /// Start building a configuration.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn driver(&self) -> Option<&Arc<dyn Driver>> {
        self.driver.as_ref()
    }

    /// Look up a free-form property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn mapping_resources(&self) -> &[String] {
        &self.resources
    }

    /// Class mappings, superclasses before subclasses.
    pub fn class_mappings(&self) -> &[ClassMapping] {
        &self.classes
    }

    pub fn class_mapping(&self, entity_name: &str) -> Option<&ClassMapping> {
        self.classes.iter().find(|c| c.entity_name == entity_name)
    }

    pub fn collection_mappings(&self) -> &[CollectionBinding] {
        &self.collections
    }

    /// Whether any entity is mapped.
    pub fn has_mappings(&self) -> bool {
        !self.classes.is_empty()
    }

    /// A plain provider opening connections through the configured driver.
    pub fn connection_provider(&self) -> Result<DriverConnectionProvider> {
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| Error::config("no driver configured"))?;
        Ok(DriverConnectionProvider::new(driver, self.connection_string.clone()))
    }
}
