//! Read-only class metadata exposed by the session factory.

use sqlharness_core::ClassMapping;

/// What the factory knows about one mapped entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetadata {
    entity_name: String,
    table: String,
    identifier_columns: Vec<String>,
    property_columns: Vec<String>,
    superclass: Option<String>,
}

impl ClassMetadata {
    pub(crate) fn from_mapping(mapping: &ClassMapping) -> Self {
        Self {
            entity_name: mapping.entity_name.clone(),
            table: mapping.table.clone(),
            identifier_columns: mapping.id.iter().map(|p| p.column_name().to_string()).collect(),
            property_columns: mapping
                .properties
                .iter()
                .map(|p| p.column_name().to_string())
                .collect(),
            superclass: mapping.superclass.clone(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identifier_columns(&self) -> &[String] {
        &self.identifier_columns
    }

    /// Columns of the properties declared on this class.
    pub fn property_columns(&self) -> &[String] {
        &self.property_columns
    }

    pub fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }

    pub fn has_composite_identifier(&self) -> bool {
        self.identifier_columns.len() > 1
    }
}
