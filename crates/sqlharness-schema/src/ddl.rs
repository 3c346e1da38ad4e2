//! DDL generation.
//!
//! Statements are produced from resolved mappings; every identifier is quoted.

use sqlharness_core::{ClassMapping, CollectionBinding, Dialect, PropertyMapping, SqlType, quote_ident};

/// Column type name for `sql_type` in `dialect`.
pub fn column_type(dialect: Dialect, sql_type: &SqlType) -> String {
    match (dialect, sql_type) {
        (Dialect::Postgres, SqlType::Blob) => "BYTEA".to_string(),
        (Dialect::Postgres, SqlType::Guid) => "UUID".to_string(),
        (Dialect::Mysql, SqlType::Double) => "DOUBLE".to_string(),
        (Dialect::Mysql, SqlType::Blob) => "LONGBLOB".to_string(),
        (Dialect::Mysql, SqlType::Timestamp) => "DATETIME(6)".to_string(),
        _ => sql_type.sql_name(),
    }
}

fn column_definition(dialect: Dialect, property: &PropertyMapping, force_not_null: bool) -> String {
    let mut def = format!(
        "  {} {}",
        quote_ident(property.column_name()),
        column_type(dialect, &property.sql_type)
    );
    if force_not_null || !property.nullable {
        def.push_str(" NOT NULL");
    }
    def
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a PropertyMapping>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c.column_name()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` for an entity.
///
/// Subclass tables carry the inherited identifier as both primary key and
/// foreign key to the superclass table.
pub fn entity_table_ddl(dialect: Dialect, class: &ClassMapping, superclass_table: Option<&str>) -> String {
    let mut parts: Vec<String> = class
        .id
        .iter()
        .map(|p| column_definition(dialect, p, true))
        .chain(class.properties.iter().map(|p| column_definition(dialect, p, false)))
        .collect();

    parts.push(format!("  PRIMARY KEY ({})", column_list(&class.id)));
    if let Some(parent) = superclass_table {
        let id = column_list(&class.id);
        parts.push(format!(
            "  FOREIGN KEY ({}) REFERENCES {} ({})",
            id,
            quote_ident(parent),
            id
        ));
    }

    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_ident(&class.table),
        parts.join(",\n")
    )
}

/// `CREATE TABLE` for a collection of values.
pub fn collection_table_ddl(dialect: Dialect, collection: &CollectionBinding, owner_table: &str) -> String {
    let keys = column_list(&collection.key_columns);
    let mut parts: Vec<String> = collection
        .key_columns
        .iter()
        .map(|p| column_definition(dialect, p, true))
        .collect();
    parts.push(format!(
        "  {} {}",
        quote_ident(&collection.element_column),
        column_type(dialect, &collection.element_type)
    ));
    parts.push(format!(
        "  FOREIGN KEY ({}) REFERENCES {} ({})",
        keys,
        quote_ident(owner_table),
        keys
    ));

    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_ident(&collection.table),
        parts.join(",\n")
    )
}

/// `DROP TABLE IF EXISTS`, cascading where the dialect supports it.
pub fn drop_table_ddl(dialect: Dialect, table: &str) -> String {
    if dialect.supports_drop_cascade() {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(table))
    } else {
        format!("DROP TABLE IF EXISTS {}", quote_ident(table))
    }
}
