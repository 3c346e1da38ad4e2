//! Creating and dropping a configuration's schema.

use crate::ddl::{collection_table_ddl, drop_table_ddl, entity_table_ddl};
use crate::guard::SchemaGuard;
use sqlharness_core::{
    Configuration, ConnectionProvider, ConnectionRef, Error, Result, SchemaError, SchemaErrorKind,
};
use std::fmt;
use std::sync::Arc;

/// Exports the schema described by a [`Configuration`].
///
/// Each call acquires its own connection through the provider and gives it
/// back before returning.
#[derive(Clone)]
pub struct SchemaExport {
    config: Arc<Configuration>,
    provider: Arc<dyn ConnectionProvider>,
}

impl fmt::Debug for SchemaExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaExport")
            .field("connection_string", &self.provider.connection_string())
            .field("tables", &self.tables())
            .finish()
    }
}

impl SchemaExport {
    pub fn new(config: Arc<Configuration>, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { config, provider }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// All tables in creation order: entity tables, then collection tables.
    pub fn tables(&self) -> Vec<&str> {
        self.config
            .class_mappings()
            .iter()
            .map(|c| c.table.as_str())
            .chain(self.config.collection_mappings().iter().map(|c| c.table.as_str()))
            .collect()
    }

    /// `(table, CREATE TABLE ...)` pairs in creation order.
    pub fn create_statements(&self) -> Vec<(&str, String)> {
        let dialect = self.config.dialect();
        let entities = self.config.class_mappings().iter().map(|class| {
            let parent = class.superclass.as_deref().map(|p| self.table_of(p));
            (class.table.as_str(), entity_table_ddl(dialect, class, parent))
        });
        let collections = self.config.collection_mappings().iter().map(|coll| {
            (
                coll.table.as_str(),
                collection_table_ddl(dialect, coll, self.table_of(&coll.owner)),
            )
        });
        entities.chain(collections).collect()
    }

    /// `DROP TABLE` statements, referencing tables before referenced ones.
    pub fn drop_statements(&self) -> Vec<String> {
        let dialect = self.config.dialect();
        self.tables()
            .into_iter()
            .rev()
            .map(|table| drop_table_ddl(dialect, table))
            .collect()
    }

    /// Create the schema.
    ///
    /// Existing tables with the mapped names are dropped first. If a `CREATE`
    /// fails, the tables this call already created are dropped again before
    /// the error is returned.
    #[tracing::instrument(level = "debug", skip(self), fields(connection_string = %self.provider.connection_string()))]
    pub fn create(&self, output_ddl: bool, execute: bool) -> Result<()> {
        let drops = self.drop_statements();
        let creates = self.create_statements();
        if output_ddl {
            for sql in drops.iter().chain(creates.iter().map(|(_, sql)| sql)) {
                tracing::info!(target: "sqlharness::ddl", "{sql}");
            }
        }
        if !execute {
            return Ok(());
        }

        self.with_connection(|conn| {
            for sql in &drops {
                if let Err(e) = conn.execute(sql, &[]) {
                    tracing::debug!(sql = %sql, error = %e, "Ignoring failed drop before create");
                }
            }

            let mut created: Vec<&str> = Vec::with_capacity(creates.len());
            for (table, sql) in &creates {
                if let Err(e) = conn.execute(sql, &[]) {
                    tracing::error!(table, error = %e, "Schema creation failed");
                    for done in created.iter().rev() {
                        let drop_sql = drop_table_ddl(self.config.dialect(), done);
                        if let Err(drop_err) = conn.execute(&drop_sql, &[]) {
                            tracing::warn!(table = done, error = %drop_err, "Could not drop partially created table");
                        }
                    }
                    return Err(Error::Schema(SchemaError {
                        kind: SchemaErrorKind::Create,
                        message: format!("could not create table '{table}'"),
                        source: Some(Box::new(e)),
                    }));
                }
                created.push(*table);
            }
            tracing::debug!(tables = created.len(), "Schema created");
            Ok(())
        })
    }

    /// Drop the schema.
    ///
    /// Every statement is attempted; the first failure is returned.
    #[tracing::instrument(level = "debug", skip(self), fields(connection_string = %self.provider.connection_string()))]
    pub fn drop(&self, output_ddl: bool, execute: bool) -> Result<()> {
        let drops = self.drop_statements();
        if output_ddl {
            for sql in &drops {
                tracing::info!(target: "sqlharness::ddl", "{sql}");
            }
        }
        if !execute {
            return Ok(());
        }

        self.with_connection(|conn| {
            let mut first_error = None;
            for sql in &drops {
                if let Err(e) = conn.execute(sql, &[]) {
                    tracing::warn!(sql = %sql, error = %e, "Drop statement failed");
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                None => {
                    tracing::debug!("Schema dropped");
                    Ok(())
                }
                Some(e) => Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::Drop,
                    message: "could not drop schema".to_string(),
                    source: Some(Box::new(e)),
                })),
            }
        })
    }

    /// Create the schema and return a guard that drops it again.
    pub fn create_guarded(self) -> Result<SchemaGuard> {
        self.create(false, true)?;
        Ok(SchemaGuard::new(self))
    }

    fn table_of<'a>(&'a self, entity: &'a str) -> &'a str {
        self.config
            .class_mapping(entity)
            .map_or(entity, |c| c.table.as_str())
    }

    fn with_connection<T>(&self, f: impl FnOnce(&ConnectionRef) -> Result<T>) -> Result<T> {
        let conn = self.provider.get_connection()?;
        let result = f(&conn);
        if let Err(e) = self.provider.close_connection(&conn) {
            tracing::warn!(connection = %conn.id(), error = %e, "Could not release schema export connection");
        }
        result
    }
}
