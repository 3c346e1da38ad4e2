//! Scoped ownership of a created schema.

use crate::export::SchemaExport;
use sqlharness_core::Result;

/// A created schema that is dropped when the guard goes out of scope.
///
/// Call [`keep`](SchemaGuard::keep) once setup has succeeded to disarm the
/// guard and leave the schema in place.
#[derive(Debug)]
pub struct SchemaGuard {
    export: SchemaExport,
    armed: bool,
}

impl SchemaGuard {
    /// Guard a schema that `export` has already created.
    pub fn new(export: SchemaExport) -> Self {
        Self {
            export,
            armed: true,
        }
    }

    /// The export this guard drops with.
    pub fn export(&self) -> &SchemaExport {
        &self.export
    }

    /// Disarm the guard and keep the schema.
    pub fn keep(mut self) -> SchemaExport {
        self.armed = false;
        self.export.clone()
    }

    /// Drop the schema now, reporting any failure.
    pub fn drop_now(mut self) -> Result<()> {
        self.armed = false;
        self.export.drop(false, true)
    }
}

impl Drop for SchemaGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Dropping guarded schema");
            if let Err(e) = self.export.drop(false, true) {
                tracing::warn!(error = %e, "Guarded schema drop failed");
            }
        }
    }
}
