//! Decoded result rows.
use std::sync::Arc;

use crate::{
    common::ByteStr,
    protocol::{Oid, backend::FieldDescription},
    types::{PgFormat, PgValue},
};

/// Metadata for one result column, from the `RowDescription` message.
#[derive(Debug, Clone)]
pub struct Column {
    name: ByteStr,
    oid: Oid,
    format: PgFormat,
}

impl Column {
    pub(crate) fn from_field(field: FieldDescription) -> Column {
        Column {
            name: field.name,
            oid: field.data_type,
            format: PgFormat::from_code(field.format_code),
        }
    }

    /// The column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server-reported oid of the column's data type.
    ///
    /// This is the way to learn an oid for
    /// [`register_caster`][crate::types::TypeRegistry::register_caster]:
    /// select a value of the type in question and read the oid off the
    /// result metadata.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The transmission format the value arrived in.
    pub fn format(&self) -> PgFormat {
        self.format
    }
}

/// One decoded result row.
///
/// Column values have already been through their casters exactly once,
/// while the row was received.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<PgValue>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<PgValue>) -> Row {
        Row { columns, values }
    }

    /// Shared metadata for the row's columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, `None` when out of bounds.
    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    /// Value of the column named `name`, `None` when absent.
    pub fn get_named(&self, name: &str) -> Option<&PgValue> {
        let index = self.columns.iter().position(|c| c.name == *name)?;
        self.values.get(index)
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }
}
