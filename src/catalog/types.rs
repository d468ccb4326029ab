//! Introspected schema model: tables, columns, keys. Immutable once built.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Semantic column type, independent of the exact Postgres spelling.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SemanticType {
    Integer { bits: u8 },
    /// `float4` (32) or `float8` (64).
    Float { bits: u8 },
    /// Arbitrary precision; carried as decimal text end to end.
    Numeric,
    Text,
    Boolean,
    Timestamp { with_time_zone: bool },
    Date,
    Uuid,
    Json,
    Enum { variants: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Cast target used on every placeholder bound to this column (e.g. `int4`, `"public"."mood"`).
    pub pg_cast: String,
    pub nullable: bool,
    /// Column default, identity, or generated expression.
    pub has_default: bool,
    /// Generated or `GENERATED ALWAYS AS IDENTITY`; never written by the API.
    pub read_only: bool,
    pub max_length: Option<u32>,
    /// Server-managed column: never written by the API and left out of responses.
    pub hidden: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    pub primary_key_name: Option<String>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Columns covered by the named constraint, if it belongs to this table.
    pub fn constraint_columns(&self, constraint: &str) -> Option<Vec<String>> {
        if self.primary_key_name.as_deref() == Some(constraint) {
            return Some(self.primary_key.clone());
        }
        self.unique_constraints
            .iter()
            .find(|u| u.name == constraint)
            .map(|u| u.columns.clone())
            .or_else(|| {
                self.foreign_keys
                    .iter()
                    .find(|fk| fk.name == constraint)
                    .map(|fk| fk.columns.clone())
            })
    }
}

/// A table left out of the catalog and why.
#[derive(Clone, Debug)]
pub struct ExcludedTable {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub schema: String,
    pub tables: BTreeMap<String, Arc<TableDescriptor>>,
    pub excluded: Vec<ExcludedTable>,
}

impl Catalog {
    pub fn table(&self, name: &str) -> Option<&Arc<TableDescriptor>> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.tables.values()
    }

    /// Foreign keys on other tables that point at `table`.
    pub fn referencing(&self, table: &str) -> Vec<(&TableDescriptor, &ForeignKeyDescriptor)> {
        self.tables
            .values()
            .flat_map(|t| {
                t.foreign_keys
                    .iter()
                    .filter(|fk| fk.referenced_table == table)
                    .map(move |fk| (t.as_ref(), fk))
            })
            .collect()
    }

    /// Columns of a constraint, used to name the field in constraint errors. Constraint names are
    /// only unique per table, so the lookup is scoped to `table` when the database reports it.
    pub fn constraint_columns(&self, table: Option<&str>, constraint: &str) -> Option<Vec<String>> {
        match table {
            Some(name) => self.tables.get(name)?.constraint_columns(constraint),
            None => self.tables.values().find_map(|t| t.constraint_columns(constraint)),
        }
    }
}
