//! Schema catalog: what the database exposes, loaded once at startup and on reload.

mod loader;
mod types;

pub use loader::{
    build_catalog, load, load_from_pool, ConstraintKind, PgSchemaSource, RawColumn, RawConstraint, RawSchema,
    SchemaSource,
};
pub use types::*;
