//! crudapi: a REST CRUD API generated at startup from a PostgreSQL schema.
//!
//! The catalog is introspected once, resolved into per-table entities, and served through
//! generic axum handlers that build parameterized SQL per request.

pub mod catalog;
pub mod endpoints;
pub mod error;
pub mod fields;
pub mod handlers;
pub mod request;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

#[cfg(test)]
mod testutil;

pub use catalog::{build_catalog, load, load_from_pool, Catalog, PgSchemaSource, SchemaSource, TableDescriptor};
pub use endpoints::{ResolvedEntity, ResolvedModel};
pub use error::{AppError, CatalogError, SettingsError};
pub use routes::{app, common_routes, entity_routes};
pub use service::CrudService;
pub use settings::Settings;
pub use state::AppState;
