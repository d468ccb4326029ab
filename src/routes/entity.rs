//! Entity CRUD routes. Paths are parameterized by table so a reloaded model is picked up
//! without rebuilding the router; handlers resolve the table per request.

use crate::handlers::entity::{create, delete, delete_many, describe, list, read, replace, update};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn entity_routes(state: AppState) -> Router {
    let collection = if state.settings.allow_bulk_delete {
        get(list).post(create).delete(delete_many)
    } else {
        get(list).post(create)
    };
    Router::new()
        .route("/", get(describe))
        .route("/:table", collection)
        .route("/:table/:id", get(read).patch(update).put(replace).delete(delete))
        .with_state(state)
}
