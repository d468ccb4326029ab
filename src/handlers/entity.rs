//! Entity CRUD handlers: list, read, create, update, replace, delete, bulk delete.
//! Every handler resolves the table against the current model snapshot.

use crate::endpoints::{ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::request::{parse_payload, Operation, RequestDescriptor, WriteMode};
use crate::response;
use crate::service::CrudService;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

type TablePath = Result<Path<String>, PathRejection>;
type RowPath = Result<Path<(String, String)>, PathRejection>;
type Params = Result<Query<Vec<(String, String)>>, QueryRejection>;
type Body = Result<Bytes, BytesRejection>;

fn path<T>(p: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    p.map(|Path(v)| v).map_err(|e| AppError::validation(e.body_text()))
}

fn params(q: Params) -> Result<Vec<(String, String)>, AppError> {
    q.map(|Query(v)| v).map_err(|e| AppError::validation(e.body_text()))
}

fn body(b: Body) -> Result<Bytes, AppError> {
    b.map_err(|e| AppError::validation(e.body_text()))
}

fn entity(model: &ResolvedModel, table: &str) -> Result<Arc<ResolvedEntity>, AppError> {
    model
        .entity(table)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("unknown table: {}", table)))
}

/// GET {prefix}/ : describe every generated endpoint.
pub async fn describe(State(state): State<AppState>) -> impl IntoResponse {
    let model = state.snapshot();
    Json(model.describe(state.settings.normalized_prefix(), state.settings.allow_bulk_delete))
}

pub async fn list(State(state): State<AppState>, table: TablePath, query: Params) -> Result<impl IntoResponse, AppError> {
    let table = path(table)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::List).with_query(&params(query)?)?;
    let page = CrudService::new(&state.pool, &model, &state.settings)
        .list(&entity, &req.filters, &req.sort, &req.page, &req.embed)
        .await?;
    Ok(response::list(page))
}

pub async fn read(State(state): State<AppState>, row: RowPath, query: Params) -> Result<impl IntoResponse, AppError> {
    let (table, key) = path(row)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::Get)
        .with_key(key)
        .with_query(&params(query)?)?;
    let key = req.key.as_deref().unwrap_or_default();
    let row = CrudService::new(&state.pool, &model, &state.settings)
        .get(&entity, key, &req.embed)
        .await?;
    Ok(response::one(row))
}

pub async fn create(
    State(state): State<AppState>,
    table: TablePath,
    query: Params,
    payload: Body,
) -> Result<impl IntoResponse, AppError> {
    let table = path(table)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::Create)
        .with_query(&params(query)?)?
        .with_payload(parse_payload(&body(payload)?)?);
    let payload = req.payload.unwrap_or_default();
    let row = CrudService::new(&state.pool, &model, &state.settings)
        .create(&entity, &payload)
        .await?;
    Ok(response::created(row))
}

async fn write(
    state: AppState,
    row: RowPath,
    query: Params,
    payload: Body,
    mode: WriteMode,
) -> Result<impl IntoResponse, AppError> {
    let (table, key) = path(row)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::Update(mode))
        .with_key(key)
        .with_query(&params(query)?)?
        .with_payload(parse_payload(&body(payload)?)?);
    let key = req.key.as_deref().unwrap_or_default();
    let payload = req.payload.clone().unwrap_or_default();
    let row = CrudService::new(&state.pool, &model, &state.settings)
        .update(&entity, key, &payload, mode)
        .await?;
    Ok(response::one(row))
}

/// PATCH: partial update.
pub async fn update(
    State(state): State<AppState>,
    row: RowPath,
    query: Params,
    payload: Body,
) -> Result<impl IntoResponse, AppError> {
    write(state, row, query, payload, WriteMode::Partial).await
}

/// PUT: full replace.
pub async fn replace(
    State(state): State<AppState>,
    row: RowPath,
    query: Params,
    payload: Body,
) -> Result<impl IntoResponse, AppError> {
    write(state, row, query, payload, WriteMode::Replace).await
}

pub async fn delete(State(state): State<AppState>, row: RowPath, query: Params) -> Result<impl IntoResponse, AppError> {
    let (table, key) = path(row)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::Delete)
        .with_key(key)
        .with_query(&params(query)?)?;
    let key = req.key.as_deref().unwrap_or_default();
    let row = CrudService::new(&state.pool, &model, &state.settings)
        .delete(&entity, key)
        .await?;
    Ok(response::one(row))
}

/// DELETE on the collection, by filters. Mounted only when bulk delete is enabled.
pub async fn delete_many(
    State(state): State<AppState>,
    table: TablePath,
    query: Params,
) -> Result<impl IntoResponse, AppError> {
    let table = path(table)?;
    let model = state.snapshot();
    let entity = entity(&model, &table)?;
    let req = RequestDescriptor::new(table, Operation::DeleteMany).with_query(&params(query)?)?;
    let rows = CrudService::new(&state.pool, &model, &state.settings)
        .delete_many(&entity, &req.filters)
        .await?;
    Ok(response::rows(rows))
}

/// Fallback for paths outside the generated routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("no such route".into())
}
