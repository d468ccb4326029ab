//! Success response shapes. Single rows are returned bare; lists carry paging metadata.

use crate::service::{ListPage, Row};
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ListMeta {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListBody {
    pub data: Vec<Row>,
    pub meta: ListMeta,
}

pub fn list(page: ListPage) -> (StatusCode, Json<ListBody>) {
    let meta = ListMeta {
        count: page.rows.len(),
        limit: Some(page.limit),
        offset: page.offset,
        next_offset: page.next_offset,
        next_cursor: page.next_cursor,
    };
    (StatusCode::OK, Json(ListBody { data: page.rows, meta }))
}

pub fn rows(rows: Vec<Row>) -> (StatusCode, Json<ListBody>) {
    let meta = ListMeta {
        count: rows.len(),
        limit: None,
        offset: None,
        next_offset: None,
        next_cursor: None,
    };
    (StatusCode::OK, Json(ListBody { data: rows, meta }))
}

pub fn one(row: Row) -> (StatusCode, Json<Row>) {
    (StatusCode::OK, Json(row))
}

pub fn created(row: Row) -> (StatusCode, Json<Row>) {
    (StatusCode::CREATED, Json(row))
}
