//! Statement execution and typed row decoding.

use crate::catalog::{Catalog, SemanticType};
use crate::error::{translate_db_error, AppError};
use crate::fields::{FieldDescriptor, FieldSet, NAIVE_TIMESTAMP_OUT};
use crate::sql::{float4_value, float_value, QueryPlan};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, Postgres, Row as _};

/// One result row: column name to wire value, in column order (`serde_json` keeps insertion order).
pub type Row = Map<String, Value>;

fn bind(plan: &QueryPlan) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&plan.sql);
    for p in &plan.params {
        query = query.bind(p.clone());
    }
    query
}

fn db_error(catalog: &Catalog, err: sqlx::Error) -> AppError {
    translate_db_error(err, |table, c| catalog.constraint_columns(table, c))
}

pub async fn fetch_all(
    conn: &mut PgConnection,
    plan: &QueryPlan,
    fields: &FieldSet,
    catalog: &Catalog,
) -> Result<Vec<Row>, AppError> {
    tracing::debug!(sql = %plan.sql, params = plan.params.len(), "query");
    let rows = bind(plan).fetch_all(conn).await.map_err(|e| db_error(catalog, e))?;
    rows.iter().map(|r| decode_row(r, fields)).collect()
}

pub async fn fetch_optional(
    conn: &mut PgConnection,
    plan: &QueryPlan,
    fields: &FieldSet,
    catalog: &Catalog,
) -> Result<Option<Row>, AppError> {
    tracing::debug!(sql = %plan.sql, params = plan.params.len(), "query");
    let row = bind(plan)
        .fetch_optional(conn)
        .await
        .map_err(|e| db_error(catalog, e))?;
    row.as_ref().map(|r| decode_row(r, fields)).transpose()
}

/// Whether the statement returned any row (used for existence probes).
pub async fn exists(conn: &mut PgConnection, plan: &QueryPlan, catalog: &Catalog) -> Result<bool, AppError> {
    tracing::debug!(sql = %plan.sql, params = plan.params.len(), "query");
    let row = bind(plan)
        .fetch_optional(conn)
        .await
        .map_err(|e| db_error(catalog, e))?;
    Ok(row.is_some())
}

fn decode_err(field: &FieldDescriptor, e: sqlx::Error) -> AppError {
    AppError::Internal(format!("decoding column {}: {}", field.name, e))
}

fn decode_cell(row: &PgRow, f: &FieldDescriptor) -> Result<Value, sqlx::Error> {
    let name = f.name.as_str();
    Ok(match &f.semantic_type {
        SemanticType::Integer { bits: 16 } => row.try_get::<Option<i16>, _>(name)?.map(Value::from),
        SemanticType::Integer { bits: 32 } => row.try_get::<Option<i32>, _>(name)?.map(Value::from),
        SemanticType::Integer { .. } => row.try_get::<Option<i64>, _>(name)?.map(Value::from),
        SemanticType::Float { bits: 32 } => row.try_get::<Option<f32>, _>(name)?.map(float4_value),
        SemanticType::Float { .. } => row.try_get::<Option<f64>, _>(name)?.map(float_value),
        SemanticType::Numeric => row.try_get::<Option<String>, _>(name)?.map(Value::String),
        SemanticType::Text | SemanticType::Enum { .. } => row.try_get::<Option<String>, _>(name)?.map(Value::String),
        SemanticType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        SemanticType::Timestamp { with_time_zone: true } => row
            .try_get::<Option<DateTime<Utc>>, _>(name)?
            .map(|d| Value::String(d.to_rfc3339())),
        SemanticType::Timestamp { with_time_zone: false } => row
            .try_get::<Option<NaiveDateTime>, _>(name)?
            .map(|d| Value::String(d.format(NAIVE_TIMESTAMP_OUT).to_string())),
        SemanticType::Date => row
            .try_get::<Option<NaiveDate>, _>(name)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        SemanticType::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(name)?
            .map(|u| Value::String(u.to_string())),
        SemanticType::Json => row.try_get::<Option<Value>, _>(name)?,
    }
    .unwrap_or(Value::Null))
}

/// Decode a row by the declared type of each visible field.
pub fn decode_row(row: &PgRow, fields: &FieldSet) -> Result<Row, AppError> {
    let mut out = Map::new();
    for f in fields.visible() {
        let v = decode_cell(row, f).map_err(|e| decode_err(f, e))?;
        out.insert(f.name.clone(), v);
    }
    Ok(out)
}
