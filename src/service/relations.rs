//! Relationship resolution: batched embedding on read, reference checks on write.

use crate::endpoints::{IncludeDirection, IncludeSpec, ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::fields::{Assignment, Payload};
use crate::service::rows::{exists, fetch_all, Row};
use crate::sql::{reference_probe, select_by_columns_in, PgBindValue};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A requested embed, resolved to its relation and the related entity.
pub struct Embed<'m> {
    pub spec: &'m IncludeSpec,
    pub related: Arc<ResolvedEntity>,
}

pub struct RelationResolver<'m> {
    model: &'m ResolvedModel,
}

/// Join key rendered as a JSON array string, or `None` when any part is null.
fn join_key(row: &Row, columns: &[String]) -> Option<String> {
    let parts: Vec<Value> = columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect();
    if parts.iter().any(Value::is_null) {
        return None;
    }
    Some(Value::Array(parts).to_string())
}

impl<'m> RelationResolver<'m> {
    pub fn new(model: &'m ResolvedModel) -> Self {
        RelationResolver { model }
    }

    /// Validate requested embed names before any SQL runs. Repeated names are embedded once.
    pub fn resolve_embeds(&self, entity: &'m ResolvedEntity, names: &[String]) -> Result<Vec<Embed<'m>>, AppError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let spec = entity.include(name).ok_or_else(|| {
                let available: Vec<&str> = entity.includes.iter().map(|i| i.name.as_str()).collect();
                AppError::invalid_field(
                    "embed",
                    format!("unknown relation '{}'; available: {}", name, available.join(", ")),
                )
            })?;
            let related = self
                .model
                .entity(&spec.related_table)
                .cloned()
                .ok_or_else(|| AppError::Internal(format!("relation {} points at unknown table", spec.name)))?;
            out.push(Embed { spec, related });
        }
        Ok(out)
    }

    /// Merge related rows into `rows`, one query per relation.
    pub async fn embed(&self, conn: &mut PgConnection, embeds: &[Embed<'_>], rows: &mut [Row]) -> Result<(), AppError> {
        for embed in embeds {
            let spec = embed.spec;
            let their_fields: Vec<_> = spec
                .their_columns
                .iter()
                .map(|c| embed.related.fields.require(c))
                .collect::<Result<_, _>>()?;

            let mut seen = HashSet::new();
            let mut keys: Vec<Vec<PgBindValue>> = Vec::new();
            for row in rows.iter() {
                let Some(k) = join_key(row, &spec.our_columns) else { continue };
                if !seen.insert(k) {
                    continue;
                }
                let key = spec
                    .our_columns
                    .iter()
                    .zip(&their_fields)
                    .map(|(c, f)| f.check_json(row.get(c).unwrap_or(&Value::Null)))
                    .collect::<Result<Vec<_>, _>>()?;
                keys.push(key);
            }

            let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
            if !keys.is_empty() {
                let plan = select_by_columns_in(&embed.related, &spec.their_columns, &keys)?;
                let related_rows = fetch_all(&mut *conn, &plan, &embed.related.fields, &self.model.catalog).await?;
                for r in related_rows {
                    if let Some(k) = join_key(&r, &spec.their_columns) {
                        grouped.entry(k).or_default().push(r);
                    }
                }
            }

            for row in rows.iter_mut() {
                let matches = join_key(row, &spec.our_columns)
                    .and_then(|k| grouped.get(&k))
                    .cloned()
                    .unwrap_or_default();
                let value = match spec.direction {
                    IncludeDirection::ToOne => matches.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
                    IncludeDirection::ToMany => Value::Array(matches.into_iter().map(Value::Object).collect()),
                };
                row.insert(spec.name.clone(), value);
            }
        }
        Ok(())
    }

    /// Check that every foreign key fully supplied in `payload` points at an existing row.
    /// Referenced rows are locked `FOR KEY SHARE` until the write transaction ends.
    pub async fn check_references(
        &self,
        conn: &mut PgConnection,
        entity: &ResolvedEntity,
        payload: &Payload,
    ) -> Result<(), AppError> {
        for fk in &entity.table.foreign_keys {
            let mut values = Vec::with_capacity(fk.columns.len());
            for col in &fk.columns {
                match payload.get(col) {
                    Some(Assignment::Value(v)) if !v.is_null() => values.push(v.clone()),
                    _ => break,
                }
            }
            if values.len() != fk.columns.len() {
                continue;
            }
            let Some(referenced) = self.model.entity(&fk.referenced_table) else {
                continue;
            };
            let plan = reference_probe(referenced, &fk.referenced_columns, &values)?;
            if !exists(&mut *conn, &plan, &self.model.catalog).await? {
                let field = fk.columns[0].clone();
                return Err(AppError::ForeignKey {
                    message: format!("{} does not reference an existing {} row", fk.columns.join(", "), fk.referenced_table),
                    field: Some(field),
                });
            }
        }
        Ok(())
    }
}
