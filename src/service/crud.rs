//! Generic CRUD execution against PostgreSQL. One transaction per request.

use crate::endpoints::{ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::fields::PayloadMode;
use crate::request::{FilterPredicate, Pagination, SortKey, WriteMode};
use crate::service::relations::RelationResolver;
use crate::service::retry::{begin, RetryPolicy};
use crate::service::rows::{fetch_all, fetch_optional, Row};
use crate::settings::Settings;
use crate::sql::{self, cursor, Paging};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};

/// One page of a list response.
#[derive(Debug)]
pub struct ListPage {
    pub rows: Vec<Row>,
    pub limit: u32,
    pub offset: Option<u64>,
    pub next_offset: Option<u64>,
    pub next_cursor: Option<String>,
}

pub struct CrudService<'a> {
    pool: &'a PgPool,
    model: &'a ResolvedModel,
    settings: &'a Settings,
}

fn cursor_after(row: &Row, sort: &[SortKey]) -> String {
    let values: Vec<Value> = sort
        .iter()
        .map(|k| row.get(&k.column).cloned().unwrap_or(Value::Null))
        .collect();
    cursor::encode(&values)
}

fn not_found(entity: &ResolvedEntity, key: &str) -> AppError {
    AppError::NotFound(format!("{} {} not found", entity.name(), key))
}

/// A delete that trips a foreign key means the row is still referenced. Postgres names the
/// referencing table's column, which is not a field of this entity.
fn still_referenced(entity: &ResolvedEntity, err: AppError) -> AppError {
    match err {
        AppError::ForeignKey { .. } => AppError::ForeignKey {
            message: format!("{} row is still referenced by other rows", entity.name()),
            field: None,
        },
        other => other,
    }
}

impl<'a> CrudService<'a> {
    pub fn new(pool: &'a PgPool, model: &'a ResolvedModel, settings: &'a Settings) -> Self {
        CrudService { pool, model, settings }
    }

    fn relations(&self) -> RelationResolver<'a> {
        RelationResolver::new(self.model)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        begin(self.pool, RetryPolicy::from(&self.settings.retry)).await
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(|e| crate::error::translate_db_error(e, |_, _| None))
    }

    /// List rows with filters, ordering, paging and embeds.
    pub async fn list(
        &self,
        entity: &'a ResolvedEntity,
        filters: &[FilterPredicate],
        sort: &[SortKey],
        page: &Pagination,
        embed: &[String],
    ) -> Result<ListPage, AppError> {
        let paging = Paging {
            default_limit: self.settings.default_page_size,
            max_limit: self.settings.max_page_size,
        };
        let plan = sql::select_list(entity, filters, sort, page, paging)?;
        let embeds = self.relations().resolve_embeds(entity, embed)?;

        let mut tx = self.begin().await?;
        let mut rows = fetch_all(&mut *tx, &plan.plan, &entity.fields, &self.model.catalog).await?;
        let has_more = rows.len() > plan.limit as usize;
        rows.truncate(plan.limit as usize);
        let next_cursor = match rows.last() {
            Some(last) if has_more => Some(cursor_after(last, &plan.sort)),
            _ => None,
        };
        self.relations().embed(&mut *tx, &embeds, &mut rows).await?;
        Self::commit(tx).await?;

        let next_offset = if has_more && !plan.keyset {
            Some(plan.offset.unwrap_or(0) + u64::from(plan.limit))
        } else {
            None
        };
        Ok(ListPage {
            rows,
            limit: plan.limit,
            offset: plan.offset,
            next_offset,
            next_cursor,
        })
    }

    /// Fetch one row by primary key.
    pub async fn get(&self, entity: &'a ResolvedEntity, key: &str, embed: &[String]) -> Result<Row, AppError> {
        let key_values = sql::parse_key(entity, key)?;
        let plan = sql::select_by_key(entity, &key_values)?;
        let embeds = self.relations().resolve_embeds(entity, embed)?;

        let mut tx = self.begin().await?;
        let row = fetch_optional(&mut *tx, &plan, &entity.fields, &self.model.catalog)
            .await?
            .ok_or_else(|| not_found(entity, key))?;
        let mut rows = [row];
        self.relations().embed(&mut *tx, &embeds, &mut rows).await?;
        Self::commit(tx).await?;
        let [row] = rows;
        Ok(row)
    }

    /// Insert one row and return it with server-generated values.
    pub async fn create(&self, entity: &ResolvedEntity, body: &Map<String, Value>) -> Result<Row, AppError> {
        let payload = entity.fields.decode_payload(body, PayloadMode::Create)?;
        let plan = sql::insert(entity, &payload)?;

        let mut tx = self.begin().await?;
        self.relations().check_references(&mut *tx, entity, &payload).await?;
        let row = fetch_optional(&mut *tx, &plan, &entity.fields, &self.model.catalog)
            .await?
            .ok_or_else(|| AppError::Internal("insert returned no row".into()))?;
        Self::commit(tx).await?;
        tracing::debug!(table = %entity.name(), "row created");
        Ok(row)
    }

    /// Partial or full update by primary key.
    pub async fn update(
        &self,
        entity: &ResolvedEntity,
        key: &str,
        body: &Map<String, Value>,
        mode: WriteMode,
    ) -> Result<Row, AppError> {
        let key_values = sql::parse_key(entity, key)?;
        let payload_mode = match mode {
            WriteMode::Partial => PayloadMode::Patch,
            WriteMode::Replace => PayloadMode::Replace,
        };
        let payload = entity.fields.decode_payload(body, payload_mode)?;
        let plan = sql::update(entity, &key_values, &payload)?;

        let mut tx = self.begin().await?;
        self.relations().check_references(&mut *tx, entity, &payload).await?;
        let row = fetch_optional(&mut *tx, &plan, &entity.fields, &self.model.catalog)
            .await?
            .ok_or_else(|| not_found(entity, key))?;
        Self::commit(tx).await?;
        Ok(row)
    }

    /// Delete by primary key, returning the deleted row.
    pub async fn delete(&self, entity: &ResolvedEntity, key: &str) -> Result<Row, AppError> {
        let key_values = sql::parse_key(entity, key)?;
        let plan = sql::delete(entity, &key_values)?;

        let mut tx = self.begin().await?;
        let row = fetch_optional(&mut *tx, &plan, &entity.fields, &self.model.catalog)
            .await
            .map_err(|e| still_referenced(entity, e))?
            .ok_or_else(|| not_found(entity, key))?;
        Self::commit(tx).await?;
        Ok(row)
    }

    /// Delete every row matching `filters`, returning the deleted rows.
    pub async fn delete_many(&self, entity: &ResolvedEntity, filters: &[FilterPredicate]) -> Result<Vec<Row>, AppError> {
        let plan = sql::delete_where(entity, filters)?;

        let mut tx = self.begin().await?;
        let rows = fetch_all(&mut *tx, &plan, &entity.fields, &self.model.catalog)
            .await
            .map_err(|e| still_referenced(entity, e))?;
        Self::commit(tx).await?;
        tracing::info!(table = %entity.name(), deleted = rows.len(), "bulk delete");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::users_posts_catalog;

    #[test]
    fn delete_blocked_by_a_child_row_names_no_field() {
        let model = ResolvedModel::resolve(users_posts_catalog());
        let users = model.entity("users").unwrap();
        let err = still_referenced(
            users,
            AppError::ForeignKey {
                message: "violates foreign key".into(),
                field: Some("author_id".into()),
            },
        );
        assert!(matches!(err, AppError::ForeignKey { field: None, ref message } if message.contains("users")));

        let err = still_referenced(users, AppError::NotFound("gone".into()));
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
