//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from a resolved entity.
//! Identifiers come only from the catalog and are always quoted; client values are always bound.

use crate::catalog::SemanticType;
use crate::endpoints::ResolvedEntity;
use crate::error::AppError;
use crate::fields::{Assignment, FieldDescriptor, FieldSet, FilterOp, Payload};
use crate::request::{FilterPredicate, SortKey};
use crate::sql::cursor;
use crate::sql::params::PgBindValue;
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// SQL template plus its parameters, in placeholder order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryPlan {
    /// Bind a value and return its placeholder, cast to `cast`.
    fn push_param(&mut self, v: PgBindValue, cast: &str) -> String {
        self.params.push(v);
        format!("${}::{}", self.params.len(), cast)
    }
}

/// Page-size bounds.
#[derive(Clone, Copy, Debug)]
pub struct Paging {
    pub default_limit: u32,
    pub max_limit: u32,
}

/// A list query and the paging facts needed to describe the next page.
#[derive(Clone, Debug)]
pub struct ListPlan {
    pub plan: QueryPlan,
    /// Rows the client gets; the query fetches one more.
    pub limit: u32,
    pub offset: Option<u64>,
    pub keyset: bool,
    /// Effective ordering, primary key tie-break included.
    pub sort: Vec<SortKey>,
}

fn select_expr(f: &FieldDescriptor) -> String {
    let q = quoted(&f.name);
    match f.semantic_type {
        SemanticType::Numeric => format!("{}::text AS {}", q, q),
        _ if f.pg_cast.contains('.') => format!("{}::text AS {}", q, q),
        _ => q,
    }
}

/// SELECT list of visible columns: as-is, except numeric and enum/extension types as text.
pub fn select_column_list(fields: &FieldSet) -> String {
    fields.visible().map(select_expr).collect::<Vec<_>>().join(", ")
}

fn table_of(entity: &ResolvedEntity) -> String {
    qualified_table(&entity.table.schema, &entity.table.name)
}

/// Parse a path key into primary-key values, in key order. Composite keys are comma-separated.
pub fn parse_key(entity: &ResolvedEntity, raw: &str) -> Result<Vec<PgBindValue>, AppError> {
    let pk = &entity.table.primary_key;
    let parts: Vec<&str> = if pk.len() == 1 {
        vec![raw]
    } else {
        raw.split(',').collect()
    };
    if parts.len() != pk.len() || parts.iter().any(|p| p.is_empty()) {
        return Err(AppError::validation(format!(
            "key must have {} comma-separated value(s): {}",
            pk.len(),
            pk.join(",")
        )));
    }
    pk.iter()
        .zip(parts)
        .map(|(col, part)| entity.fields.require(col)?.parse_text(part))
        .collect()
}

fn key_predicate(q: &mut QueryPlan, entity: &ResolvedEntity, key: &[PgBindValue]) -> Result<String, AppError> {
    let mut parts = Vec::with_capacity(key.len());
    for (col, value) in entity.table.primary_key.iter().zip(key) {
        let f = entity.fields.require(col)?;
        let ph = q.push_param(value.clone(), &f.pg_cast);
        parts.push(format!("{} = {}", quoted(col), ph));
    }
    Ok(parts.join(" AND "))
}

fn filter_predicate(q: &mut QueryPlan, fields: &FieldSet, filter: &FilterPredicate) -> Result<String, AppError> {
    let f = fields.require(&filter.column)?;
    if !f.supports(filter.op) {
        return Err(AppError::invalid_field(
            &f.name,
            format!("operator '{}' is not supported for {}", filter.op.as_str(), f.name),
        ));
    }
    let col = quoted(&f.name);
    Ok(match filter.op {
        FilterOp::Is => match filter.value.to_ascii_lowercase().as_str() {
            "null" => format!("{} IS NULL", col),
            "notnull" | "not_null" => format!("{} IS NOT NULL", col),
            _ => {
                return Err(AppError::invalid_field(
                    &f.name,
                    format!("{}[is] must be null or notnull", f.name),
                ))
            }
        },
        FilterOp::In => {
            let items: Vec<&str> = filter.value.split(',').filter(|s| !s.is_empty()).collect();
            if items.is_empty() {
                return Err(AppError::invalid_field(
                    &f.name,
                    format!("{}[in] needs at least one value", f.name),
                ));
            }
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let v = f.parse_text(item)?;
                placeholders.push(q.push_param(v, &f.pg_cast));
            }
            format!("{} IN ({})", col, placeholders.join(", "))
        }
        op => {
            let sql_op = op
                .sql_operator()
                .ok_or_else(|| AppError::Internal(format!("no binary operator for '{}'", op.as_str())))?;
            let v = f.parse_text(&filter.value)?;
            format!("{} {} {}", col, sql_op, q.push_param(v, &f.pg_cast))
        }
    })
}

fn where_clause(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// Requested sort keys, validated, with any primary-key column not already listed appended ascending.
fn effective_sort(entity: &ResolvedEntity, requested: &[SortKey]) -> Result<Vec<SortKey>, AppError> {
    let mut sort: Vec<SortKey> = Vec::with_capacity(requested.len() + entity.table.primary_key.len());
    for key in requested {
        let f = entity.fields.require(&key.column)?;
        if !f.sortable() {
            return Err(AppError::invalid_field(&f.name, format!("cannot sort by {}", f.name)));
        }
        if sort.iter().any(|k| k.column == key.column) {
            return Err(AppError::invalid_field(&f.name, format!("{} is sorted twice", f.name)));
        }
        sort.push(key.clone());
    }
    for pk in &entity.table.primary_key {
        if !sort.iter().any(|k| &k.column == pk) {
            sort.push(SortKey {
                column: pk.clone(),
                descending: false,
            });
        }
    }
    Ok(sort)
}

/// Rows strictly after the cursor position, following Postgres NULL ordering
/// (NULLS LAST ascending, NULLS FIRST descending).
fn keyset_predicate(
    q: &mut QueryPlan,
    fields: &FieldSet,
    sort: &[SortKey],
    values: &[Value],
) -> Result<String, AppError> {
    if values.len() != sort.len() {
        return Err(AppError::validation("cursor does not match the requested sort"));
    }
    let mut bound = Vec::with_capacity(values.len());
    for (key, raw) in sort.iter().zip(values) {
        let f = fields.require(&key.column)?;
        let v = if raw.is_null() {
            PgBindValue::Null
        } else {
            f.check_json(raw)
                .map_err(|_| AppError::validation("cursor does not match the requested sort"))?
        };
        bound.push((f, key.descending, v));
    }

    let mut disjuncts = Vec::new();
    for i in 0..bound.len() {
        let (f, descending, v) = (bound[i].0, bound[i].1, &bound[i].2);
        // Nothing sorts after NULL ascending.
        if !descending && v.is_null() {
            continue;
        }
        let mut conj = Vec::with_capacity(i + 1);
        for (pf, _, pv) in &bound[..i] {
            let pcol = quoted(&pf.name);
            if pv.is_null() {
                conj.push(format!("{} IS NULL", pcol));
            } else {
                conj.push(format!("{} = {}", pcol, q.push_param(pv.clone(), &pf.pg_cast)));
            }
        }
        let col = quoted(&f.name);
        conj.push(match (descending, v.is_null()) {
            (false, _) => {
                let ph = q.push_param(v.clone(), &f.pg_cast);
                if f.nullable {
                    format!("({} > {} OR {} IS NULL)", col, ph, col)
                } else {
                    format!("{} > {}", col, ph)
                }
            }
            (true, false) => format!("{} < {}", col, q.push_param(v.clone(), &f.pg_cast)),
            (true, true) => format!("{} IS NOT NULL", col),
        });
        if conj.len() == 1 {
            disjuncts.append(&mut conj);
        } else {
            disjuncts.push(format!("({})", conj.join(" AND ")));
        }
    }
    if disjuncts.is_empty() {
        return Ok("FALSE".into());
    }
    Ok(format!("({})", disjuncts.join(" OR ")))
}

/// SELECT with filters, ordering, and offset or keyset paging. Fetches `limit + 1` rows.
pub fn select_list(
    entity: &ResolvedEntity,
    filters: &[FilterPredicate],
    sort: &[SortKey],
    page: &crate::request::Pagination,
    paging: Paging,
) -> Result<ListPlan, AppError> {
    let limit = match page.limit {
        Some(0) => return Err(AppError::validation("limit must be at least 1")),
        Some(n) => n.min(paging.max_limit),
        None => paging.default_limit.min(paging.max_limit),
    };
    if page.offset.is_some() && page.cursor.is_some() {
        return Err(AppError::validation("offset and cursor cannot be combined"));
    }
    let sort = effective_sort(entity, sort)?;

    let mut q = QueryPlan::default();
    let mut parts = Vec::with_capacity(filters.len() + 1);
    for filter in filters {
        parts.push(filter_predicate(&mut q, &entity.fields, filter)?);
    }
    if let Some(token) = &page.cursor {
        let values = cursor::decode(token)?;
        parts.push(keyset_predicate(&mut q, &entity.fields, &sort, &values)?);
    }
    let order = sort
        .iter()
        .map(|k| format!("{} {}", quoted(&k.column), if k.descending { "DESC" } else { "ASC" }))
        .collect::<Vec<_>>()
        .join(", ");
    let limit_ph = q.push_param(PgBindValue::I64(i64::from(limit) + 1), "int8");
    let mut sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
        select_column_list(&entity.fields),
        table_of(entity),
        where_clause(&parts),
        order,
        limit_ph
    );
    if let Some(offset) = page.offset {
        let offset = i64::try_from(offset).map_err(|_| AppError::validation("offset is too large"))?;
        sql.push_str(&format!(" OFFSET {}", q.push_param(PgBindValue::I64(offset), "int8")));
    }
    q.sql = sql;
    Ok(ListPlan {
        plan: q,
        limit,
        offset: page.offset,
        keyset: page.cursor.is_some(),
        sort,
    })
}

/// SELECT by primary key.
pub fn select_by_key(entity: &ResolvedEntity, key: &[PgBindValue]) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let pred = key_predicate(&mut q, entity, key)?;
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select_column_list(&entity.fields),
        table_of(entity),
        pred
    );
    Ok(q)
}

/// SELECT rows whose `columns` match any of `keys`, ordered by primary key. Used to batch-fetch
/// related rows; `keys` must not be empty.
pub fn select_by_columns_in(
    entity: &ResolvedEntity,
    columns: &[String],
    keys: &[Vec<PgBindValue>],
) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let fields: Vec<&FieldDescriptor> = columns
        .iter()
        .map(|c| entity.fields.require(c))
        .collect::<Result<_, _>>()?;
    let tuples: Vec<String> = keys
        .iter()
        .map(|key| {
            let phs: Vec<String> = fields
                .iter()
                .zip(key)
                .map(|(f, v)| q.push_param(v.clone(), &f.pg_cast))
                .collect();
            if phs.len() == 1 {
                phs.concat()
            } else {
                format!("({})", phs.join(", "))
            }
        })
        .collect();
    let target = if columns.len() == 1 {
        quoted(&columns[0])
    } else {
        format!("({})", columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "))
    };
    let order = entity
        .table
        .primary_key
        .iter()
        .map(|c| quoted(c))
        .collect::<Vec<_>>()
        .join(", ");
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        select_column_list(&entity.fields),
        table_of(entity),
        target,
        tuples.join(", "),
        order
    );
    Ok(q)
}

/// Lock-and-probe a referenced row by the given columns.
pub fn reference_probe(
    entity: &ResolvedEntity,
    columns: &[String],
    values: &[PgBindValue],
) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let mut parts = Vec::with_capacity(columns.len());
    for (col, v) in columns.iter().zip(values) {
        let f = entity.fields.require(col)?;
        parts.push(format!("{} = {}", quoted(col), q.push_param(v.clone(), &f.pg_cast)));
    }
    q.sql = format!(
        "SELECT 1 FROM {} WHERE {} LIMIT 1 FOR KEY SHARE",
        table_of(entity),
        parts.join(" AND ")
    );
    Ok(q)
}

fn assignment_sql(q: &mut QueryPlan, f: &FieldDescriptor, a: &Assignment) -> String {
    match a {
        Assignment::Value(v) => q.push_param(v.clone(), &f.pg_cast),
        Assignment::Default => "DEFAULT".into(),
    }
}

/// INSERT of the supplied columns only; omitted columns take their database defaults.
pub fn insert(entity: &ResolvedEntity, payload: &Payload) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let returning = select_column_list(&entity.fields);
    if payload.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table_of(entity), returning);
        return Ok(q);
    }
    let mut cols = Vec::with_capacity(payload.values.len());
    let mut values = Vec::with_capacity(payload.values.len());
    for (name, a) in &payload.values {
        let f = entity.fields.require(name)?;
        cols.push(quoted(name));
        values.push(assignment_sql(&mut q, f, a));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table_of(entity),
        cols.join(", "),
        values.join(", "),
        returning
    );
    Ok(q)
}

/// UPDATE by primary key. Primary-key values in the payload must equal the addressed key.
/// With nothing to assign (a key-only table, or an empty patch) the row is locked and returned as is.
pub fn update(entity: &ResolvedEntity, key: &[PgBindValue], payload: &Payload) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let mut sets = Vec::with_capacity(payload.values.len());
    for (name, a) in &payload.values {
        let f = entity.fields.require(name)?;
        if f.primary_key {
            let idx = entity
                .table
                .primary_key
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| AppError::Internal(format!("{} is not in the primary key", name)))?;
            if !matches!(a, Assignment::Value(v) if Some(v) == key.get(idx)) {
                return Err(AppError::invalid_field(
                    name,
                    format!("{} does not match the key in the path", name),
                ));
            }
            continue;
        }
        let rhs = assignment_sql(&mut q, f, a);
        sets.push(format!("{} = {}", quoted(name), rhs));
    }
    let pred = key_predicate(&mut q, entity, key)?;
    if sets.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} FOR UPDATE",
            select_column_list(&entity.fields),
            table_of(entity),
            pred
        );
        return Ok(q);
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        table_of(entity),
        sets.join(", "),
        pred,
        select_column_list(&entity.fields)
    );
    Ok(q)
}

/// DELETE by primary key, returning the deleted row.
pub fn delete(entity: &ResolvedEntity, key: &[PgBindValue]) -> Result<QueryPlan, AppError> {
    let mut q = QueryPlan::default();
    let pred = key_predicate(&mut q, entity, key)?;
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        table_of(entity),
        pred,
        select_column_list(&entity.fields)
    );
    Ok(q)
}

/// DELETE by filters. At least one filter is required.
pub fn delete_where(entity: &ResolvedEntity, filters: &[FilterPredicate]) -> Result<QueryPlan, AppError> {
    if filters.is_empty() {
        return Err(AppError::validation("bulk delete needs at least one filter"));
    }
    let mut q = QueryPlan::default();
    let mut parts = Vec::with_capacity(filters.len());
    for filter in filters {
        parts.push(filter_predicate(&mut q, &entity.fields, filter)?);
    }
    q.sql = format!(
        "DELETE FROM {}{} RETURNING {}",
        table_of(entity),
        where_clause(&parts),
        select_column_list(&entity.fields)
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::ResolvedModel;
    use crate::fields::PayloadMode;
    use crate::request::Pagination;
    use crate::testutil::users_posts_catalog;
    use serde_json::json;
    use std::sync::Arc;

    const PAGING: Paging = Paging {
        default_limit: 50,
        max_limit: 100,
    };

    fn entity(name: &str) -> Arc<ResolvedEntity> {
        ResolvedModel::resolve(users_posts_catalog())
            .entity(name)
            .cloned()
            .unwrap()
    }

    fn filter(column: &str, op: FilterOp, value: &str) -> FilterPredicate {
        FilterPredicate {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    #[test]
    fn list_binds_filters_and_appends_primary_key_tiebreak() {
        let users = entity("users");
        let sort = [SortKey { column: "age".into(), descending: true }];
        let plan = select_list(
            &users,
            &[filter("age", FilterOp::Gte, "18"), filter("email", FilterOp::Like, "%@x.com")],
            &sort,
            &Pagination::default(),
            PAGING,
        )
        .unwrap();
        assert_eq!(
            plan.plan.sql,
            "SELECT \"id\", \"email\", \"age\", \"active\", \"created_at\", \"external_id\", \"profile\", \"email_domain\" \
             FROM \"public\".\"users\" WHERE \"age\" >= $1::int4 AND \"email\" LIKE $2::varchar \
             ORDER BY \"age\" DESC, \"id\" ASC LIMIT $3::int8"
        );
        assert_eq!(
            plan.plan.params,
            vec![
                PgBindValue::I64(18),
                PgBindValue::Text("%@x.com".into()),
                PgBindValue::I64(51)
            ]
        );
        assert_eq!(plan.sort.len(), 2);
    }

    #[test]
    fn client_values_never_reach_the_template() {
        let users = entity("users");
        let evil = "'; DROP TABLE users; --";
        let plan = select_list(
            &users,
            &[filter("email", FilterOp::Eq, evil)],
            &[],
            &Pagination::default(),
            PAGING,
        )
        .unwrap();
        assert!(!plan.plan.sql.contains("DROP"));
        assert_eq!(plan.plan.params[0], PgBindValue::Text(evil.into()));
    }

    #[test]
    fn bad_filter_value_fails_before_sql() {
        let users = entity("users");
        let err = select_list(
            &users,
            &[filter("age", FilterOp::Eq, "abc")],
            &[],
            &Pagination::default(),
            PAGING,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "age"));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let users = entity("users");
        let sort = [SortKey { column: "nope".into(), descending: false }];
        assert!(select_list(&users, &[], &sort, &Pagination::default(), PAGING).is_err());
        assert!(select_list(
            &users,
            &[filter("nope", FilterOp::Eq, "1")],
            &[],
            &Pagination::default(),
            PAGING
        )
        .is_err());
    }

    #[test]
    fn limit_is_clamped_and_zero_is_rejected() {
        let users = entity("users");
        let page = Pagination {
            limit: Some(5000),
            ..Pagination::default()
        };
        let plan = select_list(&users, &[], &[], &page, PAGING).unwrap();
        assert_eq!(plan.limit, 100);
        assert_eq!(plan.plan.params.last(), Some(&PgBindValue::I64(101)));
        let zero = Pagination {
            limit: Some(0),
            ..Pagination::default()
        };
        assert!(select_list(&users, &[], &[], &zero, PAGING).is_err());
    }

    #[test]
    fn offset_is_bound() {
        let users = entity("users");
        let page = Pagination {
            limit: Some(10),
            offset: Some(20),
            cursor: None,
        };
        let plan = select_list(&users, &[], &[], &page, PAGING).unwrap();
        assert!(plan.plan.sql.ends_with("LIMIT $1::int8 OFFSET $2::int8"));
        assert_eq!(plan.plan.params, vec![PgBindValue::I64(11), PgBindValue::I64(20)]);
    }

    #[test]
    fn in_and_is_filters() {
        let users = entity("users");
        let plan = select_list(
            &users,
            &[filter("id", FilterOp::In, "1,2,3"), filter("age", FilterOp::Is, "null")],
            &[],
            &Pagination::default(),
            PAGING,
        )
        .unwrap();
        assert!(plan
            .plan
            .sql
            .contains("WHERE \"id\" IN ($1::int4, $2::int4, $3::int4) AND \"age\" IS NULL"));
    }

    #[test]
    fn keyset_on_nullable_ascending_key_includes_trailing_nulls() {
        let users = entity("users");
        let sort = [SortKey { column: "age".into(), descending: false }];
        let page = Pagination {
            limit: Some(2),
            offset: None,
            cursor: Some(cursor::encode(&[json!(30), json!(7)])),
        };
        let plan = select_list(&users, &[], &sort, &page, PAGING).unwrap();
        assert!(plan.plan.sql.contains(
            "WHERE ((\"age\" > $1::int4 OR \"age\" IS NULL) OR (\"age\" = $2::int4 AND \"id\" > $3::int4))"
        ));
        assert_eq!(
            plan.plan.params,
            vec![
                PgBindValue::I64(30),
                PgBindValue::I64(30),
                PgBindValue::I64(7),
                PgBindValue::I64(3)
            ]
        );
    }

    #[test]
    fn keyset_from_null_position() {
        let users = entity("users");
        let asc = [SortKey { column: "age".into(), descending: false }];
        let page = Pagination {
            limit: Some(2),
            offset: None,
            cursor: Some(cursor::encode(&[Value::Null, json!(7)])),
        };
        let plan = select_list(&users, &[], &asc, &page, PAGING).unwrap();
        assert!(plan.plan.sql.contains("WHERE ((\"age\" IS NULL AND \"id\" > $1::int4))"));

        let desc = [SortKey { column: "age".into(), descending: true }];
        let plan = select_list(&users, &[], &desc, &page, PAGING).unwrap();
        assert!(plan
            .plan
            .sql
            .contains("WHERE (\"age\" IS NOT NULL OR (\"age\" IS NULL AND \"id\" > $1::int4))"));
    }

    #[test]
    fn cursor_must_match_sort() {
        let users = entity("users");
        let page = Pagination {
            limit: None,
            offset: None,
            cursor: Some(cursor::encode(&[json!(1), json!(2)])),
        };
        assert!(select_list(&users, &[], &[], &page, PAGING).is_err());
    }

    #[test]
    fn composite_keys_parse_in_key_order() {
        let tags = entity("post_tags");
        assert_eq!(
            parse_key(&tags, "7,rust").unwrap(),
            vec![PgBindValue::I64(7), PgBindValue::Text("rust".into())]
        );
        assert!(parse_key(&tags, "7").is_err());
        let plan = select_by_key(&tags, &parse_key(&tags, "7,rust").unwrap()).unwrap();
        assert!(plan.sql.ends_with("WHERE \"post_id\" = $1::int8 AND \"tag\" = $2::text"));
    }

    #[test]
    fn insert_only_supplied_columns() {
        let users = entity("users");
        let body = json!({"email": "a@x.com", "age": 30}).as_object().unwrap().clone();
        let payload = users.fields.decode_payload(&body, PayloadMode::Create).unwrap();
        let plan = insert(&users, &payload).unwrap();
        assert!(plan
            .sql
            .starts_with("INSERT INTO \"public\".\"users\" (\"email\", \"age\") VALUES ($1::varchar, $2::int4) RETURNING"));
    }

    #[test]
    fn update_sets_defaults_and_checks_key() {
        let users = entity("users");
        let key = vec![PgBindValue::I64(1)];
        let body = json!({"email": "b@x.com"}).as_object().unwrap().clone();
        let payload = users.fields.decode_payload(&body, PayloadMode::Replace).unwrap();
        let plan = update(&users, &key, &payload).unwrap();
        assert!(plan.sql.contains("\"active\" = DEFAULT"));
        assert!(plan.sql.contains("\"age\" = $2::int4"));
        assert!(plan.sql.contains("WHERE \"id\" = $"));

        let mismatched = json!({"id": 2, "email": "b@x.com"}).as_object().unwrap().clone();
        let payload = users.fields.decode_payload(&mismatched, PayloadMode::Patch).unwrap();
        assert!(update(&users, &key, &payload).is_err());

    }

    #[test]
    fn update_without_assignments_locks_and_returns_the_row() {
        let tags = entity("post_tags");
        let key = parse_key(&tags, "7,rust").unwrap();
        let body = json!({"post_id": 7, "tag": "rust"}).as_object().unwrap().clone();
        let payload = tags.fields.decode_payload(&body, PayloadMode::Replace).unwrap();
        let plan = update(&tags, &key, &payload).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT \"post_id\", \"tag\" FROM \"public\".\"post_tags\" \
             WHERE \"post_id\" = $1::int8 AND \"tag\" = $2::text FOR UPDATE"
        );

        let users = entity("users");
        let empty = users
            .fields
            .decode_payload(&serde_json::Map::new(), PayloadMode::Patch)
            .unwrap();
        let plan = update(&users, &[PgBindValue::I64(1)], &empty).unwrap();
        assert!(plan.sql.ends_with("WHERE \"id\" = $1::int4 FOR UPDATE"));
    }

    #[test]
    fn numeric_is_read_as_text_and_floats_as_stored() {
        let readings = entity("readings");
        let plan = select_by_key(&readings, &[PgBindValue::I64(1)]).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT \"id\", \"ratio\", \"value\", \"amount\"::text AS \"amount\" \
             FROM \"public\".\"readings\" WHERE \"id\" = $1::int4"
        );
    }

    #[test]
    fn hidden_columns_are_not_selected() {
        let catalog = crate::catalog::build_catalog(
            "public",
            crate::testutil::fixture_schema(),
            &[],
            &["created_at".to_string()],
        );
        let model = ResolvedModel::resolve(catalog);
        let users = model.entity("users").unwrap();
        let plan = select_by_key(users, &[PgBindValue::I64(1)]).unwrap();
        assert!(!plan.sql.contains("created_at"));
        assert!(plan.sql.contains("\"email\""));
    }

    #[test]
    fn keyset_cursor_keeps_exact_numeric_and_non_finite_floats() {
        let readings = entity("readings");
        let sort = [SortKey { column: "amount".into(), descending: false }];
        let page = Pagination {
            limit: Some(1),
            offset: None,
            cursor: Some(cursor::encode(&[json!("1.00000000000000001"), json!(1)])),
        };
        let plan = select_list(&readings, &[], &sort, &page, PAGING).unwrap();
        assert_eq!(plan.plan.params[0], PgBindValue::Text("1.00000000000000001".into()));
        assert!(plan.plan.sql.contains("\"amount\" > $1::numeric"));

        let sort = [SortKey { column: "value".into(), descending: false }];
        let page = Pagination {
            limit: Some(1),
            offset: None,
            cursor: Some(cursor::encode(&[json!("NaN"), json!(3)])),
        };
        let plan = select_list(&readings, &[], &sort, &page, PAGING).unwrap();
        assert!(matches!(plan.plan.params[0], PgBindValue::F64(n) if n.is_nan()));
        assert!(plan.plan.sql.contains("(\"value\" > $1::float8 OR \"value\" IS NULL)"));
    }

    #[test]
    fn related_rows_are_fetched_in_one_query() {
        let posts = entity("posts");
        let plan = select_by_columns_in(
            &posts,
            &["author_id".to_string()],
            &[vec![PgBindValue::I64(1)], vec![PgBindValue::I64(2)]],
        )
        .unwrap();
        assert!(plan
            .sql
            .contains("WHERE \"author_id\" IN ($1::int4, $2::int4) ORDER BY \"id\""));
        assert!(plan.sql.contains("\"status\"::text AS \"status\""));
        assert!(plan.sql.contains("\"score\" FROM"));
        assert!(!plan.sql.contains("::float8"));
    }

    #[test]
    fn bulk_delete_requires_a_filter() {
        let users = entity("users");
        assert!(delete_where(&users, &[]).is_err());
        let plan = delete_where(&users, &[filter("age", FilterOp::Lt, "18")]).unwrap();
        assert!(plan.sql.starts_with("DELETE FROM \"public\".\"users\" WHERE \"age\" < $1::int4 RETURNING"));
    }
}
