//! Load the catalog by introspecting a live Postgres schema.

use crate::catalog::types::*;
use crate::error::CatalogError;
use crate::fields::map_pg_type;
use crate::settings::Settings;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One row of column metadata, as read from `information_schema.columns`.
#[derive(Clone, Debug)]
pub struct RawColumn {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub udt_schema: String,
    pub udt_name: String,
    pub nullable: bool,
    pub has_default: bool,
    pub read_only: bool,
    pub max_length: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

/// One `p`/`u`/`f` constraint from `pg_constraint`, columns in key order.
#[derive(Clone, Debug)]
pub struct RawConstraint {
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
    pub referenced_schema: Option<String>,
    pub referenced_columns: Vec<String>,
}

/// Everything introspection returns for one schema.
#[derive(Clone, Debug, Default)]
pub struct RawSchema {
    pub columns: Vec<RawColumn>,
    pub constraints: Vec<RawConstraint>,
    /// Enum labels in sort order, keyed by (type schema, type name).
    pub enums: HashMap<(String, String), Vec<String>>,
}

/// Source of raw schema metadata.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, schema: &str) -> Result<RawSchema, CatalogError>;
}

/// Reads the system catalogs through a pool, in one read-only transaction.
pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool) -> Self {
        PgSchemaSource { pool }
    }
}

const COLUMNS_SQL: &str = r#"
SELECT c.table_name::text,
       c.column_name::text,
       c.data_type::text,
       c.udt_schema::text,
       c.udt_name::text,
       c.is_nullable = 'YES',
       COALESCE(c.column_default IS NOT NULL OR c.is_identity = 'YES' OR c.is_generated = 'ALWAYS', false),
       COALESCE(c.is_generated = 'ALWAYS' OR c.identity_generation = 'ALWAYS', false),
       c.character_maximum_length::int4
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = $1 AND t.table_type = 'BASE TABLE'
ORDER BY c.table_name, c.ordinal_position
"#;

const CONSTRAINTS_SQL: &str = r#"
SELECT rel.relname::text,
       con.conname::text,
       con.contype::text,
       ARRAY(
         SELECT a.attname::text
         FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
         JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
         ORDER BY k.ord
       ),
       frel.relname::text,
       fns.nspname::text,
       ARRAY(
         SELECT a.attname::text
         FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
         JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
         ORDER BY k.ord
       )
FROM pg_constraint con
JOIN pg_class rel ON rel.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = rel.relnamespace
LEFT JOIN pg_class frel ON frel.oid = con.confrelid
LEFT JOIN pg_namespace fns ON fns.oid = frel.relnamespace
WHERE ns.nspname = $1 AND con.contype IN ('p', 'u', 'f')
ORDER BY rel.relname, con.conname
"#;

const ENUMS_SQL: &str = r#"
SELECT n.nspname::text, t.typname::text, e.enumlabel::text
FROM pg_type t
JOIN pg_enum e ON e.enumtypid = t.oid
JOIN pg_namespace n ON n.oid = t.typnamespace
ORDER BY n.nspname, t.typname, e.enumsortorder
"#;

type ColumnRow = (String, String, String, String, String, bool, bool, bool, Option<i32>);
type ConstraintRow = (
    String,
    String,
    String,
    Vec<String>,
    Option<String>,
    Option<String>,
    Vec<String>,
);

fn load_err(e: sqlx::Error) -> CatalogError {
    CatalogError::SchemaLoad(e.to_string())
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn fetch(&self, schema: &str) -> Result<RawSchema, CatalogError> {
        let mut tx = self.pool.begin().await.map_err(load_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(load_err)?;

        let column_rows: Vec<ColumnRow> = sqlx::query_as(COLUMNS_SQL)
            .bind(schema)
            .fetch_all(&mut *tx)
            .await
            .map_err(load_err)?;
        let constraint_rows: Vec<ConstraintRow> = sqlx::query_as(CONSTRAINTS_SQL)
            .bind(schema)
            .fetch_all(&mut *tx)
            .await
            .map_err(load_err)?;
        let enum_rows: Vec<(String, String, String)> = sqlx::query_as(ENUMS_SQL)
            .fetch_all(&mut *tx)
            .await
            .map_err(load_err)?;
        tx.commit().await.map_err(load_err)?;

        let columns = column_rows
            .into_iter()
            .map(
                |(table, name, data_type, udt_schema, udt_name, nullable, has_default, read_only, max_length)| RawColumn {
                    table,
                    name,
                    data_type,
                    udt_schema,
                    udt_name,
                    nullable,
                    has_default,
                    read_only,
                    max_length,
                },
            )
            .collect();

        let mut constraints = Vec::with_capacity(constraint_rows.len());
        for (table, name, contype, cols, ref_table, ref_schema, ref_cols) in constraint_rows {
            let kind = match contype.as_str() {
                "p" => ConstraintKind::PrimaryKey,
                "u" => ConstraintKind::Unique,
                "f" => ConstraintKind::ForeignKey,
                other => {
                    return Err(CatalogError::SchemaLoad(format!(
                        "unexpected constraint type '{}' on {}",
                        other, table
                    )))
                }
            };
            constraints.push(RawConstraint {
                table,
                name,
                kind,
                columns: cols,
                referenced_table: ref_table,
                referenced_schema: ref_schema,
                referenced_columns: ref_cols,
            });
        }

        let mut enums: HashMap<(String, String), Vec<String>> = HashMap::new();
        for (ns, typname, label) in enum_rows {
            enums.entry((ns, typname)).or_default().push(label);
        }

        Ok(RawSchema {
            columns,
            constraints,
            enums,
        })
    }
}

/// Build the catalog from raw metadata. Tables with unsupported column types or no primary key are
/// excluded; foreign keys pointing outside the final table set are dropped. Columns named in
/// `hidden` become server-managed wherever that is safe.
pub fn build_catalog(schema: &str, raw: RawSchema, exclude: &[String], hidden: &[String]) -> Catalog {
    let excluded_names: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    let mut excluded = Vec::new();

    let mut columns_by_table: BTreeMap<String, Vec<RawColumn>> = BTreeMap::new();
    for col in raw.columns {
        columns_by_table.entry(col.table.clone()).or_default().push(col);
    }
    let mut constraints_by_table: HashMap<String, Vec<RawConstraint>> = HashMap::new();
    for con in raw.constraints {
        constraints_by_table.entry(con.table.clone()).or_default().push(con);
    }

    let mut tables: BTreeMap<String, TableDescriptor> = BTreeMap::new();
    'tables: for (name, raw_cols) in columns_by_table {
        if excluded_names.contains(name.as_str()) {
            excluded.push(ExcludedTable {
                name,
                reason: "excluded by configuration".into(),
            });
            continue;
        }

        let mut columns = Vec::with_capacity(raw_cols.len());
        for rc in &raw_cols {
            match map_pg_type(&name, &rc.name, &rc.data_type, &rc.udt_schema, &rc.udt_name, &raw.enums) {
                Ok((semantic_type, pg_cast)) => columns.push(ColumnDescriptor {
                    name: rc.name.clone(),
                    semantic_type,
                    pg_cast,
                    nullable: rc.nullable,
                    has_default: rc.has_default,
                    read_only: rc.read_only,
                    max_length: rc.max_length.and_then(|n| u32::try_from(n).ok()),
                    hidden: false,
                }),
                Err(e) => {
                    tracing::warn!(table = %name, error = %e, "excluding table");
                    excluded.push(ExcludedTable {
                        name,
                        reason: e.to_string(),
                    });
                    continue 'tables;
                }
            }
        }

        let constraints = constraints_by_table.remove(&name).unwrap_or_default();
        let Some(pk) = constraints.iter().find(|c| c.kind == ConstraintKind::PrimaryKey) else {
            let e = CatalogError::MissingPrimaryKey(name.clone());
            tracing::warn!(table = %name, error = %e, "excluding table");
            excluded.push(ExcludedTable {
                name,
                reason: e.to_string(),
            });
            continue;
        };

        let table = TableDescriptor {
            schema: schema.to_string(),
            primary_key: pk.columns.clone(),
            primary_key_name: Some(pk.name.clone()),
            unique_constraints: constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::Unique)
                .map(|c| UniqueConstraint {
                    name: c.name.clone(),
                    columns: c.columns.clone(),
                })
                .collect(),
            foreign_keys: constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
                .filter_map(|c| {
                    let referenced = c.referenced_table.clone()?;
                    if c.referenced_schema.as_deref().is_some_and(|s| s != schema) {
                        let e = CatalogError::DanglingForeignKey {
                            table: name.clone(),
                            constraint: c.name.clone(),
                            referenced: format!(
                                "{}.{}",
                                c.referenced_schema.as_deref().unwrap_or_default(),
                                referenced
                            ),
                        };
                        tracing::warn!(error = %e, "dropping foreign key");
                        return None;
                    }
                    Some(ForeignKeyDescriptor {
                        name: c.name.clone(),
                        columns: c.columns.clone(),
                        referenced_table: referenced,
                        referenced_columns: c.referenced_columns.clone(),
                    })
                })
                .collect(),
            name: name.clone(),
            columns,
        };
        tables.insert(name, table);
    }

    let names: HashSet<String> = tables.keys().cloned().collect();
    for table in tables.values_mut() {
        let table_name = table.name.clone();
        table.foreign_keys.retain(|fk| {
            if names.contains(&fk.referenced_table) {
                return true;
            }
            let e = CatalogError::DanglingForeignKey {
                table: table_name.clone(),
                constraint: fk.name.clone(),
                referenced: fk.referenced_table.clone(),
            };
            tracing::warn!(error = %e, "dropping foreign key");
            false
        });
    }

    hide_columns(&mut tables, hidden);

    tracing::info!(
        schema = %schema,
        tables = tables.len(),
        excluded = excluded.len(),
        "catalog built"
    );
    Catalog {
        schema: schema.to_string(),
        tables: tables.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        excluded,
    }
}

/// Mark configured columns hidden. Key columns, columns on either side of a foreign key, and
/// required columns without a default stay visible.
fn hide_columns(tables: &mut BTreeMap<String, TableDescriptor>, hidden: &[String]) {
    if hidden.is_empty() {
        return;
    }
    let mut joined: HashSet<(String, String)> = HashSet::new();
    for table in tables.values() {
        for fk in &table.foreign_keys {
            for c in &fk.columns {
                joined.insert((table.name.clone(), c.clone()));
            }
            for c in &fk.referenced_columns {
                joined.insert((fk.referenced_table.clone(), c.clone()));
            }
        }
    }
    for table in tables.values_mut() {
        let primary_key = table.primary_key.clone();
        let table_name = table.name.clone();
        for column in table.columns.iter_mut().filter(|c| hidden.contains(&c.name)) {
            let keyed = primary_key.contains(&column.name)
                || joined.contains(&(table_name.clone(), column.name.clone()));
            if keyed || (!column.nullable && !column.has_default) {
                tracing::warn!(table = %table_name, column = %column.name, "column cannot be hidden; leaving it visible");
                continue;
            }
            column.hidden = true;
        }
    }
}

/// Introspect `settings.db_schema` through `source` and build the catalog.
pub async fn load(source: &dyn SchemaSource, settings: &Settings) -> Result<Catalog, CatalogError> {
    let raw = source.fetch(&settings.db_schema).await?;
    Ok(build_catalog(
        &settings.db_schema,
        raw,
        &settings.exclude_tables,
        &settings.hidden_columns,
    ))
}

pub async fn load_from_pool(pool: &PgPool, settings: &Settings) -> Result<Catalog, CatalogError> {
    load(&PgSchemaSource::new(pool.clone()), settings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{col, fixture_schema};

    #[test]
    fn fixture_tables_are_exposed_with_keys() {
        let catalog = build_catalog("public", fixture_schema(), &[], &[]);
        let users = catalog.table("users").expect("users");
        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert_eq!(users.constraint_columns("users_email_key"), Some(vec!["email".to_string()]));
        let posts = catalog.table("posts").expect("posts");
        assert_eq!(posts.foreign_keys.len(), 1);
        assert_eq!(posts.foreign_keys[0].referenced_table, "users");
        let refs = catalog.referencing("users");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.name, "posts");
    }

    #[test]
    fn table_without_primary_key_is_excluded() {
        let mut raw = fixture_schema();
        raw.columns.push(col("audit_log", "message", "text", "text", false));
        let catalog = build_catalog("public", raw, &[], &[]);
        assert!(catalog.table("audit_log").is_none());
        assert!(catalog
            .excluded
            .iter()
            .any(|e| e.name == "audit_log" && e.reason.contains("primary key")));
    }

    #[test]
    fn unsupported_column_type_excludes_the_table_and_drops_references() {
        let mut raw = fixture_schema();
        raw.columns.push(col("users", "avatar", "bytea", "bytea", true));
        let catalog = build_catalog("public", raw, &[], &[]);
        assert!(catalog.table("users").is_none());
        let posts = catalog.table("posts").expect("posts stays");
        assert!(posts.foreign_keys.is_empty());
    }

    #[test]
    fn configured_exclusions_are_skipped() {
        let catalog = build_catalog("public", fixture_schema(), &["post_tags".to_string()], &[]);
        assert!(catalog.table("post_tags").is_none());
        assert_eq!(catalog.excluded[0].reason, "excluded by configuration");
    }

    #[test]
    fn foreign_keys_into_other_schemas_are_dropped() {
        let mut raw = fixture_schema();
        raw.constraints.push(RawConstraint {
            table: "posts".into(),
            name: "posts_org_fkey".into(),
            kind: ConstraintKind::ForeignKey,
            columns: vec!["author_id".into()],
            referenced_table: Some("orgs".into()),
            referenced_schema: Some("billing".into()),
            referenced_columns: vec!["id".into()],
        });
        let catalog = build_catalog("public", raw, &[], &[]);
        assert_eq!(catalog.table("posts").unwrap().foreign_keys.len(), 1);
    }

    #[test]
    fn hidden_columns_skip_keys_and_required_columns() {
        let mut raw = fixture_schema();
        raw.columns.push(col("posts", "updated_at", "timestamp with time zone", "timestamptz", false));
        let hidden = ["created_at", "updated_at", "author_id", "id"].map(String::from);
        let catalog = build_catalog("public", raw, &[], &hidden);
        let users = catalog.table("users").unwrap();
        assert!(users.column("created_at").unwrap().hidden);
        assert!(!users.column("id").unwrap().hidden);
        let posts = catalog.table("posts").unwrap();
        assert!(!posts.column("author_id").unwrap().hidden);
        assert!(!posts.column("updated_at").unwrap().hidden, "required without default");
    }

    #[test]
    fn constraint_lookup_is_scoped_to_the_reporting_table() {
        let mut raw = fixture_schema();
        raw.constraints.push(RawConstraint {
            table: "post_tags".into(),
            name: "author_fkey".into(),
            kind: ConstraintKind::Unique,
            columns: vec!["tag".into()],
            referenced_table: None,
            referenced_schema: None,
            referenced_columns: Vec::new(),
        });
        raw.constraints.push(RawConstraint {
            table: "posts".into(),
            name: "author_fkey".into(),
            kind: ConstraintKind::ForeignKey,
            columns: vec!["author_id".into()],
            referenced_table: Some("users".into()),
            referenced_schema: Some("public".into()),
            referenced_columns: vec!["id".into()],
        });
        let catalog = build_catalog("public", raw, &[], &[]);
        assert_eq!(
            catalog.constraint_columns(Some("posts"), "author_fkey"),
            Some(vec!["author_id".to_string()])
        );
        assert_eq!(
            catalog.constraint_columns(Some("post_tags"), "author_fkey"),
            Some(vec!["tag".to_string()])
        );
        assert_eq!(catalog.constraint_columns(Some("nope"), "author_fkey"), None);
    }

    #[test]
    fn float_widths_and_numeric_are_distinct() {
        let catalog = build_catalog("public", fixture_schema(), &[], &[]);
        let readings = catalog.table("readings").unwrap();
        assert_eq!(readings.column("ratio").unwrap().semantic_type, SemanticType::Float { bits: 32 });
        assert_eq!(readings.column("value").unwrap().semantic_type, SemanticType::Float { bits: 64 });
        assert_eq!(readings.column("amount").unwrap().semantic_type, SemanticType::Numeric);
    }

    #[test]
    fn enum_columns_carry_their_labels() {
        let catalog = build_catalog("public", fixture_schema(), &[], &[]);
        let status = catalog.table("posts").unwrap().column("status").unwrap();
        assert_eq!(
            status.semantic_type,
            SemanticType::Enum {
                variants: vec!["draft".into(), "published".into()]
            }
        );
        assert_eq!(status.pg_cast, "\"public\".\"post_status\"");
    }
}
