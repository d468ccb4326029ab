//! Fixture schema shared by unit tests: users, posts (FK to users), post_tags (composite key),
//! readings (float4, float8, numeric).

use crate::catalog::{build_catalog, Catalog, ConstraintKind, RawColumn, RawConstraint, RawSchema};
use std::collections::HashMap;

pub fn col(table: &str, name: &str, data_type: &str, udt_name: &str, nullable: bool) -> RawColumn {
    RawColumn {
        table: table.into(),
        name: name.into(),
        data_type: data_type.into(),
        udt_schema: "pg_catalog".into(),
        udt_name: udt_name.into(),
        nullable,
        has_default: false,
        read_only: false,
        max_length: None,
    }
}

fn defaulted(mut c: RawColumn) -> RawColumn {
    c.has_default = true;
    c
}

fn constraint(table: &str, name: &str, kind: ConstraintKind, columns: &[&str]) -> RawConstraint {
    RawConstraint {
        table: table.into(),
        name: name.into(),
        kind,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        referenced_table: None,
        referenced_schema: None,
        referenced_columns: Vec::new(),
    }
}

fn foreign_key(table: &str, name: &str, column: &str, referenced: &str, referenced_column: &str) -> RawConstraint {
    RawConstraint {
        referenced_table: Some(referenced.into()),
        referenced_schema: Some("public".into()),
        referenced_columns: vec![referenced_column.into()],
        ..constraint(table, name, ConstraintKind::ForeignKey, &[column])
    }
}

pub fn fixture_schema() -> RawSchema {
    let mut email = col("users", "email", "character varying", "varchar", false);
    email.max_length = Some(100);
    let mut email_domain = defaulted(col("users", "email_domain", "text", "text", true));
    email_domain.read_only = true;
    let mut status = defaulted(col("posts", "status", "USER-DEFINED", "post_status", false));
    status.udt_schema = "public".into();

    let columns = vec![
        defaulted(col("users", "id", "integer", "int4", false)),
        email,
        col("users", "age", "integer", "int4", true),
        defaulted(col("users", "active", "boolean", "bool", false)),
        defaulted(col("users", "created_at", "timestamp with time zone", "timestamptz", false)),
        col("users", "external_id", "uuid", "uuid", true),
        col("users", "profile", "jsonb", "jsonb", true),
        email_domain,
        defaulted(col("posts", "id", "bigint", "int8", false)),
        col("posts", "author_id", "integer", "int4", false),
        col("posts", "title", "text", "text", false),
        status,
        col("posts", "published_on", "date", "date", true),
        col("posts", "score", "double precision", "float8", true),
        col("post_tags", "post_id", "bigint", "int8", false),
        col("post_tags", "tag", "text", "text", false),
        col("readings", "id", "integer", "int4", false),
        col("readings", "ratio", "real", "float4", true),
        col("readings", "value", "double precision", "float8", true),
        col("readings", "amount", "numeric", "numeric", true),
    ];
    let constraints = vec![
        constraint("users", "users_pkey", ConstraintKind::PrimaryKey, &["id"]),
        constraint("users", "users_email_key", ConstraintKind::Unique, &["email"]),
        constraint("posts", "posts_pkey", ConstraintKind::PrimaryKey, &["id"]),
        foreign_key("posts", "posts_author_id_fkey", "author_id", "users", "id"),
        constraint("post_tags", "post_tags_pkey", ConstraintKind::PrimaryKey, &["post_id", "tag"]),
        foreign_key("post_tags", "post_tags_post_id_fkey", "post_id", "posts", "id"),
        constraint("readings", "readings_pkey", ConstraintKind::PrimaryKey, &["id"]),
    ];
    let mut enums = HashMap::new();
    enums.insert(
        ("public".to_string(), "post_status".to_string()),
        vec!["draft".to_string(), "published".to_string()],
    );
    RawSchema {
        columns,
        constraints,
        enums,
    }
}

pub fn users_posts_catalog() -> Catalog {
    build_catalog("public", fixture_schema(), &[], &[])
}
