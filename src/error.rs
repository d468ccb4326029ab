//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building the catalog. `SchemaLoad` is fatal; the others exclude one table.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("schema load: {0}")]
    SchemaLoad(String),
    #[error("unsupported type '{type_name}' for column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },
    #[error("table {0} has no primary key")]
    MissingPrimaryKey(String),
    #[error("foreign key {constraint} on {table} references unknown table {referenced}")]
    DanglingForeignKey {
        table: String,
        constraint: String,
        referenced: String,
    },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Conflict {
        message: String,
        field: Option<String>,
    },
    #[error("{message}")]
    ForeignKey {
        message: String,
        field: Option<String>,
    },
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "ValidationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Conflict { .. } => "ConflictError",
            AppError::ForeignKey { .. } => "ForeignKeyError",
            AppError::Unavailable(_) => "UnavailableError",
            AppError::Catalog(CatalogError::SchemaLoad(_)) => "SchemaLoadError",
            AppError::Catalog(_) | AppError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ForeignKey { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Catalog(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn field(&self) -> Option<&str> {
        match self {
            AppError::Validation { field, .. }
            | AppError::Conflict { field, .. }
            | AppError::ForeignKey { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Message safe to show a client. Internal causes stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Catalog(_) | AppError::Internal(_) => "internal error".into(),
            AppError::Unavailable(_) => "database unavailable".into(),
            other => other.to_string(),
        }
    }
}

/// Whether a driver error is worth another attempt (pool exhaustion, dropped connection, server refusing).
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("53300") | Some("57P03") | Some("08000") | Some("08001") | Some("08006")
        ),
        _ => false,
    }
}

/// Translate a driver error into an API error kind. `columns_of` maps the reporting table and a
/// constraint name to the constraint's columns.
pub fn translate_db_error<F>(err: sqlx::Error, columns_of: F) -> AppError
where
    F: Fn(Option<&str>, &str) -> Option<Vec<String>>,
{
    if is_transient(&err) {
        return AppError::Unavailable(err.to_string());
    }
    match err {
        sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
        sqlx::Error::PoolClosed => AppError::Unavailable("connection pool closed".into()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let pg = db.try_downcast_ref::<sqlx::postgres::PgDatabaseError>();
            let table = pg.and_then(|pg| pg.table());
            let constraint_field = db
                .constraint()
                .and_then(|c| columns_of(table, c))
                .and_then(|cols| cols.into_iter().next());
            let column = pg.and_then(|pg| pg.column()).map(str::to_string);
            match code.as_str() {
                "23505" => AppError::Conflict {
                    message: match &constraint_field {
                        Some(f) => format!("a row with this {} already exists", f),
                        None => "a row with these values already exists".into(),
                    },
                    field: constraint_field,
                },
                "23503" => AppError::ForeignKey {
                    message: match &constraint_field {
                        Some(f) => format!("{} violates a foreign-key reference", f),
                        None => "foreign-key reference violated".into(),
                    },
                    field: constraint_field,
                },
                "23502" => {
                    let field = column.or(constraint_field);
                    AppError::Validation {
                        message: match &field {
                            Some(f) => format!("{} must not be null", f),
                            None => "a required value is null".into(),
                        },
                        field,
                    }
                }
                "23514" => AppError::Validation {
                    message: "check constraint violated".into(),
                    field: constraint_field,
                },
                "40001" | "40P01" => AppError::Conflict {
                    message: "concurrent update conflict; retry the request".into(),
                    field: None,
                },
                "57014" => AppError::Unavailable("statement cancelled".into()),
                c if c.starts_with("22") => AppError::Validation {
                    message: "value rejected by the database".into(),
                    field: column,
                },
                _ => {
                    tracing::error!(code = %code, error = %db, "uncategorized database error");
                    AppError::Internal(db.to_string())
                }
            }
        }
        other => {
            tracing::error!(error = %other, "uncategorized database error");
            AppError::Internal(other.to_string())
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error_kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error_kind: self.kind(),
            message: self.public_message(),
            field: self.field().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}
