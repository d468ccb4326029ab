//! Per-request descriptor parsed from path, query string and body.

use crate::error::AppError;
use crate::fields::FilterOp;
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// PATCH: only supplied fields change.
    Partial,
    /// PUT: every writable column is assigned.
    Replace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update(WriteMode),
    Delete,
    DeleteMany,
}

impl Operation {
    fn accepts(self, param: &str) -> bool {
        match self {
            Operation::List => true,
            Operation::Get => param == "embed",
            Operation::DeleteMany => !RESERVED.contains(&param),
            Operation::Create | Operation::Update(_) | Operation::Delete => false,
        }
    }
}

const RESERVED: &[&str] = &["limit", "offset", "cursor", "sort", "embed"];

#[derive(Clone, Debug, PartialEq)]
pub struct FilterPredicate {
    pub column: String,
    pub op: FilterOp,
    /// Raw text; type-checked against the column before SQL is built.
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub table: String,
    pub operation: Operation,
    /// Raw primary-key path segment (`1`, or `7,rust` for composite keys).
    pub key: Option<String>,
    pub filters: Vec<FilterPredicate>,
    pub sort: Vec<SortKey>,
    pub page: Pagination,
    pub embed: Vec<String>,
    pub payload: Option<Map<String, Value>>,
}

impl RequestDescriptor {
    pub fn new(table: impl Into<String>, operation: Operation) -> Self {
        RequestDescriptor {
            table: table.into(),
            operation,
            key: None,
            filters: Vec::new(),
            sort: Vec::new(),
            page: Pagination::default(),
            embed: Vec::new(),
            payload: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse query-string pairs. Parameters the operation does not take are rejected, as are
    /// repeated parameters.
    pub fn with_query(mut self, params: &[(String, String)]) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        for (name, value) in params {
            if !seen.insert(name.as_str()) {
                return Err(AppError::validation(format!("query parameter '{}' given more than once", name)));
            }
            if !self.operation.accepts(name) {
                return Err(AppError::validation(format!(
                    "query parameter '{}' is not accepted here",
                    name
                )));
            }
            match name.as_str() {
                "limit" => self.page.limit = Some(parse_number(name, value)?),
                "offset" => self.page.offset = Some(parse_number(name, value)?),
                "cursor" => self.page.cursor = Some(value.clone()),
                "sort" => self.sort = parse_sort(value)?,
                "embed" => self.embed = split_list(value),
                _ => self.filters.push(parse_filter(name, value)?),
            }
        }
        if self.page.offset.is_some() && self.page.cursor.is_some() {
            return Err(AppError::validation("offset and cursor cannot be combined"));
        }
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::validation(format!("{} must be a non-negative integer", name)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort(value: &str) -> Result<Vec<SortKey>, AppError> {
    let keys: Vec<SortKey> = split_list(value)
        .into_iter()
        .map(|s| match s.strip_prefix('-') {
            Some(column) => SortKey {
                column: column.to_string(),
                descending: true,
            },
            None => SortKey {
                column: s.strip_prefix('+').unwrap_or(&s).to_string(),
                descending: false,
            },
        })
        .collect();
    if keys.is_empty() || keys.iter().any(|k| k.column.is_empty()) {
        return Err(AppError::validation("sort must list column names"));
    }
    Ok(keys)
}

/// `col=v` is equality; `col[op]=v` names the operator.
fn parse_filter(name: &str, value: &str) -> Result<FilterPredicate, AppError> {
    let (column, op) = match name.find('[') {
        Some(open) => {
            let op_name = name[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| AppError::validation(format!("malformed filter '{}'", name)))?;
            let op = FilterOp::parse(op_name).ok_or_else(|| {
                AppError::validation(format!("unknown filter operator '{}'", op_name))
            })?;
            (&name[..open], op)
        }
        None => (name, FilterOp::Eq),
    };
    if column.is_empty() {
        return Err(AppError::validation(format!("malformed filter '{}'", name)));
    }
    Ok(FilterPredicate {
        column: column.to_string(),
        op,
        value: value.to_string(),
    })
}

/// Decode a write body; it must be a JSON object.
pub fn parse_payload(body: &[u8]) -> Result<Map<String, Value>, AppError> {
    if body.is_empty() {
        return Err(AppError::validation("request body is required"));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::validation("body must be a JSON object")),
        Err(e) => Err(AppError::validation(format!("malformed JSON body: {}", e))),
    }
}
