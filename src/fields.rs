//! Type mapping: Postgres column types to semantic types, and column descriptors to field rules
//! that check request values before any SQL is built.

use crate::catalog::{ColumnDescriptor, SemanticType, TableDescriptor};
use crate::error::{AppError, CatalogError};
use crate::sql::PgBindValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Postgres spellings of the non-finite float values, as they appear on the wire.
pub const FLOAT_SPECIALS: &[(&str, f64)] = &[
    ("NaN", f64::NAN),
    ("Infinity", f64::INFINITY),
    ("-Infinity", f64::NEG_INFINITY),
];

fn float_special(s: &str) -> Option<f64> {
    FLOAT_SPECIALS.iter().find(|(name, _)| *name == s).map(|&(_, v)| v)
}

/// A finite decimal literal (`12`, `-0.50`, `1e-3`). Rejects `inf`, `nan` and other forms
/// `f64::from_str` would take.
fn is_decimal(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
        && s.parse::<f64>().is_ok()
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Output format for timestamps without time zone.
pub const NAIVE_TIMESTAMP_OUT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Map an introspected Postgres type to a semantic type and placeholder cast.
/// `enums` is keyed by (schema, type name).
pub fn map_pg_type(
    table: &str,
    column: &str,
    data_type: &str,
    udt_schema: &str,
    udt_name: &str,
    enums: &HashMap<(String, String), Vec<String>>,
) -> Result<(SemanticType, String), CatalogError> {
    let mapped = match udt_name {
        "int2" => Some(SemanticType::Integer { bits: 16 }),
        "int4" => Some(SemanticType::Integer { bits: 32 }),
        "int8" => Some(SemanticType::Integer { bits: 64 }),
        "float4" => Some(SemanticType::Float { bits: 32 }),
        "float8" => Some(SemanticType::Float { bits: 64 }),
        "numeric" => Some(SemanticType::Numeric),
        "text" | "varchar" | "bpchar" => Some(SemanticType::Text),
        "bool" => Some(SemanticType::Boolean),
        "timestamp" => Some(SemanticType::Timestamp { with_time_zone: false }),
        "timestamptz" => Some(SemanticType::Timestamp { with_time_zone: true }),
        "date" => Some(SemanticType::Date),
        "uuid" => Some(SemanticType::Uuid),
        "json" | "jsonb" => Some(SemanticType::Json),
        _ => None,
    };
    if let Some(ty) = mapped {
        return Ok((ty, udt_name.to_string()));
    }
    if udt_name == "citext" {
        return Ok((
            SemanticType::Text,
            format!("{}.{}", quote_ident(udt_schema), quote_ident(udt_name)),
        ));
    }
    if data_type == "USER-DEFINED" {
        if let Some(variants) = enums.get(&(udt_schema.to_string(), udt_name.to_string())) {
            return Ok((
                SemanticType::Enum {
                    variants: variants.clone(),
                },
                format!("{}.{}", quote_ident(udt_schema), quote_ident(udt_name)),
            ));
        }
    }
    Err(CatalogError::UnsupportedType {
        table: table.to_string(),
        column: column.to_string(),
        type_name: if data_type == "USER-DEFINED" || data_type == "ARRAY" {
            udt_name.to_string()
        } else {
            data_type.to_string()
        },
    })
}

/// Filter operators accepted in `<column>[<op>]=<value>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Like,
    Ilike,
    Is,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => FilterOp::Eq,
            "neq" | "ne" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" | "ge" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" | "le" => FilterOp::Lte,
            "in" => FilterOp::In,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "is" => FilterOp::Is,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::Is => "is",
        }
    }

    /// Binary SQL operator; `None` for `in` and `is`, which render their own shape.
    pub fn sql_operator(self) -> Option<&'static str> {
        Some(match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::Ilike => "ILIKE",
            FilterOp::In | FilterOp::Is => return None,
        })
    }

    fn is_ordering(self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte)
    }
}

/// Validation and shape rules for one column.
#[derive(Clone, Debug, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub has_default: bool,
    pub read_only: bool,
    pub primary_key: bool,
    /// Server-managed; never accepted on write and left out of row output.
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip)]
    pub pg_cast: String,
}

/// Derive the field rules for a column. Pure; unsupported types were rejected at catalog load.
pub fn describe(column: &ColumnDescriptor, primary_key: bool) -> FieldDescriptor {
    let format = match &column.semantic_type {
        SemanticType::Timestamp { .. } => Some("date-time"),
        SemanticType::Date => Some("date"),
        SemanticType::Uuid => Some("uuid"),
        _ => None,
    };
    FieldDescriptor {
        name: column.name.clone(),
        semantic_type: column.semantic_type.clone(),
        nullable: column.nullable,
        has_default: column.has_default,
        read_only: column.read_only,
        primary_key,
        hidden: column.hidden,
        max_length: column.max_length,
        format,
        pg_cast: column.pg_cast.clone(),
    }
}

impl FieldDescriptor {
    fn invalid(&self, expected: &str) -> AppError {
        AppError::invalid_field(&self.name, format!("{} must be {}", self.name, expected))
    }

    /// Whether `op` may be applied to this field in a filter.
    pub fn supports(&self, op: FilterOp) -> bool {
        match &self.semantic_type {
            SemanticType::Json => false,
            SemanticType::Text => true,
            _ if matches!(op, FilterOp::Like | FilterOp::Ilike) => false,
            SemanticType::Boolean | SemanticType::Enum { .. } => !op.is_ordering(),
            _ => true,
        }
    }

    pub fn sortable(&self) -> bool {
        !matches!(self.semantic_type, SemanticType::Json)
    }

    /// Check a JSON payload value (strict: no string-to-number coercion).
    pub fn check_json(&self, value: &Value) -> Result<PgBindValue, AppError> {
        if value.is_null() {
            if self.nullable {
                return Ok(PgBindValue::Null);
            }
            return Err(AppError::invalid_field(
                &self.name,
                format!("{} must not be null", self.name),
            ));
        }
        match &self.semantic_type {
            SemanticType::Integer { bits } => {
                let n = value.as_i64().ok_or_else(|| self.invalid("an integer"))?;
                self.check_integer_range(n, *bits)
            }
            SemanticType::Float { bits } => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => float_special(s),
                    _ => None,
                }
                .ok_or_else(|| self.invalid("a number"))?;
                self.check_float_range(n, *bits)
            }
            SemanticType::Numeric => match value {
                Value::Number(n) => Ok(PgBindValue::Text(n.to_string())),
                Value::String(s) => self.parse_text(s),
                _ => Err(self.invalid("a number or a decimal string")),
            },
            SemanticType::Text => {
                let s = value.as_str().ok_or_else(|| self.invalid("a string"))?;
                self.check_length(s)?;
                Ok(PgBindValue::Text(s.to_string()))
            }
            SemanticType::Boolean => value
                .as_bool()
                .map(PgBindValue::Bool)
                .ok_or_else(|| self.invalid("a boolean")),
            SemanticType::Json => Ok(PgBindValue::Json(value.clone())),
            _ => {
                let s = value.as_str().ok_or_else(|| self.invalid("a string"))?;
                self.parse_text(s)
            }
        }
    }

    /// Parse a query-string value for this field.
    pub fn parse_text(&self, raw: &str) -> Result<PgBindValue, AppError> {
        match &self.semantic_type {
            SemanticType::Integer { bits } => {
                let n: i64 = raw.trim().parse().map_err(|_| self.invalid("an integer"))?;
                self.check_integer_range(n, *bits)
            }
            SemanticType::Float { bits } => {
                let raw = raw.trim();
                let n = match float_special(raw) {
                    Some(n) => n,
                    None if is_decimal(raw) => raw.parse().map_err(|_| self.invalid("a number"))?,
                    None => return Err(self.invalid("a number")),
                };
                if n.is_infinite() && float_special(raw).is_none() {
                    return Err(self.invalid("a number in range"));
                }
                self.check_float_range(n, *bits)
            }
            SemanticType::Numeric => {
                let raw = raw.trim();
                if float_special(raw).is_some() || is_decimal(raw) {
                    Ok(PgBindValue::Text(raw.to_string()))
                } else {
                    Err(self.invalid("a decimal number"))
                }
            }
            SemanticType::Text => Ok(PgBindValue::Text(raw.to_string())),
            SemanticType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(PgBindValue::Bool(true)),
                "false" => Ok(PgBindValue::Bool(false)),
                _ => Err(self.invalid("true or false")),
            },
            SemanticType::Timestamp { with_time_zone: true } => DateTime::parse_from_rfc3339(raw)
                .map(|dt| PgBindValue::Text(dt.with_timezone(&Utc).to_rfc3339()))
                .map_err(|_| self.invalid("an RFC 3339 timestamp with offset")),
            SemanticType::Timestamp { with_time_zone: false } => NAIVE_TIMESTAMP_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| PgBindValue::Text(dt.format(NAIVE_TIMESTAMP_OUT).to_string()))
                .ok_or_else(|| self.invalid("a timestamp (YYYY-MM-DDTHH:MM:SS)")),
            SemanticType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| PgBindValue::Text(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| self.invalid("a date (YYYY-MM-DD)")),
            SemanticType::Uuid => uuid::Uuid::parse_str(raw)
                .map(PgBindValue::Uuid)
                .map_err(|_| self.invalid("a UUID")),
            SemanticType::Enum { variants } => {
                if variants.iter().any(|v| v == raw) {
                    Ok(PgBindValue::Text(raw.to_string()))
                } else {
                    Err(AppError::invalid_field(
                        &self.name,
                        format!("{} must be one of: {}", self.name, variants.join(", ")),
                    ))
                }
            }
            SemanticType::Json => serde_json::from_str(raw)
                .map(PgBindValue::Json)
                .map_err(|_| self.invalid("valid JSON")),
        }
    }

    fn check_integer_range(&self, n: i64, bits: u8) -> Result<PgBindValue, AppError> {
        let in_range = match bits {
            16 => i16::try_from(n).is_ok(),
            32 => i32::try_from(n).is_ok(),
            _ => true,
        };
        if !in_range {
            return Err(self.invalid(&format!("a {}-bit integer", bits)));
        }
        Ok(PgBindValue::I64(n))
    }

    fn check_float_range(&self, n: f64, bits: u8) -> Result<PgBindValue, AppError> {
        if bits == 32 && n.is_finite() && n.abs() > f64::from(f32::MAX) {
            return Err(self.invalid("a 32-bit float"));
        }
        Ok(PgBindValue::F64(n))
    }

    fn check_length(&self, s: &str) -> Result<(), AppError> {
        if let Some(max) = self.max_length {
            if s.chars().count() > max as usize {
                return Err(AppError::invalid_field(
                    &self.name,
                    format!("{} must be at most {} characters", self.name, max),
                ));
            }
        }
        Ok(())
    }
}

/// Field rules for every column of a table, in column order.
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct FieldSet {
    fields: Vec<FieldDescriptor>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

/// How a write payload is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadMode {
    Create,
    Patch,
    Replace,
}

/// Right-hand side of one column assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum Assignment {
    Value(PgBindValue),
    Default,
}

/// A payload decoded against a field set: assignments in column order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    pub values: Vec<(String, Assignment)>,
}

impl Payload {
    pub fn get(&self, column: &str) -> Option<&Assignment> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, a)| a)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FieldSet {
    pub fn for_table(table: &TableDescriptor) -> Self {
        let fields: Vec<FieldDescriptor> = table
            .columns
            .iter()
            .map(|c| describe(c, table.is_primary_key(&c.name)))
            .collect();
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        FieldSet { fields, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Client-facing field lookup. Unknown and hidden names are a validation error.
    pub fn require(&self, name: &str) -> Result<&FieldDescriptor, AppError> {
        self.get(name)
            .filter(|f| !f.hidden)
            .ok_or_else(|| AppError::invalid_field(name, format!("unknown field: {}", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Fields that appear in responses, in column order.
    pub fn visible(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.hidden)
    }

    /// Decode a JSON object field by field. Unknown, read-only and hidden fields are rejected;
    /// hidden columns keep their database default or current value.
    /// Primary-key values are kept; update paths compare them to the addressed key.
    pub fn decode_payload(&self, body: &Map<String, Value>, mode: PayloadMode) -> Result<Payload, AppError> {
        for key in body.keys() {
            if self.get(key).is_some_and(|f| f.hidden) {
                return Err(AppError::invalid_field(key, format!("{} is managed by the server", key)));
            }
            let field = self.require(key)?;
            if field.read_only {
                return Err(AppError::invalid_field(key, format!("{} is read-only", key)));
            }
        }
        let mut values = Vec::new();
        for field in &self.fields {
            if field.read_only || field.hidden {
                continue;
            }
            match body.get(&field.name) {
                Some(v) => values.push((field.name.clone(), Assignment::Value(field.check_json(v)?))),
                None => match mode {
                    PayloadMode::Patch => {}
                    PayloadMode::Create => {
                        if !field.has_default && !field.nullable {
                            return Err(AppError::invalid_field(
                                &field.name,
                                format!("{} is required", field.name),
                            ));
                        }
                    }
                    PayloadMode::Replace => {
                        if field.primary_key {
                            continue;
                        }
                        if field.has_default {
                            values.push((field.name.clone(), Assignment::Default));
                        } else if field.nullable {
                            values.push((field.name.clone(), Assignment::Value(PgBindValue::Null)));
                        } else {
                            return Err(AppError::invalid_field(
                                &field.name,
                                format!("{} is required for a full replace", field.name),
                            ));
                        }
                    }
                },
            }
        }
        Ok(Payload { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_catalog;
    use crate::testutil::{fixture_schema, users_posts_catalog};
    use rstest::rstest;
    use serde_json::json;

    fn user_fields() -> FieldSet {
        let catalog = users_posts_catalog();
        FieldSet::for_table(catalog.table("users").unwrap())
    }

    #[test]
    fn unknown_pg_type_is_unsupported() {
        let err = map_pg_type("t", "shape", "USER-DEFINED", "public", "geometry", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedType { ref type_name, .. } if type_name == "geometry"));
        let err = map_pg_type("t", "blob", "bytea", "pg_catalog", "bytea", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedType { .. }));
    }

    #[test]
    fn enum_types_are_cast_by_qualified_name() {
        let mut enums = HashMap::new();
        enums.insert(("public".to_string(), "mood".to_string()), vec!["ok".to_string(), "sad".to_string()]);
        let (ty, cast) = map_pg_type("t", "m", "USER-DEFINED", "public", "mood", &enums).unwrap();
        assert_eq!(cast, "\"public\".\"mood\"");
        assert!(matches!(ty, SemanticType::Enum { variants } if variants.len() == 2));
    }

    #[rstest]
    #[case("age", json!(30), true)]
    #[case("age", json!("30"), false)]
    #[case("age", json!(3_000_000_000i64), false)]
    #[case("email", json!("a@x.com"), true)]
    #[case("email", json!(null), false)]
    #[case("age", json!(null), true)]
    #[case("active", json!("yes"), false)]
    #[case("created_at", json!("2024-05-01T10:00:00Z"), true)]
    #[case("created_at", json!("yesterday"), false)]
    #[case("external_id", json!("not-a-uuid"), false)]
    #[case("profile", json!({"any": ["shape"]}), true)]
    fn json_values_are_checked_strictly(#[case] field: &str, #[case] value: Value, #[case] ok: bool) {
        let fields = user_fields();
        assert_eq!(fields.require(field).unwrap().check_json(&value).is_ok(), ok, "{field} {value}");
    }

    fn reading_fields() -> FieldSet {
        let catalog = users_posts_catalog();
        FieldSet::for_table(catalog.table("readings").unwrap())
    }

    #[rstest]
    #[case("value", json!(1.5), Some(PgBindValue::F64(1.5)))]
    #[case("value", json!("NaN"), Some(PgBindValue::F64(f64::NAN)))]
    #[case("value", json!("-Infinity"), Some(PgBindValue::F64(f64::NEG_INFINITY)))]
    #[case("value", json!("1.5"), None)]
    #[case("ratio", json!(0.1), Some(PgBindValue::F64(0.1)))]
    #[case("ratio", json!(1e39), None)]
    #[case("amount", json!("12345678901234567890.000000001"), Some(PgBindValue::Text("12345678901234567890.000000001".into())))]
    #[case("amount", json!(2.5), Some(PgBindValue::Text("2.5".into())))]
    #[case("amount", json!("NaN"), Some(PgBindValue::Text("NaN".into())))]
    #[case("amount", json!("12abc"), None)]
    fn float_and_numeric_values(#[case] field: &str, #[case] value: Value, #[case] expected: Option<PgBindValue>) {
        let fields = reading_fields();
        let got = fields.require(field).unwrap().check_json(&value).ok();
        match (got, expected) {
            (Some(PgBindValue::F64(a)), Some(PgBindValue::F64(b))) if a.is_nan() => assert!(b.is_nan()),
            (got, expected) => assert_eq!(got, expected, "{field} {value}"),
        }
    }

    #[test]
    fn query_text_accepts_float_spellings() {
        let fields = reading_fields();
        let value = fields.require("value").unwrap();
        assert_eq!(value.parse_text("Infinity").unwrap(), PgBindValue::F64(f64::INFINITY));
        assert_eq!(value.parse_text(" 2.25 ").unwrap(), PgBindValue::F64(2.25));
        assert!(value.parse_text("inf").is_err());
        assert!(value.parse_text("1e400").is_err());
        let amount = fields.require("amount").unwrap();
        assert_eq!(
            amount.parse_text("0.10000000000000000001").unwrap(),
            PgBindValue::Text("0.10000000000000000001".into())
        );
        assert!(amount.parse_text("ten").is_err());
    }

    #[test]
    fn hidden_columns_are_not_writable() {
        let catalog = build_catalog("public", fixture_schema(), &[], &["created_at".to_string()]);
        let fields = FieldSet::for_table(catalog.table("users").unwrap());
        assert!(fields.require("created_at").is_err());
        assert!(fields.visible().all(|f| f.name != "created_at"));

        let body = json!({"email": "a@x.com", "created_at": "2024-05-01T10:00:00Z"})
            .as_object()
            .unwrap()
            .clone();
        let err = fields.decode_payload(&body, PayloadMode::Create).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "created_at"));

        let body = json!({"email": "a@x.com"}).as_object().unwrap().clone();
        let payload = fields.decode_payload(&body, PayloadMode::Replace).unwrap();
        assert_eq!(payload.get("created_at"), None);
    }

    #[test]
    fn text_length_is_bounded() {
        let fields = user_fields();
        let email = fields.require("email").unwrap();
        let long = "x".repeat(101);
        let err = email.check_json(&json!(long)).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "email"));
    }

    #[test]
    fn query_text_parses_per_type() {
        let fields = user_fields();
        assert_eq!(fields.require("age").unwrap().parse_text("41").unwrap(), PgBindValue::I64(41));
        assert!(fields.require("age").unwrap().parse_text("forty").is_err());
        assert_eq!(
            fields.require("active").unwrap().parse_text("TRUE").unwrap(),
            PgBindValue::Bool(true)
        );
        assert_eq!(
            fields.require("created_at").unwrap().parse_text("2024-05-01T12:00:00+02:00").unwrap(),
            PgBindValue::Text("2024-05-01T10:00:00+00:00".into())
        );
    }

    #[test]
    fn ordering_filters_are_rejected_for_booleans_and_json() {
        let fields = user_fields();
        assert!(!fields.require("active").unwrap().supports(FilterOp::Gt));
        assert!(fields.require("active").unwrap().supports(FilterOp::Eq));
        assert!(!fields.require("profile").unwrap().supports(FilterOp::Eq));
        assert!(!fields.require("age").unwrap().supports(FilterOp::Like));
        assert!(fields.require("email").unwrap().supports(FilterOp::Ilike));
    }

    #[test]
    fn create_requires_non_nullable_columns_without_default() {
        let fields = user_fields();
        let body = json!({"age": 30}).as_object().unwrap().clone();
        let err = fields.decode_payload(&body, PayloadMode::Create).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "email"));
    }

    #[test]
    fn unknown_fields_are_rejected_not_dropped() {
        let fields = user_fields();
        let body = json!({"email": "a@x.com", "nickname": "al"}).as_object().unwrap().clone();
        let err = fields.decode_payload(&body, PayloadMode::Create).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "nickname"));
    }

    #[test]
    fn replace_fills_absent_columns_with_default_or_null() {
        let fields = user_fields();
        let body = json!({"email": "a@x.com"}).as_object().unwrap().clone();
        let payload = fields.decode_payload(&body, PayloadMode::Replace).unwrap();
        assert_eq!(payload.get("age"), Some(&Assignment::Value(PgBindValue::Null)));
        assert_eq!(payload.get("active"), Some(&Assignment::Default));
        assert_eq!(payload.get("id"), None);
    }

    #[test]
    fn patch_only_carries_supplied_fields() {
        let fields = user_fields();
        let body = json!({"age": 31}).as_object().unwrap().clone();
        let payload = fields.decode_payload(&body, PayloadMode::Patch).unwrap();
        assert_eq!(
            payload.values,
            vec![("age".to_string(), Assignment::Value(PgBindValue::I64(31)))]
        );
    }
}
