//! Typed values bound to PostgreSQL placeholders.

use serde_json::{Number, Value};
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A checked value bound to a placeholder. Every placeholder is also cast to its column type in SQL,
/// so `Text` carries temporal and enum values and `Null` binds for any column.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

/// Wire form of a float: a JSON number when finite, otherwise the Postgres spelling as a string.
pub fn float_value(n: f64) -> Value {
    match Number::from_f64(n) {
        Some(n) => Value::Number(n),
        None if n.is_nan() => Value::String("NaN".into()),
        None if n > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

/// `real` values widened by their shortest decimal form, so `0.1` stays `0.1`.
pub fn float4_value(n: f32) -> Value {
    if !n.is_finite() {
        return float_value(f64::from(n));
    }
    float_value(n.to_string().parse().unwrap_or(f64::from(n)))
}

impl PgBindValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PgBindValue::Null)
    }

    /// JSON rendering, used for cursors and for matching keys across tables.
    pub fn to_json(&self) -> Value {
        match self {
            PgBindValue::Null => Value::Null,
            PgBindValue::Bool(b) => Value::Bool(*b),
            PgBindValue::I64(n) => Value::Number((*n).into()),
            PgBindValue::F64(n) => float_value(*n),
            PgBindValue::Text(s) => Value::String(s.clone()),
            PgBindValue::Uuid(u) => Value::String(u.to_string()),
            PgBindValue::Json(v) => v.clone(),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            PgBindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::Text(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Uuid(_) => <uuid::Uuid as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}
