//! Opaque keyset cursors: URL-safe base64 of a JSON array holding the last row's sort-key values.

use crate::error::AppError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

pub fn encode(values: &[Value]) -> String {
    URL_SAFE_NO_PAD.encode(Value::Array(values.to_vec()).to_string())
}

pub fn decode(token: &str) -> Result<Vec<Value>, AppError> {
    let invalid = || AppError::validation("invalid cursor");
    let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
    match serde_json::from_slice::<Value>(&bytes).map_err(|_| invalid())? {
        Value::Array(values) => Ok(values),
        _ => Err(invalid()),
    }
}
