//! RPC envelopes spoken over the remote connection, and helpers for picking
//! rows out of query responses.
//!
//! Requests are `{id, method, params}`; responses are `{id, result}` or
//! `{id, error: {code, message}}`. Query results arrive either as a bare array
//! of rows or wrapped in per-statement objects exposing a `result` array.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryError, Result};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub id: &'a str,
    pub method: &'a str,
    pub params: &'a Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcResponse {
    /// Correlation id as a string, whatever JSON type the server echoed.
    pub fn correlation_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(MemoryError::Protocol {
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Split a multi-statement query result into one value per statement.
///
/// Statement envelopes (`{status, result}`) reporting `ERR` become protocol
/// errors. A result that is not in statement form is returned as a single
/// statement.
pub fn statement_results(result: Value) -> Result<Vec<Value>> {
    let Value::Array(items) = result else {
        return Ok(vec![result]);
    };

    let is_envelope = |v: &Value| v.get("status").is_some() && v.get("result").is_some();
    if items.is_empty() || !items.iter().all(is_envelope) {
        return Ok(vec![Value::Array(items)]);
    }

    items
        .into_iter()
        .map(|mut statement| {
            let status = statement
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("OK")
                .to_string();
            let body = statement
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null);
            if status.eq_ignore_ascii_case("OK") {
                Ok(body)
            } else {
                Err(MemoryError::Protocol {
                    code: -1,
                    message: body
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| body.to_string()),
                })
            }
        })
        .collect()
}

/// Row objects from a statement result: a bare array of rows, or an object
/// wrapping them under `result`. Anything else yields no rows.
pub fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("result") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
