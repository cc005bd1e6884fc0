//! Command envelope construction and response parsing.
//!
//! Outbound payloads have the shape `{"command", "version", "body"}` plus any
//! side-channel fields (header-placed token, explicit correlation id).
//! Inbound payloads are accepted in two shapes:
//!
//! * `{"statusCode", "statusMessage", "contentBody"}` where `contentBody` may
//!   itself be JSON encoded as a string;
//! * `{"failed", "error", "result"}`.
//!
//! Anything else is a protocol error carrying the raw payload.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::TokenPlacement;
use crate::error::{RconError, Result};

/// Keys a login result may carry the access token under.
const TOKEN_KEYS: &[&str] = &["token", "Token", "access_token", "authToken"];

/// One outbound request. Built once, never mutated after send.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: String,
    pub version: i64,
    pub body: Map<String, Value>,
    /// Top-level fields written next to `command`/`version`/`body`.
    pub side_channel: Map<String, Value>,
}

impl Envelope {
    /// Assemble an envelope and attach `token` per `placement`.
    ///
    /// With body placement a caller-supplied value under the reserved key is
    /// overwritten by the session token.
    pub fn build(
        command: &str,
        version: i64,
        mut body: Map<String, Value>,
        token: Option<&str>,
        placement: &TokenPlacement,
    ) -> Self {
        let mut side_channel = Map::new();
        if let Some(token) = token {
            match placement {
                TokenPlacement::Body { key } => {
                    body.insert(key.clone(), Value::String(token.to_string()));
                }
                TokenPlacement::Header { field } => {
                    side_channel.insert(field.clone(), Value::String(token.to_string()));
                }
            }
        }
        Self {
            command: command.to_string(),
            version,
            body,
            side_channel,
        }
    }

    /// Attach an explicit correlation identifier.
    pub fn set_correlation(&mut self, field: &str, id: u64) {
        self.side_channel.insert(field.to_string(), Value::from(id));
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.side_channel.clone();
        object.insert("command".to_string(), Value::String(self.command.clone()));
        object.insert("version".to_string(), Value::from(self.version));
        object.insert("body".to_string(), Value::Object(self.body.clone()));
        Value::Object(object)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.to_value())?))
    }
}

/// Convert a caller-supplied body into an envelope body map.
///
/// `null` is treated as an empty body.
pub fn body_map(body: Value) -> Result<Map<String, Value>> {
    match body {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(RconError::InvalidRequest(format!(
            "command body must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A well-formed failure reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFailure {
    pub code: Option<i64>,
    pub message: String,
    /// Whatever payload accompanied the failure, passed through verbatim.
    pub detail: Value,
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Success(Value),
    Failure(ServerFailure),
}

/// A parsed inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: ReplyStatus,
    /// Explicit correlation identifier, when the wire carries one.
    pub correlation_id: Option<u64>,
    /// Command name echoed by the server, if any.
    pub name: Option<String>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ReplyStatus::Success(_))
    }
}

/// Decode an inbound payload.
///
/// `correlation_field` names the top-level field holding the correlation id
/// in explicit correlation mode.
pub fn parse(raw: &[u8], correlation_field: Option<&str>) -> Result<Reply> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|err| RconError::protocol(format!("response is not valid JSON: {err}"), Some(raw)))?;
    let Value::Object(object) = value else {
        return Err(RconError::protocol("response is not a JSON object", Some(raw)));
    };

    let correlation_id = correlation_field
        .and_then(|field| object.get(field))
        .and_then(correlation_value);
    let name = object
        .get("name")
        .or_else(|| object.get("command"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let status = if let Some(code) = object.get("statusCode") {
        let code = code
            .as_i64()
            .ok_or_else(|| RconError::protocol("statusCode is not an integer", Some(raw)))?;
        let content = object
            .get("contentBody")
            .cloned()
            .map(decode_content)
            .unwrap_or(Value::Null);
        if (200..300).contains(&code) {
            ReplyStatus::Success(content)
        } else {
            ReplyStatus::Failure(ServerFailure {
                code: Some(code),
                message: object
                    .get("statusMessage")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                detail: content,
            })
        }
    } else if let Some(failed) = object.get("failed") {
        let failed = failed
            .as_bool()
            .ok_or_else(|| RconError::protocol("failed is not a boolean", Some(raw)))?;
        let result = object.get("result").cloned().unwrap_or(Value::Null);
        if failed {
            ReplyStatus::Failure(ServerFailure {
                code: None,
                message: error_text(object.get("error")),
                detail: result,
            })
        } else {
            ReplyStatus::Success(result)
        }
    } else {
        return Err(RconError::protocol(
            "response has neither statusCode nor failed",
            Some(raw),
        ));
    };

    Ok(Reply {
        status,
        correlation_id,
        name,
    })
}

fn correlation_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `contentBody` is often JSON serialized into a string.
fn decode_content(content: Value) -> Value {
    match content {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded @ (Value::Object(_) | Value::Array(_))) => decoded,
            _ => Value::String(text),
        },
        other => other,
    }
}

fn error_text(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(Value::Null) | None => "command failed".to_string(),
        Some(Value::String(_)) => "command failed".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Pull the access token out of a login result.
pub fn extract_token(result: &Value) -> Option<String> {
    match result {
        Value::String(token) if !token.is_empty() => Some(token.clone()),
        Value::Object(object) => TOKEN_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(|value| value.as_str().filter(|s| !s.is_empty()))
            .map(str::to_string),
        _ => None,
    }
}

/// Result of a command that reached the server and got an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CommandOutcome {
    Completed(Value),
    /// The server refused the command; passed through verbatim.
    Rejected(ServerFailure),
}

impl CommandOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed(_))
    }

    pub fn into_result(self) -> std::result::Result<Value, ServerFailure> {
        match self {
            CommandOutcome::Completed(value) => Ok(value),
            CommandOutcome::Rejected(failure) => Err(failure),
        }
    }
}

impl From<ReplyStatus> for CommandOutcome {
    fn from(status: ReplyStatus) -> Self {
        match status {
            ReplyStatus::Success(value) => CommandOutcome::Completed(value),
            ReplyStatus::Failure(failure) => CommandOutcome::Rejected(failure),
        }
    }
}
