//! Wire messages exchanged with workers
//!
//! Requests are JSON objects carrying a numeric `requestId` next to the
//! command fields. Workers answer with `{requestId, ok, data | error}` and may
//! emit unsolicited `{event, payload}` messages at any time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkerError;

/// Event a worker emits once it accepts requests
pub const READY_EVENT: &str = "ready";

/// Synthetic event raised by the gateway when a worker handle dies
pub const WORKER_EXIT_EVENT: &str = "worker-exit";

/// Request sent to a worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Correlation id; absent for fire-and-forget posts
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,

    /// Command fields (`type` and its arguments)
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl WorkerRequest {
    /// Build a request from any message that serializes to a JSON object
    pub fn new<T: Serialize>(message: &T) -> Result<Self, WorkerError> {
        match serde_json::to_value(message) {
            Ok(Value::Object(body)) => Ok(Self {
                request_id: None,
                body,
            }),
            Ok(other) => Err(WorkerError::Protocol(format!(
                "request must be a JSON object, got {other}"
            ))),
            Err(e) => Err(WorkerError::Protocol(e.to_string())),
        }
    }

    /// The command name (`type` field)
    pub fn command(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// Decode the command fields into a typed message
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, WorkerError> {
        serde_json::from_value(Value::Object(self.body.clone()))
            .map_err(|e| WorkerError::Protocol(e.to_string()))
    }
}

/// Reply to a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Correlation id copied from the request
    #[serde(rename = "requestId")]
    pub request_id: u64,

    /// Whether the command succeeded
    pub ok: bool,

    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    /// Successful reply
    pub fn success(request_id: u64, data: Value) -> Self {
        Self {
            request_id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply
    pub fn failure(request_id: u64, error: impl Into<String>) -> Self {
        Self {
            request_id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Convert into the caller-facing result
    pub fn into_result(self) -> Result<Value, WorkerError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(WorkerError::Failed(
                self.error
                    .unwrap_or_else(|| "worker reported a failure".to_string()),
            ))
        }
    }
}

/// Unsolicited notification from a worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    /// Event name
    pub event: String,

    /// Event payload
    #[serde(default)]
    pub payload: Value,
}

impl WorkerEvent {
    /// Build an event from a serializable payload
    pub fn new<T: Serialize>(event: &str, payload: &T) -> Result<Self, WorkerError> {
        Ok(Self {
            event: event.to_string(),
            payload: serde_json::to_value(payload)
                .map_err(|e| WorkerError::Protocol(e.to_string()))?,
        })
    }
}

/// Anything a worker writes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    /// Reply to a request
    Response(WorkerResponse),
    /// Unsolicited event
    Event(WorkerEvent),
}
