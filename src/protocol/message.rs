//! Call request and response messages.
//!
//! Field names are camelCase on the wire. Absent or null optional fields are
//! left out entirely:
//!
//! ```text
//! {"id":"3","methodName":"Add","parameters":[{"value":1},{"typeName":"i32","value":2}]}
//! {"id":"3","succeeded":true,"value":3}
//! {"id":"4","succeeded":false,"failureMessage":"Unknown operation 'Sub'"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One argument of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Optional hint naming the type the value was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Parameter {
    /// Create an untyped parameter.
    pub fn new(value: Value) -> Self {
        Self {
            type_name: None,
            value,
        }
    }

    /// Create a parameter carrying a type hint.
    pub fn typed(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: Some(type_name.into()),
            value,
        }
    }
}

/// A request to run an operation on the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub id: String,
    pub method_name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl CallRequest {
    pub fn new(
        id: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            id: id.into(),
            method_name: method_name.into(),
            parameters,
        }
    }
}

/// The outcome of a [`CallRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub id: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl CallResponse {
    /// A successful response. A null value is omitted from the wire.
    pub fn success(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            succeeded: true,
            value: (!value.is_null()).then_some(value),
            failure_message: None,
        }
    }

    /// A failed response.
    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            succeeded: false,
            value: None,
            failure_message: Some(message.into()),
        }
    }
}
