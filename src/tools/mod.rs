//! Tool declarations, typed invocations and the dispatcher.
//!
//! The model asks for tools by name with loosely typed JSON arguments. The
//! dispatcher turns that request into one of a closed set of
//! [`ToolInvocation`] variants, validating arguments against the declared
//! [`ParameterSchema`] first, and always answers with a [`ToolResult`].
//!
//! - [`schema`]: parameter schemas and validation
//! - [`invocation`]: the closed set of tools and their typed arguments
//! - [`domain`]: the business-service boundary handlers call into
//! - [`registry`]: registration, declaration export and dispatch

pub mod domain;
mod handlers;
pub mod invocation;
pub mod registry;
pub mod schema;

pub use domain::{DomainService, InMemoryDomainService, RestDomainService};
pub use invocation::{ToolInvocation, ToolKind};
pub use registry::{DispatchOutcome, ToolRegistry};
pub use schema::{ParamType, ParameterSchema, ScalarType, SchemaViolation};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the model channel.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one dispatched tool call, fed back to the model verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error_message: None,
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error_message: Some(message.into()),
        }
    }

    /// JSON text used as the content of a tool message.
    #[must_use]
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"errorMessage":"unserializable tool result"}"#.to_string()
        })
    }
}

/// Name, description and parameters the model sees for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: ParameterSchema,
}

impl ToolDeclaration {
    /// Function-calling JSON for this declaration.
    #[must_use]
    pub fn to_openai_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json(),
            }
        })
    }
}

/// A tool call together with the result it produced, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedToolCall {
    pub name: String,
    pub arguments: Value,
    pub result: ToolResult,
}
