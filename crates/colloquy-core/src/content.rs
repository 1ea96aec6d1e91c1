//! Conversation content types.
//!
//! A [`Content`] is a role-attributed sequence of [`Part`]s — the payload
//! of a single conversation event. Parts cover plain text, a function call
//! requested by the model, and the result returned for one.

use serde::{Deserialize, Serialize};

/// One block inside an event's content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// A tool/function invocation requested by the model.
    #[serde(rename = "functionCall")]
    FunctionCall {
        /// Function name.
        name: String,
        /// Arguments as a JSON value.
        #[serde(default)]
        args: serde_json::Value,
        /// Call ID correlating this call with its response.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    /// The result of a tool/function invocation.
    #[serde(rename = "functionResponse")]
    FunctionResponse {
        /// Function name.
        name: String,
        /// Response as a JSON value.
        #[serde(default)]
        response: serde_json::Value,
        /// Call ID correlating this response with its call.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
}

/// A role-attributed sequence of content parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Producing role (e.g. `user`, `model`).
    pub role: String,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

impl Content {
    /// Single-text-part content with the given role.
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part::Text { text: text.into() }],
        }
    }
}
