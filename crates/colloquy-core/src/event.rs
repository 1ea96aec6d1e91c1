//! The event model.
//!
//! An [`Event`] is one immutable, append-only record of conversation
//! activity — a message, a tool call or result, an error marker. Events
//! carry optional side effects: a state delta folded into session/user/app
//! state when the event is appended, and an artifact-reference delta.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::Content;
use crate::ids::{EventId, InvocationId};
use crate::state::StateMap;
use crate::time;

/// Token usage counters reported for one model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Tokens consumed by the request.
    pub input_tokens: i64,
    /// Tokens produced by the response.
    pub output_tokens: i64,
    /// Total billed tokens.
    pub total_tokens: i64,
}

/// Side effects carried by an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    /// Partial state patch, routed by key prefix on append.
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
    /// Artifact filename → version references touched by this event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifact_delta: BTreeMap<String, i64>,
}

impl EventActions {
    /// True when the event carries no side effects.
    pub fn is_empty(&self) -> bool {
        self.state_delta.is_empty() && self.artifact_delta.is_empty()
    }
}

/// Action payload attached to an event.
///
/// Events written by this store carry [`Structured`] actions. Rows read
/// from a legacy backend may carry bytes in a closed native encoding;
/// those are preserved verbatim and never interpreted.
///
/// [`Structured`]: ActionPayload::Structured
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionPayload {
    /// Structured actions.
    Structured(EventActions),
    /// Uninterpreted bytes from a legacy backend, round-tripped unchanged.
    Opaque(#[serde(with = "bytes_base64")] Vec<u8>),
}

impl ActionPayload {
    /// The state delta, when the payload is structured.
    pub fn state_delta(&self) -> Option<&StateMap> {
        match self {
            Self::Structured(actions) => Some(&actions.state_delta),
            Self::Opaque(_) => None,
        }
    }
}

impl Default for ActionPayload {
    fn default() -> Self {
        Self::Structured(EventActions::default())
    }
}

/// One immutable record of conversation activity, owned by a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event ID, unique within the owning session.
    pub id: EventId,
    /// Groups the events produced by one request/response cycle.
    pub invocation_id: InvocationId,
    /// Which participant produced the event (e.g. `user`, an agent name).
    pub author: String,
    /// Conversation branch marker, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Role + content parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Action payload (state/artifact deltas, or opaque legacy bytes).
    #[serde(default)]
    pub actions: ActionPayload,
    /// Event timestamp; orders the event log.
    pub timestamp: DateTime<Utc>,
    /// True for a streaming chunk that is not yet a complete message.
    #[serde(default)]
    pub partial: bool,
    /// Whether the turn finished with this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    /// Whether the producing call was interrupted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Transcription of audio input, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<String>,
    /// Transcription of audio output, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<String>,
    /// Token usage counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Event {
    /// New event with a fresh ID and the current (microsecond) timestamp.
    pub fn new(invocation_id: InvocationId, author: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            invocation_id,
            author: author.into(),
            branch: None,
            content: None,
            actions: ActionPayload::default(),
            timestamp: time::utc_now(),
            partial: false,
            turn_complete: None,
            interrupted: None,
            error_code: None,
            error_message: None,
            input_transcription: None,
            output_transcription: None,
            usage: None,
        }
    }

    /// Attach content.
    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    /// Attach a state delta (replaces any existing structured delta).
    pub fn with_state_delta(mut self, delta: StateMap) -> Self {
        let actions = match self.actions {
            ActionPayload::Structured(actions) => EventActions {
                state_delta: delta,
                ..actions
            },
            ActionPayload::Opaque(_) => EventActions {
                state_delta: delta,
                ..EventActions::default()
            },
        };
        self.actions = ActionPayload::Structured(actions);
        self
    }

    /// Attach an artifact-reference delta.
    pub fn with_artifact_delta(mut self, delta: BTreeMap<String, i64>) -> Self {
        let actions = match self.actions {
            ActionPayload::Structured(actions) => EventActions {
                artifact_delta: delta,
                ..actions
            },
            ActionPayload::Opaque(_) => EventActions {
                artifact_delta: delta,
                ..EventActions::default()
            },
        };
        self.actions = ActionPayload::Structured(actions);
        self
    }

    /// Mark the event as an error record.
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    /// Attach token usage counters.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The state delta, when the action payload is structured.
    pub fn state_delta(&self) -> Option<&StateMap> {
        self.actions.state_delta()
    }
}

mod bytes_base64 {
    //! Base64 (de)serialization for opaque action bytes embedded in JSON.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
