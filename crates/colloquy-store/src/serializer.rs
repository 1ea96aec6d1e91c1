//! Event (de)serialization for the two wire layouts.
//!
//! Pure and stateless. Under the modern layout the whole event — minus the
//! key columns and timestamp stored beside it — becomes one JSON document.
//! Under the legacy layout each field maps to its own column and the
//! action payload is a byte column in a closed, non-portable encoding:
//! bytes read from a legacy backend are stored and returned unchanged,
//! never interpreted. Structured actions written to a legacy backend are
//! encoded as JSON bytes, which this store can read back but the legacy
//! host cannot — the documented best-effort interop path.
//!
//! Round-trip law: `decode(encode(e, v), v) == e` for both versions.

use chrono::{DateTime, Utc};
use colloquy_core::content::Content;
use colloquy_core::event::{ActionPayload, Event, EventActions, TokenUsage};
use colloquy_core::ids::{EventId, InvocationId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::SchemaVersion;

/// The modern single-document payload: every event field except the key
/// columns and the timestamp.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModernPayload {
    invocation_id: InvocationId,
    author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Content>,
    #[serde(default)]
    actions: ActionPayload,
    #[serde(default)]
    partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    turn_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interrupted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<TokenUsage>,
}

impl From<&Event> for ModernPayload {
    fn from(event: &Event) -> Self {
        Self {
            invocation_id: event.invocation_id.clone(),
            author: event.author.clone(),
            branch: event.branch.clone(),
            content: event.content.clone(),
            actions: event.actions.clone(),
            partial: event.partial,
            turn_complete: event.turn_complete,
            interrupted: event.interrupted,
            error_code: event.error_code.clone(),
            error_message: event.error_message.clone(),
            input_transcription: event.input_transcription.clone(),
            output_transcription: event.output_transcription.clone(),
            usage: event.usage,
        }
    }
}

/// Wide-column values for the legacy layout.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyColumns {
    /// Invocation grouping ID.
    pub invocation_id: String,
    /// Producing participant.
    pub author: String,
    /// Conversation branch marker.
    pub branch: Option<String>,
    /// JSON text of the content, if any.
    pub content: Option<String>,
    /// Opaque action bytes.
    pub actions: Vec<u8>,
    /// Streaming-chunk flag.
    pub partial: bool,
    /// Turn-completion flag.
    pub turn_complete: Option<bool>,
    /// Interruption flag.
    pub interrupted: Option<bool>,
    /// Machine-readable error code.
    pub error_code: Option<String>,
    /// Human-readable error message.
    pub error_message: Option<String>,
    /// Audio input transcription.
    pub input_transcription: Option<String>,
    /// Audio output transcription.
    pub output_transcription: Option<String>,
    /// JSON text of the usage counters, if any.
    pub usage: Option<String>,
}

/// An event encoded for one layout.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedEvent {
    /// Single JSON document.
    Modern {
        /// The payload document.
        payload: String,
    },
    /// Wide typed columns.
    Legacy(Box<LegacyColumns>),
}

/// Encode an event for the given layout.
pub fn encode(event: &Event, version: SchemaVersion) -> Result<EncodedEvent> {
    match version {
        SchemaVersion::Modern => Ok(EncodedEvent::Modern {
            payload: serde_json::to_string(&ModernPayload::from(event))?,
        }),
        SchemaVersion::Legacy => {
            let actions = match &event.actions {
                ActionPayload::Opaque(bytes) => bytes.clone(),
                ActionPayload::Structured(actions) => serde_json::to_vec(actions)?,
            };
            Ok(EncodedEvent::Legacy(Box::new(LegacyColumns {
                invocation_id: event.invocation_id.as_str().to_owned(),
                author: event.author.clone(),
                branch: event.branch.clone(),
                content: event
                    .content
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                actions,
                partial: event.partial,
                turn_complete: event.turn_complete,
                interrupted: event.interrupted,
                error_code: event.error_code.clone(),
                error_message: event.error_message.clone(),
                input_transcription: event.input_transcription.clone(),
                output_transcription: event.output_transcription.clone(),
                usage: event
                    .usage
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            })))
        }
    }
}

/// Decode a modern payload document back into an event.
pub fn decode_modern(id: EventId, timestamp: DateTime<Utc>, payload: &str) -> Result<Event> {
    let p: ModernPayload = serde_json::from_str(payload)?;
    Ok(Event {
        id,
        invocation_id: p.invocation_id,
        author: p.author,
        branch: p.branch,
        content: p.content,
        actions: p.actions,
        timestamp,
        partial: p.partial,
        turn_complete: p.turn_complete,
        interrupted: p.interrupted,
        error_code: p.error_code,
        error_message: p.error_message,
        input_transcription: p.input_transcription,
        output_transcription: p.output_transcription,
        usage: p.usage,
    })
}

/// Decode legacy wide columns back into an event.
pub fn decode_legacy(
    id: EventId,
    timestamp: DateTime<Utc>,
    columns: LegacyColumns,
) -> Result<Event> {
    let content = columns
        .content
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let usage = columns
        .usage
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Event {
        id,
        invocation_id: InvocationId::from_raw(columns.invocation_id),
        author: columns.author,
        branch: columns.branch,
        content,
        actions: decode_actions(columns.actions),
        timestamp,
        partial: columns.partial,
        turn_complete: columns.turn_complete,
        interrupted: columns.interrupted,
        error_code: columns.error_code,
        error_message: columns.error_message,
        input_transcription: columns.input_transcription,
        output_transcription: columns.output_transcription,
        usage,
    })
}

/// Interpret action bytes: JSON objects restricted to the known action
/// fields were written by this store and decode to structured actions;
/// anything else (the legacy host's native encoding) stays opaque.
fn decode_actions(bytes: Vec<u8>) -> ActionPayload {
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) if is_action_object(&value) => {
            match serde_json::from_value::<EventActions>(value) {
                Ok(actions) => ActionPayload::Structured(actions),
                Err(_) => ActionPayload::Opaque(bytes),
            }
        }
        _ => ActionPayload::Opaque(bytes),
    }
}

fn is_action_object(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.keys().all(|k| k == "stateDelta" || k == "artifactDelta"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::state::StateMap;
    use serde_json::json;

    fn sample_event() -> Event {
        let mut delta = StateMap::new();
        let _ = delta.insert("app:theme".into(), json!("dark"));
        let _ = delta.insert("step".into(), json!(2));
        Event::new(InvocationId::from_raw("inv_7"), "model")
            .with_content(Content::text("model", "salut"))
            .with_state_delta(delta)
            .with_usage(TokenUsage {
                input_tokens: 9,
                output_tokens: 4,
                total_tokens: 13,
            })
    }

    #[test]
    fn modern_roundtrip() {
        let event = sample_event();
        let EncodedEvent::Modern { payload } = encode(&event, SchemaVersion::Modern).unwrap()
        else {
            panic!("expected modern encoding");
        };
        let back = decode_modern(event.id.clone(), event.timestamp, &payload).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn modern_payload_excludes_key_columns() {
        let event = sample_event();
        let EncodedEvent::Modern { payload } = encode(&event, SchemaVersion::Modern).unwrap()
        else {
            panic!("expected modern encoding");
        };
        let doc: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(doc.get("id").is_none());
        assert!(doc.get("timestamp").is_none());
        assert_eq!(doc["author"], "model");
    }

    #[test]
    fn legacy_roundtrip_with_structured_actions() {
        let event = sample_event();
        let EncodedEvent::Legacy(columns) = encode(&event, SchemaVersion::Legacy).unwrap()
        else {
            panic!("expected legacy encoding");
        };
        let back = decode_legacy(event.id.clone(), event.timestamp, *columns).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn legacy_roundtrip_with_error_fields() {
        let event = Event::new(InvocationId::new(), "agent")
            .with_error("RATE_LIMIT", "quota exceeded");
        let EncodedEvent::Legacy(columns) = encode(&event, SchemaVersion::Legacy).unwrap()
        else {
            panic!("expected legacy encoding");
        };
        assert_eq!(columns.error_code.as_deref(), Some("RATE_LIMIT"));
        let back = decode_legacy(event.id.clone(), event.timestamp, *columns).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn opaque_action_bytes_are_preserved_verbatim() {
        // A payload in the legacy host's native encoding: not JSON
        let native = vec![0x80, 0x04, 0x95, 0x1a, 0x00, 0x00];
        let mut event = Event::new(InvocationId::new(), "agent");
        event.actions = ActionPayload::Opaque(native.clone());

        let EncodedEvent::Legacy(columns) = encode(&event, SchemaVersion::Legacy).unwrap()
        else {
            panic!("expected legacy encoding");
        };
        assert_eq!(columns.actions, native);

        let back = decode_legacy(event.id.clone(), event.timestamp, *columns).unwrap();
        assert_eq!(back.actions, ActionPayload::Opaque(native));
    }

    #[test]
    fn unknown_json_action_bytes_stay_opaque() {
        // JSON, but not shaped like this store's actions: keep the bytes.
        let bytes = br#"{"somethingElse": true}"#.to_vec();
        assert_eq!(decode_actions(bytes.clone()), ActionPayload::Opaque(bytes));
    }

    #[test]
    fn empty_structured_actions_roundtrip_through_legacy() {
        let event = Event::new(InvocationId::new(), "user");
        let EncodedEvent::Legacy(columns) = encode(&event, SchemaVersion::Legacy).unwrap()
        else {
            panic!("expected legacy encoding");
        };
        let back = decode_legacy(event.id.clone(), event.timestamp, *columns).unwrap();
        assert_eq!(back.actions, ActionPayload::default());
    }

    #[test]
    fn modern_decode_tolerates_minimal_payload() {
        let id = EventId::from_raw("evt_min");
        let ts = colloquy_core::time::utc_now();
        let event =
            decode_modern(id, ts, r#"{"invocationId": "inv_1", "author": "user"}"#).unwrap();
        assert_eq!(event.author, "user");
        assert!(!event.partial);
        assert_eq!(event.actions, ActionPayload::default());
    }
}
