//! Envelope serializer contract and its JSON implementation.
//!
//! Transports use a serializer to turn envelopes into text frames and back.
//! The JSON mapping picks the envelope kind from a discriminant field:
//! `content` for messages, `event` for notifications, `method` for commands
//! and `state` for sessions.

use crate::envelope::Envelope;
use crate::TransportError;

/// Converts envelopes to and from their text representation.
pub trait EnvelopeSerializer: Send + Sync {
    fn serialize(&self, envelope: &Envelope) -> Result<String, TransportError>;

    fn deserialize(&self, text: &str) -> Result<Envelope, TransportError>;
}

/// JSON envelope serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeSerializer;

impl EnvelopeSerializer for JsonEnvelopeSerializer {
    fn serialize(&self, envelope: &Envelope) -> Result<String, TransportError> {
        let result = match envelope {
            Envelope::Message(m) => serde_json::to_string(m),
            Envelope::Notification(n) => serde_json::to_string(n),
            Envelope::Command(c) => serde_json::to_string(c),
            Envelope::Session(s) => serde_json::to_string(s),
        };
        result.map_err(TransportError::Serialization)
    }

    fn deserialize(&self, text: &str) -> Result<Envelope, TransportError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(TransportError::Deserialization)?;

        let Some(object) = value.as_object() else {
            return Err(TransportError::UnknownEnvelope(truncate(text)));
        };

        let envelope = if object.contains_key("content") {
            serde_json::from_value(value).map(Envelope::Message)
        } else if object.contains_key("event") {
            serde_json::from_value(value).map(Envelope::Notification)
        } else if object.contains_key("method") {
            serde_json::from_value(value).map(Envelope::Command)
        } else if object.contains_key("state") {
            serde_json::from_value(value).map(Envelope::Session)
        } else {
            return Err(TransportError::UnknownEnvelope(truncate(text)));
        };

        envelope.map_err(TransportError::Deserialization)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}
