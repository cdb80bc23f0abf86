use serde::de::DeserializeOwned;
use serde::Serialize;

/// `text/plain` media type.
pub const TEXT_PLAIN: &str = "text/plain";

/// `application/json` media type.
pub const APPLICATION_JSON: &str = "application/json";

/// Media type of the keep-alive ping resource.
pub const PING_MEDIA_TYPE: &str = "application/vnd.lime.ping+json";

/// Typed payload carried by a Message (`content`) or Command (`resource`).
///
/// The media type selects how `value` is interpreted: `text/plain` payloads
/// are JSON strings, any `+json` or `application/json` type is a JSON
/// document that can be decoded into a concrete type with [`Document::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub media_type: String,
    pub value: serde_json::Value,
}

impl Document {
    pub fn new(media_type: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            media_type: media_type.into(),
            value,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TEXT_PLAIN, serde_json::Value::String(text.into()))
    }

    /// Serialize any value as an `application/json` document.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(APPLICATION_JSON, serde_json::to_value(value)?))
    }

    /// Empty ping resource used by keep-alive commands.
    pub fn ping() -> Self {
        Self::new(PING_MEDIA_TYPE, serde_json::Value::Object(Default::default()))
    }

    pub fn is_ping(&self) -> bool {
        self.media_type.eq_ignore_ascii_case(PING_MEDIA_TYPE)
    }

    pub fn is_json(&self) -> bool {
        let media_type = self.media_type.to_ascii_lowercase();
        media_type == APPLICATION_JSON || media_type.ends_with("+json")
    }

    /// Plain-text body, if this is a text document.
    pub fn as_text(&self) -> Option<&str> {
        if self.media_type.eq_ignore_ascii_case(TEXT_PLAIN) {
            self.value.as_str()
        } else {
            None
        }
    }

    /// Decode the JSON body into a concrete document type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
