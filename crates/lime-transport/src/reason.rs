use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reason attached to notifications, commands and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Reason {
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{description} (code {})", self.code),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Well-known reason codes.
pub mod codes {
    pub const GENERAL_ERROR: u32 = 1;

    pub const SESSION_ERROR: u32 = 11;
    pub const SESSION_REGISTRATION_ERROR: u32 = 12;
    pub const SESSION_AUTHENTICATION_FAILED: u32 = 13;
    pub const SESSION_UNREGISTER_FAILED: u32 = 14;
    pub const SESSION_INVALID_ACTION_FOR_STATE: u32 = 15;
    pub const SESSION_NEGOTIATION_TIMEOUT: u32 = 16;
    pub const SESSION_NEGOTIATION_INVALID_OPTIONS: u32 = 17;
    pub const SESSION_INVALID_SESSION_MODE_REQUESTED: u32 = 18;

    pub const VALIDATION_ERROR: u32 = 21;
    pub const VALIDATION_EMPTY_DOCUMENT: u32 = 22;
    pub const VALIDATION_INVALID_RESOURCE: u32 = 23;
    pub const VALIDATION_INVALID_STATUS: u32 = 24;
    pub const VALIDATION_INVALID_IDENTITY: u32 = 25;
    pub const VALIDATION_INVALID_RECIPIENTS: u32 = 26;
    pub const VALIDATION_INVALID_METHOD: u32 = 27;

    pub const AUTHORIZATION_ERROR: u32 = 31;

    pub const ROUTING_ERROR: u32 = 41;

    pub const DISPATCH_ERROR: u32 = 51;

    pub const COMMAND_PROCESSING_ERROR: u32 = 61;
    pub const COMMAND_RESOURCE_NOT_SUPPORTED: u32 = 62;
    pub const COMMAND_METHOD_NOT_SUPPORTED: u32 = 63;
    pub const COMMAND_INVALID_ARGUMENT: u32 = 64;
    pub const COMMAND_INVALID_SESSION_MODE: u32 = 65;
    pub const COMMAND_NOT_ALLOWED: u32 = 66;
    pub const COMMAND_RESOURCE_NOT_FOUND: u32 = 67;

    pub const MESSAGE_PROCESSING_ERROR: u32 = 71;
}
