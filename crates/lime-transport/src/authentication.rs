use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication scheme advertised in `schemeOptions` and named by `scheme`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Key,
    Transport,
    External,
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthenticationScheme::Guest => "guest",
            AuthenticationScheme::Plain => "plain",
            AuthenticationScheme::Key => "key",
            AuthenticationScheme::Transport => "transport",
            AuthenticationScheme::External => "external",
        };
        f.write_str(s)
    }
}

/// Authentication payload carried by a Session frame.
///
/// Closed over the supported schemes; the wire object is decoded by the
/// session's `scheme` field (see [`Authentication::from_wire`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Guest,
    /// Base64-encoded password.
    Plain { password: String },
    /// Base64-encoded access key.
    Key { key: String },
    /// Authenticated by the transport (e.g. client certificate).
    Transport,
    External { token: String, issuer: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthenticationWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issuer: Option<String>,
}

impl Authentication {
    /// Plain authentication from a clear-text password.
    pub fn plain(password: &str) -> Self {
        Authentication::Plain {
            password: data_encoding::BASE64.encode(password.as_bytes()),
        }
    }

    /// Key authentication from a clear-text key.
    pub fn key(key: &str) -> Self {
        Authentication::Key {
            key: data_encoding::BASE64.encode(key.as_bytes()),
        }
    }

    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Authentication::Guest => AuthenticationScheme::Guest,
            Authentication::Plain { .. } => AuthenticationScheme::Plain,
            Authentication::Key { .. } => AuthenticationScheme::Key,
            Authentication::Transport => AuthenticationScheme::Transport,
            Authentication::External { .. } => AuthenticationScheme::External,
        }
    }

    /// Decoded clear-text secret for `plain` and `key` schemes.
    ///
    /// Returns `None` for other schemes or when the payload is not valid base64 UTF-8.
    pub fn secret(&self) -> Option<String> {
        let encoded = match self {
            Authentication::Plain { password } => password,
            Authentication::Key { key } => key,
            _ => return None,
        };
        let bytes = data_encoding::BASE64.decode(encoded.as_bytes()).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Encode as the JSON object placed in a session's `authentication` field.
    pub fn to_wire(&self) -> serde_json::Value {
        let wire = match self {
            Authentication::Guest | Authentication::Transport => AuthenticationWire::default(),
            Authentication::Plain { password } => AuthenticationWire {
                password: Some(password.clone()),
                ..Default::default()
            },
            Authentication::Key { key } => AuthenticationWire {
                key: Some(key.clone()),
                ..Default::default()
            },
            Authentication::External { token, issuer } => AuthenticationWire {
                token: Some(token.clone()),
                issuer: Some(issuer.clone()),
                ..Default::default()
            },
        };
        serde_json::to_value(wire).unwrap_or_default()
    }

    /// Decode a session `authentication` object according to its scheme.
    pub fn from_wire(
        scheme: AuthenticationScheme,
        value: Option<serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        let wire: AuthenticationWire = match value {
            Some(value) => serde_json::from_value(value)?,
            None => AuthenticationWire::default(),
        };
        let missing = serde_json::Error::missing_field;
        Ok(match scheme {
            AuthenticationScheme::Guest => Authentication::Guest,
            AuthenticationScheme::Transport => Authentication::Transport,
            AuthenticationScheme::Plain => Authentication::Plain {
                password: wire.password.ok_or_else(|| missing("password"))?,
            },
            AuthenticationScheme::Key => Authentication::Key {
                key: wire.key.ok_or_else(|| missing("key"))?,
            },
            AuthenticationScheme::External => Authentication::External {
                token: wire.token.ok_or_else(|| missing("token"))?,
                issuer: wire.issuer.ok_or_else(|| missing("issuer"))?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_encodes_password() {
        let auth = Authentication::plain("s3cret");
        assert_eq!(auth.scheme(), AuthenticationScheme::Plain);
        assert_eq!(auth.secret().as_deref(), Some("s3cret"));
        assert_eq!(auth.to_wire(), serde_json::json!({"password": "czNjcmV0"}));
    }

    #[test]
    fn decode_by_scheme() {
        let value = serde_json::json!({"token": "abc", "issuer": "idp.example.org"});
        let auth = Authentication::from_wire(AuthenticationScheme::External, Some(value)).unwrap();
        assert_eq!(
            auth,
            Authentication::External {
                token: "abc".into(),
                issuer: "idp.example.org".into()
            }
        );

        let guest = Authentication::from_wire(AuthenticationScheme::Guest, None).unwrap();
        assert_eq!(guest, Authentication::Guest);
        assert_eq!(guest.to_wire(), serde_json::json!({}));
    }

    #[test]
    fn missing_field_is_an_error() {
        let err = Authentication::from_wire(AuthenticationScheme::Plain, Some(serde_json::json!({})));
        assert!(err.is_err());
    }
}
