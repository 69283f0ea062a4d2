use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

use crate::error::{Error, Result};

/// An opaque access token.
///
/// The chat session never looks inside a token.  The decoding helpers exist
/// for token providers that cache credentials and for debugging output.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    secret: String,
}

impl Token {
    /// Wrap a raw access token.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The raw token, suitable for a bearer header.
    pub fn as_str(&self) -> &str {
        &self.secret
    }

    /// Decode the payload of a JWT into its claims.
    ///
    /// Signatures are not verified.
    pub fn claims(&self) -> Result<Map<String, Value>> {
        let mut parts = self.secret.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(Error::encoding("token is not a JWT", None)),
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        match value {
            Value::Object(claims) => Ok(claims),
            _ => Err(Error::encoding("JWT payload is not an object", None)),
        }
    }

    /// The `exp` claim, if the token is a JWT that carries one.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let exp = self.claims().ok()?.get("exp")?.as_i64()?;
        OffsetDateTime::from_unix_timestamp(exp).ok()
    }

    /// True if the token expires within `skew` of `now`.
    ///
    /// Tokens without an expiry never expire.
    pub fn is_expired_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at <= now + skew,
            None => false,
        }
    }

    /// The display name of the signed-in user.
    pub fn user_name(&self) -> Option<String> {
        let claims = self.claims().ok()?;
        ["name", "preferred_username", "email"]
            .iter()
            .find_map(|key| claims.get(*key).and_then(Value::as_str))
            .map(String::from)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("secret", &"<redacted>").finish()
    }
}

impl From<String> for Token {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl From<&str> for Token {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

#[cfg(test)]
pub(crate) fn fake_jwt(claims: &Value) -> Token {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Token::new(format!("{header}.{payload}.sig"))
}
