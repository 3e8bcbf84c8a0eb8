use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Current time as milliseconds since the Unix epoch, the unit every
/// timestamp field in the wire schema and domain model uses.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_millis() as u64
}

// Use anyhow, define error and enable '?' at the HTTP boundary. For a
// simplified example of using anyhow in axum check /examples/anyhow-error-response.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Application error: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// A validated `documentId`/`editorId`: short, printable, no path separators
/// or control characters. Parsed at the wire boundary in `session/fabric.rs`
/// and then dropped back to a plain `String` for routing and storage keys.
#[repr(align(64))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier([u8; Self::MAX_LEN]);
impl Identifier {
    /// Maximum length of an identifier, in bytes.
    pub const MAX_LEN: usize = 64;
    fn valid_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' ')
    }
}
impl FromStr for Identifier {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            anyhow::bail!("identifier must not be empty");
        }
        if s.len() > Self::MAX_LEN {
            anyhow::bail!("identifier is too long");
        }
        if !s.chars().all(Self::valid_char) {
            anyhow::bail!("identifier contains invalid characters");
        }
        let mut bytes = [0u8; Self::MAX_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}
impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(Self::MAX_LEN);
        std::str::from_utf8(&self.0[..len]).expect("identifier contains invalid UTF-8")
    }
}
impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}
impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_ref())
    }
}
impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
