use thiserror::Error;

use crate::update::ClientId;

/// Failures of the local store. Always non-fatal: callers degrade to
/// network-only behavior.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum VersionCheckError {
    #[error("Version document unreachable: {0}")]
    Unreachable(#[from] NetworkError),

    #[error("Version document returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed version document: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl VersionCheckError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        if text.len() <= MAX_ERROR_BODY_LENGTH {
            text.into_owned()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &text[..end], body.len())
        }
    }

    pub fn from_status(status: u16, body: &[u8]) -> Self {
        VersionCheckError::Status {
            status,
            body: Self::truncate_body(body),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Notification permission not granted")]
    PermissionDenied,

    #[error("Notifications are not supported by the host")]
    Unsupported,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Client {0} not found")]
    NotFound(ClientId),

    #[error("Client {0} is no longer listening")]
    Disconnected(ClientId),

    #[error("Cannot open window: {0}")]
    OpenWindow(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid scope URL {url}: {source}")]
    InvalidScope {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid path {path} relative to scope: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid version {0:?}: expected X.Y.Z")]
    InvalidVersion(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
