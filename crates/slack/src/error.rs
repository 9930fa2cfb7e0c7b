use waigaya_common::{Coded, ErrorCode};

use crate::token::TokenKind;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Everything that can go wrong talking to Slack, classified by what the
/// caller can do about it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Token is malformed. Detected locally, before any network call.
    #[error("invalid {kind}: {reason}")]
    CredentialFormat { kind: TokenKind, reason: String },

    /// The remote rejected the credential.
    #[error("authentication failed: {code}")]
    Authentication { code: String },

    /// The credential is valid but lacks a scope.
    #[error("missing permission: {code}{}", needed_suffix(.needed))]
    Permission {
        code: String,
        needed: Option<String>,
    },

    /// The connect budget ran out before the stream was ready.
    #[error("connection timed out after {timeout_ms}ms")]
    TransportTimeout { timeout_ms: u64 },

    /// Network or protocol failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A payload did not have the shape we expect.
    #[error("malformed data: {message}")]
    Data { message: String },
}

fn needed_suffix(needed: &Option<String>) -> String {
    needed
        .as_deref()
        .map(|scope| format!(" (needs `{scope}`)"))
        .unwrap_or_default()
}

/// Slack error codes meaning "this token is no good".
const AUTH_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "token_revoked",
    "token_expired",
    "account_inactive",
    "invalid_token",
];

/// Slack error codes meaning "this token cannot do that".
const PERMISSION_CODES: &[&str] = &[
    "missing_scope",
    "not_allowed_token_type",
    "no_permission",
    "restricted_action",
];

impl ConnectionError {
    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn data(message: impl std::fmt::Display) -> Self {
        Self::Data {
            message: message.to_string(),
        }
    }

    /// Map a Slack Web API `error` code (and its `needed` scope, if any).
    #[must_use]
    pub fn from_api(code: &str, needed: Option<String>) -> Self {
        if AUTH_CODES.contains(&code) {
            Self::Authentication { code: code.into() }
        } else if PERMISSION_CODES.contains(&code) {
            Self::Permission {
                code: code.into(),
                needed,
            }
        } else {
            Self::transport(format!("slack api error: {code}"))
        }
    }
}

impl Coded for ConnectionError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::CredentialFormat { .. } => ErrorCode::CredentialFormat,
            Self::Authentication { .. } => ErrorCode::Authentication,
            Self::Permission { .. } => ErrorCode::Permission,
            Self::TransportTimeout { .. } => ErrorCode::TransportTimeout,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Data { .. } => ErrorCode::Data,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(err)
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::data(err)
    }
}
