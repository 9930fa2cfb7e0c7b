//! Local token format checks. Nothing here touches the network.

use {secrecy::ExposeSecret, waigaya_common::Credentials};

use crate::error::{ConnectionError, Result};

pub const BOT_TOKEN_PREFIX: &str = "xoxb-";
pub const APP_TOKEN_PREFIX: &str = "xapp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Bot,
    App,
}

impl TokenKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Bot => BOT_TOKEN_PREFIX,
            Self::App => APP_TOKEN_PREFIX,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bot => "bot token",
            Self::App => "app token",
        })
    }
}

/// Checks both tokens of a credential pair, bot token first.
pub fn validate_credentials(credentials: &Credentials) -> Result<()> {
    validate_token(TokenKind::Bot, credentials.bot_token.expose_secret())?;
    validate_token(TokenKind::App, credentials.app_token.expose_secret())
}

pub fn validate_token(kind: TokenKind, token: &str) -> Result<()> {
    let reject = |reason: String| -> Result<()> {
        Err(ConnectionError::CredentialFormat { kind, reason })
    };
    let prefix = kind.prefix();

    if token.is_empty() {
        return reject("is empty".into());
    }
    if token.chars().any(char::is_whitespace) {
        return reject("contains whitespace".into());
    }
    if !token.starts_with(prefix) {
        return reject(format!("must start with `{prefix}`"));
    }
    if token.len() == prefix.len() {
        return reject(format!("has nothing after `{prefix}`"));
    }
    Ok(())
}
