//! Shared types, error definitions, and utilities used across all waigaya crates.

pub mod error;
pub mod types;

pub use {
    error::Coded,
    types::{
        ActionResult, CachedChannel, CachedEmoji, CachedProfile, ChannelMeta, Credentials,
        CustomEmoji, ErrorCode, IdentitySnapshot, NormalizedMessage, Profile, now_ms,
    },
};
