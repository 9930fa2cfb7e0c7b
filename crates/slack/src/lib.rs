//! Slack Socket Mode ingestion.
//!
//! [`ConnectionManager`] owns the stream lifecycle, [`IngestionPipeline`]
//! filters and normalizes what arrives, and [`IdentityResolver`] turns user
//! and channel ids into display names. Everything network-facing sits
//! behind [`RemoteApi`]; [`SlackWebApi`] is the production implementation.

pub mod api;
pub mod connection;
pub mod directory;
pub mod error;
pub mod event;
pub mod identity;
pub mod ingest;
pub mod mentions;
pub mod socket;
pub mod token;
pub mod web;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing;

pub use {
    api::{AuthIdentity, EventStream, Page, RemoteApi, StreamEvent},
    connection::{
        ConnectionManager, ConnectionSettings, ConnectionState, ConnectionStatus, ReadyInfo,
    },
    directory::{ChannelDirectory, WatchError},
    error::{ConnectionError, Result},
    event::{AckHandle, EventKind, InboundEvent, MessageEvent},
    identity::{CacheStatus, IdentityResolver, IdentitySettings},
    ingest::{DropReason, IngestionPipeline, Routing},
    token::{TokenKind, validate_credentials},
    web::SlackWebApi,
};
