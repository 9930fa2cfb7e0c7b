//! Channel-side plumbing shared by the ingestion and display halves.
//!
//! Holds the watch list, the persistence seam for credentials + watch list,
//! and the sink traits the pipeline and the display queue talk through.

pub mod error;
pub mod sink;
pub mod store;
pub mod watchlist;

pub use {
    error::{Error, Result},
    sink::{MessageSink, PresentationSink},
    store::{ConfigStore, StoredConfig},
    watchlist::{WatchedChannel, Watchlist},
};
