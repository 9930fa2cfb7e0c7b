//! Display scheduling for normalized messages.
//!
//! [`DisplayQueue`] receives messages from the ingestion pipeline (it is a
//! [`waigaya_channels::MessageSink`]) and drives a caller-supplied
//! [`waigaya_channels::PresentationSink`] on its own timers.

pub mod queue;
pub mod settings;

pub use {
    queue::{
        ChangeFn, DisplayQueue, ItemId, ItemState, QueueItem, QueueSnapshot, QueueState,
        SYSTEM_AUTHOR,
    },
    settings::{DisplaySettings, QueuePolicy},
};
