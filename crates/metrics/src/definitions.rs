//! Metric name and label definitions.
//!
//! Every metric recorded anywhere in waigaya is named here so the set of
//! exported series can be read in one place.

/// Socket Mode connection lifecycle
pub mod connection {
    /// Caller-initiated connect attempts
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "waigaya_connect_attempts_total";
    /// Failed connect attempts, labelled by error code
    pub const CONNECT_FAILURES_TOTAL: &str = "waigaya_connect_failures_total";
    /// Time from opening the stream to the `hello` handshake, in seconds
    pub const HANDSHAKE_DURATION_SECONDS: &str = "waigaya_handshake_duration_seconds";
    /// Streams that ended without the caller asking
    pub const UNEXPECTED_CLOSES_TOTAL: &str = "waigaya_unexpected_closes_total";
    /// Events read off the stream after the handshake
    pub const EVENTS_RECEIVED_TOTAL: &str = "waigaya_events_received_total";
}

/// Ingestion pipeline
pub mod ingest {
    /// Messages handed to the display sink
    pub const MESSAGES_EMITTED_TOTAL: &str = "waigaya_messages_emitted_total";
    /// Events dropped, labelled by reason
    pub const MESSAGES_DROPPED_TOTAL: &str = "waigaya_messages_dropped_total";
    /// Envelope acknowledgments written back
    pub const ACKS_TOTAL: &str = "waigaya_acks_total";
    /// Malformed events
    pub const DATA_ERRORS_TOTAL: &str = "waigaya_data_errors_total";
}

/// Identity cache
pub mod identity {
    /// Lookups answered from cache
    pub const CACHE_HITS_TOTAL: &str = "waigaya_identity_cache_hits_total";
    /// Lookups that went to the network
    pub const CACHE_MISSES_TOTAL: &str = "waigaya_identity_cache_misses_total";
    /// Number of cached user profiles
    pub const USERS_CACHED: &str = "waigaya_identity_users_cached";
    /// Number of cached custom emoji
    pub const EMOJIS_CACHED: &str = "waigaya_identity_emojis_cached";
}

/// Display queue
pub mod display {
    /// Items accepted into the queue
    pub const ITEMS_ENQUEUED_TOTAL: &str = "waigaya_display_items_enqueued_total";
    /// Items removed without an explicit request, labelled by reason
    pub const ITEMS_EVICTED_TOTAL: &str = "waigaya_display_items_evicted_total";
    /// Current queue length
    pub const QUEUE_LENGTH: &str = "waigaya_display_queue_length";
}

/// Watch list
pub mod watchlist {
    /// Number of watched channels
    pub const WATCHED_CHANNELS: &str = "waigaya_watched_channels";
}

/// Common label keys
pub mod labels {
    pub const CODE: &str = "code";
    pub const REASON: &str = "reason";
}

/// Histogram buckets
pub mod buckets {
    /// Handshake duration buckets (in seconds), 50ms to the 30s connect budget
    pub const HANDSHAKE_DURATION: [f64; 10] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0];
}
