use {async_trait::async_trait, waigaya_common::NormalizedMessage};

// ── Pipeline output ─────────────────────────────────────────────────────────

/// Receives messages that survived filtering and identity resolution.
///
/// The display queue is the production implementation; tests record.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: NormalizedMessage);
}

// ── Presentation port ───────────────────────────────────────────────────────

/// Where the display queue draws. Passed in by the caller; the queue never
/// reaches for ambient UI state.
///
/// Methods are called outside the queue's lock but must not call back into
/// the queue synchronously.
pub trait PresentationSink: Send + Sync {
    /// Put `message` on screen as the active item.
    fn show(&self, item_id: u64, message: &NormalizedMessage);

    /// The active item's display time is over; it fades for `fade_ms`.
    fn fade_out(&self, _item_id: u64, _fade_ms: u64) {}

    /// Nothing is active any more.
    fn clear(&self);
}
