use std::io::Write;

use {
    tracing::{debug, warn},
    waigaya_channels::{PresentationSink, Watchlist},
    waigaya_common::NormalizedMessage,
};

/// Prints each shown message as one line on stdout.
pub struct TerminalSink {
    watchlist: Watchlist,
}

impl TerminalSink {
    pub fn new(watchlist: Watchlist) -> Self {
        Self { watchlist }
    }

    fn line(&self, message: &NormalizedMessage) -> String {
        let channel = self
            .watchlist
            .get(&message.channel_id)
            .map(|c| c.name)
            .unwrap_or_else(|| message.channel_id.clone());
        format!("[#{channel}] {}: {}", message.author, message.text)
    }
}

impl PresentationSink for TerminalSink {
    fn show(&self, item_id: u64, message: &NormalizedMessage) {
        let line = self.line(message);
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            warn!(item_id, error = %e, "could not write to terminal");
        }
    }

    fn fade_out(&self, item_id: u64, fade_ms: u64) {
        debug!(item_id, fade_ms, "fading");
    }

    fn clear(&self) {
        debug!("display idle");
    }
}
