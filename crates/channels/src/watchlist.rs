use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
use waigaya_metrics::{gauge, watchlist as wl_metrics};

/// A channel the user asked to relay to the display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedChannel {
    pub id: String,
    pub name: String,
}

impl WatchedChannel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Trim a user-supplied channel id, rejecting blank input.
    pub fn parse_id(raw: &str) -> Result<&str> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(Error::invalid_input("channel id is empty"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::invalid_input(format!("channel id {id:?} contains whitespace")));
        }
        Ok(id)
    }
}

/// Shared, user-curated set of watched channels.
///
/// Cloning yields another handle onto the same set. The ingestion path only
/// reads; add/remove come from user actions. Exports go through
/// [`Watchlist::snapshot`], which copies under the lock before anyone iterates.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    inner: Arc<RwLock<BTreeMap<String, WatchedChannel>>>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_channels(channels: impl IntoIterator<Item = WatchedChannel>) -> Self {
        let list = Self::new();
        list.replace(channels);
        list
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.read().contains_key(channel_id)
    }

    pub fn get(&self, channel_id: &str) -> Option<WatchedChannel> {
        self.read().get(channel_id).cloned()
    }

    /// Add a channel. Returns `false` (and leaves the entry alone) if it was
    /// already watched.
    pub fn insert(&self, channel: WatchedChannel) -> bool {
        let mut map = self.write();
        if map.contains_key(&channel.id) {
            return false;
        }
        map.insert(channel.id.clone(), channel);
        #[cfg(feature = "metrics")]
        gauge!(wl_metrics::WATCHED_CHANNELS).set(map.len() as f64);
        true
    }

    pub fn remove(&self, channel_id: &str) -> Option<WatchedChannel> {
        let mut map = self.write();
        let removed = map.remove(channel_id);
        #[cfg(feature = "metrics")]
        gauge!(wl_metrics::WATCHED_CHANNELS).set(map.len() as f64);
        removed
    }

    /// Swap the whole set, e.g. after loading persisted config.
    pub fn replace(&self, channels: impl IntoIterator<Item = WatchedChannel>) {
        let fresh: BTreeMap<_, _> = channels.into_iter().map(|c| (c.id.clone(), c)).collect();
        let mut map = self.write();
        *map = fresh;
        debug!(count = map.len(), "watch list replaced");
        #[cfg(feature = "metrics")]
        gauge!(wl_metrics::WATCHED_CHANNELS).set(map.len() as f64);
    }

    /// Ordered copy of the current set.
    pub fn snapshot(&self) -> Vec<WatchedChannel> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, WatchedChannel>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, WatchedChannel>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let list = Watchlist::new();
        assert!(list.insert(WatchedChannel::new("C1", "general")));
        assert!(!list.insert(WatchedChannel::new("C1", "renamed")));
        assert_eq!(list.get("C1").unwrap().name, "general");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let list = Watchlist::new();
        let other = list.clone();
        other.insert(WatchedChannel::new("C9", "random"));
        assert!(list.contains("C9"));
        assert!(list.remove("C9").is_some());
        assert!(other.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let list = Watchlist::from_channels([
            WatchedChannel::new("C2", "b"),
            WatchedChannel::new("C1", "a"),
        ]);
        let snap = list.snapshot();
        list.remove("C1");
        list.insert(WatchedChannel::new("C3", "c"));

        let ids: Vec<_> = snap.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["C1", "C2"]);
    }

    #[test]
    fn parse_id_trims_and_rejects_blanks() {
        assert_eq!(WatchedChannel::parse_id("  C1 \n").unwrap(), "C1");
        for raw in ["", "   ", "C1 C2"] {
            let err = WatchedChannel::parse_id(raw).unwrap_err();
            assert!(matches!(err, Error::InvalidInput { .. }), "{raw:?}: {err}");
        }
    }

    #[test]
    fn replace_drops_previous_entries() {
        let list = Watchlist::from_channels([WatchedChannel::new("C1", "a")]);
        list.replace([WatchedChannel::new("C2", "b")]);
        assert!(!list.contains("C1"));
        assert!(list.contains("C2"));
    }
}
