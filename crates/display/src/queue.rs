//! The display scheduler.
//!
//! Items live in an id-keyed arena with a separate arrival order and an
//! explicit active id. Each item owns at most two timers: `advance` (end of
//! its display time while active) and `expire` (display plus fade after it
//! was first shown). Timers are tokio tasks tagged with a timer id; a fire
//! whose id no longer matches the item's current timer is ignored.
//!
//! While paused the active item holds the screen with no timers; resuming
//! gives it a fresh display period.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, RwLock, Weak},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::task::JoinHandle,
    tracing::{debug, trace},
    waigaya_channels::{MessageSink, PresentationSink},
    waigaya_common::{NormalizedMessage, now_ms},
};

#[cfg(feature = "metrics")]
use waigaya_metrics::{counter, display as display_metrics, gauge, labels};

use crate::settings::{DisplaySettings, QueuePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Queued, not yet shown.
    Pending,
    Showing,
    /// Display time over; removed once its fade has run.
    Fading,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub message: NormalizedMessage,
    pub enqueued_at_ms: u64,
    pub display_ms: u64,
    pub fade_ms: u64,
    pub state: ItemState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Playing,
    /// An item is on screen but its timers are stopped.
    Paused,
}

/// Author label for text queued by the app itself rather than from chat.
pub const SYSTEM_AUTHOR: &str = "System";

/// Items in arrival order plus the active one. Handed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub active_id: Option<ItemId>,
    pub paused: bool,
}

impl QueueSnapshot {
    pub fn state(&self) -> QueueState {
        queue_state(self.active_id, self.paused)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id).collect()
    }
}

fn queue_state(active: Option<ItemId>, paused: bool) -> QueueState {
    match active {
        Some(_) if paused => QueueState::Paused,
        Some(_) => QueueState::Playing,
        None => QueueState::Idle,
    }
}

/// Observer called after every change with the new queue contents.
pub type ChangeFn = Arc<dyn Fn(&QueueSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Advance,
    Expire,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

struct Slot {
    item: QueueItem,
    advance: Option<Timer>,
    expire: Option<Timer>,
}

impl Slot {
    fn cancel_advance(&mut self) {
        if let Some(timer) = self.advance.take() {
            timer.handle.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_advance();
        if let Some(timer) = self.expire.take() {
            timer.handle.abort();
        }
    }
}

enum Effect {
    Show(ItemId, NormalizedMessage),
    FadeOut(ItemId, u64),
    Clear,
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Requested,
    Expired,
    Overflow,
}

impl Removal {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Expired => "expired",
            Self::Overflow => "overflow",
        }
    }
}

#[cfg(feature = "metrics")]
fn record_removal(why: Removal) {
    if !matches!(why, Removal::Requested) {
        counter!(display_metrics::ITEMS_EVICTED_TOTAL, labels::REASON => why.as_str()).increment(1);
    }
}

struct State {
    home: Weak<Shared>,
    settings: DisplaySettings,
    slots: HashMap<ItemId, Slot>,
    order: VecDeque<ItemId>,
    active: Option<ItemId>,
    paused: bool,
    next_item: u64,
    next_timer: u64,
    effects: Vec<Effect>,
}

impl State {
    fn schedule(&mut self, item: ItemId, kind: TimerKind, after_ms: u64) -> Timer {
        self.next_timer += 1;
        let id = self.next_timer;
        let home = self.home.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            if let Some(shared) = home.upgrade() {
                shared.fire(item, kind, id);
            }
        });
        Timer { id, handle }
    }

    fn activate(&mut self, id: ItemId) {
        if let Some(previous) = self.active.take()
            && previous != id
        {
            self.fade(previous);
        }
        let Some((display_ms, fade_ms, first_show, message)) = self.slots.get(&id).map(|s| {
            (
                s.item.display_ms,
                s.item.fade_ms,
                s.item.state == ItemState::Pending,
                s.item.message.clone(),
            )
        }) else {
            return;
        };

        let timed = !self.paused;
        let advance = timed.then(|| self.schedule(id, TimerKind::Advance, display_ms));
        let expire = (first_show && timed)
            .then(|| self.schedule(id, TimerKind::Expire, display_ms.saturating_add(fade_ms)));
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.cancel_advance();
            slot.advance = advance;
            if expire.is_some() {
                slot.expire = expire;
            }
            slot.item.state = ItemState::Showing;
        }
        self.active = Some(id);
        debug!(item = %id, display_ms, "showing");
        self.effects.push(Effect::Show(id, message));
    }

    /// Give the active item a full display period and its expiry again.
    fn rearm(&mut self, id: ItemId) {
        let Some((display_ms, fade_ms)) = self
            .slots
            .get(&id)
            .map(|s| (s.item.display_ms, s.item.fade_ms))
        else {
            return;
        };
        let advance = self.schedule(id, TimerKind::Advance, display_ms);
        let expire = self.schedule(id, TimerKind::Expire, display_ms.saturating_add(fade_ms));
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.cancel_timers();
            slot.advance = Some(advance);
            slot.expire = Some(expire);
        }
    }

    fn pause(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        if let Some(slot) = self.active.and_then(|id| self.slots.get_mut(&id)) {
            slot.cancel_timers();
        }
        true
    }

    fn resume(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        match self.active {
            Some(id) => self.rearm(id),
            None => {
                let pending = self.order.iter().copied().find(|x| {
                    self.slots
                        .get(x)
                        .is_some_and(|s| s.item.state == ItemState::Pending)
                });
                if let Some(id) = pending {
                    self.activate(id);
                }
            },
        }
        true
    }

    fn fade(&mut self, id: ItemId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.cancel_advance();
            slot.item.state = ItemState::Fading;
            self.effects.push(Effect::FadeOut(id, slot.item.fade_ms));
        }
    }

    /// First item after `id` in arrival order that has not been shown yet.
    fn next_after(&self, id: ItemId) -> Option<ItemId> {
        let pos = self.order.iter().position(|x| *x == id)?;
        self.order.iter().skip(pos + 1).copied().find(|x| {
            self.slots
                .get(x)
                .is_some_and(|s| s.item.state == ItemState::Pending)
        })
    }

    /// Make `next` active, or go idle when there is nothing left to play.
    fn move_on(&mut self, next: Option<ItemId>) {
        match next {
            Some(next) => self.activate(next),
            None => {
                self.active = None;
                debug!("queue idle");
                self.effects.push(Effect::Clear);
            },
        }
    }

    fn advance(&mut self, id: ItemId) {
        let next = self.next_after(id);
        self.fade(id);
        self.active = None;
        self.move_on(next);
    }

    fn remove(&mut self, id: ItemId, why: Removal) -> bool {
        let Some(pos) = self.order.iter().position(|x| *x == id) else {
            return false;
        };
        let was_active = self.active == Some(id);
        let next = if was_active {
            self.next_after(id)
        } else {
            None
        };
        self.order.remove(pos);
        if let Some(mut slot) = self.slots.remove(&id) {
            slot.cancel_timers();
        }
        debug!(item = %id, reason = why.as_str(), "removed from queue");
        #[cfg(feature = "metrics")]
        record_removal(why);
        if was_active {
            self.active = None;
            self.move_on(next);
        }
        true
    }

    fn enqueue(&mut self, message: NormalizedMessage) -> ItemId {
        self.next_item += 1;
        let id = ItemId(self.next_item);
        let item = QueueItem {
            id,
            message,
            enqueued_at_ms: now_ms(),
            display_ms: self.settings.display_ms,
            fade_ms: self.settings.fade_ms,
            state: ItemState::Pending,
        };
        self.slots.insert(id, Slot {
            item,
            advance: None,
            expire: None,
        });
        self.order.push_back(id);

        let capacity = self.settings.capacity();
        while self.order.len() > capacity {
            let Some(oldest) = self.order.front().copied() else {
                break;
            };
            self.remove(oldest, Removal::Overflow);
        }

        match self.settings.policy {
            QueuePolicy::JumpToLatest if self.active != Some(id) => self.activate(id),
            QueuePolicy::Sequential if self.active.is_none() => self.activate(id),
            _ => {},
        }
        id
    }

    fn clear(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel_timers();
        }
        self.slots.clear();
        self.order.clear();
        self.active = None;
        self.effects.push(Effect::Clear);
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self
                .order
                .iter()
                .filter_map(|id| self.slots.get(id).map(|s| s.item.clone()))
                .collect(),
            active_id: self.active,
            paused: self.paused,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    /// Held while effects are delivered so sinks see them in order.
    emit: Mutex<()>,
    sink: Arc<dyn PresentationSink>,
    observers: RwLock<Vec<ChangeFn>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, item: ItemId, kind: TimerKind, timer_id: u64) {
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(&item) else {
            trace!(item = %item, ?kind, "timer fired for removed item");
            return;
        };
        let timer = match kind {
            TimerKind::Advance => &mut slot.advance,
            TimerKind::Expire => &mut slot.expire,
        };
        if timer.as_ref().map(|t| t.id) != Some(timer_id) {
            trace!(item = %item, ?kind, timer_id, "stale timer ignored");
            return;
        }
        // This task is the timer; detach rather than abort it.
        timer.take();

        match kind {
            TimerKind::Advance => {
                if state.active == Some(item) {
                    state.advance(item);
                }
            },
            TimerKind::Expire => {
                state.remove(item, Removal::Expired);
            },
        }
        self.flush(state);
    }

    /// Deliver queued effects and notify observers, outside the state lock.
    fn flush(&self, mut state: MutexGuard<'_, State>) {
        let effects = std::mem::take(&mut state.effects);
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let snapshot = (!observers.is_empty()).then(|| state.snapshot());
        #[cfg(feature = "metrics")]
        gauge!(display_metrics::QUEUE_LENGTH).set(state.order.len() as f64);

        let _emit = self.emit.lock().unwrap_or_else(|e| e.into_inner());
        drop(state);

        for effect in effects {
            match effect {
                Effect::Show(id, message) => self.sink.show(id.0, &message),
                Effect::FadeOut(id, fade_ms) => self.sink.fade_out(id.0, fade_ms),
                Effect::Clear => self.sink.clear(),
            }
        }
        if let Some(snapshot) = snapshot {
            for observer in &observers {
                observer(&snapshot);
            }
        }
    }
}

/// Timed queue of messages waiting to be shown.
///
/// Cheap to clone; clones share one queue. Must be used from within a tokio
/// runtime, since every item schedules its timers as tasks. Sink and
/// observer callbacks run on the caller's thread after the queue has been
/// updated and must not mutate the queue themselves.
#[derive(Clone)]
pub struct DisplayQueue {
    shared: Arc<Shared>,
}

impl DisplayQueue {
    pub fn new(settings: DisplaySettings, sink: Arc<dyn PresentationSink>) -> Self {
        let shared = Arc::new_cyclic(|home| Shared {
            state: Mutex::new(State {
                home: home.clone(),
                settings,
                slots: HashMap::new(),
                order: VecDeque::new(),
                active: None,
                paused: false,
                next_item: 0,
                next_timer: 0,
                effects: Vec::new(),
            }),
            emit: Mutex::new(()),
            sink,
            observers: RwLock::new(Vec::new()),
        });
        Self { shared }
    }

    pub fn enqueue(&self, message: NormalizedMessage) -> ItemId {
        let mut state = self.shared.lock();
        let id = state.enqueue(message);
        debug!(item = %id, len = state.order.len(), "enqueued");
        #[cfg(feature = "metrics")]
        counter!(display_metrics::ITEMS_ENQUEUED_TOTAL).increment(1);
        self.shared.flush(state);
        id
    }

    /// Queue app-generated text, attributed to [`SYSTEM_AUTHOR`].
    pub fn enqueue_text(&self, text: impl Into<String>) -> ItemId {
        let now = now_ms();
        self.enqueue(NormalizedMessage {
            text: text.into(),
            author: SYSTEM_AUTHOR.to_owned(),
            author_icon: None,
            user_id: String::new(),
            channel_id: String::new(),
            source_ts: format!("{}.{:06}", now / 1_000, (now % 1_000) * 1_000),
        })
    }

    /// Stop the clock on the active item. Returns `false` if already paused.
    ///
    /// New items are still queued while paused; one that becomes active is
    /// shown and held until [`DisplayQueue::resume`].
    pub fn pause(&self) -> bool {
        let mut state = self.shared.lock();
        if !state.pause() {
            return false;
        }
        debug!(active = ?state.active, "queue paused");
        self.shared.flush(state);
        true
    }

    /// Restart the active item's display period. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.shared.lock();
        if !state.resume() {
            return false;
        }
        debug!(active = ?state.active, "queue resumed");
        self.shared.flush(state);
        true
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Drop an item and cancel its timers. `false` if it was not queued.
    pub fn remove(&self, id: ItemId) -> bool {
        let mut state = self.shared.lock();
        if !state.remove(id, Removal::Requested) {
            return false;
        }
        self.shared.flush(state);
        true
    }

    pub fn clear(&self) {
        let mut state = self.shared.lock();
        state.clear();
        debug!("queue cleared");
        self.shared.flush(state);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn state(&self) -> QueueState {
        let state = self.shared.lock();
        queue_state(state.active, state.paused)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> DisplaySettings {
        self.shared.lock().settings.clone()
    }

    /// New settings apply from the next enqueue on.
    pub fn update_settings(&self, settings: DisplaySettings) {
        debug!(?settings, "display settings updated");
        self.shared.lock().settings = settings;
    }

    pub fn on_change(&self, observer: impl Fn(&QueueSnapshot) + Send + Sync + 'static) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }
}

#[async_trait]
impl MessageSink for DisplayQueue {
    async fn deliver(&self, message: NormalizedMessage) {
        self.enqueue(message);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Drawn {
        Show(u64, String),
        Fade(u64),
        Clear,
    }

    #[derive(Default)]
    struct Screen(Mutex<Vec<Drawn>>);

    impl Screen {
        fn take(&self) -> Vec<Drawn> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl PresentationSink for Screen {
        fn show(&self, item_id: u64, message: &NormalizedMessage) {
            self.0
                .lock()
                .unwrap()
                .push(Drawn::Show(item_id, message.text.clone()));
        }

        fn fade_out(&self, item_id: u64, _fade_ms: u64) {
            self.0.lock().unwrap().push(Drawn::Fade(item_id));
        }

        fn clear(&self) {
            self.0.lock().unwrap().push(Drawn::Clear);
        }
    }

    fn msg(text: &str) -> NormalizedMessage {
        NormalizedMessage {
            text: text.into(),
            author: "alice".into(),
            author_icon: None,
            user_id: "U1".into(),
            channel_id: "C1".into(),
            source_ts: "1.0".into(),
        }
    }

    fn queue(policy: QueuePolicy, max_items: usize) -> (DisplayQueue, Arc<Screen>) {
        let screen = Arc::new(Screen::default());
        let settings = DisplaySettings {
            display_ms: 3_000,
            fade_ms: 500,
            max_items,
            policy,
        };
        (DisplayQueue::new(settings, screen.clone()), screen)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn show(id: u64, text: &str) -> Drawn {
        Drawn::Show(id, text.into())
    }

    #[tokio::test(start_paused = true)]
    async fn newest_item_preempts() {
        let (q, screen) = queue(QueuePolicy::JumpToLatest, 50);
        q.enqueue(msg("a"));
        wait(1_000).await;
        q.enqueue(msg("b"));
        assert_eq!(screen.take(), [show(1, "a"), Drawn::Fade(1), show(2, "b")]);

        // a's original advance time passes without effect.
        wait(2_500).await;
        assert!(screen.take().is_empty());
        assert_eq!(q.snapshot().active_id, Some(ItemId(2)));

        wait(1_000).await;
        assert_eq!(screen.take(), [Drawn::Fade(2), Drawn::Clear]);
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_then_remove_leaves_nothing_behind() {
        let (q, screen) = queue(QueuePolicy::JumpToLatest, 50);
        let id = q.enqueue(msg("x"));
        assert!(q.remove(id));
        assert!(!q.remove(id));
        assert!(q.is_empty());
        assert_eq!(q.state(), QueueState::Idle);
        screen.take();

        wait(10_000).await;
        assert!(screen.take().is_empty());
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_evicts_oldest_in_order() {
        let (q, _screen) = queue(QueuePolicy::JumpToLatest, 3);
        for text in ["a", "b", "c"] {
            q.enqueue(msg(text));
        }
        q.enqueue(msg("d"));

        let snap = q.snapshot();
        assert_eq!(snap.ids(), [ItemId(2), ItemId(3), ItemId(4)]);
        assert_eq!(snap.active_id, Some(ItemId(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn evicting_the_active_item_moves_on() {
        let (q, screen) = queue(QueuePolicy::Sequential, 2);
        q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        q.enqueue(msg("c"));

        assert_eq!(q.snapshot().ids(), [ItemId(2), ItemId(3)]);
        assert_eq!(screen.take(), [show(1, "a"), show(2, "b")]);
        assert_eq!(q.snapshot().active_id, Some(ItemId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_plays_in_arrival_order() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        assert_eq!(screen.take(), [show(1, "a")]);

        wait(3_001).await;
        assert_eq!(screen.take(), [Drawn::Fade(1), show(2, "b")]);

        // a expires after display + fade.
        wait(500).await;
        assert_eq!(q.snapshot().ids(), [ItemId(2)]);

        wait(2_500).await;
        assert_eq!(screen.take(), [Drawn::Fade(2), Drawn::Clear]);
        wait(500).await;
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn item_expires_after_display_and_fade() {
        let (q, _screen) = queue(QueuePolicy::JumpToLatest, 50);
        q.enqueue(msg("a"));

        wait(3_001).await;
        let snap = q.snapshot();
        assert_eq!(snap.items[0].state, ItemState::Fading);
        assert_eq!(snap.state(), QueueState::Idle);

        wait(498).await;
        assert_eq!(q.len(), 1);
        wait(2).await;
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_is_not_retroactive() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        q.enqueue(msg("a"));
        q.update_settings(DisplaySettings {
            display_ms: 1_000,
            fade_ms: 100,
            max_items: 50,
            policy: QueuePolicy::Sequential,
        });
        q.enqueue(msg("b"));
        screen.take();

        wait(2_999).await;
        assert!(screen.take().is_empty());
        wait(2).await;
        assert_eq!(screen.take(), [Drawn::Fade(1), show(2, "b")]);
        wait(1_000).await;
        assert_eq!(screen.take(), [Drawn::Fade(2), Drawn::Clear]);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_active_item_cancels_its_timer() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        let a = q.enqueue(msg("a"));
        wait(1_000).await;
        q.enqueue(msg("b"));
        assert!(q.remove(a));
        assert_eq!(screen.take(), [show(1, "a"), show(2, "b")]);

        // a's advance would have fired at 3s; b runs its own full 3s.
        wait(2_500).await;
        assert!(screen.take().is_empty());
        wait(501).await;
        assert_eq!(screen.take(), [Drawn::Fade(2), Drawn::Clear]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_everything() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        q.clear();
        assert!(q.is_empty());
        assert_eq!(screen.take(), [show(1, "a"), Drawn::Clear]);

        wait(10_000).await;
        assert!(screen.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_every_change() {
        let (q, _screen) = queue(QueuePolicy::JumpToLatest, 50);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        q.on_change(move |snap| {
            sink.lock().unwrap().push((snap.items.len(), snap.active_id));
        });

        let a = q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        q.remove(a);
        wait(3_600).await;

        assert_eq!(*seen.lock().unwrap(), [
            (1, Some(ItemId(1))),
            (2, Some(ItemId(2))),
            (1, Some(ItemId(2))),
            (1, None),
            (0, None),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_active_item_until_resume() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        wait(2_000).await;
        assert!(q.pause());
        assert!(!q.pause());
        assert_eq!(q.state(), QueueState::Paused);
        screen.take();

        // Neither advance (3s) nor expiry (3.5s) fires while paused.
        wait(10_000).await;
        assert!(screen.take().is_empty());
        assert_eq!(q.snapshot().active_id, Some(ItemId(1)));
        assert_eq!(q.len(), 2);

        assert!(q.resume());
        assert!(!q.resume());
        assert_eq!(q.state(), QueueState::Playing);
        wait(2_999).await;
        assert!(screen.take().is_empty());
        wait(2).await;
        assert_eq!(screen.take(), [Drawn::Fade(1), show(2, "b")]);
        wait(500).await;
        assert_eq!(q.snapshot().ids(), [ItemId(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn items_arriving_while_paused_are_held() {
        let (q, screen) = queue(QueuePolicy::Sequential, 50);
        q.pause();
        q.enqueue(msg("a"));
        assert_eq!(screen.take(), [show(1, "a")]);
        assert_eq!(q.state(), QueueState::Paused);

        wait(10_000).await;
        assert!(screen.take().is_empty());
        assert_eq!(q.snapshot().items[0].state, ItemState::Showing);

        q.resume();
        wait(3_001).await;
        assert_eq!(screen.take(), [Drawn::Fade(1), Drawn::Clear]);
        wait(500).await;
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_pause_state() {
        let (q, _screen) = queue(QueuePolicy::JumpToLatest, 50);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        q.on_change(move |snap| sink.lock().unwrap().push(snap.state()));

        q.enqueue(msg("a"));
        q.pause();
        q.resume();
        assert_eq!(*seen.lock().unwrap(), [
            QueueState::Playing,
            QueueState::Paused,
            QueueState::Playing,
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn plain_text_is_attributed_to_system() {
        let (q, screen) = queue(QueuePolicy::JumpToLatest, 50);
        let id = q.enqueue_text("reconnecting");
        assert_eq!(screen.take(), [show(1, "reconnecting")]);

        let item = q.snapshot().items.into_iter().find(|i| i.id == id).unwrap();
        assert_eq!(item.message.author, SYSTEM_AUTHOR);
        assert!(item.message.user_id.is_empty());
        assert!(item.message.channel_id.is_empty());
        assert!(item.message.author_icon.is_none());
        let (secs, micros) = item.message.source_ts.split_once('.').unwrap();
        assert!(secs.parse::<u64>().unwrap() > 0);
        assert_eq!(micros.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_through_message_sink() {
        let (q, screen) = queue(QueuePolicy::JumpToLatest, 50);
        let sink: Arc<dyn MessageSink> = Arc::new(q.clone());
        sink.deliver(msg("hello")).await;
        assert_eq!(screen.take(), [show(1, "hello")]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn snapshot_serializes_for_observers() {
        let snap = QueueSnapshot {
            items: vec![],
            active_id: Some(ItemId(7)),
            paused: true,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["active_id"], 7);
        assert_eq!(json["paused"], true);
        assert_eq!(snap.state(), QueueState::Paused);
    }
}
