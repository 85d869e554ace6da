//! [`AsyncMessageGate`] – per-tick cache of cross-thread messages.
//!
//! The gate owns two views of the message stream:
//!
//! * the **active** [`EventTracker`], written by producer-thread callbacks
//!   registered on the upstream [`MessageSource`]s, and
//! * the **cached** [`TrackerSnapshot`], a read-only, per-subscriber indexed
//!   copy of everything that arrived before the current tick started.
//!
//! # Tick contract
//!
//! ```text
//! Uninitialized ──prepare_cache(tick)──▶ Valid ──clear_cache()──▶ Uninitialized
//! ```
//!
//! [`get_events_for_behavior`][AsyncMessageGate::get_events_for_behavior] is
//! only legal in `Valid`. Breaking the contract is a programmer error: it
//! panics in debug builds and is logged and ignored in release builds.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cortex_middleware::{AsyncMessageGate, GateSources, MessageHub};
//! use cortex_types::MessageCategory;
//!
//! let robot = MessageHub::new(MessageCategory::RobotToEngine);
//! let mut gate = AsyncMessageGate::new(GateSources::new().with(Arc::new(robot.clone())));
//!
//! let behavior = gate.register_subscriber("react_to_cliff");
//! let _sub = gate.subscribe(behavior, MessageCategory::RobotToEngine, ["cliff_detected"]);
//!
//! robot.publish("cliff_detected", serde_json::json!({ "sensor": 2 }));
//! robot.publish("battery_low", serde_json::Value::Null);
//!
//! gate.prepare_cache(1);
//! let events = gate.get_events_for_behavior(behavior, MessageCategory::RobotToEngine);
//! assert_eq!(events.len(), 1);
//! gate.clear_cache();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use cortex_types::{Event, MessageCategory, MessageTag};
use tracing::{debug, error, instrument, trace};

use crate::event_tracker::{EventTracker, SubscriberId, SubscriptionTable, TrackerSnapshot};
use crate::hub::{MessageCallback, MessageSource, SourceSubscription};

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// The upstream producer for each category, if any.
#[derive(Clone, Default)]
pub struct GateSources {
    sources: [Option<Arc<dyn MessageSource>>; MessageCategory::COUNT],
}

impl GateSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `source` to the lane it reports via
    /// [`MessageSource::category`], replacing any previous one.
    pub fn with(mut self, source: Arc<dyn MessageSource>) -> Self {
        let index = source.category().index();
        self.sources[index] = Some(source);
        self
    }

    pub fn get(&self, category: MessageCategory) -> Option<&Arc<dyn MessageSource>> {
        self.sources[category.index()].as_ref()
    }
}

impl fmt::Debug for GateSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached: Vec<MessageCategory> = MessageCategory::ALL
            .into_iter()
            .filter(|c| self.get(*c).is_some())
            .collect();
        f.debug_struct("GateSources").field("attached", &attached).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GateRegistry {
    table: SubscriptionTable,
    /// One upstream registration per subscribed (category, tag).
    upstream: HashMap<(MessageCategory, MessageTag), SourceSubscription>,
    labels: BTreeMap<SubscriberId, String>,
    next_subscriber: u64,
}

struct GateShared {
    active: Arc<EventTracker>,
    sources: GateSources,
    registry: Mutex<GateRegistry>,
}

impl GateShared {
    fn registry(&self) -> std::sync::MutexGuard<'_, GateRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CachedSnapshot {
    tick: u64,
    snapshot: TrackerSnapshot,
}

// ─────────────────────────────────────────────────────────────────────────────
// GateSubscription
// ─────────────────────────────────────────────────────────────────────────────

/// Scoped interest of one subscriber in a set of tags.
///
/// Dropping it removes the interest; the upstream callback for a tag is
/// unregistered once no subscriber wants that tag anymore.
#[must_use = "dropping a GateSubscription immediately unsubscribes"]
pub struct GateSubscription {
    shared: Weak<GateShared>,
    subscriber: SubscriberId,
    category: MessageCategory,
    tags: Vec<MessageTag>,
}

impl GateSubscription {
    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }

    /// Tags this handle registered. Tags the subscriber already held, or all
    /// tags when the category has no upstream source, are not included.
    pub fn tags(&self) -> &[MessageTag] {
        &self.tags
    }
}

impl Drop for GateSubscription {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        // Released after the registry lock so the hub lock is never nested.
        let mut released = Vec::new();
        {
            let mut registry = shared.registry();
            for tag in self.tags.drain(..) {
                registry.table.remove(self.subscriber, self.category, &tag);
                if !registry.table.is_tag_subscribed(self.category, &tag) {
                    if let Some(upstream) = registry.upstream.remove(&(self.category, tag.clone())) {
                        released.push(upstream);
                    }
                    debug!(category = %self.category, tag = %tag, "last subscriber left, upstream released");
                }
            }
        }
        drop(released);
    }
}

impl fmt::Debug for GateSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSubscription")
            .field("subscriber", &self.subscriber)
            .field("category", &self.category)
            .field("tags", &self.tags)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AsyncMessageGate
// ─────────────────────────────────────────────────────────────────────────────

/// Caches cross-thread messages per tick and serves them per subscriber.
pub struct AsyncMessageGate {
    shared: Arc<GateShared>,
    cache: Option<CachedSnapshot>,
}

impl AsyncMessageGate {
    /// Build a gate wired to explicit upstream sources. Categories without a
    /// source accept subscriptions but never produce events.
    pub fn new(sources: GateSources) -> Self {
        Self {
            shared: Arc::new(GateShared {
                active: Arc::new(EventTracker::new()),
                sources,
                registry: Mutex::new(GateRegistry::default()),
            }),
            cache: None,
        }
    }

    /// Allocate a fresh subscriber handle. `label` is kept for diagnostics.
    pub fn register_subscriber(&self, label: impl Into<String>) -> SubscriberId {
        let mut registry = self.shared.registry();
        registry.next_subscriber += 1;
        let id = SubscriberId::new(registry.next_subscriber);
        registry.labels.insert(id, label.into());
        id
    }

    /// Diagnostic label given at registration.
    pub fn subscriber_label(&self, subscriber: SubscriberId) -> Option<String> {
        self.shared.registry().labels.get(&subscriber).cloned()
    }

    /// Subscribe `subscriber` to `tags` in `category`.
    ///
    /// Idempotent per (subscriber, tag). The first interest in a tag
    /// registers one producer-side callback that pushes matching messages
    /// into the active tracker. If the category has no upstream source this
    /// is a no-op and the returned handle is inert.
    pub fn subscribe<I, T>(&self, subscriber: SubscriberId, category: MessageCategory, tags: I) -> GateSubscription
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageTag>,
    {
        let mut handle = GateSubscription {
            shared: Arc::downgrade(&self.shared),
            subscriber,
            category,
            tags: Vec::new(),
        };

        let Some(source) = self.shared.sources.get(category) else {
            debug!(%subscriber, %category, "no upstream source for category, subscription ignored");
            return handle;
        };

        let mut registry = self.shared.registry();
        for tag in tags.into_iter().map(Into::into) {
            if !registry.table.insert(subscriber, category, tag.clone()) {
                trace!(%subscriber, %category, tag = %tag, "already subscribed");
                continue;
            }
            let key = (category, tag.clone());
            if !registry.upstream.contains_key(&key) {
                let tracker = Arc::clone(&self.shared.active);
                let callback: MessageCallback = Arc::new(move |event: &Event| tracker.push(event.clone()));
                let upstream = source.subscribe(tag.clone(), callback);
                registry.upstream.insert(key, upstream);
            }
            debug!(%subscriber, %category, tag = %tag, "subscribed");
            handle.tags.push(tag);
        }
        handle
    }

    /// Swap the active tracker and index it against every subscription.
    ///
    /// Must be called exactly once per tick, before any read. Returns `false`
    /// (and panics in debug builds) if the previous cache was never cleared.
    #[instrument(level = "trace", skip(self))]
    pub fn prepare_cache(&mut self, tick: u64) -> bool {
        if let Some(cached) = &self.cache {
            report_misuse(format!(
                "AsyncMessageGate::prepare_cache called at tick {tick} while the cache from tick {} is still valid",
                cached.tick
            ));
            return false;
        }

        let unindexed = self.shared.active.swap();
        let snapshot = {
            let registry = self.shared.registry();
            unindexed.build_index(&registry.table)
        };
        trace!(tick, events = snapshot.len(), "gate cache prepared");
        self.cache = Some(CachedSnapshot { tick, snapshot });
        true
    }

    /// Events of `category` matching `subscriber`, in arrival order.
    ///
    /// Empty when nothing matched. Calling it without a prepared cache is a
    /// programmer error (panic in debug builds, empty result in release).
    pub fn get_events_for_behavior(&self, subscriber: SubscriberId, category: MessageCategory) -> Vec<Arc<Event>> {
        match &self.cache {
            Some(cached) => cached.snapshot.events_for(subscriber, category),
            None => {
                report_misuse(format!(
                    "AsyncMessageGate::get_events_for_behavior called for {subscriber} before prepare_cache"
                ));
                Vec::new()
            }
        }
    }

    /// Every cached event of `category`, subscribed or not. Same validity
    /// rule as [`get_events_for_behavior`][Self::get_events_for_behavior].
    pub fn get_events(&self, category: MessageCategory) -> Vec<Arc<Event>> {
        match &self.cache {
            Some(cached) => cached.snapshot.events(category).to_vec(),
            None => {
                report_misuse(format!(
                    "AsyncMessageGate::get_events called for {category} before prepare_cache"
                ));
                Vec::new()
            }
        }
    }

    /// Discard the cached snapshot, readying the gate for the next tick.
    pub fn clear_cache(&mut self) {
        if self.cache.take().is_none() {
            trace!("clear_cache called with no valid cache");
        }
    }

    pub fn is_cache_valid(&self) -> bool {
        self.cache.is_some()
    }

    /// Tick number the current cache was prepared for.
    pub fn cached_tick(&self) -> Option<u64> {
        self.cache.as_ref().map(|c| c.tick)
    }

    /// Events accumulated in the active tracker for `category`, not yet cached.
    pub fn pending_events(&self, category: MessageCategory) -> usize {
        self.shared.active.pending(category)
    }
}

impl fmt::Debug for AsyncMessageGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMessageGate")
            .field("sources", &self.shared.sources)
            .field("cached_tick", &self.cached_tick())
            .finish()
    }
}

/// Programmer-misuse guard: fatal in debug builds, logged in release.
fn report_misuse(message: String) {
    error!("{message}");
    if cfg!(debug_assertions) {
        panic!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MessageHub;
    use serde_json::json;

    fn robot_gate() -> (MessageHub, AsyncMessageGate) {
        let robot = MessageHub::new(MessageCategory::RobotToEngine);
        let gate = AsyncMessageGate::new(GateSources::new().with(Arc::new(robot.clone())));
        (robot, gate)
    }

    #[test]
    fn end_to_end_single_tag_over_two_ticks() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let _sub = gate.subscribe(a, MessageCategory::RobotToEngine, ["X"]);

        robot.publish("X", json!({ "n": 1 }));
        robot.publish("Y", json!({ "n": 2 }));

        assert!(gate.prepare_cache(1));
        let events = gate.get_events_for_behavior(a, MessageCategory::RobotToEngine);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag, MessageTag::from("X"));
        gate.clear_cache();

        assert!(gate.prepare_cache(2));
        assert!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).is_empty());
        gate.clear_cache();
    }

    #[test]
    fn fifo_within_category() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let _sub = gate.subscribe(a, MessageCategory::RobotToEngine, ["pose", "cliff"]);

        for n in 0..10 {
            robot.publish(if n % 3 == 0 { "cliff" } else { "pose" }, json!({ "n": n }));
        }
        gate.prepare_cache(1);
        let ns: Vec<i64> = gate
            .get_events_for_behavior(a, MessageCategory::RobotToEngine)
            .iter()
            .filter_map(|e| e.payload["n"].as_i64())
            .collect();
        assert_eq!(ns, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn disjoint_subscribers_are_isolated() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let b = gate.register_subscriber("b");
        let _sa = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff"]);
        let _sb = gate.subscribe(b, MessageCategory::RobotToEngine, ["battery"]);

        robot.publish("cliff", json!({}));
        robot.publish("battery", json!({}));
        robot.publish("cliff", json!({}));
        gate.prepare_cache(1);

        let for_a = gate.get_events_for_behavior(a, MessageCategory::RobotToEngine);
        let for_b = gate.get_events_for_behavior(b, MessageCategory::RobotToEngine);
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_b.len(), 1);
        assert!(for_a.iter().all(|ea| for_b.iter().all(|eb| ea.id != eb.id)));
    }

    #[test]
    fn events_published_before_subscription_are_not_captured() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        robot.publish("cliff", json!({}));
        let _sub = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff"]);

        gate.prepare_cache(1);
        assert!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).is_empty());
    }

    #[test]
    fn dropping_subscription_releases_upstream_only_after_last_subscriber() {
        let (robot, gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let b = gate.register_subscriber("b");
        let sa = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff"]);
        let sb = gate.subscribe(b, MessageCategory::RobotToEngine, ["cliff"]);
        assert_eq!(robot.subscriber_count(&"cliff".into()), 1);

        drop(sa);
        assert_eq!(robot.subscriber_count(&"cliff".into()), 1);
        drop(sb);
        assert_eq!(robot.subscriber_count(&"cliff".into()), 0);
    }

    #[test]
    fn subscribe_is_idempotent_per_subscriber_and_tag() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let first = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff", "cliff"]);
        let second = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff"]);
        assert_eq!(first.tags().len(), 1);
        assert!(second.tags().is_empty());

        robot.publish("cliff", json!({}));
        gate.prepare_cache(1);
        assert_eq!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).len(), 1);
    }

    #[test]
    fn missing_source_makes_subscribe_a_noop() {
        let (_robot, gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let sub = gate.subscribe(a, MessageCategory::AppToEngine, ["app_intent"]);
        assert!(sub.tags().is_empty());
    }

    #[test]
    fn category_wide_view_keeps_unsubscribed_events() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let sub = gate.subscribe(a, MessageCategory::RobotToEngine, ["cliff", "battery"]);

        robot.publish("battery", json!({}));
        drop(sub);
        gate.prepare_cache(1);
        assert_eq!(gate.get_events(MessageCategory::RobotToEngine).len(), 1);
        assert!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).is_empty());
    }

    #[test]
    fn producer_threads_feed_the_next_tick() {
        let (robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let _sub = gate.subscribe(a, MessageCategory::RobotToEngine, ["pose"]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let robot = robot.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        robot.publish("pose", json!({ "n": n }));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        gate.prepare_cache(1);
        assert_eq!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).len(), 400);
        assert_eq!(gate.cached_tick(), Some(1));
    }

    #[test]
    fn subscriber_labels_are_kept() {
        let (_robot, gate) = robot_gate();
        let a = gate.register_subscriber("react_to_cliff");
        assert_eq!(gate.subscriber_label(a).as_deref(), Some("react_to_cliff"));
    }

    #[test]
    fn clear_without_cache_is_harmless() {
        let (_robot, mut gate) = robot_gate();
        gate.clear_cache();
        assert!(!gate.is_cache_valid());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "prepare_cache")]
    fn double_prepare_panics_in_debug() {
        let (_robot, mut gate) = robot_gate();
        gate.prepare_cache(1);
        gate.prepare_cache(2);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "before prepare_cache")]
    fn read_before_prepare_panics_in_debug() {
        let (_robot, gate) = robot_gate();
        let a = gate.register_subscriber("a");
        let _ = gate.get_events_for_behavior(a, MessageCategory::RobotToEngine);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn misuse_is_a_noop_in_release() {
        let (_robot, mut gate) = robot_gate();
        let a = gate.register_subscriber("a");
        assert!(gate.get_events_for_behavior(a, MessageCategory::RobotToEngine).is_empty());
        assert!(gate.prepare_cache(1));
        assert!(!gate.prepare_cache(2));
        assert_eq!(gate.cached_tick(), Some(1));
    }
}
