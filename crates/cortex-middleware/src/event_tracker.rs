//! [`EventTracker`] – thread-safe event capture with a per-tick swap.
//!
//! Producer threads [`push`][EventTracker::push] into one of four lanes, each
//! behind its own mutex, so a burst on one category never stalls producers
//! of another. Once per tick the consumer calls
//! [`swap`][EventTracker::swap], which takes every lane's accumulated list
//! (holding each lock only for a `mem::take`) and returns an
//! [`UnindexedSnapshot`].
//!
//! Index building happens afterwards, unlocked, and consumes the unindexed
//! snapshot: a [`TrackerSnapshot`] is the only type exposing per-subscriber
//! lookups, so an index can never be read while it is still being built.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use cortex_types::{Event, MessageCategory, MessageTag};

// ─────────────────────────────────────────────────────────────────────────────
// Subscriber identity
// ─────────────────────────────────────────────────────────────────────────────

/// Handle of a registered subscriber (a behavior instance).
///
/// Ids are handed out by the gate and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SubscriptionTable
// ─────────────────────────────────────────────────────────────────────────────

/// Registered interest, per category: tag → subscribers.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionTable {
    lanes: [HashMap<MessageTag, BTreeSet<SubscriberId>>; MessageCategory::COUNT],
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest. Returns `false` if it was already recorded.
    pub fn insert(&mut self, subscriber: SubscriberId, category: MessageCategory, tag: MessageTag) -> bool {
        self.lanes[category.index()]
            .entry(tag)
            .or_default()
            .insert(subscriber)
    }

    /// Forget interest. Returns `false` if there was none.
    pub fn remove(&mut self, subscriber: SubscriberId, category: MessageCategory, tag: &MessageTag) -> bool {
        let lane = &mut self.lanes[category.index()];
        let Some(set) = lane.get_mut(tag) else {
            return false;
        };
        let removed = set.remove(&subscriber);
        if set.is_empty() {
            lane.remove(tag);
        }
        removed
    }

    /// `true` while at least one subscriber wants `tag` in `category`.
    pub fn is_tag_subscribed(&self, category: MessageCategory, tag: &MessageTag) -> bool {
        self.lanes[category.index()].contains_key(tag)
    }

    /// Subscribers interested in `tag`, in id order.
    pub fn subscribers(&self, category: MessageCategory, tag: &MessageTag) -> impl Iterator<Item = SubscriberId> + '_ {
        self.lanes[category.index()]
            .get(tag)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventTracker
// ─────────────────────────────────────────────────────────────────────────────

/// Write side of the gate: four independently locked append-only lanes.
#[derive(Default)]
pub struct EventTracker {
    lanes: [Mutex<Vec<Arc<Event>>>; MessageCategory::COUNT],
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` to its category lane. Callable from any thread.
    pub fn push(&self, event: Event) {
        let lane = &self.lanes[event.category.index()];
        lane.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(event));
    }

    /// Number of events accumulated in `category` since the last swap.
    pub fn pending(&self, category: MessageCategory) -> usize {
        self.lanes[category.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Move every lane's events out, leaving empty lanes behind.
    ///
    /// Each lane is locked only for the swap itself.
    pub fn swap(&self) -> UnindexedSnapshot {
        let events = std::array::from_fn(|i| {
            mem::take(&mut *self.lanes[i].lock().unwrap_or_else(PoisonError::into_inner))
        });
        UnindexedSnapshot { events }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Events swapped out of an [`EventTracker`], not yet indexed.
#[derive(Debug, Default)]
pub struct UnindexedSnapshot {
    events: [Vec<Arc<Event>>; MessageCategory::COUNT],
}

impl UnindexedSnapshot {
    /// Build the per-subscriber index against `subscriptions`.
    ///
    /// Events are visited in arrival order, so every subscriber's index list
    /// is ascending. Events nobody subscribed to stay in the snapshot but
    /// appear in no index.
    pub fn build_index(self, subscriptions: &SubscriptionTable) -> TrackerSnapshot {
        let mut index: [HashMap<SubscriberId, Vec<usize>>; MessageCategory::COUNT] = Default::default();

        for category in MessageCategory::ALL {
            let lane_index = &mut index[category.index()];
            for (position, event) in self.events[category.index()].iter().enumerate() {
                for subscriber in subscriptions.subscribers(category, &event.tag) {
                    lane_index.entry(subscriber).or_default().push(position);
                }
            }
        }

        TrackerSnapshot {
            events: self.events,
            index,
        }
    }
}

/// Immutable, indexed view of one tick's events.
#[derive(Debug, Default)]
pub struct TrackerSnapshot {
    events: [Vec<Arc<Event>>; MessageCategory::COUNT],
    index: [HashMap<SubscriberId, Vec<usize>>; MessageCategory::COUNT],
}

impl TrackerSnapshot {
    /// Every event of `category` in arrival order, subscribed or not.
    pub fn events(&self, category: MessageCategory) -> &[Arc<Event>] {
        &self.events[category.index()]
    }

    /// Positions in [`events`][Self::events] matching `subscriber`.
    pub fn indices_for(&self, subscriber: SubscriberId, category: MessageCategory) -> &[usize] {
        self.index[category.index()]
            .get(&subscriber)
            .map_or(&[], Vec::as_slice)
    }

    /// The events matching `subscriber` in `category`, in arrival order.
    pub fn events_for(&self, subscriber: SubscriberId, category: MessageCategory) -> Vec<Arc<Event>> {
        let lane = &self.events[category.index()];
        self.indices_for(subscriber, category)
            .iter()
            .map(|&i| Arc::clone(&lane[i]))
            .collect()
    }

    /// Total number of events across all categories.
    pub fn len(&self) -> usize {
        self.events.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
