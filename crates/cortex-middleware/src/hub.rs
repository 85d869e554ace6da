//! Per-category producer dispatcher.
//!
//! A [`MessageHub`] stands for one upstream link (robot process, app
//! gateway, ...). Producer threads call [`MessageHub::publish`]; every
//! callback registered for the message's tag runs synchronously on the
//! producer thread. Callbacks must therefore be short: the gate's callback
//! is a single locked `Vec::push`.
//!
//! Registration returns a [`SourceSubscription`]. Dropping it is the only way
//! to unregister, so a subscriber can never outlive its interest.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use cortex_types::{Event, MessageCategory, MessageTag};
use tracing::{debug, warn};

/// Callback invoked on the producer thread for every matching message.
pub type MessageCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// An upstream message source the gate can attach to.
pub trait MessageSource: Send + Sync {
    /// The lane every message of this source belongs to.
    fn category(&self) -> MessageCategory;

    /// Register `callback` for messages tagged `tag`.
    fn subscribe(&self, tag: MessageTag, callback: MessageCallback) -> SourceSubscription;
}

// ─────────────────────────────────────────────────────────────────────────────
// SourceSubscription
// ─────────────────────────────────────────────────────────────────────────────

/// RAII registration handle: dropping it unregisters the callback.
pub struct SourceSubscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SourceSubscription {
    /// Wrap the closure that undoes a registration.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle that owns no registration.
    pub fn inert() -> Self {
        Self { release: None }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SourceSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MessageHub
// ─────────────────────────────────────────────────────────────────────────────

type HandlerTable = HashMap<MessageTag, Vec<(u64, MessageCallback)>>;

#[derive(Default)]
struct HubInner {
    handlers: Mutex<HandlerTable>,
    next_id: AtomicU64,
}

impl HubInner {
    fn remove(&self, tag: &MessageTag, id: u64) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(tag) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(tag);
            }
        }
    }
}

/// Shared producer-side dispatcher for one [`MessageCategory`]. Clone it
/// cheaply – all clones share the same handler table.
#[derive(Clone)]
pub struct MessageHub {
    category: MessageCategory,
    inner: Arc<HubInner>,
}

impl MessageHub {
    pub fn new(category: MessageCategory) -> Self {
        Self {
            category,
            inner: Arc::new(HubInner::default()),
        }
    }

    /// Publish a message from the calling thread.
    ///
    /// Returns the number of callbacks that were handed the event. `0` is a
    /// normal condition: nobody is interested in this tag.
    pub fn publish(&self, tag: impl Into<MessageTag>, payload: serde_json::Value) -> usize {
        self.publish_event(Event::new(self.category, tag, payload))
    }

    /// Publish an already built event. Events stamped with another category
    /// are dropped.
    pub fn publish_event(&self, event: Event) -> usize {
        if event.category != self.category {
            warn!(
                hub = %self.category,
                event_category = %event.category,
                tag = %event.tag,
                "MessageHub dropped an event from another category"
            );
            return 0;
        }

        // Snapshot the callbacks so none of them runs under the table lock.
        let callbacks: Vec<MessageCallback> = {
            let handlers = self
                .inner
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&event.tag) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };

        for callback in &callbacks {
            callback(&event);
        }
        callbacks.len()
    }

    /// Number of callbacks currently registered for `tag`.
    pub fn subscriber_count(&self, tag: &MessageTag) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .map_or(0, Vec::len)
    }
}

impl MessageSource for MessageHub {
    fn category(&self) -> MessageCategory {
        self.category
    }

    fn subscribe(&self, tag: MessageTag, callback: MessageCallback) -> SourceSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag.clone())
            .or_default()
            .push((id, callback));
        debug!(category = %self.category, tag = %tag, id, "hub callback registered");

        let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
        SourceSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&tag, id);
            }
        })
    }
}

impl fmt::Debug for MessageHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHub")
            .field("category", &self.category)
            .finish()
    }
}
