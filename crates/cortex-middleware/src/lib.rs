//! `cortex-middleware` – The Nervous System
//!
//! Moves messages from arbitrary producer threads into the single-threaded
//! tick loop without caring about their meaning.
//!
//! # Modules
//!
//! - [`hub`] – [`MessageHub`]: per-category producer dispatcher. Producer
//!   threads publish tagged messages; subscribers register callbacks by tag
//!   and unregister by dropping a [`SourceSubscription`].
//! - [`event_tracker`] – [`EventTracker`]: four independently locked
//!   append-only event lanes, swapped out once per tick into an immutable,
//!   per-subscriber indexed [`TrackerSnapshot`].
//! - [`message_gate`] – [`AsyncMessageGate`]: owns the active tracker and the
//!   cached snapshot, exposing subscribe-by-tag and fetch-by-subscriber under
//!   a strict `prepare_cache` → reads → `clear_cache` tick contract.

pub mod event_tracker;
pub mod hub;
pub mod message_gate;

pub use event_tracker::{
    EventTracker, SubscriberId, SubscriptionTable, TrackerSnapshot, UnindexedSnapshot,
};
pub use hub::{MessageCallback, MessageHub, MessageSource, SourceSubscription};
pub use message_gate::{AsyncMessageGate, GateSources, GateSubscription};
