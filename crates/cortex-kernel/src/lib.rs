//! `cortex-kernel` – Rules & Arbitration
//!
//! Decides which user intent the behavior layer gets to see, and for how
//! long. Nothing in here runs on a producer thread except
//! [`CloudIntentInbox::post`].
//!
//! # Modules
//!
//! - [`intent_map`] – [`IntentMap`][intent_map::IntentMap]: static table
//!   mapping external cloud/app intent names to internal
//!   [`UserIntentTag`][cortex_types::UserIntentTag]s, with field-rename and
//!   numeric-coercion rules. Validated once at load.
//! - [`watchdog`] – [`TickWatchdog`][watchdog::TickWatchdog]: tick-based
//!   staleness assessment for single-value slots (warn, then force-clear).
//! - [`cloud_inbox`] – [`CloudIntentInbox`][cloud_inbox::CloudIntentInbox]:
//!   single-slot mailbox the cloud receiver thread writes raw messages into.
//! - [`user_intent_component`] –
//!   [`UserIntentComponent`][user_intent_component::UserIntentComponent]:
//!   the one-pending / one-active intent arbitrator with self-healing
//!   timeouts.

pub mod cloud_inbox;
pub mod intent_map;
pub mod user_intent_component;
pub mod watchdog;

pub use cloud_inbox::{CloudIntentInbox, CloudMessage};
pub use intent_map::{FieldRename, IntentChannel, IntentMap, IntentMapConfig, IntentMapEntry};
pub use user_intent_component::UserIntentComponent;
pub use watchdog::{SlotHealth, TickWatchdog};
