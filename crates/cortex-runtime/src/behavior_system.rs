//! Behavior host and fixed-rate tick driver.
//!
//! A [`BehaviorSystem`] owns everything the tick thread touches: the
//! [`AsyncMessageGate`], the [`UserIntentComponent`] and the hosted
//! [`Behavior`]s. One call to [`BehaviorSystem::tick`] is one tick:
//!
//! 1. `tick += 1`
//! 2. [`UserIntentComponent::update`] (cloud inbox, watchdog)
//! 3. [`AsyncMessageGate::prepare_cache`]
//! 4. trigger-word and app-intent events are forwarded to the arbitrator
//! 5. every behavior ticks, in registration order
//! 6. [`AsyncMessageGate::clear_cache`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cortex_kernel::{IntentMap, TickWatchdog, UserIntentComponent};
//! use cortex_middleware::{AsyncMessageGate, GateSources, MessageHub};
//! use cortex_runtime::BehaviorSystem;
//! use cortex_types::MessageCategory;
//!
//! let robot = MessageHub::new(MessageCategory::RobotToEngine);
//! let gate = AsyncMessageGate::new(GateSources::new().with(Arc::new(robot.clone())));
//! let intents = UserIntentComponent::new(IntentMap::builtin().unwrap(), TickWatchdog::default());
//! let mut system = BehaviorSystem::new(gate, intents);
//!
//! robot.publish("trigger_word_detected", serde_json::json!({ "will_open_stream": true }));
//! let summary = system.tick();
//! assert!(summary.trigger_word_pending);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cortex_kernel::UserIntentComponent;
use cortex_middleware::{AsyncMessageGate, GateSubscription, MessageHub, SubscriberId};
use cortex_types::{AppIntent, Event, MessageCategory, MessageTag, UserIntentTag};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// `RobotToEngine` tag announcing the trigger word. Payload:
/// `{"will_open_stream": bool}`.
pub const TRIGGER_WORD_TAG: &str = "trigger_word_detected";

/// `AppToEngine` tag carrying an [`AppIntent`].
pub const APP_INTENT_TAG: &str = "app_intent";

// ─────────────────────────────────────────────────────────────────────────────
// Behavior
// ─────────────────────────────────────────────────────────────────────────────

/// What a behavior did during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorStatus {
    /// Nothing to react to.
    Idle,
    /// Working on something that spans ticks.
    Running,
    /// Finished a unit of work this tick.
    Success,
    /// Tried and failed this tick.
    Failure,
}

impl fmt::Display for BehaviorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BehaviorStatus::Idle => f.write_str("idle"),
            BehaviorStatus::Running => f.write_str("running"),
            BehaviorStatus::Success => f.write_str("success"),
            BehaviorStatus::Failure => f.write_str("failure"),
        }
    }
}

/// A unit of robot behavior logic, ticked once per tick on the tick thread.
pub trait Behavior: Send {
    /// Unique, human-readable name; used as subscriber label and for removal.
    fn name(&self) -> &str;

    /// Tags this behavior wants to see, per category. Read once when the
    /// behavior is added.
    fn subscriptions(&self) -> Vec<(MessageCategory, Vec<MessageTag>)> {
        Vec::new()
    }

    fn tick(&mut self, ctx: &mut BehaviorContext<'_>) -> BehaviorStatus;
}

/// Per-tick view handed to [`Behavior::tick`].
pub struct BehaviorContext<'a> {
    tick: u64,
    subscriber: SubscriberId,
    gate: &'a AsyncMessageGate,
    intents: &'a mut UserIntentComponent,
    outbox: &'a MessageHub,
}

impl BehaviorContext<'_> {
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// This tick's events in `category` matching the behavior's
    /// subscriptions, in arrival order.
    pub fn events(&self, category: MessageCategory) -> Vec<Arc<Event>> {
        self.gate.get_events_for_behavior(self.subscriber, category)
    }

    pub fn intents(&mut self) -> &mut UserIntentComponent {
        self.intents
    }

    /// Publish an `EngineToGame` message. Returns the number of listeners.
    pub fn emit(&self, tag: impl Into<MessageTag>, payload: serde_json::Value) -> usize {
        self.outbox.publish(tag, payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BehaviorSystem
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one [`BehaviorSystem::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub tick: u64,
    /// Events cached for this tick across all categories.
    pub events_cached: usize,
    /// Status of every behavior, in tick order.
    pub behaviors: Vec<(String, BehaviorStatus)>,
    pub pending_intent: Option<UserIntentTag>,
    pub active_intent: Option<UserIntentTag>,
    pub trigger_word_pending: bool,
}

struct HostedBehavior {
    behavior: Box<dyn Behavior>,
    subscriber: SubscriberId,
    // Dropping these unsubscribes the behavior.
    _subscriptions: Vec<GateSubscription>,
}

/// Hosts behaviors and runs the per-tick sequence.
pub struct BehaviorSystem {
    gate: AsyncMessageGate,
    intents: UserIntentComponent,
    outbox: MessageHub,
    tick: u64,
    system_subscriber: SubscriberId,
    _system_subscriptions: Vec<GateSubscription>,
    behaviors: Vec<HostedBehavior>,
}

impl BehaviorSystem {
    pub fn new(gate: AsyncMessageGate, intents: UserIntentComponent) -> Self {
        let system_subscriber = gate.register_subscriber("behavior_system");
        let system_subscriptions = vec![
            gate.subscribe(system_subscriber, MessageCategory::RobotToEngine, [TRIGGER_WORD_TAG]),
            gate.subscribe(system_subscriber, MessageCategory::AppToEngine, [APP_INTENT_TAG]),
        ];
        Self {
            gate,
            intents,
            outbox: MessageHub::new(MessageCategory::EngineToGame),
            tick: 0,
            system_subscriber,
            _system_subscriptions: system_subscriptions,
            behaviors: Vec::new(),
        }
    }

    /// Register `behavior` and its subscriptions. It ticks after every
    /// behavior added before it.
    pub fn add_behavior(&mut self, behavior: Box<dyn Behavior>) -> SubscriberId {
        let subscriber = self.gate.register_subscriber(behavior.name());
        let subscriptions = behavior
            .subscriptions()
            .into_iter()
            .map(|(category, tags)| self.gate.subscribe(subscriber, category, tags))
            .collect();
        info!(behavior = behavior.name(), %subscriber, "behavior added");
        self.behaviors.push(HostedBehavior {
            behavior,
            subscriber,
            _subscriptions: subscriptions,
        });
        subscriber
    }

    /// Remove the behavior called `name` and drop its subscriptions.
    pub fn remove_behavior(&mut self, name: &str) -> bool {
        match self.behaviors.iter().position(|h| h.behavior.name() == name) {
            Some(index) => {
                let hosted = self.behaviors.remove(index);
                info!(behavior = name, subscriber = %hosted.subscriber, "behavior removed");
                true
            }
            None => {
                warn!(behavior = name, "no such behavior to remove");
                false
            }
        }
    }

    pub fn behavior_names(&self) -> Vec<&str> {
        self.behaviors.iter().map(|h| h.behavior.name()).collect()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn intents(&self) -> &UserIntentComponent {
        &self.intents
    }

    pub fn intents_mut(&mut self) -> &mut UserIntentComponent {
        &mut self.intents
    }

    pub fn gate(&self) -> &AsyncMessageGate {
        &self.gate
    }

    /// Producer handle for `EngineToGame` messages emitted by behaviors.
    pub fn engine_outbox(&self) -> MessageHub {
        self.outbox.clone()
    }

    /// Run one tick.
    #[instrument(level = "debug", skip(self), fields(tick = self.tick + 1))]
    pub fn tick(&mut self) -> TickSummary {
        self.tick += 1;
        let tick = self.tick;

        self.intents.update(tick);
        self.gate.prepare_cache(tick);
        self.forward_system_events();

        let mut statuses = Vec::with_capacity(self.behaviors.len());
        for hosted in &mut self.behaviors {
            let mut ctx = BehaviorContext {
                tick,
                subscriber: hosted.subscriber,
                gate: &self.gate,
                intents: &mut self.intents,
                outbox: &self.outbox,
            };
            let status = hosted.behavior.tick(&mut ctx);
            statuses.push((hosted.behavior.name().to_string(), status));
        }

        let events_cached = MessageCategory::ALL
            .into_iter()
            .map(|category| self.gate.get_events(category).len())
            .sum();
        self.gate.clear_cache();

        TickSummary {
            tick,
            events_cached,
            behaviors: statuses,
            pending_intent: self.intents.pending_intent().map(|d| d.tag()),
            active_intent: self.intents.active_intent().map(|d| d.tag()),
            trigger_word_pending: self.intents.is_trigger_word_pending(),
        }
    }

    fn forward_system_events(&mut self) {
        for event in self
            .gate
            .get_events_for_behavior(self.system_subscriber, MessageCategory::RobotToEngine)
        {
            let will_open_stream = event
                .payload
                .get("will_open_stream")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            self.intents.set_trigger_word_pending(will_open_stream);
        }

        for event in self
            .gate
            .get_events_for_behavior(self.system_subscriber, MessageCategory::AppToEngine)
        {
            match serde_json::from_value::<AppIntent>(event.payload.clone()) {
                Ok(app_intent) => {
                    self.intents.on_app_intent(&app_intent);
                }
                Err(e) => warn!(error = %e, event = %event.id, "malformed app intent payload"),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixed-rate driver
// ─────────────────────────────────────────────────────────────────────────────

/// Tick `system` at `hz` until `shutdown` is raised. `observer` sees the
/// system after every tick. Returns the number of ticks run.
///
/// Ticks that fall behind are skipped rather than bunched up.
pub async fn run_fixed_rate<F>(
    system: &mut BehaviorSystem,
    hz: u32,
    shutdown: Arc<AtomicBool>,
    mut observer: F,
) -> u64
where
    F: FnMut(&BehaviorSystem, &TickSummary),
{
    let hz = hz.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(hz)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(hz, "tick loop started");

    let mut ran = 0;
    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let summary = system.tick();
        debug!(tick = summary.tick, events = summary.events_cached, "tick complete");
        observer(system, &summary);
        ran += 1;
    }

    info!(ticks = ran, "tick loop stopped");
    ran
}
