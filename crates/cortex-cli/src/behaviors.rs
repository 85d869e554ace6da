//! Demo behaviors hosted by the interactive shell.
//!
//! They are deliberately small: each one shows a single way a behavior
//! talks to the gate or the intent arbitrator.

use cortex_runtime::{Behavior, BehaviorContext, BehaviorStatus};
use cortex_types::{MessageCategory, MessageTag, UserIntentTag};
use serde_json::json;
use tracing::{debug, info};

/// `RobotToEngine` tag the cliff sensor publishes.
pub const CLIFF_DETECTED_TAG: &str = "cliff_detected";

/// `EngineToGame` tags emitted by the behaviors in this module.
pub const GAME_TAGS: [&str; 4] = ["intent_response", "intent_finished", "listening", "cliff_alert"];

// ─────────────────────────────────────────────────────────────────────────────
// VoiceResponder
// ─────────────────────────────────────────────────────────────────────────────

/// Claims whatever intent is pending, "performs" it for `hold_ticks` ticks
/// and then releases it.
pub struct VoiceResponder {
    hold_ticks: u64,
    holding: Option<(UserIntentTag, u64)>,
}

impl VoiceResponder {
    pub const NAME: &'static str = "voice_responder";

    pub fn new(hold_ticks: u64) -> Self {
        Self {
            hold_ticks: hold_ticks.max(1),
            holding: None,
        }
    }
}

impl Behavior for VoiceResponder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tick(&mut self, ctx: &mut BehaviorContext<'_>) -> BehaviorStatus {
        if let Some((tag, since)) = self.holding {
            if ctx.tick().saturating_sub(since) < self.hold_ticks {
                return BehaviorStatus::Running;
            }
            ctx.intents().deactivate_intent(tag);
            ctx.emit("intent_finished", json!({ "intent": tag.as_str() }));
            self.holding = None;
            return BehaviorStatus::Success;
        }

        let Some(tag) = ctx.intents().pending_intent().map(|d| d.tag()) else {
            return BehaviorStatus::Idle;
        };
        let Some(data) = ctx.intents().activate_intent(tag, Self::NAME) else {
            return BehaviorStatus::Failure;
        };

        info!(intent = %tag, source = %data.source, "responding to intent");
        ctx.emit(
            "intent_response",
            json!({
                "intent": data.intent,
                "source": data.source,
                "activation_id": data.activation_id,
            }),
        );
        self.holding = Some((tag, ctx.tick()));
        BehaviorStatus::Running
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TriggerWordListener
// ─────────────────────────────────────────────────────────────────────────────

/// Acknowledges the trigger word so it does not linger until the watchdog
/// clears it.
#[derive(Default)]
pub struct TriggerWordListener;

impl TriggerWordListener {
    pub const NAME: &'static str = "trigger_word_listener";
}

impl Behavior for TriggerWordListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tick(&mut self, ctx: &mut BehaviorContext<'_>) -> BehaviorStatus {
        let intents = ctx.intents();
        if !intents.is_trigger_word_pending() || !intents.is_trigger_word_response_enabled() {
            return BehaviorStatus::Idle;
        }
        let will_open_stream = intents.trigger_word_will_open_stream();
        intents.clear_pending_trigger_word();
        debug!(will_open_stream, "trigger word acknowledged");
        ctx.emit("listening", json!({ "will_open_stream": will_open_stream }));
        BehaviorStatus::Success
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CliffReactor
// ─────────────────────────────────────────────────────────────────────────────

/// Forwards every cliff sensor reading to the game layer.
#[derive(Default)]
pub struct CliffReactor;

impl CliffReactor {
    pub const NAME: &'static str = "cliff_reactor";
}

impl Behavior for CliffReactor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> Vec<(MessageCategory, Vec<MessageTag>)> {
        vec![(MessageCategory::RobotToEngine, vec![MessageTag::new(CLIFF_DETECTED_TAG)])]
    }

    fn tick(&mut self, ctx: &mut BehaviorContext<'_>) -> BehaviorStatus {
        let events = ctx.events(MessageCategory::RobotToEngine);
        if events.is_empty() {
            return BehaviorStatus::Idle;
        }
        for event in &events {
            ctx.emit("cliff_alert", event.payload.clone());
        }
        info!(readings = events.len(), "cliff detected");
        BehaviorStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_kernel::{IntentMap, TickWatchdog, UserIntentComponent};
    use cortex_middleware::{AsyncMessageGate, GateSources, MessageHub, MessageSource, SourceSubscription};
    use cortex_runtime::{BehaviorSystem, TRIGGER_WORD_TAG};
    use cortex_types::Event;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn system() -> (MessageHub, BehaviorSystem) {
        let robot = MessageHub::new(MessageCategory::RobotToEngine);
        let gate = AsyncMessageGate::new(GateSources::new().with(Arc::new(robot.clone())));
        let intents = UserIntentComponent::new(IntentMap::builtin().unwrap(), TickWatchdog::default());
        (robot, BehaviorSystem::new(gate, intents))
    }

    fn capture(system: &BehaviorSystem, tag: &str) -> (Arc<Mutex<Vec<Value>>>, SourceSubscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = system.engine_outbox().subscribe(
            MessageTag::new(tag),
            Arc::new(move |event: &Event| sink.lock().unwrap().push(event.payload.clone())),
        );
        (seen, handle)
    }

    #[test]
    fn voice_responder_claims_and_releases_intent() {
        let (_robot, mut system) = system();
        system.add_behavior(Box::new(VoiceResponder::new(2)));
        let (responses, _r) = capture(&system, "intent_response");
        let (finished, _f) = capture(&system, "intent_finished");

        assert!(
            system
                .intents_mut()
                .set_cloud_intent_from_json(r#"{"intent":"intent_global_stop"}"#)
        );

        let summary = system.tick();
        assert_eq!(summary.active_intent, Some(UserIntentTag::GlobalStop));
        assert_eq!(summary.pending_intent, None);
        assert_eq!(system.intents().active_intent_owner(), Some(VoiceResponder::NAME));
        assert_eq!(responses.lock().unwrap()[0]["intent"]["type"], "global_stop");

        let summary = system.tick();
        assert_eq!(summary.behaviors[0].1, BehaviorStatus::Running);

        let summary = system.tick();
        assert_eq!(summary.behaviors[0].1, BehaviorStatus::Success);
        assert_eq!(summary.active_intent, None);
        assert_eq!(finished.lock().unwrap().len(), 1);
    }

    #[test]
    fn voice_responder_is_idle_without_intent() {
        let (_robot, mut system) = system();
        system.add_behavior(Box::new(VoiceResponder::new(5)));
        let summary = system.tick();
        assert_eq!(summary.behaviors, vec![(VoiceResponder::NAME.to_string(), BehaviorStatus::Idle)]);
    }

    #[test]
    fn trigger_word_listener_clears_trigger() {
        let (robot, mut system) = system();
        system.add_behavior(Box::new(TriggerWordListener));
        let (listening, _l) = capture(&system, "listening");

        robot.publish(TRIGGER_WORD_TAG, json!({ "will_open_stream": true }));
        let summary = system.tick();

        assert!(!summary.trigger_word_pending);
        assert_eq!(*listening.lock().unwrap(), vec![json!({ "will_open_stream": true })]);
    }

    #[test]
    fn trigger_word_listener_respects_disablers() {
        let (_robot, mut system) = system();
        system.add_behavior(Box::new(TriggerWordListener));
        system.intents_mut().set_trigger_word_pending(false);
        system.intents_mut().disable_trigger_word_response("test", true);

        let summary = system.tick();

        assert!(summary.trigger_word_pending);
        assert_eq!(summary.behaviors[0].1, BehaviorStatus::Idle);
    }

    #[test]
    fn cliff_reactor_forwards_readings_in_order() {
        let (robot, mut system) = system();
        system.add_behavior(Box::new(CliffReactor));
        let (alerts, _a) = capture(&system, "cliff_alert");

        robot.publish(CLIFF_DETECTED_TAG, json!({ "sensor": "front_left" }));
        robot.publish("battery_low", json!({}));
        robot.publish(CLIFF_DETECTED_TAG, json!({ "sensor": "front_right" }));
        let summary = system.tick();

        assert_eq!(summary.behaviors[0].1, BehaviorStatus::Success);
        assert_eq!(
            *alerts.lock().unwrap(),
            vec![json!({ "sensor": "front_left" }), json!({ "sensor": "front_right" })]
        );

        let summary = system.tick();
        assert_eq!(summary.behaviors[0].1, BehaviorStatus::Idle);
    }
}
