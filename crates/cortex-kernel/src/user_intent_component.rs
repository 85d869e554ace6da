//! [`UserIntentComponent`] – one-pending / one-active user intent arbitrator.
//!
//! Voice and app commands arrive as *pending* intents. A behavior that wants
//! to handle one *activates* it, which moves it into the single active slot,
//! and *deactivates* it when done. Pending intents never queue: a newer one
//! replaces an older one. Anything left unclaimed is force-cleared by the
//! [`TickWatchdog`] a couple of ticks later so a stale command never fires
//! at the wrong moment.
//!
//! The trigger word ("hey robot") gets the same treatment through a
//! separate flag.
//!
//! All methods run on the tick thread. The only cross-thread entry point is
//! the [`CloudIntentInbox`] returned by [`UserIntentComponent::cloud_inbox`].

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use cortex_types::intent::INTENT_TYPE_KEY;
use cortex_types::{AppIntent, CortexError, IntentSource, UserIntent, UserIntentData, UserIntentTag};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::cloud_inbox::{CloudIntentInbox, CloudMessage};
use crate::intent_map::{IntentChannel, IntentMap};
use crate::watchdog::{SlotHealth, TickWatchdog};

const CLOUD_INTENT_KEY: &str = "intent";
const CLOUD_PARAMS_KEY: &str = "params";
const APP_PARAM_KEY: &str = "param";

// ────────────────────────────────────────────────────────────────────────────
// Slots
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingIntent {
    data: UserIntentData,
    since_tick: u64,
}

#[derive(Debug)]
struct ActiveIntent {
    data: Arc<UserIntentData>,
    owner: String,
}

#[derive(Debug, Clone, Copy)]
struct PendingTrigger {
    will_open_stream: bool,
    since_tick: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// UserIntentComponent
// ────────────────────────────────────────────────────────────────────────────

/// Arbitrates voice/app intents and the trigger word for the behavior layer.
///
/// # Example
///
/// ```
/// use cortex_kernel::{IntentMap, TickWatchdog, UserIntentComponent};
/// use cortex_types::UserIntentTag;
///
/// let mut intents = UserIntentComponent::new(IntentMap::builtin().unwrap(), TickWatchdog::default());
/// intents.update(1);
/// assert!(intents.set_cloud_intent_from_json(r#"{"intent":"intent_greeting_hello"}"#));
///
/// let active = intents.activate_intent(UserIntentTag::GreetingHello, "greeter").unwrap();
/// assert_eq!(active.activation_id, Some(1));
/// intents.deactivate_intent(UserIntentTag::GreetingHello);
/// assert!(!intents.is_intent_active(UserIntentTag::GreetingHello));
/// ```
#[derive(Debug)]
pub struct UserIntentComponent {
    intent_map: IntentMap,
    watchdog: TickWatchdog,
    current_tick: u64,

    pending: Option<PendingIntent>,
    pending_timeout_enabled: bool,
    active: Option<ActiveIntent>,
    next_activation_id: u64,

    trigger: Option<PendingTrigger>,
    trigger_disablers: BTreeSet<String>,

    whitelist: HashSet<UserIntentTag>,
    inbox: CloudIntentInbox,
    cloud_stream_open: bool,
    was_intent_error: bool,
    was_intent_unclaimed: bool,
    last_cloud_intent: Option<String>,
    last_app_intent: Option<String>,
}

impl UserIntentComponent {
    pub fn new(intent_map: IntentMap, watchdog: TickWatchdog) -> Self {
        Self {
            intent_map,
            watchdog,
            current_tick: 0,
            pending: None,
            pending_timeout_enabled: true,
            active: None,
            next_activation_id: 0,
            trigger: None,
            trigger_disablers: BTreeSet::new(),
            whitelist: HashSet::new(),
            inbox: CloudIntentInbox::new(),
            cloud_stream_open: false,
            was_intent_error: false,
            was_intent_unclaimed: false,
            last_cloud_intent: None,
            last_app_intent: None,
        }
    }

    /// Producer handle for the cloud receiver thread.
    pub fn cloud_inbox(&self) -> CloudIntentInbox {
        self.inbox.clone()
    }

    pub fn intent_map(&self) -> &IntentMap {
        &self.intent_map
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    // ── Per-tick maintenance ───────────────────────────────────────────────

    /// Advance to `tick`: drain the cloud inbox, then expire stale slots.
    /// Call exactly once per tick, before behaviors run.
    #[instrument(level = "trace", skip(self))]
    pub fn update(&mut self, tick: u64) {
        self.current_tick = tick;

        if let Some(raw) = self.inbox.take() {
            match CloudMessage::parse(&raw) {
                Ok(message) => self.apply_cloud_message(message),
                Err(e) => warn!(error = %e, "dropping undecodable cloud message"),
            }
        }

        if let Some(trigger) = self.trigger {
            match self.watchdog.assess(trigger.since_tick, tick) {
                SlotHealth::Fresh => {}
                SlotHealth::Stale(ticks) => {
                    warn!(ticks, "trigger word has not been cleared");
                }
                SlotHealth::Expired(ticks) => {
                    error!(ticks, "trigger word unclaimed, forcing a clear");
                    self.trigger = None;
                }
            }
        }

        if !self.pending_timeout_enabled {
            return;
        }
        if let Some(pending) = &self.pending {
            let intent = pending.data.tag();
            let source = pending.data.source;
            match self.watchdog.assess(pending.since_tick, tick) {
                SlotHealth::Fresh => {}
                SlotHealth::Stale(ticks) => {
                    warn!(%intent, %source, ticks, "pending intent has not been claimed");
                }
                SlotHealth::Expired(ticks) => {
                    error!(%intent, %source, ticks, "pending intent unclaimed, forcing a clear");
                    self.pending = None;
                    self.was_intent_unclaimed = true;
                }
            }
        }
    }

    fn apply_cloud_message(&mut self, message: CloudMessage) {
        match message {
            CloudMessage::Result(result) => {
                match result.into_intent_object() {
                    Ok(object) => {
                        self.set_cloud_intent_from_object(object);
                    }
                    Err(e) => warn!(error = %e, "cloud result dropped"),
                }
                self.close_cloud_stream();
                if self.was_intent_error {
                    warn!("new cloud intent arrived, clearing the previous intent error");
                    self.was_intent_error = false;
                }
            }
            CloudMessage::Error { error } => {
                warn!(error = %error, "cloud returned an error");
                self.was_intent_error = true;
                self.close_cloud_stream();
            }
            CloudMessage::StreamTimeout => {
                warn!("cloud stream timed out");
                self.was_intent_error = true;
                self.close_cloud_stream();
            }
            CloudMessage::StreamOpen => {
                debug!("streaming to cloud");
                self.cloud_stream_open = true;
            }
        }
    }

    fn close_cloud_stream(&mut self) {
        self.cloud_stream_open = false;
        if let Some(trigger) = &mut self.trigger {
            trigger.will_open_stream = false;
        }
    }

    // ── Trigger word ───────────────────────────────────────────────────────

    /// Flag that the trigger word was heard. Ignored while any disabler is
    /// registered.
    pub fn set_trigger_word_pending(&mut self, will_open_stream: bool) {
        if !self.is_trigger_word_response_enabled() {
            debug!(disablers = ?self.trigger_disablers, "trigger word response disabled, ignoring");
            return;
        }
        if self.trigger.is_some() {
            warn!("trigger word set pending but the previous one was never cleared");
        }
        self.trigger = Some(PendingTrigger {
            will_open_stream,
            since_tick: self.current_tick,
        });
        info!(will_open_stream, tick = self.current_tick, "trigger word pending");

        if self.was_intent_error {
            warn!("new trigger word arrived, clearing the previous intent error");
            self.was_intent_error = false;
        }
    }

    pub fn is_trigger_word_pending(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn clear_pending_trigger_word(&mut self) {
        if self.trigger.take().is_none() {
            warn!("clearing a trigger word that is not pending");
        }
    }

    /// Whether the pending trigger word will open a cloud stream. `false`
    /// when nothing is pending.
    pub fn trigger_word_will_open_stream(&self) -> bool {
        self.trigger.is_some_and(|t| t.will_open_stream)
    }

    /// Add (`disable = true`) or remove a named reason to ignore the trigger
    /// word.
    pub fn disable_trigger_word_response(&mut self, name: &str, disable: bool) {
        if disable {
            if !self.trigger_disablers.insert(name.to_string()) {
                warn!(disabler = name, "already disabling the trigger word response");
            }
        } else if !self.trigger_disablers.remove(name) {
            warn!(disabler = name, "enabling the trigger word response it never disabled");
        }
    }

    pub fn is_trigger_word_response_enabled(&self) -> bool {
        self.trigger_disablers.is_empty()
    }

    // ── Pending intent ─────────────────────────────────────────────────────

    /// Make `intent` the pending intent, replacing any unclaimed one.
    pub fn set_intent_pending(&mut self, intent: UserIntent, source: IntentSource) {
        let tag = intent.tag();
        if let Some(previous) = &self.pending {
            warn!(
                previous = %previous.data.tag(),
                intent = %tag,
                "overwriting a pending intent that was never claimed"
            );
        }
        self.pending = Some(PendingIntent {
            data: UserIntentData::new(intent, source),
            since_tick: self.current_tick,
        });
        self.pending_timeout_enabled = true;
        info!(intent = %tag, %source, tick = self.current_tick, "intent pending");
    }

    /// [`set_intent_pending`][Self::set_intent_pending] for payload-less
    /// tags. Returns `false` if `tag` needs a payload.
    pub fn set_intent_pending_tag(&mut self, tag: UserIntentTag, source: IntentSource) -> bool {
        match UserIntent::without_payload(tag) {
            Some(intent) => {
                self.set_intent_pending(intent, source);
                true
            }
            None => {
                error!(intent = %tag, "intent requires a payload and cannot be set by tag alone");
                false
            }
        }
    }

    pub fn is_any_intent_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_intent_pending(&self, tag: UserIntentTag) -> bool {
        self.pending.as_ref().is_some_and(|p| p.data.tag() == tag)
    }

    /// The pending intent, only if it is `tag`.
    pub fn pending_intent_if(&self, tag: UserIntentTag) -> Option<&UserIntent> {
        self.pending
            .as_ref()
            .filter(|p| p.data.tag() == tag)
            .map(|p| &p.data.intent)
    }

    pub fn pending_intent(&self) -> Option<&UserIntentData> {
        self.pending.as_ref().map(|p| &p.data)
    }

    /// Clear the pending intent without activating it, if it is `tag`.
    pub fn drop_intent(&mut self, tag: UserIntentTag) {
        if self.is_intent_pending(tag) {
            self.pending = None;
            debug!(intent = %tag, "pending intent dropped");
        } else {
            warn!(
                intent = %tag,
                pending = ?self.pending.as_ref().map(|p| p.data.tag()),
                "dropping an intent that is not pending"
            );
        }
    }

    pub fn drop_any_intent(&mut self) {
        match self.pending.take() {
            Some(pending) => debug!(intent = %pending.data.tag(), "pending intent dropped"),
            None => warn!("dropping pending intent but none is pending"),
        }
    }

    /// Suspend or resume the timeout on the pending intent. Resuming
    /// restarts the count from the current tick.
    pub fn set_intent_timeout_enabled(&mut self, enabled: bool) {
        if enabled && !self.pending_timeout_enabled {
            if let Some(pending) = &mut self.pending {
                pending.since_tick = self.current_tick;
            }
        }
        self.pending_timeout_enabled = enabled;
    }

    // ── Active intent ──────────────────────────────────────────────────────

    /// Move the pending intent `tag` into the active slot on behalf of
    /// `owner`. Returns `None` if `tag` is not what is pending.
    pub fn activate_intent(&mut self, tag: UserIntentTag, owner: &str) -> Option<Arc<UserIntentData>> {
        let mut pending = match self.pending.take() {
            Some(pending) if pending.data.tag() == tag => pending,
            other => {
                error!(
                    owner,
                    intent = %tag,
                    pending = ?other.as_ref().map(|p| p.data.tag()),
                    "activating an intent that is not pending"
                );
                self.pending = other;
                return None;
            }
        };

        if let Some(previous) = &self.active {
            warn!(
                owner,
                intent = %tag,
                previous = %previous.data.tag(),
                previous_owner = %previous.owner,
                "activating an intent while another is still active"
            );
        }

        self.next_activation_id += 1;
        pending.data.activation_id = Some(self.next_activation_id);
        let data = Arc::new(pending.data);
        self.active = Some(ActiveIntent {
            data: Arc::clone(&data),
            owner: owner.to_string(),
        });
        info!(owner, intent = %tag, activation_id = self.next_activation_id, "intent activated");
        Some(data)
    }

    /// Clear the active slot if it holds `tag`.
    pub fn deactivate_intent(&mut self, tag: UserIntentTag) {
        if self.is_intent_active(tag) {
            if let Some(active) = self.active.take() {
                debug!(intent = %tag, owner = %active.owner, "intent deactivated");
            }
        } else {
            warn!(
                intent = %tag,
                active = ?self.active.as_ref().map(|a| a.data.tag()),
                "deactivating an intent that is not active"
            );
        }
    }

    pub fn is_intent_active(&self, tag: UserIntentTag) -> bool {
        self.active.as_ref().is_some_and(|a| a.data.tag() == tag)
    }

    /// The active intent, only if it is `tag`.
    pub fn intent_if_active(&self, tag: UserIntentTag) -> Option<Arc<UserIntentData>> {
        self.active
            .as_ref()
            .filter(|a| a.data.tag() == tag)
            .map(|a| Arc::clone(&a.data))
    }

    pub fn active_intent(&self) -> Option<&Arc<UserIntentData>> {
        self.active.as_ref().map(|a| &a.data)
    }

    pub fn active_intent_owner(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.owner.as_str())
    }

    // ── External input ─────────────────────────────────────────────────────

    /// Only tags in `tags` are passed through from the cloud and app
    /// channels; anything else becomes the unmatched intent. An empty set
    /// allows everything.
    pub fn set_intent_whitelist(&mut self, tags: impl IntoIterator<Item = UserIntentTag>) {
        self.whitelist = tags.into_iter().collect();
        debug!(whitelist = ?self.whitelist, "intent whitelist updated");
    }

    /// Parse a cloud intent (`{"intent": name, "params": {..}}`) and make it
    /// pending. Returns `false`, leaving every slot untouched, if the text is
    /// rejected.
    pub fn set_cloud_intent_from_json(&mut self, text: &str) -> bool {
        let parsed = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Ok(object),
            Ok(_) => Err(CortexError::MalformedIntentJson("root is not an object".to_string())),
            Err(e) => Err(CortexError::MalformedIntentJson(e.to_string())),
        };
        match parsed {
            Ok(object) => self.set_cloud_intent_from_object(object),
            Err(e) => {
                warn!(error = %e, "cloud intent rejected");
                false
            }
        }
    }

    fn set_cloud_intent_from_object(&mut self, object: Map<String, Value>) -> bool {
        match self.build_cloud_intent(&object) {
            Ok((name, intent)) => {
                let intent = self.apply_whitelist(intent, IntentChannel::Cloud);
                self.last_cloud_intent = Some(name);
                self.set_intent_pending(intent, IntentSource::Voice);
                true
            }
            Err(e) => {
                warn!(error = %e, "cloud intent rejected");
                false
            }
        }
    }

    fn build_cloud_intent(&self, object: &Map<String, Value>) -> Result<(String, UserIntent), CortexError> {
        let name = match object.get(CLOUD_INTENT_KEY) {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(CortexError::MissingIntentKey(CLOUD_INTENT_KEY)),
        };
        if object.contains_key(INTENT_TYPE_KEY) {
            return Err(CortexError::ReservedKey {
                intent: name,
                key: INTENT_TYPE_KEY,
            });
        }

        let params = match object.get(CLOUD_PARAMS_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(params)) if params.is_empty() => None,
            Some(Value::Object(params)) => Some(params.clone()),
            Some(_) => return Err(CortexError::InvalidParams { intent: name }),
        };

        let tag = self.intent_map.resolve(IntentChannel::Cloud, &name);
        let params = match (tag.has_payload(), params) {
            (true, Some(mut params)) => {
                self.intent_map
                    .sanitize_params(IntentChannel::Cloud, &name, &mut params);
                params
            }
            (true, None) => return Err(CortexError::MissingParams { intent: name, tag }),
            (false, None) => Map::new(),
            (false, Some(_)) => return Err(CortexError::UnexpectedParams { intent: name, tag }),
        };

        match UserIntent::from_tagged_params(tag, params) {
            Ok(intent) => Ok((name, intent)),
            Err(e) => Err(CortexError::PayloadMismatch {
                intent: name,
                tag,
                details: e.to_string(),
            }),
        }
    }

    /// Translate an app request into a pending intent. The single `param`
    /// string is renamed by the app table; payload-less intents ignore it.
    pub fn on_app_intent(&mut self, app_intent: &AppIntent) -> bool {
        let tag = self.intent_map.resolve(IntentChannel::App, &app_intent.intent);
        let mut params = Map::new();
        if tag.has_payload() {
            params.insert(APP_PARAM_KEY.to_string(), Value::String(app_intent.param.clone()));
            self.intent_map
                .sanitize_params(IntentChannel::App, &app_intent.intent, &mut params);
        }

        let intent = match UserIntent::from_tagged_params(tag, params) {
            Ok(intent) => intent,
            Err(e) => {
                let e = CortexError::PayloadMismatch {
                    intent: app_intent.intent.clone(),
                    tag,
                    details: e.to_string(),
                };
                warn!(error = %e, "app intent rejected");
                return false;
            }
        };

        let intent = self.apply_whitelist(intent, IntentChannel::App);
        self.last_app_intent = Some(app_intent.intent.clone());
        self.set_intent_pending(intent, IntentSource::App);
        true
    }

    fn apply_whitelist(&self, intent: UserIntent, channel: IntentChannel) -> UserIntent {
        let tag = intent.tag();
        if self.whitelist.is_empty() || self.whitelist.contains(&tag) {
            return intent;
        }
        info!(%channel, intent = %tag, "intent not whitelisted, replacing with unmatched");
        UserIntent::without_payload(self.intent_map.unmatched_tag()).unwrap_or(UserIntent::UnmatchedIntent)
    }

    // ── Cloud stream state ─────────────────────────────────────────────────

    pub fn is_cloud_stream_open(&self) -> bool {
        self.cloud_stream_open
    }

    /// The last cloud exchange ended in an error or timeout. Cleared by the
    /// next trigger word or result.
    pub fn was_intent_error(&self) -> bool {
        self.was_intent_error
    }

    /// A pending intent was force-cleared because nobody activated it.
    pub fn was_intent_unclaimed(&self) -> bool {
        self.was_intent_unclaimed
    }

    pub fn reset_intent_unclaimed(&mut self) {
        self.was_intent_unclaimed = false;
    }

    // ── Diagnostics ────────────────────────────────────────────────────────

    pub fn cloud_intent_names(&self) -> Vec<&str> {
        self.intent_map.cloud_intent_names()
    }

    pub fn app_intent_names(&self) -> Vec<&str> {
        self.intent_map.app_intent_names()
    }

    pub fn last_cloud_intent(&self) -> Option<&str> {
        self.last_cloud_intent.as_deref()
    }

    pub fn last_app_intent(&self) -> Option<&str> {
        self.last_app_intent.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent_map::IntentMapConfig;
    use cortex_types::ParamNumber;

    const TEST_MAP: &str = r#"
        unmatched_intent = "unmatched_intent"

        [[cloud_intents]]
        external = "cloud_intent_1"
        internal = "greeting_hello"

        [[cloud_intents]]
        external = "intent_clock_settimer"
        internal = "set_timer"
        field_renames = [{ from = "timer_duration", to = "time_s" }]
        numeric_fields = ["time_s"]

        [[cloud_intents]]
        external = "intent_names_username"
        internal = "names_username"

        [[app_intents]]
        external = "intent_clock_settimer"
        internal = "set_timer"
        field_renames = [{ from = "param", to = "time_s" }]
        numeric_fields = ["time_s"]

        [[app_intents]]
        external = "intent_imperative_come"
        internal = "imperative_come"
    "#;

    fn component() -> UserIntentComponent {
        let config: IntentMapConfig = toml::from_str(TEST_MAP).unwrap();
        let mut intents = UserIntentComponent::new(IntentMap::load_partial(config).unwrap(), TickWatchdog::default());
        intents.update(1);
        intents
    }

    // ── Cloud parsing ──────────────────────────────────────────────────────

    #[test]
    fn cloud_intent_round_trip() {
        let mut intents = component();
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"cloud_intent_1"}"#));
        assert!(intents.is_intent_pending(UserIntentTag::GreetingHello));
        assert_eq!(intents.pending_intent().unwrap().source, IntentSource::Voice);
        assert_eq!(intents.last_cloud_intent(), Some("cloud_intent_1"));
    }

    #[test]
    fn unknown_cloud_intent_falls_back_to_unmatched() {
        let mut intents = component();
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"unknown_xyz"}"#));
        assert!(intents.is_intent_pending(UserIntentTag::UnmatchedIntent));
    }

    #[test]
    fn numeric_params_keep_integer_or_float() {
        let mut intents = component();
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"intent_clock_settimer","params":{"time_s":"42"}}"#));
        assert_eq!(
            intents.pending_intent_if(UserIntentTag::SetTimer),
            Some(&UserIntent::SetTimer {
                time_s: ParamNumber::Int(42)
            })
        );

        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"intent_clock_settimer","params":{"time_s":"4.2"}}"#));
        assert_eq!(
            intents.pending_intent_if(UserIntentTag::SetTimer),
            Some(&UserIntent::SetTimer {
                time_s: ParamNumber::Float(4.2)
            })
        );
    }

    #[test]
    fn renamed_params_build_the_payload() {
        let mut intents = component();
        assert!(intents.set_cloud_intent_from_json(
            r#"{"intent":"intent_clock_settimer","params":{"timer_duration":"300"}}"#
        ));
        assert_eq!(
            intents.pending_intent_if(UserIntentTag::SetTimer),
            Some(&UserIntent::SetTimer {
                time_s: ParamNumber::Int(300)
            })
        );
    }

    #[test]
    fn rejected_cloud_json_leaves_state_untouched() {
        let mut intents = component();
        let rejected = [
            "{not json",
            "[]",
            r#"{"params":{}}"#,
            r#"{"intent":42}"#,
            r#"{"intent":"cloud_intent_1","type":"greeting_hello"}"#,
            r#"{"intent":"intent_clock_settimer","params":[1]}"#,
            r#"{"intent":"cloud_intent_1","params":{"extra":true}}"#,
            r#"{"intent":"intent_clock_settimer"}"#,
            r#"{"intent":"intent_clock_settimer","params":{"time_s":"ten"}}"#,
            r#"{"intent":"intent_names_username","params":{"name":"ana"}}"#,
            r#"{"intent":"unknown_xyz","params":{"a":1}}"#,
        ];
        for text in rejected {
            assert!(!intents.set_cloud_intent_from_json(text), "accepted: {text}");
            assert!(!intents.is_any_intent_pending(), "pending after: {text}");
        }
        assert_eq!(intents.last_cloud_intent(), None);
    }

    #[test]
    fn empty_params_object_counts_as_none() {
        let mut intents = component();
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"cloud_intent_1","params":{}}"#));
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"cloud_intent_1","params":null}"#));
        assert!(intents.is_intent_pending(UserIntentTag::GreetingHello));
    }

    // ── Pending / active slots ─────────────────────────────────────────────

    #[test]
    fn only_the_last_pending_intent_survives() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.set_intent_pending(UserIntent::GlobalStop, IntentSource::App);
        intents.set_intent_pending(UserIntent::CheckTimer, IntentSource::Voice);

        assert!(intents.is_intent_pending(UserIntentTag::CheckTimer));
        assert!(!intents.is_intent_pending(UserIntentTag::GreetingHello));
        assert!(!intents.is_intent_pending(UserIntentTag::GlobalStop));
    }

    #[test]
    fn set_pending_by_tag_requires_void_intent() {
        let mut intents = component();
        assert!(!intents.set_intent_pending_tag(UserIntentTag::SetTimer, IntentSource::Unknown));
        assert!(!intents.is_any_intent_pending());
        assert!(intents.set_intent_pending_tag(UserIntentTag::GlobalStop, IntentSource::Unknown));
        assert!(intents.is_intent_pending(UserIntentTag::GlobalStop));
    }

    #[test]
    fn activation_moves_pending_to_active_with_increasing_ids() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        let first = intents.activate_intent(UserIntentTag::GreetingHello, "greeter").unwrap();
        assert!(!intents.is_any_intent_pending());
        assert!(intents.is_intent_active(UserIntentTag::GreetingHello));
        assert_eq!(intents.active_intent_owner(), Some("greeter"));
        intents.deactivate_intent(UserIntentTag::GreetingHello);
        assert!(intents.active_intent().is_none());

        intents.set_intent_pending(UserIntent::GlobalStop, IntentSource::Voice);
        let second = intents.activate_intent(UserIntentTag::GlobalStop, "stopper").unwrap();
        assert!(second.activation_id > first.activation_id);
        assert_eq!(
            intents
                .intent_if_active(UserIntentTag::GlobalStop)
                .and_then(|d| d.activation_id),
            second.activation_id
        );
    }

    #[test]
    fn activation_of_wrong_tag_fails_and_keeps_pending() {
        let mut intents = component();
        assert!(intents.activate_intent(UserIntentTag::GreetingHello, "greeter").is_none());

        intents.set_intent_pending(UserIntent::GlobalStop, IntentSource::Voice);
        assert!(intents.activate_intent(UserIntentTag::GreetingHello, "greeter").is_none());
        assert!(intents.is_intent_pending(UserIntentTag::GlobalStop));
        assert!(intents.active_intent().is_none());
    }

    #[test]
    fn activation_replaces_a_still_active_intent() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.activate_intent(UserIntentTag::GreetingHello, "greeter");
        intents.set_intent_pending(UserIntent::GlobalStop, IntentSource::Voice);
        intents.activate_intent(UserIntentTag::GlobalStop, "stopper");
        assert!(intents.is_intent_active(UserIntentTag::GlobalStop));
        assert_eq!(intents.active_intent_owner(), Some("stopper"));
    }

    #[test]
    fn deactivate_with_wrong_tag_is_a_noop() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.activate_intent(UserIntentTag::GreetingHello, "greeter");
        intents.deactivate_intent(UserIntentTag::GlobalStop);
        assert!(intents.is_intent_active(UserIntentTag::GreetingHello));
    }

    #[test]
    fn drop_intent_only_matching_tag() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.drop_intent(UserIntentTag::GlobalStop);
        assert!(intents.is_any_intent_pending());
        intents.drop_intent(UserIntentTag::GreetingHello);
        assert!(!intents.is_any_intent_pending());

        intents.set_intent_pending(UserIntent::GlobalStop, IntentSource::Voice);
        intents.drop_any_intent();
        assert!(!intents.is_any_intent_pending());
        intents.drop_any_intent();
    }

    // ── Timeouts ───────────────────────────────────────────────────────────

    #[test]
    fn unclaimed_intent_is_cleared_after_two_ticks() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);

        intents.update(2);
        assert!(intents.is_any_intent_pending());
        assert!(!intents.was_intent_unclaimed());

        intents.update(3);
        assert!(!intents.is_any_intent_pending());
        assert!(intents.was_intent_unclaimed());

        intents.reset_intent_unclaimed();
        assert!(!intents.was_intent_unclaimed());
    }

    #[test]
    fn suspended_timeout_keeps_intent_until_resumed() {
        let mut intents = component();
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.set_intent_timeout_enabled(false);
        for tick in 2..20 {
            intents.update(tick);
        }
        assert!(intents.is_any_intent_pending());

        // Resuming restamps the pending tick.
        intents.set_intent_timeout_enabled(true);
        intents.update(20);
        assert!(intents.is_any_intent_pending());
        intents.update(21);
        assert!(!intents.is_any_intent_pending());
    }

    #[test]
    fn new_pending_intent_reenables_timeout() {
        let mut intents = component();
        intents.set_intent_timeout_enabled(false);
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.update(2);
        intents.update(3);
        assert!(!intents.is_any_intent_pending());
    }

    #[test]
    fn custom_watchdog_thresholds() {
        let config: IntentMapConfig = toml::from_str(TEST_MAP).unwrap();
        let mut intents = UserIntentComponent::new(
            IntentMap::load_partial(config).unwrap(),
            TickWatchdog::new(2, 3).unwrap(),
        );
        intents.update(1);
        intents.set_intent_pending(UserIntent::GreetingHello, IntentSource::Voice);
        intents.update(3);
        assert!(intents.is_any_intent_pending());
        intents.update(4);
        assert!(!intents.is_any_intent_pending());
    }

    // ── Trigger word ───────────────────────────────────────────────────────

    #[test]
    fn trigger_word_lifecycle() {
        let mut intents = component();
        assert!(!intents.trigger_word_will_open_stream());
        intents.set_trigger_word_pending(true);
        assert!(intents.is_trigger_word_pending());
        assert!(intents.trigger_word_will_open_stream());
        intents.clear_pending_trigger_word();
        assert!(!intents.is_trigger_word_pending());
        // Clearing twice only warns.
        intents.clear_pending_trigger_word();
    }

    #[test]
    fn unclaimed_trigger_word_expires() {
        let mut intents = component();
        intents.set_trigger_word_pending(false);
        intents.update(2);
        assert!(intents.is_trigger_word_pending());
        intents.update(3);
        assert!(!intents.is_trigger_word_pending());
    }

    #[test]
    fn disablers_suppress_the_trigger_word() {
        let mut intents = component();
        intents.disable_trigger_word_response("sleeping", true);
        intents.disable_trigger_word_response("on_charger", true);
        intents.set_trigger_word_pending(false);
        assert!(!intents.is_trigger_word_pending());

        intents.disable_trigger_word_response("sleeping", false);
        assert!(!intents.is_trigger_word_response_enabled());
        intents.disable_trigger_word_response("on_charger", false);
        assert!(intents.is_trigger_word_response_enabled());

        intents.set_trigger_word_pending(false);
        assert!(intents.is_trigger_word_pending());
    }

    // ── Whitelist & app ────────────────────────────────────────────────────

    #[test]
    fn whitelist_replaces_other_intents_with_unmatched() {
        let mut intents = component();
        intents.set_intent_whitelist([UserIntentTag::SetTimer]);

        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"cloud_intent_1"}"#));
        assert!(intents.is_intent_pending(UserIntentTag::UnmatchedIntent));

        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"intent_clock_settimer","params":{"time_s":"5"}}"#));
        assert!(intents.is_intent_pending(UserIntentTag::SetTimer));

        intents.set_intent_whitelist([]);
        assert!(intents.set_cloud_intent_from_json(r#"{"intent":"cloud_intent_1"}"#));
        assert!(intents.is_intent_pending(UserIntentTag::GreetingHello));
    }

    #[test]
    fn app_intent_param_is_renamed_and_coerced() {
        let mut intents = component();
        let app = AppIntent {
            intent: "intent_clock_settimer".into(),
            param: "30".into(),
        };
        assert!(intents.on_app_intent(&app));
        let pending = intents.pending_intent().unwrap();
        assert_eq!(pending.source, IntentSource::App);
        assert_eq!(
            pending.intent,
            UserIntent::SetTimer {
                time_s: ParamNumber::Int(30)
            }
        );
        assert_eq!(intents.last_app_intent(), Some("intent_clock_settimer"));
    }

    #[test]
    fn app_intent_without_payload_ignores_param() {
        let mut intents = component();
        let app = AppIntent {
            intent: "intent_imperative_come".into(),
            param: "ignored".into(),
        };
        assert!(intents.on_app_intent(&app));
        assert!(intents.is_intent_pending(UserIntentTag::ImperativeCome));
    }

    #[test]
    fn bad_app_param_is_rejected() {
        let mut intents = component();
        let app = AppIntent {
            intent: "intent_clock_settimer".into(),
            param: "soon".into(),
        };
        assert!(!intents.on_app_intent(&app));
        assert!(!intents.is_any_intent_pending());
    }

    // ── Cloud inbox ────────────────────────────────────────────────────────

    #[test]
    fn inbox_result_becomes_pending_on_update() {
        let mut intents = component();
        let inbox = intents.cloud_inbox();
        std::thread::spawn(move || {
            inbox.post(r#"{"type":"result","intent":"intent_clock_settimer","parameters":"{\"timer_duration\":\"60\"}"}"#)
        })
        .join()
        .unwrap();

        assert!(!intents.is_any_intent_pending());
        intents.update(2);
        assert_eq!(
            intents.pending_intent_if(UserIntentTag::SetTimer),
            Some(&UserIntent::SetTimer {
                time_s: ParamNumber::Int(60)
            })
        );
    }

    #[test]
    fn inbox_stream_and_error_flags() {
        let mut intents = component();
        let inbox = intents.cloud_inbox();

        intents.set_trigger_word_pending(true);
        inbox.post(r#"{"type":"stream_open"}"#);
        intents.update(1);
        assert!(intents.is_cloud_stream_open());

        inbox.post(r#"{"type":"error","error":"connectivity"}"#);
        intents.update(1);
        assert!(intents.was_intent_error());
        assert!(!intents.is_cloud_stream_open());
        assert!(!intents.trigger_word_will_open_stream());

        // A new trigger word clears the error.
        intents.set_trigger_word_pending(false);
        assert!(!intents.was_intent_error());

        inbox.post(r#"{"type":"stream_timeout"}"#);
        intents.update(1);
        assert!(intents.was_intent_error());

        // So does a result.
        inbox.post(r#"{"intent":"cloud_intent_1"}"#);
        intents.update(1);
        assert!(!intents.was_intent_error());
        assert!(intents.is_intent_pending(UserIntentTag::GreetingHello));
    }

    #[test]
    fn undecodable_inbox_message_is_dropped() {
        let mut intents = component();
        let inbox = intents.cloud_inbox();
        inbox.post("garbage");
        intents.update(2);
        assert!(inbox.is_empty());
        assert!(!intents.is_any_intent_pending());
    }

    #[test]
    fn diagnostics_list_names() {
        let intents = component();
        assert!(intents.cloud_intent_names().contains(&"cloud_intent_1"));
        assert_eq!(intents.app_intent_names(), vec!["intent_clock_settimer", "intent_imperative_come"]);
    }
}
