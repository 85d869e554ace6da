//! [`CloudIntentInbox`] – single-slot mailbox between the cloud receiver
//! thread and the tick loop.
//!
//! The receiver thread only stores the raw text; decoding happens on the
//! consumer side in [`UserIntentComponent::update`][crate::UserIntentComponent::update].
//! A message that is not drained before the next one arrives is overwritten.

use std::sync::{Arc, Mutex, PoisonError};

use cortex_types::CortexError;
use cortex_types::intent::INTENT_TYPE_KEY;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const INTENT_KEY: &str = "intent";
const PARAMS_KEY: &str = "params";

/// Producer handle. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct CloudIntentInbox {
    slot: Arc<Mutex<Option<String>>>,
}

impl CloudIntentInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `raw`, replacing any message the tick loop has not picked up.
    /// Callable from any thread.
    pub fn post(&self, raw: impl Into<String>) {
        let raw = raw.into();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(raw) {
            warn!(dropped = %previous, "cloud message overwritten before it was processed");
        } else {
            debug!("cloud message posted");
        }
    }

    /// Remove and return the stored message, if any.
    pub fn take(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire format
// ────────────────────────────────────────────────────────────────────────────

/// A decoded cloud message. The `"type"` key defaults to `"result"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudMessage {
    /// Speech was understood.
    Result(CloudResult),
    /// The cloud could not handle the request.
    Error {
        #[serde(default)]
        error: String,
    },
    /// The audio stream timed out before a result.
    StreamTimeout,
    /// The robot started streaming audio to the cloud.
    StreamOpen,
}

/// Body of a `result` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudResult {
    pub intent: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Params encoded as a JSON string, sent by some cloud endpoints instead
    /// of `params`.
    #[serde(default)]
    pub parameters: Option<String>,
}

impl CloudMessage {
    pub fn parse(raw: &str) -> Result<Self, CortexError> {
        let mut value: Value =
            serde_json::from_str(raw).map_err(|e| CortexError::MalformedIntentJson(e.to_string()))?;
        let Some(object) = value.as_object_mut() else {
            return Err(CortexError::MalformedIntentJson(
                "cloud message is not a JSON object".to_string(),
            ));
        };
        if object.get(INTENT_TYPE_KEY).is_none_or(Value::is_null) {
            debug!("cloud message has no type, assuming result");
            object.insert(INTENT_TYPE_KEY.to_string(), Value::String("result".to_string()));
        }

        let message: CloudMessage =
            serde_json::from_value(value).map_err(|e| CortexError::MalformedIntentJson(e.to_string()))?;
        match &message {
            CloudMessage::Result(result) if result.intent.is_empty() => {
                Err(CortexError::MissingIntentKey(INTENT_KEY))
            }
            _ => Ok(message),
        }
    }
}

impl CloudResult {
    /// The `{"intent": .., "params": ..}` object understood by
    /// [`UserIntentComponent::set_cloud_intent_from_json`][crate::UserIntentComponent::set_cloud_intent_from_json].
    ///
    /// A non-empty `parameters` string is decoded and replaces `params`. An
    /// empty string or an empty object is ignored.
    pub fn into_intent_object(self) -> Result<Map<String, Value>, CortexError> {
        let mut params = self.params;
        if let Some(encoded) = self.parameters.filter(|s| !s.trim().is_empty()) {
            let decoded: Value = serde_json::from_str(&encoded).map_err(|e| {
                CortexError::MalformedIntentJson(format!("undecodable parameters string: {e}"))
            })?;
            let is_empty = match &decoded {
                Value::Object(map) => map.is_empty(),
                Value::Null => true,
                _ => false,
            };
            if !is_empty {
                params = Some(decoded);
            }
        }

        let mut object = Map::new();
        object.insert(INTENT_KEY.to_string(), Value::String(self.intent));
        if let Some(params) = params {
            object.insert(PARAMS_KEY.to_string(), params);
        }
        Ok(object)
    }
}
