//! `cortex-types` – shared vocabulary of the Cortex behavior runtime.
//!
//! Everything that crosses a crate boundary lives here: the four message
//! [`MessageCategory`] lanes, the [`Event`] wrapper cached by the gate, the
//! closed [`UserIntent`] sum type arbitrated by the kernel and the global
//! [`CortexError`].

pub mod intent;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use intent::{AppIntent, IntentSource, ParamNumber, UserIntent, UserIntentData, UserIntentTag};

/// The four independent message lanes. Categories never merge and ordering
/// is only preserved within a single category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// Messages from the app/game layer into the engine.
    GameToEngine,
    /// Messages emitted by the engine towards the app/game layer.
    EngineToGame,
    /// Messages from the robot-control process (sensors, trigger word, ...).
    RobotToEngine,
    /// Messages from the app gateway (SDK, phone app).
    AppToEngine,
}

impl MessageCategory {
    /// Every category, in lane order.
    pub const ALL: [MessageCategory; 4] = [
        MessageCategory::GameToEngine,
        MessageCategory::EngineToGame,
        MessageCategory::RobotToEngine,
        MessageCategory::AppToEngine,
    ];

    /// Number of lanes.
    pub const COUNT: usize = 4;

    /// Dense lane index in `0..COUNT`, used to address per-category arrays.
    pub fn index(self) -> usize {
        match self {
            MessageCategory::GameToEngine => 0,
            MessageCategory::EngineToGame => 1,
            MessageCategory::RobotToEngine => 2,
            MessageCategory::AppToEngine => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageCategory::GameToEngine => "game_to_engine",
            MessageCategory::EngineToGame => "engine_to_game",
            MessageCategory::RobotToEngine => "robot_to_engine",
            MessageCategory::AppToEngine => "app_to_engine",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator of a message within its category (e.g. `"cliff_detected"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTag(String);

impl MessageTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for MessageTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message captured from a producer thread.
///
/// The payload is opaque to the gate; only the [`MessageTag`] is used for
/// routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Arrival time, stamped when the producer handed the message over.
    pub timestamp: DateTime<Utc>,
    pub category: MessageCategory,
    pub tag: MessageTag,
    pub payload: serde_json::Value,
}

impl Event {
    /// Build an event stamped with the current wall-clock time.
    pub fn new(
        category: MessageCategory,
        tag: impl Into<MessageTag>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category,
            tag: tag.into(),
            payload,
        }
    }
}

/// Global error type spanning configuration failures and rejected external
/// intent input.
///
/// Public gate and arbitration entry points never return this type: they log
/// it and report `false`/`None`. It is the currency of the internal parsing
/// and loading paths.
#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Malformed intent JSON: {0}")]
    MalformedIntentJson(String),

    #[error("Intent JSON is missing the string key '{0}'")]
    MissingIntentKey(&'static str),

    #[error("Intent JSON for '{intent}' contains reserved key '{key}'")]
    ReservedKey { intent: String, key: &'static str },

    #[error("Params for '{intent}' must be a JSON object")]
    InvalidParams { intent: String },

    #[error("Intent '{intent}' maps to {tag}, which takes no params")]
    UnexpectedParams { intent: String, tag: UserIntentTag },

    #[error("Intent '{intent}' maps to {tag}, which requires params")]
    MissingParams { intent: String, tag: UserIntentTag },

    #[error("Params for '{intent}' do not fit {tag}: {details}")]
    PayloadMismatch {
        intent: String,
        tag: UserIntentTag,
        details: String,
    },

    #[error("Intent map configuration error: {0}")]
    IntentMapConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
