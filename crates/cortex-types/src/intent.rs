//! User intents: the closed set of things a voice or app command can ask the
//! robot to do.
//!
//! [`UserIntent`] is an internally tagged serde enum: the wire form of an
//! intent is its params object plus a `"type"` key naming the
//! [`UserIntentTag`]. Payload-less intents are unit variants, so
//! `{"type": "greeting_hello"}` is a complete intent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key carrying the variant name in the wire form of a [`UserIntent`].
pub const INTENT_TYPE_KEY: &str = "type";

/// Fieldless discriminator of [`UserIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserIntentTag {
    /// Fallback for recognized but unmapped external intents.
    UnmatchedIntent,
    GreetingHello,
    GreetingGoodbye,
    ImperativeCome,
    ImperativeLookAtMe,
    ImperativeVolumeLevel,
    SetTimer,
    CheckTimer,
    GlobalStop,
    WeatherResponse,
    NamesUsername,
    PlaySpecific,
}

impl UserIntentTag {
    /// Every tag, in declaration order.
    pub const ALL: [UserIntentTag; 12] = [
        UserIntentTag::UnmatchedIntent,
        UserIntentTag::GreetingHello,
        UserIntentTag::GreetingGoodbye,
        UserIntentTag::ImperativeCome,
        UserIntentTag::ImperativeLookAtMe,
        UserIntentTag::ImperativeVolumeLevel,
        UserIntentTag::SetTimer,
        UserIntentTag::CheckTimer,
        UserIntentTag::GlobalStop,
        UserIntentTag::WeatherResponse,
        UserIntentTag::NamesUsername,
        UserIntentTag::PlaySpecific,
    ];

    /// Wire name of the tag (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            UserIntentTag::UnmatchedIntent => "unmatched_intent",
            UserIntentTag::GreetingHello => "greeting_hello",
            UserIntentTag::GreetingGoodbye => "greeting_goodbye",
            UserIntentTag::ImperativeCome => "imperative_come",
            UserIntentTag::ImperativeLookAtMe => "imperative_look_at_me",
            UserIntentTag::ImperativeVolumeLevel => "imperative_volume_level",
            UserIntentTag::SetTimer => "set_timer",
            UserIntentTag::CheckTimer => "check_timer",
            UserIntentTag::GlobalStop => "global_stop",
            UserIntentTag::WeatherResponse => "weather_response",
            UserIntentTag::NamesUsername => "names_username",
            UserIntentTag::PlaySpecific => "play_specific",
        }
    }

    /// `true` when the matching [`UserIntent`] variant carries fields.
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            UserIntentTag::ImperativeVolumeLevel
                | UserIntentTag::SetTimer
                | UserIntentTag::WeatherResponse
                | UserIntentTag::NamesUsername
                | UserIntentTag::PlaySpecific
        )
    }
}

impl fmt::Display for UserIntentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserIntentTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserIntentTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("unknown user intent tag '{s}'"))
    }
}

/// A numeric intent field that remembers whether it was integral.
///
/// Cloud params arrive as strings; sanitization turns `"42"` into an integer
/// and `"4.2"` into a float, and both must survive into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamNumber {
    Int(i64),
    Float(f64),
}

impl ParamNumber {
    pub fn as_f64(self) -> f64 {
        match self {
            ParamNumber::Int(v) => v as f64,
            ParamNumber::Float(v) => v,
        }
    }

    /// The integral value, or `None` for a float.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            ParamNumber::Int(v) => Some(v),
            ParamNumber::Float(_) => None,
        }
    }
}

/// Something the user asked for, in its internal, typed form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIntent {
    UnmatchedIntent,
    GreetingHello,
    GreetingGoodbye,
    ImperativeCome,
    ImperativeLookAtMe,
    ImperativeVolumeLevel {
        volume_level: ParamNumber,
    },
    SetTimer {
        time_s: ParamNumber,
    },
    CheckTimer,
    GlobalStop,
    WeatherResponse {
        condition: String,
        temperature: ParamNumber,
        #[serde(default)]
        is_fahrenheit: bool,
    },
    NamesUsername {
        username: String,
    },
    PlaySpecific {
        entity_behavior: String,
    },
}

impl UserIntent {
    pub fn tag(&self) -> UserIntentTag {
        match self {
            UserIntent::UnmatchedIntent => UserIntentTag::UnmatchedIntent,
            UserIntent::GreetingHello => UserIntentTag::GreetingHello,
            UserIntent::GreetingGoodbye => UserIntentTag::GreetingGoodbye,
            UserIntent::ImperativeCome => UserIntentTag::ImperativeCome,
            UserIntent::ImperativeLookAtMe => UserIntentTag::ImperativeLookAtMe,
            UserIntent::ImperativeVolumeLevel { .. } => UserIntentTag::ImperativeVolumeLevel,
            UserIntent::SetTimer { .. } => UserIntentTag::SetTimer,
            UserIntent::CheckTimer => UserIntentTag::CheckTimer,
            UserIntent::GlobalStop => UserIntentTag::GlobalStop,
            UserIntent::WeatherResponse { .. } => UserIntentTag::WeatherResponse,
            UserIntent::NamesUsername { .. } => UserIntentTag::NamesUsername,
            UserIntent::PlaySpecific { .. } => UserIntentTag::PlaySpecific,
        }
    }

    /// Build the intent for `tag` from a params object.
    ///
    /// The object is tagged with `"type"` and handed to serde, so missing or
    /// mistyped fields are reported as a [`serde_json::Error`]. Any `"type"`
    /// key already in `params` is overwritten.
    pub fn from_tagged_params(
        tag: UserIntentTag,
        mut params: Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        params.insert(
            INTENT_TYPE_KEY.to_string(),
            Value::String(tag.as_str().to_string()),
        );
        serde_json::from_value(Value::Object(params))
    }

    /// The payload-less intent for `tag`, or `None` if `tag` needs fields.
    pub fn without_payload(tag: UserIntentTag) -> Option<Self> {
        if tag.has_payload() {
            return None;
        }
        Self::from_tagged_params(tag, Map::new()).ok()
    }
}

/// Where a pending intent came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Voice,
    App,
    Unknown,
}

impl fmt::Display for IntentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentSource::Voice => f.write_str("voice"),
            IntentSource::App => f.write_str("app"),
            IntentSource::Unknown => f.write_str("unknown"),
        }
    }
}

/// An intent together with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIntentData {
    pub intent: UserIntent,
    pub source: IntentSource,
    /// Assigned when the intent is activated; `None` while pending.
    pub activation_id: Option<u64>,
}

impl UserIntentData {
    pub fn new(intent: UserIntent, source: IntentSource) -> Self {
        Self {
            intent,
            source,
            activation_id: None,
        }
    }

    pub fn tag(&self) -> UserIntentTag {
        self.intent.tag()
    }
}

/// An intent request sent by the companion app.
///
/// The app channel only carries a single string argument; the intent map
/// renames it to the field the internal payload expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    pub intent: String,
    #[serde(default)]
    pub param: String,
}
