//! [`IntentMap`] – static translation table from external intent names to
//! internal [`UserIntentTag`]s.
//!
//! Two channels feed intents into the robot: the cloud speech service and
//! the companion app. Each has its own naming scheme, so each gets its own
//! table. An entry can also rename incoming fields to the names the internal
//! payload uses and coerce string fields to numbers.
//!
//! The table is loaded once and validated up front; lookups never fail. An
//! unknown external name resolves to the configured unmatched tag.
//!
//! ```toml
//! unmatched_intent = "unmatched_intent"
//!
//! [[cloud_intents]]
//! external = "intent_clock_settimer"
//! internal = "set_timer"
//! field_renames = [{ from = "timer_duration", to = "time_s" }]
//! numeric_fields = ["time_s"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use cortex_types::{CortexError, UserIntentTag};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, error, info, warn};

/// Intent map bundled with the binary.
const BUILTIN_INTENT_MAP: &str = include_str!("../config/intent_map.toml");

// ────────────────────────────────────────────────────────────────────────────
// Configuration types
// ────────────────────────────────────────────────────────────────────────────

/// Which external naming scheme an intent name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentChannel {
    Cloud,
    App,
}

impl fmt::Display for IntentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentChannel::Cloud => f.write_str("cloud"),
            IntentChannel::App => f.write_str("app"),
        }
    }
}

/// Rename a params field before the payload is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub from: String,
    pub to: String,
}

/// One external name and what it becomes internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMapEntry {
    pub external: String,
    pub internal: UserIntentTag,
    /// Applied in order, before numeric coercion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_renames: Vec<FieldRename>,
    /// Post-rename field names whose string values are parsed as numbers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_fields: Vec<String>,
}

/// Serialized form of the intent map. `unmatched_intent` is required; a
/// table without it is rejected at load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMapConfig {
    pub unmatched_intent: UserIntentTag,
    #[serde(default)]
    pub cloud_intents: Vec<IntentMapEntry>,
    #[serde(default)]
    pub app_intents: Vec<IntentMapEntry>,
}

impl Default for IntentMapConfig {
    fn default() -> Self {
        Self {
            unmatched_intent: UserIntentTag::UnmatchedIntent,
            cloud_intents: Vec::new(),
            app_intents: Vec::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// IntentMap
// ────────────────────────────────────────────────────────────────────────────

/// Validated, read-only intent lookup table.
///
/// # Example
///
/// ```
/// use cortex_kernel::intent_map::{IntentChannel, IntentMap};
/// use cortex_types::UserIntentTag;
///
/// let map = IntentMap::builtin().unwrap();
/// assert_eq!(
///     map.resolve(IntentChannel::Cloud, "intent_greeting_hello"),
///     UserIntentTag::GreetingHello
/// );
/// assert_eq!(
///     map.resolve(IntentChannel::Cloud, "intent_does_not_exist"),
///     UserIntentTag::UnmatchedIntent
/// );
/// ```
#[derive(Debug, Clone)]
pub struct IntentMap {
    unmatched: UserIntentTag,
    cloud: BTreeMap<String, IntentMapEntry>,
    app: BTreeMap<String, IntentMapEntry>,
}

impl IntentMap {
    /// Build a map and require every tag except the unmatched one to be
    /// reachable from at least one entry.
    pub fn load(config: IntentMapConfig) -> Result<Self, CortexError> {
        let map = Self::build(config)?;
        let uncovered = map.uncovered_tags();
        if !uncovered.is_empty() {
            let names: Vec<&str> = uncovered.iter().map(|t| t.as_str()).collect();
            return Err(CortexError::IntentMapConfig(format!(
                "no entry maps to: {}",
                names.join(", ")
            )));
        }
        Ok(map)
    }

    /// Build a map without the coverage check. Meant for tests and partial
    /// development tables.
    pub fn load_partial(config: IntentMapConfig) -> Result<Self, CortexError> {
        let map = Self::build(config)?;
        let uncovered = map.uncovered_tags();
        if !uncovered.is_empty() {
            debug!(uncovered = ?uncovered, "partial intent map leaves tags unreachable");
        }
        Ok(map)
    }

    /// Parse and strictly load a TOML table.
    pub fn from_toml_str(text: &str) -> Result<Self, CortexError> {
        let config: IntentMapConfig =
            toml::from_str(text).map_err(|e| CortexError::IntentMapConfig(e.to_string()))?;
        Self::load(config)
    }

    /// Parse and strictly load a JSON table.
    pub fn from_json_str(text: &str) -> Result<Self, CortexError> {
        let config: IntentMapConfig =
            serde_json::from_str(text).map_err(|e| CortexError::IntentMapConfig(e.to_string()))?;
        Self::load(config)
    }

    /// Strictly load a table from disk. `.json` files are read as JSON,
    /// everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, CortexError> {
        let text = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let map = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_toml_str(&text)?
        };
        info!(path = %path.display(), cloud = map.cloud.len(), app = map.app.len(), "intent map loaded");
        Ok(map)
    }

    /// The table bundled with the binary, strictly validated.
    pub fn builtin() -> Result<Self, CortexError> {
        Self::from_toml_str(BUILTIN_INTENT_MAP)
    }

    fn build(config: IntentMapConfig) -> Result<Self, CortexError> {
        if config.unmatched_intent.has_payload() {
            return Err(CortexError::IntentMapConfig(format!(
                "unmatched intent '{}' must not carry a payload",
                config.unmatched_intent
            )));
        }
        Ok(Self {
            unmatched: config.unmatched_intent,
            cloud: index_entries(IntentChannel::Cloud, config.cloud_intents)?,
            app: index_entries(IntentChannel::App, config.app_intents)?,
        })
    }

    /// Tags (other than the unmatched one) no entry maps to, in declaration
    /// order.
    fn uncovered_tags(&self) -> Vec<UserIntentTag> {
        let covered: BTreeSet<UserIntentTag> = self
            .cloud
            .values()
            .chain(self.app.values())
            .map(|entry| entry.internal)
            .collect();
        UserIntentTag::ALL
            .into_iter()
            .filter(|tag| *tag != self.unmatched && !covered.contains(tag))
            .collect()
    }

    fn table(&self, channel: IntentChannel) -> &BTreeMap<String, IntentMapEntry> {
        match channel {
            IntentChannel::Cloud => &self.cloud,
            IntentChannel::App => &self.app,
        }
    }

    pub fn entry(&self, channel: IntentChannel, external: &str) -> Option<&IntentMapEntry> {
        self.table(channel).get(external)
    }

    /// Internal tag for `external`, or the unmatched tag if it is unknown.
    pub fn resolve(&self, channel: IntentChannel, external: &str) -> UserIntentTag {
        match self.entry(channel, external) {
            Some(entry) => entry.internal,
            None => {
                debug!(%channel, external, "unknown intent name, using unmatched tag");
                self.unmatched
            }
        }
    }

    pub fn unmatched_tag(&self) -> UserIntentTag {
        self.unmatched
    }

    /// Rewrite `params` in place according to the entry for `external`.
    ///
    /// Renames run first. A rename whose target already exists is skipped
    /// and the source field kept. Then every numeric field holding a string
    /// is parsed: a `'.'` makes it a float, otherwise an integer. Fields that
    /// fail to parse are left as strings.
    pub fn sanitize_params(&self, channel: IntentChannel, external: &str, params: &mut Map<String, Value>) {
        let Some(entry) = self.entry(channel, external) else {
            return;
        };

        for rename in &entry.field_renames {
            if rename.from == rename.to || !params.contains_key(&rename.from) {
                continue;
            }
            if params.contains_key(&rename.to) {
                warn!(
                    %channel,
                    intent = external,
                    from = %rename.from,
                    to = %rename.to,
                    "rename target already present, keeping both fields"
                );
                continue;
            }
            if let Some(value) = params.remove(&rename.from) {
                params.insert(rename.to.clone(), value);
            }
        }

        for field in &entry.numeric_fields {
            let Some(Value::String(raw)) = params.get(field) else {
                continue;
            };
            match parse_number(raw) {
                Some(number) => {
                    params.insert(field.clone(), Value::Number(number));
                }
                None => {
                    error!(%channel, intent = external, field = %field, value = %raw, "could not convert field to a number");
                }
            }
        }
    }

    /// External names of the cloud table, sorted.
    pub fn cloud_intent_names(&self) -> Vec<&str> {
        self.cloud.keys().map(String::as_str).collect()
    }

    /// External names of the app table, sorted.
    pub fn app_intent_names(&self) -> Vec<&str> {
        self.app.keys().map(String::as_str).collect()
    }
}

fn index_entries(
    channel: IntentChannel,
    entries: Vec<IntentMapEntry>,
) -> Result<BTreeMap<String, IntentMapEntry>, CortexError> {
    let mut table: BTreeMap<String, IntentMapEntry> = BTreeMap::new();
    for entry in entries {
        if entry.external.trim().is_empty() {
            return Err(CortexError::IntentMapConfig(format!(
                "{channel} entry for '{}' has an empty external name",
                entry.internal
            )));
        }
        if let Some(rename) = entry
            .field_renames
            .iter()
            .find(|r| r.from.is_empty() || r.to.is_empty())
        {
            return Err(CortexError::IntentMapConfig(format!(
                "{channel} intent '{}' has an incomplete rename ({} -> {})",
                entry.external, rename.from, rename.to
            )));
        }
        if let Some(previous) = table.get(&entry.external) {
            return Err(CortexError::IntentMapConfig(format!(
                "duplicate {channel} intent '{}' (maps to {} and {})",
                entry.external, previous.internal, entry.internal
            )));
        }
        table.insert(entry.external.clone(), entry);
    }
    Ok(table)
}

fn parse_number(raw: &str) -> Option<Number> {
    let raw = raw.trim();
    if raw.contains('.') {
        raw.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        raw.parse::<i64>().ok().map(Number::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(external: &str, internal: UserIntentTag) -> IntentMapEntry {
        IntentMapEntry {
            external: external.to_string(),
            internal,
            field_renames: Vec::new(),
            numeric_fields: Vec::new(),
        }
    }

    fn timer_map() -> IntentMap {
        let mut timer = entry("intent_clock_settimer", UserIntentTag::SetTimer);
        timer.field_renames.push(FieldRename {
            from: "timer_duration".into(),
            to: "time_s".into(),
        });
        timer.numeric_fields.push("time_s".into());
        IntentMap::load_partial(IntentMapConfig {
            cloud_intents: vec![timer],
            ..IntentMapConfig::default()
        })
        .unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn builtin_map_is_complete() {
        let map = IntentMap::builtin().unwrap();
        assert!(map.uncovered_tags().is_empty());
        assert!(!map.cloud_intent_names().is_empty());
        assert!(!map.app_intent_names().is_empty());
    }

    #[test]
    fn unknown_name_resolves_to_unmatched() {
        let map = timer_map();
        assert_eq!(map.resolve(IntentChannel::Cloud, "unknown_xyz"), UserIntentTag::UnmatchedIntent);
        // Channels are separate tables.
        assert_eq!(
            map.resolve(IntentChannel::App, "intent_clock_settimer"),
            UserIntentTag::UnmatchedIntent
        );
    }

    #[test]
    fn integer_and_float_coercion() {
        let map = timer_map();

        let mut p = params(json!({ "time_s": "42" }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p["time_s"], json!(42));
        assert!(p["time_s"].is_i64());

        let mut p = params(json!({ "time_s": "4.2" }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p["time_s"].as_f64(), Some(4.2));
        assert!(p["time_s"].is_f64());
    }

    #[test]
    fn unparseable_number_is_left_as_string() {
        let map = timer_map();
        let mut p = params(json!({ "time_s": "ten" }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p["time_s"], json!("ten"));
    }

    #[test]
    fn rename_runs_before_coercion() {
        let map = timer_map();
        let mut p = params(json!({ "timer_duration": "90" }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p, params(json!({ "time_s": 90 })));
    }

    #[test]
    fn rename_conflict_keeps_existing_target() {
        let map = timer_map();
        let mut p = params(json!({ "timer_duration": "90", "time_s": "5" }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p["time_s"], json!(5));
        assert_eq!(p["timer_duration"], json!("90"));
    }

    #[test]
    fn already_numeric_fields_are_untouched() {
        let map = timer_map();
        let mut p = params(json!({ "time_s": 7.5 }));
        map.sanitize_params(IntentChannel::Cloud, "intent_clock_settimer", &mut p);
        assert_eq!(p["time_s"].as_f64(), Some(7.5));
    }

    #[test]
    fn duplicate_external_name_is_rejected() {
        let config = IntentMapConfig {
            cloud_intents: vec![
                entry("intent_greeting_hello", UserIntentTag::GreetingHello),
                entry("intent_greeting_hello", UserIntentTag::GreetingGoodbye),
            ],
            ..IntentMapConfig::default()
        };
        let err = IntentMap::load_partial(config).unwrap_err();
        assert!(err.to_string().contains("duplicate cloud intent"));
    }

    #[test]
    fn same_name_on_both_channels_is_allowed() {
        let config = IntentMapConfig {
            cloud_intents: vec![entry("intent_global_stop", UserIntentTag::GlobalStop)],
            app_intents: vec![entry("intent_global_stop", UserIntentTag::GlobalStop)],
            ..IntentMapConfig::default()
        };
        assert!(IntentMap::load_partial(config).is_ok());
    }

    #[test]
    fn payload_carrying_unmatched_tag_is_rejected() {
        let config = IntentMapConfig {
            unmatched_intent: UserIntentTag::SetTimer,
            ..IntentMapConfig::default()
        };
        assert!(matches!(
            IntentMap::load_partial(config),
            Err(CortexError::IntentMapConfig(_))
        ));
    }

    #[test]
    fn strict_load_requires_coverage() {
        let config = IntentMapConfig {
            cloud_intents: vec![entry("intent_greeting_hello", UserIntentTag::GreetingHello)],
            ..IntentMapConfig::default()
        };
        let err = IntentMap::load(config.clone()).unwrap_err();
        assert!(err.to_string().contains("set_timer"));
        assert!(IntentMap::load_partial(config).is_ok());
    }

    #[test]
    fn table_without_unmatched_intent_is_rejected() {
        let without_unmatched: String = BUILTIN_INTENT_MAP
            .lines()
            .filter(|line| !line.trim_start().starts_with("unmatched_intent"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(matches!(
            IntentMap::from_toml_str(&without_unmatched),
            Err(CortexError::IntentMapConfig(_))
        ));
        assert!(matches!(
            IntentMap::from_json_str(r#"{"cloud_intents": [], "app_intents": []}"#),
            Err(CortexError::IntentMapConfig(_))
        ));
    }

    #[test]
    fn json_and_toml_tables_are_equivalent() {
        let toml_map = IntentMap::builtin().unwrap();
        let config: IntentMapConfig = toml::from_str(BUILTIN_INTENT_MAP).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let json_map = IntentMap::from_json_str(&json).unwrap();
        assert_eq!(toml_map.cloud_intent_names(), json_map.cloud_intent_names());
        assert_eq!(toml_map.app_intent_names(), json_map.app_intent_names());
    }

    #[test]
    fn from_file_reads_toml_and_reports_missing_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("intent_map.toml");
        fs::write(&path, BUILTIN_INTENT_MAP)?;
        let map = IntentMap::from_file(&path)?;
        assert_eq!(map.unmatched_tag(), UserIntentTag::UnmatchedIntent);

        assert!(matches!(
            IntentMap::from_file(&dir.path().join("missing.toml")),
            Err(CortexError::ConfigIo(_))
        ));
        Ok(())
    }
}
