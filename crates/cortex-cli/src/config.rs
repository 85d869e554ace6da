//! Configuration Vault – reads/writes `~/.cortex/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use cortex_kernel::TickWatchdog;
use cortex_runtime::LogFormat;
use cortex_types::{CortexError, UserIntentTag};
use serde::{Deserialize, Serialize};

/// Persisted runtime configuration stored in `~/.cortex/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Fixed tick rate of the behavior loop.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    /// Warn/clear thresholds for unclaimed intents and trigger words.
    #[serde(default)]
    pub watchdog: TickWatchdog,

    /// Intent map to load instead of the bundled one (TOML or JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_map_path: Option<PathBuf>,

    /// When non-empty, only these intents reach behaviors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intent_whitelist: Vec<UserIntentTag>,

    /// Console log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_tick_rate_hz() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            watchdog: TickWatchdog::default(),
            intent_map_path: None,
            intent_whitelist: Vec::new(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CortexError> {
        if self.tick_rate_hz == 0 {
            return Err(CortexError::ConfigParse("tick_rate_hz must be positive".to_string()));
        }
        self.watchdog.validate()
    }
}

/// Return the path to `~/.cortex/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cortex").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, CortexError> {
    load_from(&config_path())
}

/// Read the config at `path`, apply environment overrides, then validate
/// the result.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, CortexError> {
    let Some(mut cfg) = read_from(path)? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Parse the config at `path` as written, without overrides or validation.
fn read_from(path: &Path) -> Result<Option<Config>, CortexError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| CortexError::ConfigParse(format!("{}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `CORTEX_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CORTEX_TICK_RATE_HZ` | `tick_rate_hz` |
/// | `CORTEX_INTENT_MAP` | `intent_map_path` |
/// | `CORTEX_LOG_FORMAT` | `log_format` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CORTEX_TICK_RATE_HZ")
        && let Ok(hz) = v.parse::<u32>()
    {
        cfg.tick_rate_hz = hz;
    }
    if let Ok(v) = std::env::var("CORTEX_INTENT_MAP")
        && !v.trim().is_empty()
    {
        cfg.intent_map_path = Some(PathBuf::from(v));
    }
    cfg.log_format = LogFormat::from_env_or(cfg.log_format);
}

/// Save the config to disk, creating `~/.cortex/` if necessary.
pub fn save(cfg: &Config) -> Result<(), CortexError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path with owner-only permissions.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), CortexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CortexError::ConfigParse(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(raw.as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)?;
    Ok(())
}
