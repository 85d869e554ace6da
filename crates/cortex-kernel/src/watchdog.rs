//! [`TickWatchdog`] – staleness monitor for single-value slots.
//!
//! Slots such as the pending intent or the trigger-word flag are stamped
//! with the tick at which they were filled. Once per tick the owner asks the
//! watchdog how long the slot has been sitting there:
//!
//! * fewer than `warn_after` ticks → [`SlotHealth::Fresh`]
//! * at least `warn_after` ticks → [`SlotHealth::Stale`] (log a warning)
//! * at least `clear_after` ticks → [`SlotHealth::Expired`] (force-clear)
//!
//! Time is measured in ticks, never wall-clock, so a paused tick loop never
//! expires anything.

use cortex_types::CortexError;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health of a stamped slot, carrying its age in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHealth {
    /// Filled recently enough to be consumed normally.
    Fresh,
    /// Unconsumed for at least `warn_after` ticks.
    Stale(u64),
    /// Unconsumed for at least `clear_after` ticks; the owner must clear it.
    Expired(u64),
}

/// Warn/clear thresholds, in ticks.
///
/// # Example
///
/// ```
/// use cortex_kernel::watchdog::{SlotHealth, TickWatchdog};
///
/// let wd = TickWatchdog::default();
/// assert_eq!(wd.assess(10, 10), SlotHealth::Fresh);
/// assert_eq!(wd.assess(10, 11), SlotHealth::Stale(1));
/// assert_eq!(wd.assess(10, 12), SlotHealth::Expired(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickWatchdog {
    pub warn_after_ticks: u64,
    pub clear_after_ticks: u64,
}

impl Default for TickWatchdog {
    fn default() -> Self {
        Self {
            warn_after_ticks: 1,
            clear_after_ticks: 2,
        }
    }
}

impl TickWatchdog {
    /// Build a watchdog, rejecting zero thresholds and `clear < warn`.
    pub fn new(warn_after_ticks: u64, clear_after_ticks: u64) -> Result<Self, CortexError> {
        let wd = Self {
            warn_after_ticks,
            clear_after_ticks,
        };
        wd.validate()?;
        Ok(wd)
    }

    pub fn validate(&self) -> Result<(), CortexError> {
        if self.warn_after_ticks == 0 || self.clear_after_ticks == 0 {
            return Err(CortexError::ConfigParse(format!(
                "watchdog thresholds must be positive (warn={}, clear={})",
                self.warn_after_ticks, self.clear_after_ticks
            )));
        }
        if self.clear_after_ticks < self.warn_after_ticks {
            return Err(CortexError::ConfigParse(format!(
                "watchdog clear threshold ({}) is below the warn threshold ({})",
                self.clear_after_ticks, self.warn_after_ticks
            )));
        }
        Ok(())
    }

    /// Assess a slot stamped at `since` from the point of view of tick `now`.
    ///
    /// A stamp from the future (`since > now`) counts as fresh.
    pub fn assess(&self, since: u64, now: u64) -> SlotHealth {
        let age = now.saturating_sub(since);
        if age >= self.clear_after_ticks {
            SlotHealth::Expired(age)
        } else if age >= self.warn_after_ticks {
            SlotHealth::Stale(age)
        } else {
            SlotHealth::Fresh
        }
    }
}
