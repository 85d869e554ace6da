//! Latest tick state, shared between the tick thread and the console.

use std::sync::{Arc, Mutex};

use colored::Colorize;
use cortex_runtime::{BehaviorStatus, BehaviorSystem, TickSummary};
use cortex_types::UserIntentTag;

/// Snapshot written by the tick thread after every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub tick: u64,
    pub events_cached: usize,
    pub behaviors: Vec<(String, BehaviorStatus)>,
    pub pending_intent: Option<UserIntentTag>,
    pub active_intent: Option<UserIntentTag>,
    pub active_owner: Option<String>,
    pub trigger_word_pending: bool,
    pub cloud_stream_open: bool,
    pub was_intent_error: bool,
    pub was_intent_unclaimed: bool,
    pub last_cloud_intent: Option<String>,
    pub last_app_intent: Option<String>,
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

impl StatusSnapshot {
    pub fn capture(system: &BehaviorSystem, summary: &TickSummary) -> Self {
        let intents = system.intents();
        Self {
            tick: summary.tick,
            events_cached: summary.events_cached,
            behaviors: summary.behaviors.clone(),
            pending_intent: summary.pending_intent,
            active_intent: summary.active_intent,
            active_owner: intents.active_intent_owner().map(str::to_string),
            trigger_word_pending: summary.trigger_word_pending,
            cloud_stream_open: intents.is_cloud_stream_open(),
            was_intent_error: intents.was_intent_error(),
            was_intent_unclaimed: intents.was_intent_unclaimed(),
            last_cloud_intent: intents.last_cloud_intent().map(str::to_string),
            last_app_intent: intents.last_app_intent().map(str::to_string),
        }
    }

    pub fn print(&self) {
        let none = || "-".dimmed().to_string();
        println!();
        println!("{}", "Tick Status".bold().underline());
        println!("  tick            : {}", self.tick.to_string().yellow());
        println!("  events cached   : {}", self.events_cached);
        println!(
            "  pending intent  : {}",
            self.pending_intent.map_or_else(none, |t| t.as_str().cyan().to_string())
        );
        println!(
            "  active intent   : {}{}",
            self.active_intent.map_or_else(none, |t| t.as_str().green().to_string()),
            self.active_owner
                .as_deref()
                .map(|o| format!(" (owner {o})"))
                .unwrap_or_default()
        );
        println!("  trigger word    : {}", flag(self.trigger_word_pending));
        println!("  cloud stream    : {}", flag(self.cloud_stream_open));
        println!("  intent error    : {}", flag(self.was_intent_error));
        println!("  intent unclaimed: {}", flag(self.was_intent_unclaimed));
        println!(
            "  last cloud/app  : {} / {}",
            self.last_cloud_intent.as_deref().unwrap_or("-"),
            self.last_app_intent.as_deref().unwrap_or("-")
        );
        for (name, status) in &self.behaviors {
            println!("  {:<22}: {}", name.bold(), status);
        }
        println!();
    }
}

fn flag(on: bool) -> colored::ColoredString {
    if on { "yes".yellow() } else { "no".normal() }
}
