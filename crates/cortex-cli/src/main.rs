//! `cortex-cli` – Cortex operator console.
//!
//! This binary wires the whole runtime together and drives it:
//!
//! 1. Loads `~/.cortex/config.toml`, writing the defaults on first run.
//! 2. Loads the intent map (configured file or the bundled table).
//! 3. Starts the fixed-rate tick loop on its own thread with the demo
//!    behaviors attached.
//! 4. Drops the user into an **interactive REPL** that plays the robot, the
//!    app gateway and the cloud.
//! 5. Intercepts **Ctrl-C** to stop the tick loop.

mod behaviors;
mod config;
mod repl;
mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use colored::Colorize;
use cortex_kernel::{IntentMap, UserIntentComponent};
use cortex_middleware::{AsyncMessageGate, GateSources, MessageHub, MessageSource, SourceSubscription};
use cortex_runtime::{BehaviorSystem, LogFormat, init_tracing, run_fixed_rate};
use cortex_types::{Event, MessageCategory, MessageTag};
use tracing::{error, info, warn};

use behaviors::{CliffReactor, GAME_TAGS, TriggerWordListener, VoiceResponder};
use status::{SharedStatus, StatusSnapshot};

/// Ticks the voice responder holds an intent before releasing it.
const RESPONSE_HOLD_TICKS: u64 = 40;

fn main() {
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    let _tracer_guard = init_tracing("cortex", LogFormat::from_env_or(cfg.log_format));

    let intent_map = match &cfg.intent_map_path {
        Some(path) => IntentMap::from_file(path),
        None => IntentMap::builtin(),
    };
    let intent_map = match intent_map {
        Ok(map) => map,
        Err(e) => {
            error!(error = %e, "intent map could not be loaded");
            eprintln!("{}: {}", "Intent map error".red(), e);
            std::process::exit(1);
        }
    };

    // ── Message lanes ─────────────────────────────────────────────────────
    let robot = MessageHub::new(MessageCategory::RobotToEngine);
    let app = MessageHub::new(MessageCategory::AppToEngine);
    let game = MessageHub::new(MessageCategory::GameToEngine);
    let gate = AsyncMessageGate::new(
        GateSources::new()
            .with(Arc::new(robot.clone()))
            .with(Arc::new(app.clone()))
            .with(Arc::new(game.clone())),
    );

    let mut intents = UserIntentComponent::new(intent_map.clone(), cfg.watchdog);
    intents.set_intent_whitelist(cfg.intent_whitelist.iter().copied());
    let inbox = intents.cloud_inbox();

    let mut system = BehaviorSystem::new(gate, intents);
    system.add_behavior(Box::new(TriggerWordListener));
    system.add_behavior(Box::new(VoiceResponder::new(RESPONSE_HOLD_TICKS)));
    system.add_behavior(Box::new(CliffReactor));
    let _game_printers = print_engine_messages(&system.engine_outbox());

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the tick loop …".yellow().bold());
        println!("{}", "  Press Enter to leave the console.".dimmed());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Tick thread ───────────────────────────────────────────────────────
    let status: SharedStatus = Arc::new(Mutex::new(StatusSnapshot::default()));
    let tick_status = Arc::clone(&status);
    let tick_shutdown = Arc::clone(&shutdown);
    let hz = cfg.tick_rate_hz;
    let ticker = thread::Builder::new().name("cortex-tick".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "failed to build the tick runtime");
                tick_shutdown.store(true, Ordering::SeqCst);
                return;
            }
        };
        runtime.block_on(run_fixed_rate(&mut system, hz, tick_shutdown, |system, summary| {
            *tick_status.lock().unwrap_or_else(PoisonError::into_inner) =
                StatusSnapshot::capture(system, summary);
        }));
    });
    let ticker = match ticker {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}: {}", "Could not start the tick thread".red(), e);
            std::process::exit(1);
        }
    };
    info!(hz, "cortex running");

    println!();
    println!("  Tick loop running at {} Hz.", hz.to_string().bold());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let console = repl::Console {
        robot,
        app,
        game,
        inbox,
        intent_map,
        status,
    };
    repl::run(&console, Arc::clone(&shutdown));

    shutdown.store(true, Ordering::SeqCst);
    if ticker.join().is_err() {
        error!("tick thread panicked");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run_config() -> config::Config {
    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("{}: {}", "Config error".red(), e);
        std::process::exit(1);
    }

    match config::save(&config::Config::default()) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

/// Print every message the behaviors send towards the game layer.
fn print_engine_messages(outbox: &MessageHub) -> Vec<SourceSubscription> {
    GAME_TAGS
        .iter()
        .map(|tag| {
            outbox.subscribe(
                MessageTag::new(*tag),
                Arc::new(|event: &Event| {
                    println!("\n  {} {} {}", "[game]".magenta().bold(), event.tag.as_str().bold(), event.payload);
                }),
            )
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______           __          "#.bold().cyan());
    println!("{}", r#"  / ____/___  _____/ /____  _  __"#.bold().cyan());
    println!("{}", r#" / /   / __ \/ ___/ __/ _ \| |/_/"#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / /  / /_/  __/>  <  "#.bold().cyan());
    println!("{}", r#"\____/\____/_/   \__/\___/_/|_|  "#.bold().cyan());
    println!();
    println!("  {} {}", "Cortex".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Robot behavior runtime");
    println!();
}
