//! REPL – operator console for a running Cortex tick loop.
//!
//! Supported slash-commands:
//!   /help                  – show this list
//!   /trigger [stream]      – robot heard the trigger word
//!   /cloud <json>          – deliver a cloud message to the intent inbox
//!   /app <intent> [param]  – send an intent from the companion app
//!   /robot <tag> [json]    – publish a robot message
//!   /game <tag> [json]     – publish a game message
//!   /status                – show the latest tick status
//!   /intents               – list the mapped external intent names
//!   /quit | /exit          – gracefully exit the CLI

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use colored::Colorize;
use cortex_kernel::{CloudIntentInbox, IntentChannel, IntentMap};
use cortex_middleware::MessageHub;
use cortex_runtime::{APP_INTENT_TAG, TRIGGER_WORD_TAG};
use cortex_types::AppIntent;
use serde_json::{Value, json};

use crate::status::SharedStatus;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Trigger { will_open_stream: bool },
    Cloud(String),
    App(AppIntent),
    Robot { tag: String, payload: Value },
    Game { tag: String, payload: Value },
    Status,
    Intents,
    Quit,
}

/// Everything the console needs to reach the running system.
pub struct Console {
    pub robot: MessageHub,
    pub app: MessageHub,
    pub game: MessageHub,
    pub inbox: CloudIntentInbox,
    pub intent_map: IntentMap,
    pub status: SharedStatus,
}

/// Parse one input line. `Ok(None)` is a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head {
        "/help" => Command::Help,
        "/status" => Command::Status,
        "/intents" => Command::Intents,
        "/quit" | "/exit" => Command::Quit,
        "/trigger" => match rest {
            "" => Command::Trigger {
                will_open_stream: false,
            },
            "stream" => Command::Trigger {
                will_open_stream: true,
            },
            other => return Err(format!("expected '/trigger' or '/trigger stream', got '{other}'")),
        },
        "/cloud" => {
            if rest.is_empty() {
                return Err("usage: /cloud <json>".to_string());
            }
            serde_json::from_str::<Value>(rest).map_err(|e| format!("invalid JSON: {e}"))?;
            Command::Cloud(rest.to_string())
        }
        "/app" => {
            let (intent, param) = match rest.split_once(char::is_whitespace) {
                Some((intent, param)) => (intent, param.trim()),
                None => (rest, ""),
            };
            if intent.is_empty() {
                return Err("usage: /app <intent> [param]".to_string());
            }
            Command::App(AppIntent {
                intent: intent.to_string(),
                param: param.to_string(),
            })
        }
        "/robot" | "/game" => {
            let (tag, payload) = parse_tag_and_payload(rest)?;
            if head == "/robot" {
                Command::Robot { tag, payload }
            } else {
                Command::Game { tag, payload }
            }
        }
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

fn parse_tag_and_payload(rest: &str) -> Result<(String, Value), String> {
    let (tag, raw) = match rest.split_once(char::is_whitespace) {
        Some((tag, raw)) => (tag, raw.trim()),
        None => (rest, ""),
    };
    if tag.is_empty() {
        return Err("usage: /robot|/game <tag> [json]".to_string());
    }
    let payload = if raw.is_empty() {
        json!({})
    } else {
        serde_json::from_str(raw).map_err(|e| format!("invalid JSON payload: {e}"))?
    };
    Ok((tag.to_string(), payload))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(console: &Console, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "cortex>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} {}. Type {} for available commands.", "Error:".red(), e, "/help".bold());
                continue;
            }
        };

        match command {
            Command::Help => cmd_help(),
            Command::Trigger { will_open_stream } => {
                let delivered = console
                    .robot
                    .publish(TRIGGER_WORD_TAG, json!({ "will_open_stream": will_open_stream }));
                report_delivery(TRIGGER_WORD_TAG, delivered);
            }
            Command::Cloud(raw) => {
                console.inbox.post(raw);
                println!("{}", "Cloud message queued for the next tick.".green());
            }
            Command::App(app_intent) => match serde_json::to_value(&app_intent) {
                Ok(payload) => {
                    let delivered = console.app.publish(APP_INTENT_TAG, payload);
                    report_delivery(APP_INTENT_TAG, delivered);
                }
                Err(e) => println!("{}: {}", "Could not encode app intent".red(), e),
            },
            Command::Robot { tag, payload } => {
                let delivered = console.robot.publish(tag.as_str(), payload);
                report_delivery(&tag, delivered);
            }
            Command::Game { tag, payload } => {
                let delivered = console.game.publish(tag.as_str(), payload);
                report_delivery(&tag, delivered);
            }
            Command::Status => console
                .status
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .print(),
            Command::Intents => cmd_intents(&console.intent_map),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Cortex Commands".bold().underline());
    println!("  {}     – robot heard the trigger word", "/trigger [stream]".bold().cyan());
    println!("  {}         – deliver a cloud message", "/cloud <json>".bold().cyan());
    println!("  {} – send an app intent", "/app <intent> [param]".bold().cyan());
    println!("  {}   – publish a robot message", "/robot <tag> [json]".bold().cyan());
    println!("  {}    – publish a game message", "/game <tag> [json]".bold().cyan());
    println!("  {}               – latest tick status", "/status".bold().cyan());
    println!("  {}              – list mapped intents", "/intents".bold().cyan());
    println!("  {}         – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_intents(map: &IntentMap) {
    println!();
    for (title, channel, names) in [
        ("Cloud intents", IntentChannel::Cloud, map.cloud_intent_names()),
        ("App intents", IntentChannel::App, map.app_intent_names()),
    ] {
        println!("{}", title.bold().underline());
        for name in names {
            println!("  {:<40} → {}", name, map.resolve(channel, name).as_str().green());
        }
    }
    println!(
        "  {} {}",
        "unmapped names become".dimmed(),
        map.unmatched_tag().as_str().yellow()
    );
    println!();
}

fn report_delivery(tag: &str, delivered: usize) {
    if delivered == 0 {
        println!("{} nobody is listening for '{}'", "Dropped:".yellow(), tag);
    } else {
        println!("{} '{}'", "Sent".green(), tag);
    }
}
