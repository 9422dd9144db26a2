use anyhow::Result;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use serde_json::Value;
use sigcombo::prelude::*;
use sigcombo::{ENGINE_NAME, VERSION as LIB_VERSION};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

const BANNER: &str = r"
   ___                 _          _        _ _
  / __|___ _ __  ___  | |__  ___ | |_  ___| | |
 | (__/ _ \ '  \/ _ \ | '_ \/ _ \|  _|(_-<| | |
  \___\___/_|_|_\___/ |_.__/\___/ \__|/__/|_|_|
";

/// A custom helper struct for rustyline that colors the command word.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_rest = if rest.trim_start().starts_with('{') {
                rest.green()
            } else {
                rest.yellow()
            };
            Cow::Owned(format!("{} {}", command.yellow().bold(), colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", BANNER.cyan());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());
}

/// An input buffer driven by hand, on a virtual clock.
struct Session {
    buffer: InputBuffer<SignalManager>,
    tick_ms: u64,
    now: TimeStamp,
    ticks: u64,
}

impl Session {
    fn new(config: &ComboEngineConfig) -> Self {
        let mut buffer = InputBuffer::new(config.input, SignalManager::new());
        buffer.init();
        let tick_ms = u64::try_from(config.resolution.tick_period().as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        Self {
            buffer,
            tick_ms,
            now: 0,
            ticks: 0,
        }
    }

    fn fire(&mut self, names: &[&str]) {
        for name in names {
            let signal = self.buffer.registry_mut().to_signal(name);
            if !signal.is_valid() {
                println!("{} '{}' is not a valid signal name.", "Error:".red(), name);
            } else if self.buffer.registry().is_subscribed(signal) {
                self.buffer.on_signal(signal, self.now);
                println!("--> {} @ {}ms", name.cyan(), self.now);
            } else {
                println!("--> {} ignored, no combo listens to it.", name.dimmed());
            }
        }
    }

    /// Moves the clock forward, ticking at the configured resolution.
    fn advance(&mut self, ms: u64) {
        let target = self.now.saturating_add(ms);
        while self.now < target {
            self.now = self.now.saturating_add(self.tick_ms).min(target);
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.ticks += 1;
        self.buffer.update(self.now);
        for signal in self.buffer.registry_mut().fire_pending() {
            let name = self.buffer.registry().display_name(signal);
            println!(
                "<-- [COMBO] {} on tick #{} at {}ms",
                name.green().bold(),
                self.ticks,
                self.now
            );
            if self.buffer.registry().is_subscribed(signal) {
                self.buffer.on_signal(signal, self.now);
            }
        }
    }

    fn register(&mut self, text: &str) -> ComboResult<()> {
        let combo = parse_combo_str(text, self.buffer.registry_mut())?;
        let change = self.buffer.register_action_combo(&combo)?;
        info!(combo = %combo, refs = change.refs, "Combo registered from the shell.");
        self.print_change(&change);
        println!("--> Registered {} (refs: {}).", combo, change.refs);
        Ok(())
    }

    fn unregister(&mut self, text: &str) -> ComboResult<()> {
        let combo = parse_combo_str(text, self.buffer.registry_mut())?;
        let change = self.buffer.unregister_action_combo(&combo)?;
        info!(combo = %combo, refs = change.refs, "Combo dropped from the shell.");
        self.print_change(&change);
        println!("--> Unregistered {} (refs: {}).", combo, change.refs);
        Ok(())
    }

    fn print_change(&self, change: &sigcombo::components::buffer::RegistrationChange) {
        let registry = self.buffer.registry();
        for signal in &change.subscribed {
            println!("    subscribed {}", registry.display_name(*signal).cyan());
        }
        for signal in &change.unsubscribed {
            println!("    unsubscribed {}", registry.display_name(*signal).dimmed());
        }
    }

    fn print_window(&self) {
        let registry = self.buffer.registry();
        println!(
            "Window at {}ms ({} entries, {} batched):",
            self.now,
            self.buffer.window().len(),
            self.buffer.batch().len()
        );
        for (index, entry) in self.buffer.window().iter() {
            println!(
                "  [{}] {} @ {}ms",
                index,
                registry.display_name(entry.signal),
                entry.timestamp
            );
        }
        for entry in self.buffer.batch() {
            println!(
                "  [batch] {} @ {}ms",
                registry.display_name(entry.signal).dimmed(),
                entry.timestamp
            );
        }
    }

    fn print_combos(&self) {
        println!("Registered combos:");
        for (_, combo, refs) in self.buffer.combos() {
            let document = export_combo(combo, self.buffer.registry())
                .map(|value: Value| value.to_string())
                .unwrap_or_else(|e| format!("<{}>", e));
            println!("  x{} ({} steps) {}", refs, combo.len(), document);
        }
    }

    fn print_signals(&self) {
        println!("Subscribed signals:");
        for (signal, interest) in self.buffer.interests() {
            println!(
                "  {} {} (interest: {})",
                signal,
                self.buffer.registry().display_name(signal).cyan(),
                interest
            );
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  fire <NAME>...      - Fires raw signals at the current time.");
    println!("  advance <MS>        - Moves the clock forward, ticking on the way.");
    println!("  tick                - Runs one tick at the current time.");
    println!("  combo <JSON>        - Registers a combo document.");
    println!("  drop <JSON>         - Drops one registration of a combo document.");
    println!("  window              - Shows the signal window and the pending batch.");
    println!("  combos              - Lists registered combos and their references.");
    println!("  signals             - Lists subscribed signals and their interest.");
    println!("  exit                - Quits the shell.");
    println!();
    println!(
        "  e.g. combo {}",
        r#"{"sequence": ["down", "forward", {"$and": ["punch", "kick"]}], "signal": "super"}"#
            .green()
    );
}

fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = ComboEngineConfig::load(config_path.as_deref())?;
    info!("Starting {} with {:?}", ENGINE_NAME, config);
    let mut session = Session::new(&config);

    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    println!(
        "{} is ready, one tick every {}ms. Type 'help' for commands or 'exit' to quit.",
        ENGINE_NAME.cyan(),
        session.tick_ms
    );

    loop {
        let prompt = format!("{}{}", format!("[{}ms]", session.now).dimmed(), " >> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let line = line.trim();
                let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
                let rest = rest.trim();
                match command {
                    "fire" if !rest.is_empty() => {
                        session.fire(&rest.split_whitespace().collect::<Vec<_>>())
                    }
                    "fire" => println!("Usage: fire <NAME>..."),
                    "advance" => match rest.parse::<u64>() {
                        Ok(ms) => session.advance(ms),
                        Err(_) => println!("Usage: advance <MS>"),
                    },
                    "tick" => session.tick(),
                    "combo" => {
                        if let Err(e) = session.register(rest) {
                            println!("{} {}", "Error:".red(), e);
                        }
                    }
                    "drop" => {
                        if let Err(e) = session.unregister(rest) {
                            println!("{} {}", "Error:".red(), e);
                        }
                    }
                    "window" => session.print_window(),
                    "combos" => session.print_combos(),
                    "signals" => session.print_signals(),
                    "help" => print_help(),
                    "exit" => break,
                    "" => {}
                    _ => println!("Unknown command: '{}'. Type 'help'.", line),
                }
            }
            Err(_) => break,
        }
    }

    session.buffer.shutdown();
    info!(ticks = session.ticks, "Session closed at {}ms.", session.now);
    println!("Exiting comboshell...");
    Ok(())
}
