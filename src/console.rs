use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::data::types::Direction;
use crate::engine::{EngineHandle, ViewRequest};
use crate::store::preferences::{PreferenceStore, Preferences};
use crate::store::reconciliation::SortKey;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Scan,
    Interval(u32),
    Reload,
    View {
        direction: Option<Direction>,
        include_pending: bool,
        watchlist_only: bool,
        sort: SortKey,
    },
    Logs,
    Status,
    Watch(String),
    Unwatch(String),
    Toggle(String),
    Dismiss(String),
    Restore(String),
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let verb = words
        .next()
        .ok_or_else(|| "empty command".to_string())?
        .to_lowercase();

    let command = match verb.as_str() {
        "scan" => ConsoleCommand::Scan,
        "interval" => {
            let minutes = words
                .next()
                .ok_or_else(|| "usage: interval <minutes>".to_string())?;
            let minutes = minutes
                .parse::<u32>()
                .map_err(|_| format!("not a number: {}", minutes))?;
            ConsoleCommand::Interval(minutes)
        }
        "reload" => ConsoleCommand::Reload,
        "view" => {
            let mut direction = None;
            let mut include_pending = false;
            let mut watchlist_only = false;
            let mut sort = SortKey::ConvictionDesc;
            for word in words.by_ref() {
                match word {
                    "all" => include_pending = true,
                    "watch" | "watchlist" => watchlist_only = true,
                    "newest" => sort = SortKey::Newest,
                    "symbol" => sort = SortKey::Symbol,
                    other => {
                        direction = Some(
                            Direction::parse(other)
                                .ok_or_else(|| format!("unknown view option: {}", other))?,
                        )
                    }
                }
            }
            ConsoleCommand::View {
                direction,
                include_pending,
                watchlist_only,
                sort,
            }
        }
        "logs" => ConsoleCommand::Logs,
        "status" => ConsoleCommand::Status,
        "watch" | "unwatch" | "toggle" | "dismiss" | "restore" => {
            let arg = words
                .next()
                .ok_or_else(|| format!("usage: {} <value>", verb))?
                .to_string();
            match verb.as_str() {
                "watch" => ConsoleCommand::Watch(arg.to_uppercase()),
                "unwatch" => ConsoleCommand::Unwatch(arg.to_uppercase()),
                "toggle" => ConsoleCommand::Toggle(arg.to_uppercase()),
                "dismiss" => ConsoleCommand::Dismiss(arg),
                _ => ConsoleCommand::Restore(arg),
            }
        }
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };

    Ok(command)
}

/// Read operator commands from stdin until EOF or `quit`.
pub async fn run(handle: EngineHandle, preferences: Arc<dyn PreferenceStore>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        execute(&handle, preferences.as_ref(), command).await;
    }
}

async fn execute(handle: &EngineHandle, preferences: &dyn PreferenceStore, command: ConsoleCommand) {
    let prefs = Preferences::new(preferences);

    match command {
        ConsoleCommand::Scan => match handle.trigger_scan().await {
            Ok(phase) => info!("Scan phase: {:?}", phase),
            Err(e) => warn!("Scan trigger failed: {}", e),
        },
        ConsoleCommand::Interval(minutes) => match handle.set_interval(minutes).await {
            Ok(config) => info!("Scan interval set to {}", config.interval),
            Err(e) => warn!("Interval change failed: {}", e),
        },
        ConsoleCommand::Reload => match handle.reload().await {
            Ok(count) => info!("Reloaded {} signals", count),
            Err(e) => warn!("Reload failed, keeping current view: {}", e),
        },
        ConsoleCommand::View {
            direction,
            include_pending,
            watchlist_only,
            sort,
        } => {
            let request = ViewRequest {
                direction,
                min_conviction: None,
                include_pending,
                watchlist_only,
                sort,
            };
            match handle.view(request).await {
                Ok(signals) => {
                    info!("{} signals", signals.len());
                    for s in signals {
                        info!(
                            "{:<12} {:<8} {:>5.1}  entry {:.2}  stop {:.2}  target {:.2}  [{}]",
                            s.symbol,
                            s.direction,
                            s.conviction,
                            s.price_levels.entry,
                            s.price_levels.stop_loss,
                            s.price_levels.target1,
                            s.id
                        );
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
        ConsoleCommand::Logs => match handle.logs().await {
            Ok(entries) => entries.iter().for_each(|entry| info!("{}", entry)),
            Err(e) => warn!("{}", e),
        },
        ConsoleCommand::Status => match handle.status().await {
            Ok(status) => {
                info!(
                    "Scan {:?} (interval {}, last scan {:?}), {}/{} signals, {} timeouts",
                    status.phase,
                    status.scan_config.interval,
                    status.scan_config.last_scan_time,
                    status.signals,
                    status.signal_capacity,
                    status.scan_timeouts
                );
                if let Some(progress) = status.progress {
                    info!(
                        "Progress {:?} {}/{} ({:.0}%)",
                        progress.status, progress.current, progress.total, progress.percentage
                    );
                }
                info!("Signal stream {:?} {:?}", status.signal_stream.0, status.signal_stream.1);
                info!("Progress stream {:?} {:?}", status.progress_stream.0, status.progress_stream.1);
                if let Ok(Some(interval)) = prefs.last_interval() {
                    info!("Last chosen interval: {}", interval);
                }
            }
            Err(e) => warn!("{}", e),
        },
        ConsoleCommand::Watch(symbol) => report(prefs.watch(&symbol), "watch"),
        ConsoleCommand::Unwatch(symbol) => report(prefs.unwatch(&symbol), "unwatch"),
        ConsoleCommand::Toggle(symbol) => match prefs.toggle_watch(&symbol) {
            Ok(true) => info!("{} added to watchlist", symbol),
            Ok(false) => info!("{} removed from watchlist", symbol),
            Err(e) => warn!("toggle failed: {}", e),
        },
        ConsoleCommand::Dismiss(id) => report(prefs.dismiss_alert(&id), "dismiss"),
        ConsoleCommand::Restore(id) => report(prefs.restore_alert(&id), "restore"),
        ConsoleCommand::Quit => {}
    }
}

fn report<E: std::fmt::Display>(result: Result<(), E>, action: &str) {
    match result {
        Ok(()) => info!("{} ok", action),
        Err(e) => warn!("{} failed: {}", action, e),
    }
}
