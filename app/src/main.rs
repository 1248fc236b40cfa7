//! Vigil Alarm Correlation Pipeline
//!
//! Main application entry point: wires the sensor host, the alarm engine,
//! the arming instances and the event journal.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use vigil_arming::ArmingService;
use vigil_hal::{Clock, InstanceRegistry, MemoryHost, SensorId, SensorValue, SystemClock};
use vigil_sensors::{AlarmEngine, EventJournal, LoggingObserver};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = "0.1.0")]
#[command(about = "Vigil alarm correlation daemon", long_about = None)]
struct Args {
    /// Configuration file (searched in the standard locations when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.json_logs);

    tracing::info!("╔══════════════════════════════════════════╗");
    tracing::info!("║     Vigil Alarm Correlation Pipeline     ║");
    tracing::info!("║              Version 0.1.0               ║");
    tracing::info!("╚══════════════════════════════════════════╝");

    // Load configuration
    let config = AppConfig::resolve(args.config.as_deref())?;
    tracing::info!("Configuration loaded from {:?}", config.config_path);
    for problem in config.check() {
        tracing::warn!("Configuration: {}", problem);
    }

    // Sensor host
    let (host, changes) = MemoryHost::new();
    for seed in &config.sensors {
        host.register(seed.info(), seed.initial.clone());
    }
    let host = Arc::new(host);
    tracing::info!("Sensor host ready with {} sensor(s)", config.sensors.len());

    let registry = Arc::new(InstanceRegistry::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Arming instances
    for arming in &config.arming {
        let (service, mut snapshots) = ArmingService::register(arming.clone(), &registry, clock.clone());
        let name = arming.name.clone();
        tokio::spawn(service.run());
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                tracing::debug!(
                    instance = snapshot.instance_id,
                    delay = snapshot.is_delay_active,
                    "{}: {} ({} active sensor(s))",
                    name,
                    snapshot.state,
                    snapshot.active_sensors.len()
                );
            }
        });
    }
    tracing::info!("{} arming instance(s) running", config.arming.len());

    // Alarm engine
    let engine = Arc::new(AlarmEngine::new(&config.engine, host.clone(), registry.clone(), clock.clone()));
    engine.add_observer(Arc::new(LoggingObserver));

    // Event journal
    let journal = Arc::new(
        EventJournal::new(Path::new(&config.journal_directory))
            .with_context(|| format!("opening journal at {}", config.journal_directory))?,
    );
    if config.auto_record {
        journal.start_session(&config.session_name, &config.engine.name)?;
    }
    engine.add_observer(journal.clone());

    // Settle on the seeded values before listening for changes
    engine.evaluate(None);
    let engine_task = tokio::spawn(engine.clone().run(changes));

    let input_host = host.clone();
    let input_engine = engine.clone();
    let config_path = args.config.clone();
    tokio::spawn(async move {
        if let Err(e) = read_input(input_host, input_engine, config_path).await {
            tracing::error!("Error reading input: {}", e);
        }
    });

    // Print system status
    print_system_status(&config);

    tracing::info!("Vigil is watching {} sensor(s)", engine.snapshot().watched_sensors().len());
    tracing::info!("Enter sensor changes as id=value, 'status' or 'reload'; Ctrl+C to stop");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        _ = engine_task => {
            tracing::warn!("Engine task ended unexpectedly");
        }
    }

    tracing::info!("Shutting down...");

    if let Some(session) = journal.end_session()? {
        tracing::info!(
            "Journal session ended: {} payload(s), {} alarm(s)",
            session.payload_count,
            session.alarm_count
        );
    }

    tracing::info!("Vigil shutdown complete");

    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,vigil=debug,vigil_sensors=debug,vigil_arming=debug,vigil_hal=debug")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false))
            .init();
    }
}

/// One line of operator input
#[derive(Debug, PartialEq)]
enum Command {
    Set(SensorId, SensorValue),
    Status,
    Reload,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "status" => return Some(Command::Status),
        "reload" => return Some(Command::Reload),
        _ => {}
    }

    let (id, value) = line.split_once('=')?;
    let id = id.trim().parse::<SensorId>().ok()?;
    Some(Command::Set(id, SensorValue::parse_literal(value)))
}

async fn read_input(host: Arc<MemoryHost>, engine: Arc<AlarmEngine>, config_path: Option<PathBuf>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(Command::Set(id, value)) => {
                if let Err(e) = host.set_value(id, value) {
                    tracing::warn!("Cannot set sensor {}: {}", id, e);
                }
            }
            Some(Command::Status) => {
                tracing::info!(
                    "Status: alarm {}, sabotage {}, router {:?}, {} pass(es)",
                    if engine.status() { "ACTIVE" } else { "idle" },
                    if engine.sabotage() { "ACTIVE" } else { "idle" },
                    engine.router_state(),
                    engine.passes()
                );
            }
            Some(Command::Reload) => match AppConfig::resolve(config_path.as_deref()) {
                Ok(config) => {
                    let issues = engine.reload(&config.engine);
                    tracing::info!("Engine configuration reloaded ({} issue(s))", issues.len());
                }
                Err(e) => tracing::warn!("Reload failed: {}", e),
            },
            None => tracing::warn!("Ignoring input '{}', expected id=value", line.trim()),
        }
    }

    tracing::info!("Input closed");
    Ok(())
}

fn print_system_status(config: &AppConfig) {
    use sysinfo::System;

    let mut sys = System::new_all();
    sys.refresh_all();

    tracing::info!("╭─────────────── System Status ───────────────╮");
    tracing::info!("│ Hostname: {:>33} │", System::host_name().unwrap_or_default());
    tracing::info!("│ OS: {:>39} │", System::name().unwrap_or_default());
    tracing::info!("│ Kernel: {:>35} │", System::kernel_version().unwrap_or_default());
    tracing::info!("│ Memory: {:>24} MB / {} MB │",
        sys.used_memory() / 1024 / 1024,
        sys.total_memory() / 1024 / 1024);
    tracing::info!("├──────────────── Configuration ──────────────┤");
    tracing::info!("│ Engine: {:>35} │", config.engine.name);
    tracing::info!("│ Classes: {:>34} │", config.engine.classes.len());
    tracing::info!("│ Groups: {:>35} │", config.engine.groups.len());
    tracing::info!("│ Arming instances: {:>25} │", config.arming.len());
    tracing::info!("│ Journal: {:>34} │", config.journal_directory);
    tracing::info!("│ Recording: {:>32} │", if config.auto_record { "on" } else { "off" });
    tracing::info!("╰─────────────────────────────────────────────╯");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_input() {
        assert_eq!(parse_command("101=true"), Some(Command::Set(101, SensorValue::Bool(true))));
        assert_eq!(parse_command(" 7 = 21.5 "), Some(Command::Set(7, SensorValue::Number(21.5))));
        assert_eq!(parse_command("status"), Some(Command::Status));
        assert_eq!(parse_command("reload"), Some(Command::Reload));
        assert_eq!(parse_command("door=1"), None);
        assert_eq!(parse_command("nonsense"), None);
    }
}
