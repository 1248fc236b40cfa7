//! Vigil CLI Tool
//!
//! Command-line interface for checking configurations, explaining arming
//! decisions and browsing the event journal.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vigil_arming::{Analysis, Bitmask, SystemState};
use vigil_sensors::EventJournal;

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "vigil-cli")]
#[command(author = "Vigil Team")]
#[command(version = "0.1.0")]
#[command(about = "Vigil Alarm Correlation Pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (searched in the standard locations when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Journal directory (defaults to the configured one)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and list every issue
    Check,

    /// Show how a bitmask maps to a state for an arming instance
    Explain {
        /// Arming instance id
        #[arg(short, long)]
        instance: u32,

        /// Bitmask (0-127)
        #[arg(short, long)]
        bitmask: u8,

        /// Current state id, used for illogical combinations
        #[arg(short, long, default_value_t = 0)]
        state: i64,
    },

    /// List journal sessions
    Sessions {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show payloads from a session
    Payloads {
        /// Session ID
        session_id: String,

        /// Only payloads naming this group
        #[arg(short, long)]
        group: Option<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export session data
    Export {
        /// Session ID
        session_id: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate sample configuration
    Config {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            check_config(&load(&cli.config)?)?;
        }

        Commands::Explain { instance, bitmask, state } => {
            explain(&load(&cli.config)?, instance, bitmask, state)?;
        }

        Commands::Sessions { verbose } => {
            let journal = open_journal(&cli.config, &cli.data_dir)?;
            list_sessions(&journal, verbose)?;
        }

        Commands::Payloads { session_id, group, format } => {
            let journal = open_journal(&cli.config, &cli.data_dir)?;
            show_payloads(&journal, &session_id, group, &format)?;
        }

        Commands::Export { session_id, output } => {
            let journal = open_journal(&cli.config, &cli.data_dir)?;
            journal.export_session(&session_id, &output)?;
            println!("Session exported to: {:?}", output);
        }

        Commands::Config { output } => {
            generate_config(output)?;
        }
    }

    Ok(())
}

fn load(path: &Option<PathBuf>) -> Result<AppConfig> {
    Ok(AppConfig::resolve(path.as_deref())?)
}

fn open_journal(config: &Option<PathBuf>, data_dir: &Option<PathBuf>) -> Result<EventJournal> {
    let dir = match data_dir {
        Some(dir) => dir.clone(),
        None => PathBuf::from(load(config)?.journal_directory),
    };
    EventJournal::new(&dir).with_context(|| format!("opening journal at {:?}", dir))
}

fn check_config(config: &AppConfig) -> Result<()> {
    let problems = config.check();

    println!("Configuration: {:?}", config.config_path);
    println!("  Sensors: {}", config.sensors.len());
    println!("  Classes: {}", config.engine.classes.len());
    println!("  Groups: {}", config.engine.groups.len());
    println!("  Arming instances: {}", config.arming.len());

    if problems.is_empty() {
        println!("\nNo issues found.");
        return Ok(());
    }

    println!("\nIssues:");
    for problem in &problems {
        println!("  - {}", problem);
    }
    bail!("{} configuration issue(s)", problems.len())
}

fn explain(config: &AppConfig, instance: u32, bits: u8, state: i64) -> Result<()> {
    let Some(arming) = config.arming_instance(instance) else {
        bail!("no arming instance with id {}", instance);
    };
    if bits >= Bitmask::LIMIT {
        bail!("bitmask must be below {}", Bitmask::LIMIT);
    }
    let current = SystemState::try_from(state)?;

    let analysis = Analysis::explain(arming, Bitmask::from_bits(bits), current);

    println!("╭──────────────────────────────────────────────╮");
    println!("│ {:<44} │", truncate(&format!("{} ({})", arming.name, arming.instance_id), 44));
    println!("╰──────────────────────────────────────────────╯");
    println!("{}", analysis);
    Ok(())
}

fn list_sessions(journal: &EventJournal, verbose: bool) -> Result<()> {
    let sessions = journal.list_sessions()?;

    if sessions.is_empty() {
        println!("No journal sessions found.");
        return Ok(());
    }

    println!("╭─────────────────────────────────────────────────────────────────────────────╮");
    println!("│                              Journal Sessions                               │");
    println!("├───────────────────────────┬──────────────────────┬──────────┬────────┬──────┤");
    println!("│ Session ID                │ Name                 │ Payloads │ Alarms │ Time │");
    println!("├───────────────────────────┼──────────────────────┼──────────┼────────┼──────┤");

    for session in &sessions {
        let duration = session.duration();
        let duration_str = format!("{}:{:02}", duration.num_hours(), duration.num_minutes() % 60);

        println!("│ {:25} │ {:20} │ {:>8} │ {:>6} │ {:>4} │",
            truncate(&session.id, 25),
            truncate(&session.name, 20),
            session.payload_count,
            session.alarm_count,
            duration_str);
    }

    println!("╰───────────────────────────┴──────────────────────┴──────────┴────────┴──────╯");

    if verbose {
        for session in &sessions {
            println!("\n{}", "─".repeat(60));
            println!("Session: {}", session.id);
            println!("  Name: {}", session.name);
            println!("  Source: {}", session.source);
            println!("  Start: {}", session.start_time);
            if let Some(end) = session.end_time {
                println!("  End: {}", end);
            }
            println!("  Payloads: {} ({} alarms)", session.payload_count, session.alarm_count);

            if !session.notes.is_empty() {
                println!("  Notes:");
                for note in &session.notes {
                    println!("    - {}", note);
                }
            }
        }
    }

    Ok(())
}

fn show_payloads(journal: &EventJournal, session_id: &str, group: Option<String>, format: &str) -> Result<()> {
    let mut entries = journal.load_entries(session_id)?;

    if let Some(ref group) = group {
        entries.retain(|e| e.payload.active_groups.iter().any(|g| g.eq_ignore_ascii_case(group)));
    }

    if entries.is_empty() {
        println!("No payloads found matching criteria.");
        return Ok(());
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&entries)?;
            println!("{}", json);
        }
        _ => {
            println!("╭──────────────────────────────────────────────────────────────────────────╮");
            println!("│                               Payload Log                                │");
            println!("├──────────┬───────────────────────────┬──────────────────────┬────────────┤");
            println!("│ Time     │ Groups                    │ Trigger              │ Delivered  │");
            println!("├──────────┼───────────────────────────┼──────────────────────┼────────────┤");

            for entry in &entries {
                let time_str = entry.recorded_at.format("%H:%M:%S").to_string();
                let groups = if entry.reset {
                    "(reset)".to_string()
                } else {
                    entry.payload.active_groups.join(", ")
                };
                let trigger = entry
                    .payload
                    .trigger_details
                    .as_ref()
                    .map(|t| t.smart_label.clone())
                    .unwrap_or_else(|| "-".to_string());

                println!("│ {:8} │ {:25} │ {:20} │ {:>4} / {:<3} │",
                    time_str,
                    truncate(&groups, 25),
                    truncate(&trigger, 20),
                    entry.delivered.len(),
                    entry.delivered.len() + entry.failed.len());
            }

            println!("╰──────────┴───────────────────────────┴──────────────────────┴────────────╯");
            println!("\nTotal payloads: {}", entries.len());
        }
    }

    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output {
        write_config(&path)?;
        println!("Configuration written to: {:?}", path);
    } else {
        println!("{}", config::EXAMPLE);
    }

    Ok(())
}

fn write_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, config::EXAMPLE)?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("Perimeter", 20), "Perimeter");
        assert_eq!(truncate("Küche Fenster Nord", 8), "Küche...");
    }

    #[test]
    fn cli_arguments_parse() {
        let cli = Cli::try_parse_from(["vigil-cli", "explain", "--instance", "100", "--bitmask", "3"]).unwrap();
        match cli.command {
            Commands::Explain { instance, bitmask, state } => {
                assert_eq!((instance, bitmask, state), (100, 3, 0));
            }
            _ => panic!("expected explain"),
        }
    }
}
