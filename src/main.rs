// src/main.rs
//! Activity Recorder - record GPS activities from gpsd, a serial receiver or
//! a replay file

use activity_recorder::{
    config::RecorderConfig,
    export::{export_activity, ExportFormat},
    gps::fix::format_coordinate,
    recording::state::format_duration,
    store::{ActivityHistory, FileStore, SharedStore},
    EngineHandle, Phase, RecordingEngine, RecordingView, SportType,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GPS activity recorder", long_about = None)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an activity (resumes an interrupted one if present)
    Record(RecordArgs),
    /// Browse and edit finalized activities
    #[command(subcommand)]
    History(HistoryCommand),
    /// Export an activity as GPX or GeoJSON
    Export {
        id: String,
        #[arg(short, long, default_value = "gpx")]
        format: ExportFormat,
        /// Output file (defaults to <id>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show or change the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// run, bike or walk
    #[arg(long, default_value = "run")]
    sport: SportType,

    /// Read NMEA from a serial port
    #[arg(long, conflicts_with_all = ["gpsd", "replay"])]
    serial: Option<String>,

    #[arg(long, default_value_t = 9600)]
    baudrate: u32,

    /// gpsd address as host:port
    #[arg(long, conflicts_with = "replay")]
    gpsd: Option<String>,

    /// Replay a file of NMEA sentences or JSON fixes
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Delay between replayed fixes in milliseconds
    #[arg(long)]
    pace_ms: Option<u64>,

    /// Status line interval in seconds
    #[arg(long, default_value_t = 5)]
    status_every: u64,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List activities, newest first
    List {
        /// Show every user's activities
        #[arg(long)]
        all: bool,
    },
    Show {
        id: String,
    },
    Rename {
        id: String,
        name: String,
    },
    /// Delete the whole history
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    /// Select the fix source: gpsd, serial or replay
    SetSource {
        source_type: String,
        /// Serial port, gpsd host:port or replay path
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("activity_recorder=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => RecorderConfig::get_config_path()?,
    };
    let mut config = RecorderConfig::load_from(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Using default configuration");
        RecorderConfig::default()
    });

    match cli.command {
        Command::Record(args) => record(config, args).await,
        Command::History(command) => history(&config, command),
        Command::Export { id, format, output } => {
            let activity = open_history(&config)?
                .find(&id)?
                .ok_or_else(|| anyhow!("No activity with id {}", id))?;
            let output =
                output.unwrap_or_else(|| PathBuf::from(format!("{}.{}", id, format.extension())));
            export_activity(&activity, format, &output)?;
            println!("Exported {} to {}", activity.name, output.display());
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Config(ConfigCommand::SetSource {
            source_type,
            target,
        }) => {
            apply_source(&mut config, &source_type, target)?;
            config.fix_source()?;
            config.save_to(&config_path)?;
            println!("Using {} source", config.source_type);
            Ok(())
        }
    }
}

fn apply_source(config: &mut RecorderConfig, source_type: &str, target: Option<String>) -> Result<()> {
    match (source_type, target) {
        ("serial", Some(port)) => {
            let baudrate = config.serial_baudrate.unwrap_or(9600);
            config.update_serial(port, baudrate);
        }
        ("gpsd", Some(address)) => {
            let (host, port) = parse_host_port(&address)?;
            config.update_gpsd(host, port);
        }
        ("replay", Some(path)) => {
            let pace = config.replay_pace_ms;
            config.update_replay(path, pace);
        }
        (other, _) => config.update_source(other),
    }
    Ok(())
}

fn parse_host_port(address: &str) -> Result<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) => Ok((
            host.to_string(),
            port.parse()
                .with_context(|| format!("Invalid gpsd port in {}", address))?,
        )),
        None => Ok((address.to_string(), 2947)),
    }
}

fn open_history(config: &RecorderConfig) -> Result<ActivityHistory> {
    let store: SharedStore = Arc::new(FileStore::new(config.data_dir()?)?);
    Ok(ActivityHistory::new(store))
}

fn history(config: &RecorderConfig, command: HistoryCommand) -> Result<()> {
    let history = open_history(config)?;

    match command {
        HistoryCommand::List { all } => {
            let activities = if all {
                history.list()
            } else {
                history.for_user(&config.user_id)
            };
            if activities.is_empty() {
                println!("No activities recorded yet");
            }
            for activity in activities {
                println!("{}  {}", activity.id, activity.summary());
            }
        }
        HistoryCommand::Show { id } => {
            let activity = history
                .find(&id)?
                .ok_or_else(|| anyhow!("No activity with id {}", id))?;
            println!("{}", activity.summary());
            for (index, segment) in activity.display_segments().iter().enumerate() {
                println!(
                    "  #{:<3} {:<5} {:>5} points {:>9.1} m",
                    index,
                    format!("{:?}", segment.kind).to_lowercase(),
                    segment.coordinates.len(),
                    segment.length_meters()
                );
            }
        }
        HistoryCommand::Rename { id, name } => {
            let activity = history.rename(&id, &name)?;
            println!("Renamed {} to {}", activity.id, activity.name);
        }
        HistoryCommand::Clear { yes } => {
            if !yes && !confirm("Delete every recorded activity?")? {
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn record(mut config: RecorderConfig, args: RecordArgs) -> Result<()> {
    if let Some(port) = args.serial {
        config.update_serial(port, args.baudrate);
    } else if let Some(address) = args.gpsd {
        let (host, port) = parse_host_port(&address)?;
        config.update_gpsd(host, port);
    } else if let Some(path) = args.replay {
        let pace = args.pace_ms.unwrap_or(config.replay_pace_ms);
        config.update_replay(path.to_string_lossy().into_owned(), pace);
    }

    let mut engine = RecordingEngine::open(&config)?;
    match engine.init() {
        Phase::Idle => {}
        phase => println!(
            "Recovered an interrupted {} recording ({})",
            engine.view().sport_type.unwrap_or_default(),
            phase
        ),
    }

    let source = config.fix_source()?;
    let subscription = match source.subscribe(config.subscription_options()).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::warn!(source = %source.describe(), error = %e, "Recording without a location source");
            None
        }
    };

    let handle = engine.handle();
    let engine_task = tokio::spawn(engine.run(subscription));

    if handle.view().await?.phase == Phase::Idle {
        handle.start(args.sport).await?;
    }
    println!("Recording from {}", source.describe());
    println!("Commands: [p]ause  [r]esume  [s]top  [v]iew  [d]iscard  [q]uit (keep for later)");

    let status = tokio::spawn(print_status(
        handle.clone(),
        Duration::from_secs(args.status_every.max(1)),
    ));
    let outcome = command_loop(&handle).await;
    status.abort();

    handle.shutdown()?;
    engine_task
        .await
        .context("recording engine task panicked")??;
    outcome
}

async fn command_loop(handle: &EngineHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, recording kept for recovery");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        let result = match line.trim() {
            "p" | "pause" => handle.pause().await.map(|v| print_view(&v)),
            "r" | "resume" => handle.resume().await.map(|v| print_view(&v)),
            "v" | "view" => handle.view().await.map(|v| print_view(&v)),
            "d" | "discard" => {
                handle.discard().await?;
                println!("Recording discarded");
                return Ok(());
            }
            "s" | "stop" => {
                let view = handle.stop().await?;
                print_view(&view);
                return finish(handle, &mut lines, tokio::signal::ctrl_c()).await;
            }
            "q" | "quit" => {
                println!("Recording kept; run `record` again to resume");
                return Ok(());
            }
            "" => Ok(()),
            other => {
                println!("Unknown command '{}'", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("{}", e);
        }
    }
}

/// Ask for a name, then save or throw away the stopped recording. An
/// interrupt leaves it stopped for the next `record` run.
async fn finish<R, I>(
    handle: &EngineHandle,
    lines: &mut tokio::io::Lines<R>,
    interrupted: I,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    I: std::future::Future<Output = std::io::Result<()>>,
{
    println!("Name this activity (empty for default, '-' to discard):");
    let name = tokio::select! {
        line = lines.next_line() => line?.unwrap_or_default(),
        _ = interrupted => {
            println!("\nInterrupted, stopped recording kept for recovery");
            return Ok(());
        }
    };

    if name.trim() == "-" {
        handle.discard().await?;
        println!("Recording discarded");
        return Ok(());
    }

    let activity = handle.finalize(&name).await?;
    println!("Saved {}", activity.summary());
    println!("Id: {}", activity.id);
    Ok(())
}

async fn print_status(handle: EngineHandle, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match handle.view().await {
            Ok(view) if view.phase != Phase::Idle => print_view(&view),
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn print_view(view: &RecordingView) {
    let (lat, lon) = match view.last_coordinate {
        Some(c) => (Some(c.latitude), Some(c.longitude)),
        None => (None, None),
    };
    println!(
        "[{:<9}] {:>8.2} km {:>12} {:>6.1} km/h (avg {:>5.1})  {} {}",
        view.phase,
        view.total_distance_meters / 1000.0,
        format_duration(view.elapsed_seconds),
        view.current_speed_kph,
        view.average_speed_kph,
        format_coordinate(lat),
        format_coordinate(lon)
    );
}
