//! RunTrack command line.
//!
//! Replays recorded sensor logs through the tracker, lists stored activities,
//! exports them, and recovers activities interrupted by a crash.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use runtrack::metrics::aggregator::format_pace;
use runtrack::recording::clock::ManualClock;
use runtrack::recording::types::{ActivityRecord, ExportFormat};
use runtrack::recording::{exporter_csv, exporter_json, exporter_tcx};
use runtrack::sensors::types::SensorEvent;
use runtrack::storage::config::{load_config, load_config_from, AppConfig};
use runtrack::{ActivityStateMachine, ActivityStore, Database};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "runtrack")]
#[command(version)]
#[command(about = "Running activity tracker", long_about = None)]
struct Cli {
    /// Use a specific config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use a specific database file
    #[arg(short, long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines sensor log as a new activity
    Replay {
        /// Event log, one JSON event per line
        file: PathBuf,

        /// Activity name
        #[arg(short, long)]
        name: Option<String>,

        /// Do not save the activity
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored activities
    History {
        /// Number of activities to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a stored activity
    Show {
        /// Activity ID
        id: Uuid,
    },

    /// Export a stored activity
    Export {
        /// Activity ID
        id: Uuid,

        /// Export format
        #[arg(short = 'f', long, value_enum, default_value = "csv")]
        format: FormatArg,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Finish or drop an activity interrupted by a crash
    Recover {
        /// Drop the checkpoint instead of saving it
        #[arg(long)]
        discard: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
    Tcx,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Tcx => ExportFormat::Tcx,
        }
    }
}

/// Pause and resume markers in a replay log.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Control {
    Pause {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    Resume {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Event(SensorEvent),
    Control(Control),
}

impl ReplayLine {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ReplayLine::Event(SensorEvent::Reading(reading)) => reading.timestamp(),
            ReplayLine::Event(SensorEvent::Fix(fix)) => fix.timestamp,
            ReplayLine::Control(Control::Pause { timestamp })
            | ReplayLine::Control(Control::Resume { timestamp }) => *timestamp,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => load_config().context("Failed to load config")?,
    };
    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.database_path());

    tracing::debug!("Using database {}", db_path.display());

    match cli.command {
        Commands::Replay {
            file,
            name,
            dry_run,
        } => replay(&config, &db_path, &file, name, dry_run),
        Commands::History { limit } => history(&db_path, limit),
        Commands::Show { id } => show(&db_path, &id),
        Commands::Export { id, format, output } => {
            export(&db_path, &id, format.into(), output.as_deref())
        }
        Commands::Recover { discard } => recover(&config, &db_path, discard),
    }
}

fn open_database(path: &Path) -> Result<Database> {
    Database::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn replay(
    config: &AppConfig,
    db_path: &Path,
    file: &Path,
    name: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let reader = BufReader::new(
        std::fs::File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );

    let mut lines = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read event log")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayLine>(&line) {
            Ok(parsed) => lines.push(parsed),
            Err(e) => tracing::warn!("Skipping line {}: {}", number + 1, e),
        }
    }

    let Some(first) = lines.first() else {
        bail!("No events in {}", file.display());
    };

    let clock = Arc::new(ManualClock::new(first.timestamp()));
    let mut machine = ActivityStateMachine::from_config(config).with_clock(clock.clone());
    machine.start()?;
    if let Some(name) = name {
        machine.rename(name)?;
    }

    let mut rejected = 0usize;
    for line in lines {
        clock.set(line.timestamp());
        let result = match line {
            ReplayLine::Event(SensorEvent::Reading(reading)) => {
                machine.accept_reading(reading).map(|_| ())
            }
            ReplayLine::Event(SensorEvent::Fix(fix)) => machine.accept_fix(fix),
            ReplayLine::Control(Control::Pause { .. }) => machine.pause(),
            ReplayLine::Control(Control::Resume { .. }) => machine.resume(),
        };
        if let Err(e) = result {
            tracing::debug!("Rejected: {}", e);
            rejected += 1;
        }
    }

    let record = machine.stop()?;
    if rejected > 0 {
        tracing::warn!("{} events rejected during replay", rejected);
    }

    print_record(&record, machine.readings().len());

    if !dry_run {
        let mut db = open_database(db_path)?;
        machine.persist(&mut db)?;
        println!("Saved activity {}", record.id);
    }

    Ok(())
}

fn history(db_path: &Path, limit: usize) -> Result<()> {
    let db = open_database(db_path)?;
    let activities = db.list_all()?;

    if activities.is_empty() {
        println!("No activities recorded yet.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:>9}  {:>9}  {:>6}  {}",
        "ID", "Date", "Duration", "Distance", "Pace", "Name"
    );
    for summary in activities.iter().take(limit) {
        println!(
            "{:<36}  {:<16}  {:>9}  {:>7.2}km  {:>6}  {}",
            summary.id,
            summary.started_at.format("%Y-%m-%d %H:%M"),
            format_duration(summary.duration_seconds),
            summary.distance_meters / 1000.0,
            summary
                .avg_pace_seconds_per_km
                .map_or_else(|| "-".to_string(), format_pace),
            summary.name,
        );
    }

    Ok(())
}

fn show(db_path: &Path, id: &Uuid) -> Result<()> {
    let db = open_database(db_path)?;
    let Some(record) = db.load(id)? else {
        bail!("Activity {} not found", id);
    };
    let readings = db.load_readings(id)?;
    print_record(&record, readings.len());
    Ok(())
}

fn export(db_path: &Path, id: &Uuid, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let db = open_database(db_path)?;
    let Some(record) = db.load(id)? else {
        bail!("Activity {} not found", id);
    };
    let readings = db.load_readings(id)?;

    let content = match format {
        ExportFormat::Csv => exporter_csv::export_csv(&record, &readings)?,
        ExportFormat::Json => exporter_json::export_json(&record, &readings)?,
        ExportFormat::Tcx => exporter_tcx::export_tcx(&record, &readings)?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Exported {} as {} to {}", id, format, path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}

fn recover(config: &AppConfig, db_path: &Path, discard: bool) -> Result<()> {
    let mut db = open_database(db_path)?;
    let Some(checkpoint) = db.load_checkpoint()? else {
        println!("Nothing to recover.");
        return Ok(());
    };

    if discard {
        db.clear_checkpoint()?;
        println!("Discarded interrupted activity {}", checkpoint.record.id);
        return Ok(());
    }

    let clock = Arc::new(ManualClock::new(checkpoint.saved_at));
    let mut machine = ActivityStateMachine::from_config(config).with_clock(clock);
    let record = machine.recover(checkpoint)?;
    machine.persist(&mut db)?;

    print_record(&record, machine.readings().len());
    println!("Recovered activity {}", record.id);
    Ok(())
}

fn print_record(record: &ActivityRecord, reading_count: usize) {
    println!("{} ({})", record.name, record.id);
    println!("  Started:   {}", record.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Status:    {}", record.status.as_str());
    println!("  Duration:  {}", format_duration(record.duration_seconds));
    println!("  Distance:  {:.2} km", record.distance_meters / 1000.0);
    println!(
        "  Elevation: +{:.0} m / -{:.0} m",
        record.elevation_gain_meters, record.elevation_loss_meters
    );
    if let Some(pace) = record.avg_pace_seconds_per_km {
        println!("  Pace:      {} /km", format_pace(pace));
    }
    print_channel("Heart rate", record.avg_heart_rate, record.max_heart_rate, "bpm");
    print_channel("Power", record.avg_power, record.max_power, "W");
    print_channel("Cadence", record.avg_cadence, record.max_cadence, "spm");
    println!("  Route:     {} points", record.route.len());
    println!("  Readings:  {}", reading_count);
    if let Some(notes) = &record.notes {
        println!("  Notes:     {}", notes);
    }
}

fn print_channel(label: &str, avg: Option<u16>, max: Option<u16>, unit: &str) {
    if let (Some(avg), Some(max)) = (avg, max) {
        println!("  {:<10} avg {} {}, max {} {}", format!("{}:", label), avg, unit, max, unit);
    }
}

fn format_duration(seconds: u32) -> String {
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
