//! Wayfarer CLI - Command line interface for the offline-first engine.
//!
//! This tool reads and writes trips and itinerary events through the
//! engine, inspects the mutation queue and replays it against the backend.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wayfarer_app::{Credential, Engine, EngineConfig, Entity, Event, StaticCredentials, Trip};
use wayfarer_store::QueueEntry;

#[derive(Parser)]
#[command(name = "wayfarer")]
#[command(about = "Wayfarer - Offline-first trip planner engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database location.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Bearer token (defaults to $WAYFARER_TOKEN).
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with trips.
    Trips {
        #[command(subcommand)]
        action: TripAction,
    },

    /// Work with itinerary events.
    Events {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Replay queued offline writes against the backend.
    Sync,

    /// Inspect and manage the mutation queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show freshness stamps of fetched resources.
    Fresh,

    /// Show engine status.
    Status,
}

#[derive(Subcommand)]
enum TripAction {
    /// List trips.
    List {
        /// Ignore the freshness stamp and fetch from the backend.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Create a trip.
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        destination: Option<String>,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum EventAction {
    /// List events of a trip.
    List {
        #[arg(short, long)]
        trip: String,

        #[arg(short, long)]
        refresh: bool,
    },

    /// Add an event to a trip.
    Add {
        #[arg(short, long)]
        trip: String,

        #[arg(long)]
        title: String,

        /// Day of the event (YYYY-MM-DD).
        #[arg(short, long)]
        date: Option<NaiveDate>,

        #[arg(short, long)]
        location: Option<String>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queue entries.
    List {
        /// Only failed entries.
        #[arg(short, long)]
        failed: bool,
    },

    /// Put a failed entry back in line.
    Retry { id: i64 },

    /// Drop a failed entry.
    Discard { id: i64 },

    /// Remove synced entries.
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let engine = open_engine(&cli)?;

    match cli.command {
        Commands::Trips { action } => match action {
            TripAction::List { refresh } => cmd_trips_list(&engine, refresh).await,
            TripAction::Add {
                name,
                destination,
                start,
                end,
            } => cmd_trips_add(&engine, name, destination, start, end).await,
        },

        Commands::Events { action } => match action {
            EventAction::List { trip, refresh } => cmd_events_list(&engine, &trip, refresh).await,
            EventAction::Add {
                trip,
                title,
                date,
                location,
            } => cmd_events_add(&engine, trip, title, date, location).await,
        },

        Commands::Sync => cmd_sync(&engine).await,

        Commands::Queue { action } => match action {
            QueueAction::List { failed } => cmd_queue_list(&engine, failed),
            QueueAction::Retry { id } => {
                engine.queue().retry_failed(id).context("Failed to retry entry")?;
                println!("Entry #{} is pending again.", id);
                Ok(())
            }
            QueueAction::Discard { id } => {
                engine.queue().discard(id).context("Failed to discard entry")?;
                println!("Entry #{} discarded.", id);
                Ok(())
            }
            QueueAction::Purge => {
                let purged = engine.queue().purge_synced()?;
                println!("Purged {} synced entries.", purged);
                Ok(())
            }
        },

        Commands::Fresh => cmd_fresh(&engine),

        Commands::Status => cmd_status(&engine),
    }
}

/// Build the engine from the config file and flags.
fn open_engine(cli: &Cli) -> Result<Engine> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("WAYFARER_TOKEN").ok());
    let credentials = StaticCredentials::new(token.map(|t| Credential::new(t, None)));

    info!("Using database {}", config.database_path.display());
    Engine::open(&config, Arc::new(credentials)).context("Failed to open engine")
}

fn sync_marker(synced: bool) -> &'static str {
    if synced {
        " "
    } else {
        "*"
    }
}

async fn cmd_trips_list(engine: &Engine, refresh: bool) -> Result<()> {
    let trips = if refresh {
        engine.trips().refresh(None).await
    } else {
        engine.trips().get_all(None).await
    }
    .context("Failed to list trips")?;

    if trips.is_empty() {
        println!("No trips.");
        return Ok(());
    }

    for trip in trips {
        let dates = match (trip.start_date, trip.end_date) {
            (Some(start), Some(end)) => format!("{} .. {}", start, end),
            (Some(start), None) => start.to_string(),
            _ => String::new(),
        };
        println!(
            "{} {:<40} {:<24} {}",
            sync_marker(trip.is_synced()),
            trip.id,
            trip.name,
            dates
        );
    }
    println!("\n* = not yet synced");
    Ok(())
}

async fn cmd_trips_add(
    engine: &Engine,
    name: String,
    destination: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let mut trip = Trip::new(name);
    trip.destination = destination;
    trip.start_date = start;
    trip.end_date = end;

    let trip = engine
        .trips()
        .create(trip)
        .await
        .context("Failed to create trip")?;

    if trip.is_synced() {
        println!("Trip created: {}", trip.id);
    } else {
        println!("Trip saved offline as {} (will sync later)", trip.id);
    }
    Ok(())
}

async fn cmd_events_list(engine: &Engine, trip: &str, refresh: bool) -> Result<()> {
    let events = if refresh {
        engine.events().refresh(Some(trip)).await
    } else {
        engine.events().get_all(Some(trip)).await
    }
    .context("Failed to list events")?;

    if events.is_empty() {
        println!("No events for trip {}.", trip);
        return Ok(());
    }

    for event in events {
        let date = event.date.map(|d| d.to_string()).unwrap_or_default();
        println!(
            "{} {:<40} {:<10} {:<30} {}",
            sync_marker(event.is_synced()),
            event.id,
            date,
            event.title,
            event.location.unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_events_add(
    engine: &Engine,
    trip: String,
    title: String,
    date: Option<NaiveDate>,
    location: Option<String>,
) -> Result<()> {
    let mut event = Event::new(title);
    event.set_parent_id(&trip);
    event.date = date;
    event.location = location;

    let event = engine
        .events()
        .create(event)
        .await
        .context("Failed to create event")?;

    if event.is_synced() {
        println!("Event created: {}", event.id);
    } else {
        println!("Event saved offline as {} (will sync later)", event.id);
    }
    Ok(())
}

async fn cmd_sync(engine: &Engine) -> Result<()> {
    let report = engine.sync().await.context("Sync failed")?;

    println!("Synced:    {}", report.synced);
    println!("Failed:    {}", report.failed);
    println!("Remaining: {}", report.remaining);
    for (local, server) in &report.remapped {
        println!("  {} -> {}", local, server);
    }
    if let Some(reason) = report.halted {
        println!("Stopped early: {:?}", reason);
    }
    Ok(())
}

fn print_entry(entry: &QueueEntry) {
    println!(
        "#{:<5} {:<8} {:<7} {:<14} {:<40} {}",
        entry.id,
        entry.status.as_str(),
        entry.action.as_str(),
        entry.family.table(),
        entry.entity_id,
        entry.error.as_deref().unwrap_or("")
    );
}

fn cmd_queue_list(engine: &Engine, failed_only: bool) -> Result<()> {
    let entries = if failed_only {
        engine.queue().list_failed()?
    } else {
        engine.queue().list_all()?
    };

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn cmd_fresh(engine: &Engine) -> Result<()> {
    let entries = engine.freshness().entries()?;
    if entries.is_empty() {
        println!("Nothing fetched yet.");
        return Ok(());
    }

    for entry in entries {
        let fetched = chrono::DateTime::from_timestamp_millis(entry.fetched_at)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| entry.fetched_at.to_string());
        println!("{:<50} {}", entry.resource_key, fetched);
    }
    Ok(())
}

fn cmd_status(engine: &Engine) -> Result<()> {
    let status = engine.status()?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
