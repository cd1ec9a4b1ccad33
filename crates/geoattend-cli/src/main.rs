//! GeoAttend CLI - geofenced attendance verification engine

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use geoattend_core::channel::{ChannelDispatcher, EventHub};
use geoattend_core::config::Config;
use geoattend_core::domain::attendance::{AttendancePipeline, AttendanceRepository};
use geoattend_core::domain::binding::DeviceBindingRegistry;
use geoattend_core::domain::session::{SessionCoordinator, SessionStore};
use geoattend_core::domain::tickets::{SupportTicket, TicketRepository};
use geoattend_core::storage::{export, Database, DatabaseConfig};
use geoattend_core::Error;

#[derive(Parser)]
#[command(name = "geoattend")]
#[command(author, version, about = "Geofenced attendance verification engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path (overrides the configured path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: JSON events on stdin, replies and broadcasts on stdout
    Serve,

    /// Manage attendance records
    Records {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Manage device bindings
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Support ticket intake
    Tickets {
        #[command(subcommand)]
        action: TicketAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum RecordAction {
    /// List records, most recent first
    List {
        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Export all records to a JSONL file
    Export { path: PathBuf },
    /// Delete one record by ID
    Delete { id: String },
    /// Delete all records
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// List all student/device bindings
    List,
    /// Export all bindings to a JSONL file
    Export { path: PathBuf },
    /// Release a student's device binding (administrative)
    Release {
        student_id: String,
        /// Confirm the release
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum TicketAction {
    /// Submit a support ticket
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        message: String,
    },
    /// List submitted tickets, newest first
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geoattend=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command,
        database,
        quiet,
    } = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    let get_db = || async {
        let db_config = match &database {
            Some(path) => DatabaseConfig::with_path(path.clone()),
            None => match &config.database.path {
                Some(path) => DatabaseConfig::with_path(path.clone()),
                None => DatabaseConfig::default(),
            },
        }
        .max_connections(config.database.max_connections);
        Database::new(db_config).await
    };

    match command {
        Commands::Serve => {
            let db = get_db().await?;
            cmd_serve(&db, &config).await
        }

        Commands::Records { action } => {
            let db = get_db().await?;
            cmd_records(&db, action, quiet).await
        }

        Commands::Devices { action } => {
            let db = get_db().await?;
            cmd_devices(&db, action, quiet).await
        }

        Commands::Tickets { action } => {
            let db = get_db().await?;
            cmd_tickets(&db, action, quiet).await
        }

        Commands::Config { action } => cmd_config(action, quiet),

        Commands::Doctor => {
            let db = get_db().await?;
            cmd_doctor(&db, quiet).await
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Run the engine loop over stdin/stdout JSON lines.
///
/// Each input line is one client event. Direct replies and broadcasts
/// are both written as JSON lines; pending broadcasts are drained
/// before exiting so a scripted run sees every event it caused.
async fn cmd_serve(db: &Database, config: &Config) -> anyhow::Result<()> {
    let store = SessionStore::new();
    let hub = EventHub::new(config.channel.capacity);
    let coordinator = SessionCoordinator::new(store.clone(), hub.clone());
    let pipeline = AttendancePipeline::new(
        store,
        DeviceBindingRegistry::new(db.pool().clone()),
        Arc::new(AttendanceRepository::new(db.pool().clone())),
        hub.clone(),
    );
    let dispatcher = ChannelDispatcher::new(coordinator, pipeline, config.session.clone());

    let mut events = hub.subscribe();
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(reply) = dispatcher.dispatch_json(line).await {
                    println!("{reply}");
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            println!("{json}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broadcast receiver lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Stdin is done; flush broadcasts already in the buffer
    while let Ok(event) = events.try_recv() {
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }

    Ok(())
}

async fn cmd_records(db: &Database, action: RecordAction, quiet: bool) -> anyhow::Result<()> {
    let repo = AttendanceRepository::new(db.pool().clone());

    match action {
        RecordAction::List { limit } => {
            let records = repo.list(limit).await?;
            if records.is_empty() {
                if !quiet {
                    println!("No attendance records found.");
                }
            } else {
                if !quiet {
                    println!("Attendance records:");
                }
                for r in records {
                    println!(
                        "  {} - {} ({}) - {} - {} - {}",
                        &r.id.to_string()[..8],
                        r.student_name,
                        r.student_id,
                        r.class_name,
                        r.check_in_time.format("%Y-%m-%d %H:%M:%S"),
                        r.status
                    );
                }
            }
        }

        RecordAction::Export { path } => {
            let result = export::export_attendance_to_file(db.pool(), &path).await?;
            if !quiet {
                println!(
                    "Exported {} record(s) to {}",
                    result.records,
                    result.path.display()
                );
            }
        }

        RecordAction::Delete { id } => {
            let id = Uuid::parse_str(&id).context("Record ID must be a UUID")?;
            if repo.delete(id).await? {
                if !quiet {
                    println!("Record {} deleted.", id);
                }
            } else {
                return Err(Error::RecordNotFound(id.to_string()).into());
            }
        }

        RecordAction::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete all records without --yes");
            }
            let removed = repo.delete_all().await?;
            if !quiet {
                println!("Deleted {} record(s).", removed);
            }
        }
    }

    Ok(())
}

async fn cmd_devices(db: &Database, action: DeviceAction, quiet: bool) -> anyhow::Result<()> {
    let registry = DeviceBindingRegistry::new(db.pool().clone());

    match action {
        DeviceAction::List => {
            let bindings = registry.list().await?;
            if bindings.is_empty() {
                if !quiet {
                    println!("No device bindings found.");
                }
            } else {
                if !quiet {
                    println!("Device bindings:");
                }
                for b in bindings {
                    println!(
                        "  {} -> {} (since {})",
                        b.student_id,
                        b.device_id,
                        b.first_bound_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        DeviceAction::Export { path } => {
            let result = export::export_bindings_to_file(db.pool(), &path).await?;
            if !quiet {
                println!(
                    "Exported {} binding(s) to {}",
                    result.records,
                    result.path.display()
                );
            }
        }

        DeviceAction::Release { student_id, yes } => {
            if !yes {
                anyhow::bail!("Releasing a binding lets another device claim this student ID. Re-run with --yes to confirm.");
            }
            if registry.release(&student_id).await? {
                if !quiet {
                    println!("Binding for student '{}' released.", student_id);
                }
            } else {
                return Err(Error::BindingNotFound(student_id).into());
            }
        }
    }

    Ok(())
}

async fn cmd_tickets(db: &Database, action: TicketAction, quiet: bool) -> anyhow::Result<()> {
    let repo = TicketRepository::new(db.pool().clone());

    match action {
        TicketAction::Submit {
            name,
            email,
            category,
            message,
        } => {
            let ticket = SupportTicket::new(&name, &email, &category, &message);
            repo.save(&ticket).await?;
            if !quiet {
                println!("Ticket submitted.");
                println!("  ID: {}", ticket.id);
                println!("  Category: {}", ticket.category);
            }
        }

        TicketAction::List => {
            let tickets = repo.list().await?;
            if tickets.is_empty() {
                if !quiet {
                    println!("No tickets found.");
                }
            } else {
                if !quiet {
                    println!("Support tickets:");
                }
                for t in tickets {
                    println!(
                        "  {} [{}] {} <{}>: {}",
                        t.created_at.format("%Y-%m-%d %H:%M"),
                        t.category,
                        t.name,
                        t.email,
                        t.message
                    );
                }
            }
        }
    }

    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(db: &Database, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("GeoAttend health check");
        println!("  Database: {}", db.path().display());
    }

    db.health_check().await.context("Database is not reachable")?;
    if !quiet {
        println!("  Connection: ok");
    }

    let status = db.migration_status().await?;
    if !quiet {
        println!(
            "  Schema: v{} (target v{}){}",
            status.current_version,
            status.target_version,
            if status.needs_migration {
                " - MIGRATION NEEDED"
            } else {
                ""
            }
        );
    }

    let records = AttendanceRepository::new(db.pool().clone()).count().await?;
    let bindings = DeviceBindingRegistry::new(db.pool().clone()).list().await?.len();
    let tickets = TicketRepository::new(db.pool().clone()).list().await?.len();
    if !quiet {
        println!("  Attendance records: {}", records);
        println!("  Device bindings: {}", bindings);
        println!("  Support tickets: {}", tickets);
        println!("All checks passed.");
    }

    Ok(())
}
