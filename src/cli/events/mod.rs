//! Delivery event ingestion.
//!
//! The provider posts delivery/open/click/bounce/complaint events to the
//! HTTP listener (HMAC-signed), or the operator ingests an exported
//! NDJSON file offline. Either path feeds the same tracking code.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use daemonize::Daemonize;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod server;
pub mod signing;

pub use server::EventListener;

use crate::db::Database;
use crate::tracking;

/// Default port for the event listener.
const DEFAULT_EVENTS_PORT: u16 = 9912;

#[derive(Args)]
pub struct EventsArgs {
    #[command(subcommand)]
    pub command: EventsCommands,
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Start the webhook listener
    Serve {
        /// Port to listen on (default: 9912)
        #[arg(short, long, default_value_t = DEFAULT_EVENTS_PORT)]
        port: u16,

        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the webhook listener
    Stop,
    /// Show listener status
    Status,
    /// Show or rotate the shared webhook secret
    Secret {
        /// Generate a new secret, replacing the old one
        #[arg(long)]
        rotate: bool,
    },
    /// Ingest newline-delimited JSON events from a file
    Ingest {
        /// Path to the NDJSON file
        file: String,
    },
}

pub fn run_events(db: &Database, args: EventsArgs) -> Result<()> {
    match args.command {
        EventsCommands::Serve { port, foreground } => start_listener(db, port, foreground),
        EventsCommands::Stop => stop_listener(),
        EventsCommands::Status => show_status(db),
        EventsCommands::Secret { rotate } => manage_secret(db, rotate),
        EventsCommands::Ingest { file } => ingest_file(db, &file),
    }
}

fn start_listener(db: &Database, port: u16, foreground: bool) -> Result<()> {
    // Check if already running
    if let Some(pid) = read_pid_file()? {
        if is_process_running(pid) {
            return Err(anyhow!("Event listener already running (PID {})", pid));
        }
        // Stale PID file, remove it
        remove_pid_file()?;
    }

    let db_path = config_dir()?.join("campaigns.db");

    if foreground {
        write_pid_file(std::process::id())?;

        let listener = EventListener::new(port, db, db_path)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        ctrlc_handler(shutdown_clone);

        println!("Press Ctrl+C to stop");
        let result = listener.start(shutdown);
        remove_pid_file()?;
        result?;
        println!("Event listener stopped");
    } else {
        let pid_path = pid_file_path()?;
        let log_path = log_file_path()?;

        if let Some(parent) = pid_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        // Printed before daemonizing; the parent exits after fork.
        println!("Starting event listener daemon on port {}...", port);
        println!("Log file: {}", log_path.display());
        println!("Stop with: campaigncmd events stop");

        let daemonize = Daemonize::new()
            .pid_file(&pid_path)
            .chown_pid_file(true)
            .working_directory(".")
            .stdout(log_file.try_clone()?)
            .stderr(log_file);

        daemonize
            .start()
            .map_err(|e| anyhow!("Failed to daemonize: {}", e))?;

        // Daemon process from here on. Reopen the database: the parent's
        // handle did not survive the fork boundary cleanly.
        let db = Database::open_at(db_path.clone())?;
        let listener = EventListener::new(port, &db, db_path)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        ctrlc_handler(shutdown_clone);

        if let Err(e) = listener.start(shutdown) {
            eprintln!("Event listener error: {}", e);
        }
    }

    Ok(())
}

fn stop_listener() -> Result<()> {
    match read_pid_file()? {
        Some(pid) => {
            if is_process_running(pid) {
                #[cfg(unix)]
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                println!("Sent stop signal to event listener (PID {})", pid);

                std::thread::sleep(std::time::Duration::from_millis(500));

                if !is_process_running(pid) {
                    remove_pid_file()?;
                    println!("Event listener stopped");
                } else {
                    println!("Event listener still running, may take a moment to stop");
                }
            } else {
                remove_pid_file()?;
                println!("Event listener was not running (stale PID file removed)");
            }
        }
        None => {
            println!("Event listener is not running");
        }
    }
    Ok(())
}

fn show_status(db: &Database) -> Result<()> {
    println!("Event Listener Status");
    println!("─────────────────────");

    match read_pid_file()? {
        Some(pid) if is_process_running(pid) => {
            println!("Status:       Running (PID {})", pid);
            if let Ok(log_path) = log_file_path() {
                if log_path.exists() {
                    println!("Log file:     {}", log_path.display());
                }
            }
        }
        Some(_) => {
            println!("Status:       Stopped (stale PID file)");
        }
        None => {
            println!("Status:       Stopped");
        }
    }

    let secret = db.setting_get("webhook_secret")?;
    println!(
        "Secret:       {}",
        if secret.is_some() { "configured" } else { "not set" }
    );
    println!("Events seen:  {}", db.count_delivery_events()?);

    Ok(())
}

fn manage_secret(db: &Database, rotate: bool) -> Result<()> {
    if rotate {
        let secret = signing::generate_secret();
        db.setting_set("webhook_secret", &secret)?;
        println!("New webhook secret (configure your provider with it):");
        println!("{}", secret);
        return Ok(());
    }

    match db.setting_get("webhook_secret")? {
        Some(secret) => {
            // Show only a prefix; the full value was printed at rotation.
            println!("Secret configured ({}…)", &secret[..8.min(secret.len())]);
        }
        None => {
            println!("No secret yet. Generate one with: campaigncmd events secret --rotate");
        }
    }
    Ok(())
}

fn ingest_file(db: &Database, path: &str) -> Result<()> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path))?;
    let summary = tracking::ingest_ndjson(db, BufReader::new(file))?;
    println!(
        "Recorded {} event(s), {} duplicate(s), {} unknown message(s), {} malformed line(s)",
        summary.recorded, summary.duplicates, summary.unknown, summary.malformed
    );
    Ok(())
}

// ========== Daemon plumbing ==========

fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
    Ok(dir.join("campaigncmd"))
}

fn pid_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("events.pid"))
}

fn log_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("events.log"))
}

fn read_pid_file() -> Result<Option<u32>> {
    let path = pid_file_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    Ok(content.trim().parse().ok())
}

fn write_pid_file(pid: u32) -> Result<()> {
    let path = pid_file_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, pid.to_string())?;
    Ok(())
}

fn remove_pid_file() -> Result<()> {
    let path = pid_file_path()?;
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

fn ctrlc_handler(shutdown: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    });
}
