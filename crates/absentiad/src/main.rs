//! Absentia daemon - console harness for the absence-notification assistant.
//!
//! Loads and validates the knowledge base (refusing to start on a bad
//! rule set), wires the SQLite collaborators, and drives the dialogue
//! manager over stdin/stdout lines. The chat transport proper is out of
//! scope; this loop stands in for it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

use absentia_common::collaborators::InMemoryIdentifierStore;
use absentia_common::config::Settings;
use absentia_common::dialogue::DialogueManager;
use absentia_common::kb;
use absentia_common::sqlite_store::SqliteStore;

/// Demo employees seeded when the directory is empty.
const DEMO_EMPLOYEES: [(&str, &str); 4] = [
    ("1000", "A. Fernandez"),
    ("1001", "M. Silva"),
    ("1234", "J. Perez"),
    ("2045", "L. Romano"),
];

#[derive(Parser, Debug)]
#[command(name = "absentiad", about = "Absence-notification assistant daemon")]
struct Args {
    /// Configuration file (TOML).
    #[arg(long, default_value = "absentia.toml")]
    config: PathBuf,

    /// Override the SQLite database path from the config.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Session id for this console conversation.
    #[arg(long, default_value = "console")]
    session: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(db) = &args.db {
        settings.database_path = db.display().to_string();
    }

    let level = settings
        .log_level
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("absentiad v{} starting", env!("CARGO_PKG_VERSION"));

    // A knowledge base that fails validation must stop the process here.
    let kb = kb::load_default().context("knowledge base failed validation")?;
    info!(
        rules = kb.rules.len(),
        version = kb.version,
        "knowledge base loaded"
    );

    let store = Arc::new(
        SqliteStore::open(std::path::Path::new(&settings.database_path))
            .context("opening case database")?,
    );
    if store.employee_count()? == 0 {
        store.seed_employees(&DEMO_EMPLOYEES)?;
        info!(count = DEMO_EMPLOYEES.len(), "seeded demo employees");
    }

    let mut manager = DialogueManager::new(
        kb,
        settings,
        store.clone(),
        store,
        Arc::new(InMemoryIdentifierStore::new()),
    );

    println!("Hello! I am the absence assistant. Tell me what you need.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = manager.process_message(&args.session, &line);
                println!("{}", reply.text);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    info!("shutting down");
    Ok(())
}
