pub mod import;
pub mod init;
pub mod labels;
pub mod review;
pub mod scan;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::Settings;
use crate::suggest::OllamaSuggester;

/// Opens the store, applying any pending schema upgrades.
pub(crate) fn open_store(settings: &Settings) -> Result<Connection> {
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    Ok(conn)
}

/// The configured suggester, unless disabled or running offline.
pub(crate) fn suggester_for(settings: &Settings, offline: bool) -> Option<OllamaSuggester> {
    if offline || !settings.suggester.enabled {
        return None;
    }
    match OllamaSuggester::new(&settings.suggester) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "Suggestion service disabled");
            None
        }
    }
}

#[derive(Parser)]
#[command(name = "penny", about = "Turns finance statements into categorized transactions.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for penny data (default: ~/Documents/penny)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Process every new file in the inbox.
    Scan {
        /// Skip the local model; use memory and heuristics only
        #[arg(long)]
        offline: bool,
    },
    /// Process a single file from anywhere on disk.
    Import {
        /// Path to a CSV, XLSX, PDF or text file
        file: String,
        /// Force a format: csv, xlsx, pdf, txt
        #[arg(long)]
        format: Option<String>,
        /// Skip the local model; use memory and heuristics only
        #[arg(long)]
        offline: bool,
    },
    /// Work through transactions that need a human decision.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Manage learned keyword labels.
    Labels {
        #[command(subcommand)]
        command: LabelsCommands,
    },
    /// Show data locations and store statistics.
    Status,
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// List queued items.
    List,
    /// Assign a category to a queued item.
    Resolve {
        /// Item ID (shown in `penny review list`)
        id: i64,
        /// Category to assign
        #[arg(long)]
        category: String,
        /// Optional subcategory
        #[arg(long)]
        subcategory: Option<String>,
        /// Keyword to remember (default: first two words of the description)
        #[arg(long)]
        keyword: Option<String>,
        /// Don't remember this decision for future imports
        #[arg(long = "no-learn")]
        no_learn: bool,
    },
}

#[derive(Subcommand)]
pub enum LabelsCommands {
    /// Teach a keyword → category mapping.
    Add {
        /// Keyword matched against descriptions (case-insensitive)
        keyword: String,
        /// Category to assign
        #[arg(long)]
        category: String,
        /// Optional subcategory
        #[arg(long)]
        subcategory: Option<String>,
    },
    /// List learned labels.
    List,
}
