mod categorizer;
mod cli;
mod db;
mod dedup;
mod error;
mod extraction;
mod extractor;
mod fmt;
mod models;
mod organize;
mod persist;
mod pipeline;
mod reviewer;
mod session;
mod settings;
mod suggest;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, LabelsCommands, ReviewCommands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penny=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Scan { offline } => cli::scan::run(offline),
        Commands::Import {
            file,
            format,
            offline,
        } => cli::import::run(&file, format.as_deref(), offline),
        Commands::Review { command } => match command {
            ReviewCommands::List => cli::review::list(),
            ReviewCommands::Resolve {
                id,
                category,
                subcategory,
                keyword,
                no_learn,
            } => cli::review::resolve(
                id,
                &category,
                subcategory.as_deref(),
                keyword.as_deref(),
                !no_learn,
            ),
        },
        Commands::Labels { command } => match command {
            LabelsCommands::Add {
                keyword,
                category,
                subcategory,
            } => cli::labels::add(&keyword, &category, subcategory.as_deref()),
            LabelsCommands::List => cli::labels::list(),
        },
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
