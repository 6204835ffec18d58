use std::path::PathBuf;

use crate::dedup::DedupTracker;
use crate::error::{PennyError, Result};
use crate::models::SourceFormat;
use crate::pipeline::{FileOutcome, Pipeline};
use crate::settings::load_settings;
use crate::suggest::SuggestionService;

use super::{open_store, suggester_for};

pub fn run(file: &str, format: Option<&str>, offline: bool) -> Result<()> {
    let file_path = PathBuf::from(file);
    if !file_path.is_file() {
        return Err(PennyError::NotFound(file.to_string()));
    }
    if let Some(hint) = format {
        if SourceFormat::from_hint(hint) == SourceFormat::Unknown {
            return Err(PennyError::UnknownFormat(hint.to_string()));
        }
    }

    let settings = load_settings();
    let mut conn = open_store(&settings)?;
    let mut tracker = DedupTracker::open(&settings.inbox_dir(), &settings.state_path())?;
    let suggester = suggester_for(&settings, offline);
    let suggester = suggester.as_ref().map(|s| s as &dyn SuggestionService);

    let mut pipeline = Pipeline::new(&mut conn, &settings, suggester)?;
    match pipeline.import_file(&mut tracker, &file_path, format)? {
        FileOutcome::Processed {
            records_written,
            uncertain,
        } => {
            println!("{records_written} records written, {uncertain} need review");
        }
        FileOutcome::AlreadyStored | FileOutcome::AlreadyProcessed => {
            println!("This file has already been imported (duplicate checksum).");
        }
    }
    Ok(())
}
