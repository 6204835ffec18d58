use colored::Colorize;

use crate::dedup::DedupTracker;
use crate::error::Result;
use crate::pipeline::{Pipeline, ScanReport};
use crate::settings::load_settings;
use crate::suggest::SuggestionService;

use super::{open_store, suggester_for};

pub fn run(offline: bool) -> Result<()> {
    let settings = load_settings();
    let mut conn = open_store(&settings)?;
    let mut tracker = DedupTracker::open(&settings.inbox_dir(), &settings.state_path())?;
    let suggester = suggester_for(&settings, offline);
    let suggester = suggester.as_ref().map(|s| s as &dyn SuggestionService);

    let report = Pipeline::new(&mut conn, &settings, suggester)?.run(&mut tracker)?;
    print_report(&report);
    Ok(())
}

pub(crate) fn print_report(report: &ScanReport) {
    println!(
        "{} processed, {} skipped, {} failed",
        report.processed,
        report.skipped,
        report.failed.len()
    );
    println!(
        "{} records written, {} need review",
        report.records_written, report.uncertain
    );
    for (file, error) in &report.failed {
        println!("  {} {file}: {error}", "failed".red());
    }
    if report.uncertain > 0 {
        println!("Run {} to categorize them.", "penny review list".bold());
    }
}
