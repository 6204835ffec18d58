use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::categorizer::{CategorizationEngine, MemoryLabels};
use crate::db;
use crate::dedup::{read_and_hash, DedupTracker};
use crate::error::Result;
use crate::extraction::ExtractionStage;
use crate::models::file_name_of;
use crate::organize::{OrganizationStage, TRANSACTIONS};
use crate::persist::AdaptivePersistenceEngine;
use crate::session::ProcessingSession;
use crate::settings::Settings;
use crate::suggest::SuggestionService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Processed { records_written: usize, uncertain: usize },
    /// The store already holds a document with this content.
    AlreadyStored,
    /// The dedup state already lists this content.
    AlreadyProcessed,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<(String, String)>,
    pub records_written: usize,
    pub uncertain: usize,
}

/// Drives files through extraction, organization, categorization and
/// persistence, one session per file.
pub struct Pipeline<'a> {
    conn: &'a mut Connection,
    sessions_dir: PathBuf,
    keep_artifacts: bool,
    suggester: Option<&'a dyn SuggestionService>,
    extraction: ExtractionStage<'a>,
    organization: OrganizationStage<'a>,
    labels: MemoryLabels,
    persistence: AdaptivePersistenceEngine,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        conn: &'a mut Connection,
        settings: &Settings,
        suggester: Option<&'a dyn SuggestionService>,
    ) -> Result<Self> {
        let labels = MemoryLabels::load(conn)?;
        tracing::debug!(labels = labels.len(), "Memory labels loaded");
        Ok(Self {
            conn,
            sessions_dir: settings.sessions_dir(),
            keep_artifacts: settings.keep_session_artifacts,
            suggester,
            extraction: ExtractionStage::new(suggester),
            organization: OrganizationStage::new(suggester),
            labels,
            persistence: AdaptivePersistenceEngine::new(),
        })
    }

    /// Processes every new file in the tracker's watch directory. One file
    /// failing never stops the others.
    pub fn run(&mut self, tracker: &mut DedupTracker) -> Result<ScanReport> {
        self.labels.reload(self.conn)?;
        if self.labels.is_empty() {
            tracing::debug!("No memory labels learned yet");
        }
        let candidates = tracker.scan()?;
        tracing::info!(count = candidates.len(), "Scan found new files");

        let mut report = ScanReport::default();
        for candidate in candidates {
            let name = candidate.file_name();
            match self.process(&name, &candidate.bytes, &candidate.hash, None) {
                Ok(FileOutcome::Processed { records_written, uncertain }) => {
                    tracker.admit(&candidate.hash)?;
                    report.processed += 1;
                    report.records_written += records_written;
                    report.uncertain += uncertain;
                }
                Ok(_) => {
                    tracker.admit(&candidate.hash)?;
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Processing failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Processes a single file outside the watch directory.
    pub fn import_file(
        &mut self,
        tracker: &mut DedupTracker,
        path: &Path,
        format_hint: Option<&str>,
    ) -> Result<FileOutcome> {
        let (bytes, hash) = read_and_hash(path)?;
        if tracker.is_known(&hash) {
            return Ok(FileOutcome::AlreadyProcessed);
        }
        let outcome = self.process(&file_name_of(path), &bytes, &hash, format_hint)?;
        tracker.admit(&hash)?;
        Ok(outcome)
    }

    /// One session: extract, organize, categorize, persist. The session's
    /// artifacts are removed on every exit path.
    pub fn process(
        &mut self,
        filename: &str,
        bytes: &[u8],
        hash: &str,
        format_hint: Option<&str>,
    ) -> Result<FileOutcome> {
        if db::document_exists_for_hash(self.conn, hash)? {
            tracing::info!(file = filename, "Content already stored, admitting without reprocessing");
            return Ok(FileOutcome::AlreadyStored);
        }

        let session = ProcessingSession::start(&self.sessions_dir, filename, self.keep_artifacts)?;
        tracing::info!(file = filename, session = %session.id, "Processing");
        tracing::debug!(dir = %session.dir().display(), "Session artifacts");

        let repr = self.extraction.extract(&session, bytes, format_hint)?;
        let mut sets = self.organization.organize_all(&repr);
        session.write_artifact("organized", &sets)?;

        let mut uncertain = Vec::new();
        if let Some(set) = sets.iter_mut().find(|s| s.shape == TRANSACTIONS) {
            let engine = CategorizationEngine::new(&self.labels, self.suggester);
            let (records, flagged) = engine.categorize(std::mem::take(&mut set.records), filename);
            set.records = records;
            uncertain = flagged;
        }
        session.write_artifact("categorized", &sets)?;

        let records_written = self
            .persistence
            .persist(self.conn, &sets, filename, Some(hash), &uncertain)?;
        if records_written == 0 {
            tracing::warn!(file = filename, "No records found in file");
        }
        tracing::info!(
            file = filename,
            records = records_written,
            uncertain = uncertain.len(),
            "Processed"
        );
        Ok(FileOutcome::Processed {
            records_written,
            uncertain: uncertain.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::reviewer;
    use crate::suggest::{Profile, ScriptedSuggester};

    const STATEMENT: &str = "date,amount,description\n2025-01-01,-12.50,Coffee Shop\n2025-01-02,1000.00,Payroll\n";

    struct Env {
        _dir: tempfile::TempDir,
        settings: Settings,
        conn: Connection,
        tracker: DedupTracker,
    }

    fn setup() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_string_lossy().to_string(),
            ..Settings::default()
        };
        let conn = get_connection(&settings.db_path()).unwrap();
        init_db(&conn).unwrap();
        let tracker = DedupTracker::open(&settings.inbox_dir(), &settings.state_path()).unwrap();
        Env {
            _dir: dir,
            settings,
            conn,
            tracker,
        }
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_end_to_end_csv() {
        let mut env = setup();
        std::fs::write(env.settings.inbox_dir().join("jan.csv"), STATEMENT).unwrap();

        let report = Pipeline::new(&mut env.conn, &env.settings, None)
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.records_written, 2);
        assert_eq!(report.uncertain, 0);
        assert!(report.failed.is_empty());

        assert_eq!(count(&env.conn, "SELECT count(*) FROM documents"), 1);
        assert_eq!(count(&env.conn, "SELECT count(DISTINCT document_id) FROM transactions"), 1);
        let rows: Vec<(String, f64, String, Option<String>)> = env
            .conn
            .prepare("SELECT description, amount, category, subcategory FROM transactions ORDER BY id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("Coffee Shop".to_string(), -12.5, "Dining".to_string(), None));
        assert_eq!(rows[1].2, "Income");
        assert_eq!(rows[1].3.as_deref(), Some("Payroll"));
        assert_eq!(env.tracker.stats().total_processed, 1);
    }

    #[test]
    fn test_source_category_column_does_not_override_assigned() {
        let mut env = setup();
        std::fs::write(
            env.settings.inbox_dir().join("chase.csv"),
            "Transaction Date,Description,Category,Amount\n01/01/2025,Coffee Shop,Food & Drink,-12.50\n",
        )
        .unwrap();

        let report = Pipeline::new(&mut env.conn, &env.settings, None)
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.records_written, 1);
        let (category, source): (String, String) = env
            .conn
            .query_row("SELECT category, source_category FROM transactions", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(category, "Dining");
        assert_eq!(source, "Food & Drink");
    }

    #[test]
    fn test_trailing_commas_still_yield_records() {
        let mut env = setup();
        std::fs::write(
            env.settings.inbox_dir().join("bank.csv"),
            "date,amount,description\n2025-01-01,-12.50,Coffee Shop,\n2025-01-02,1000.00,Payroll,\n",
        )
        .unwrap();

        let report = Pipeline::new(&mut env.conn, &env.settings, None)
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.records_written, 2);
        assert_eq!(count(&env.conn, "SELECT count(*) FROM transactions"), 2);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let mut env = setup();
        std::fs::write(env.settings.inbox_dir().join("jan.csv"), STATEMENT).unwrap();
        std::fs::write(env.settings.inbox_dir().join("jan-copy.csv"), STATEMENT).unwrap();
        {
            let mut pipeline = Pipeline::new(&mut env.conn, &env.settings, None).unwrap();
            let first = pipeline.run(&mut env.tracker).unwrap();
            assert_eq!(first.processed, 1);
            let second = pipeline.run(&mut env.tracker).unwrap();
            assert_eq!(second.processed + second.skipped, 0);
        }
        assert_eq!(count(&env.conn, "SELECT count(*) FROM transactions"), 2);
    }

    #[test]
    fn test_stored_hash_admitted_without_reprocessing() {
        let mut env = setup();
        std::fs::write(env.settings.inbox_dir().join("jan.csv"), STATEMENT).unwrap();
        let hash = crate::dedup::hash_bytes(STATEMENT.as_bytes());
        env.conn
            .execute(
                "INSERT INTO documents (filename, uploaded_at, content_hash) VALUES ('jan.csv', 'x', ?1)",
                [&hash],
            )
            .unwrap();

        let report = Pipeline::new(&mut env.conn, &env.settings, None)
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        assert!(env.tracker.is_known(&hash));
        assert_eq!(count(&env.conn, "SELECT count(*) FROM transactions"), 0);
    }

    #[test]
    fn test_failed_file_is_not_admitted_and_cleaned_up() {
        let mut env = setup();
        std::fs::write(env.settings.inbox_dir().join("blank.txt"), "   \n").unwrap();
        std::fs::write(env.settings.inbox_dir().join("jan.csv"), STATEMENT).unwrap();

        let report = Pipeline::new(&mut env.conn, &env.settings, None)
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "blank.txt");
        assert!(!env.tracker.is_known(&crate::dedup::hash_bytes(b"   \n")));
        let leftover = std::fs::read_dir(env.settings.sessions_dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_uncertain_items_queued() {
        let mut env = setup();
        let csv = "date,amount,description\n2025-01-03,-7.00,Mystery Vendor\n2025-01-04,-8.00,Mystery Vendor\n";
        std::fs::write(env.settings.inbox_dir().join("feb.csv"), csv).unwrap();
        let suggester = ScriptedSuggester::new()
            .respond(Profile::Categorization, serde_json::json!({"category": "Shopping", "confidence": 0.7}));

        let report = Pipeline::new(&mut env.conn, &env.settings, Some(&suggester))
            .unwrap()
            .run(&mut env.tracker)
            .unwrap();
        assert_eq!(report.records_written, 2);
        let queued = reviewer::fetch_uncertain(&env.conn).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].description, "Mystery Vendor");
        assert_eq!(queued[0].source_file, "feb.csv");
        let category: String = env
            .conn
            .query_row("SELECT category FROM transactions LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(category, "Shopping");
    }

    #[test]
    fn test_import_file_outside_inbox() {
        let mut env = setup();
        let outside = env.settings.data_path().join("export.dat");
        std::fs::write(&outside, STATEMENT).unwrap();

        let mut pipeline = Pipeline::new(&mut env.conn, &env.settings, None).unwrap();
        let outcome = pipeline.import_file(&mut env.tracker, &outside, Some("csv")).unwrap();
        assert_eq!(
            outcome,
            FileOutcome::Processed {
                records_written: 2,
                uncertain: 0
            }
        );
        let again = pipeline.import_file(&mut env.tracker, &outside, Some("csv")).unwrap();
        assert_eq!(again, FileOutcome::AlreadyProcessed);
    }
}
