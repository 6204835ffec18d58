use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::models::{MemoryLabel, Record, UncertainItem};
use crate::suggest::{create_instruct_prompt, Profile, SuggestionService};

pub const UNCATEGORIZED: &str = "Uncategorized";

const ACCEPT_CONFIDENCE: f64 = 0.6;
const CERTAIN_CONFIDENCE: f64 = 0.8;

const INCOME_KEYWORDS: &[&str] = &["salary", "payroll", "transfer in", "refund", "deposit"];

/// Ordered substring rules; the first rule with a matching keyword wins.
const HEURISTICS: &[(&[&str], &str, Option<&str>)] = &[
    (
        &["whole foods", "trader joe", "aldi", "walmart", "tesco", "sainsbury", "grocery", "supermarket"],
        "Groceries",
        None,
    ),
    (&["uber", "lyft", "shell", "bp ", "exxon", "fuel", "metro", "train", "bus"], "Transport", None),
    (&["netflix", "spotify", "prime", "icloud", "subscription", "subs"], "Subscriptions", None),
    (&["airbnb", "hotel", "booking.com", "expedia", "travel"], "Entertainment", Some("Travel")),
    (&["rent", "mortgage", "landlord"], "Housing", None),
    (
        &["electric", "gas bill", "water", "utility", "utilities", "internet", "broadband"],
        "Utilities",
        None,
    ),
    (
        &["starbucks", "cafe", "coffee", "restaurant", "mcdonald", "kfc", "dining"],
        "Dining",
        None,
    ),
    (&["pharmacy", "doctor", "hospital", "clinic"], "Healthcare", None),
];

const CATEGORIZE_INSTRUCTION: &str = "You are a finance categorization assistant. \
Given a transaction description and amount (negative expense, positive income), \
return a JSON with fields: category, subcategory, confidence (0-1). \
Use common personal finance categories like Groceries, Dining, Transport, Housing, Utilities, \
Healthcare, Entertainment, Subscriptions, Income, Savings, Adjustments.";

fn normalize(description: &str) -> String {
    description.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Memory labels
// ---------------------------------------------------------------------------

/// Immutable snapshot of learned keyword labels, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryLabels {
    labels: Vec<MemoryLabel>,
}

impl MemoryLabels {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT id, keyword, category, subcategory FROM mem_labels ORDER BY id",
        )?;
        let labels = stmt
            .query_map([], |row| {
                Ok(MemoryLabel {
                    id: row.get(0)?,
                    keyword: row.get(1)?,
                    category: row.get(2)?,
                    subcategory: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::from_labels(labels))
    }

    pub fn reload(&mut self, conn: &Connection) -> Result<()> {
        *self = Self::load(conn)?;
        Ok(())
    }

    pub fn from_labels(labels: Vec<MemoryLabel>) -> Self {
        let labels = labels
            .into_iter()
            .map(|mut l| {
                l.keyword = normalize(&l.keyword);
                l
            })
            .filter(|l| !l.keyword.is_empty())
            .collect();
        Self { labels }
    }

    /// Longest keyword contained in the description; the earliest label
    /// wins a tie.
    pub fn lookup(&self, description: &str) -> Option<&MemoryLabel> {
        let d = normalize(description);
        let mut best: Option<&MemoryLabel> = None;
        for label in &self.labels {
            if !d.contains(&label.keyword) {
                continue;
            }
            if best.map_or(true, |b| label.keyword.len() > b.keyword.len()) {
                best = Some(label);
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryLabel> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySource {
    Memory,
    Heuristic,
    Suggestion,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Categorization {
    pub category: String,
    pub subcategory: Option<String>,
    pub certain: bool,
    pub source: CategorySource,
}

pub fn heuristic_category(description: &str, amount: Option<f64>) -> Option<(&'static str, Option<&'static str>)> {
    let d = normalize(description);
    if amount.is_some_and(|a| a > 0.0) && INCOME_KEYWORDS.iter().any(|k| d.contains(k)) {
        let sub = (d.contains("salary") || d.contains("payroll")).then_some("Payroll");
        return Some(("Income", sub));
    }
    HEURISTICS
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| d.contains(k)))
        .map(|(_, category, sub)| (*category, *sub))
}

pub struct CategorizationEngine<'a> {
    labels: &'a MemoryLabels,
    suggester: Option<&'a dyn SuggestionService>,
}

impl<'a> CategorizationEngine<'a> {
    pub fn new(labels: &'a MemoryLabels, suggester: Option<&'a dyn SuggestionService>) -> Self {
        Self { labels, suggester }
    }

    /// Memory, then heuristics, then the suggester, then "Uncategorized".
    pub fn categorize_one(&self, description: &str, amount: Option<f64>) -> Categorization {
        if let Some(label) = self.labels.lookup(description) {
            return Categorization {
                category: label.category.clone(),
                subcategory: label.subcategory.clone(),
                certain: true,
                source: CategorySource::Memory,
            };
        }
        if let Some((category, sub)) = heuristic_category(description, amount) {
            return Categorization {
                category: category.to_string(),
                subcategory: sub.map(str::to_string),
                certain: true,
                source: CategorySource::Heuristic,
            };
        }
        if let Some(suggested) = self.suggest(description, amount) {
            return suggested;
        }
        Categorization {
            category: UNCATEGORIZED.to_string(),
            subcategory: None,
            certain: false,
            source: CategorySource::Fallback,
        }
    }

    fn suggest(&self, description: &str, amount: Option<f64>) -> Option<Categorization> {
        let suggester = self.suggester.filter(|s| s.is_available())?;
        let amount_text = amount.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string());
        let context = format!("description: {description}\namount: {amount_text}");
        let prompt = create_instruct_prompt(CATEGORIZE_INSTRUCTION, &context);
        let response = match suggester.suggest(&prompt, 128, 0.1, Profile::Categorization) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(description, error = %e, "Category suggestion failed");
                return None;
            }
        };
        let category = response
            .get("category")
            .and_then(|c| c.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty())?;
        let confidence = match response.get("confidence") {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };
        if confidence < ACCEPT_CONFIDENCE {
            tracing::debug!(description, category, confidence, "Suggestion below threshold");
            return None;
        }
        let subcategory = response
            .get("subcategory")
            .and_then(|s| s.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(Categorization {
            category: category.to_string(),
            subcategory,
            certain: confidence >= CERTAIN_CONFIDENCE,
            source: CategorySource::Suggestion,
        })
    }

    /// Writes `category`/`subcategory` into each record and returns the
    /// uncertain ones, deduplicated by (description, source file).
    pub fn categorize(&self, records: Vec<Record>, source_file: &str) -> (Vec<Record>, Vec<UncertainItem>) {
        let mut uncertain = Vec::new();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(records.len());

        for mut record in records {
            let description = record
                .get("description")
                .map(|v| v.to_string())
                .unwrap_or_default();
            let result = self.categorize_one(&description, record.get_f64("amount"));
            tracing::debug!(
                description = %description,
                category = %result.category,
                source = ?result.source,
                certain = result.certain,
                "Categorized"
            );
            record.insert("category", result.category);
            if let Some(sub) = result.subcategory {
                record.insert("subcategory", sub);
            }
            if !result.certain {
                let item = UncertainItem {
                    description: description.trim().to_string(),
                    source_file: source_file.trim().to_string(),
                };
                if seen.insert(item.clone()) {
                    uncertain.push(item);
                }
            }
            out.push(record);
        }
        (out, uncertain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::suggest::ScriptedSuggester;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn label(id: i64, keyword: &str, category: &str) -> MemoryLabel {
        MemoryLabel {
            id,
            keyword: keyword.to_string(),
            category: category.to_string(),
            subcategory: None,
        }
    }

    fn txn(description: &str, amount: f64) -> Record {
        Record::new().with("date", "2025-01-01").with("amount", amount).with("description", description)
    }

    #[test]
    fn test_heuristics() {
        assert_eq!(heuristic_category("Coffee Shop", Some(-12.5)), Some(("Dining", None)));
        assert_eq!(heuristic_category("ACME PAYROLL", Some(1000.0)), Some(("Income", Some("Payroll"))));
        assert_eq!(heuristic_category("Tax refund", Some(80.0)), Some(("Income", None)));
        assert_eq!(heuristic_category("Booking.com Lisbon", Some(-300.0)), Some(("Entertainment", Some("Travel"))));
        assert_eq!(heuristic_category("Random Vendor XYZ", Some(-5.0)), None);
    }

    #[test]
    fn test_income_rule_requires_positive_amount() {
        // A negative "deposit" is not income; nothing else matches.
        assert_eq!(heuristic_category("Security deposit", Some(-500.0)), None);
        assert_eq!(heuristic_category("Payroll", None), None);
    }

    #[test]
    fn test_memory_beats_heuristics() {
        let labels = MemoryLabels::from_labels(vec![label(1, "Coffee", "Work Meals")]);
        let engine = CategorizationEngine::new(&labels, None);
        let c = engine.categorize_one("Coffee Shop", Some(-12.5));
        assert_eq!(c.category, "Work Meals");
        assert_eq!(c.source, CategorySource::Memory);
        assert!(c.certain);
    }

    #[test]
    fn test_longest_keyword_wins() {
        let labels = MemoryLabels::from_labels(vec![
            label(1, "coffee", "Dining"),
            label(2, "coffee shop", "Office"),
        ]);
        assert_eq!(labels.lookup("  COFFEE SHOP downtown").unwrap().category, "Office");
    }

    #[test]
    fn test_equal_length_tie_goes_to_first_inserted() {
        let labels = MemoryLabels::from_labels(vec![label(1, "acme", "First"), label(2, "corp", "Second")]);
        assert_eq!(labels.lookup("ACME CORP").unwrap().category, "First");
    }

    #[test]
    fn test_load_labels_from_db() {
        let (_dir, conn) = test_db();
        conn.execute("INSERT INTO mem_labels (keyword, category, subcategory) VALUES ('netflix', 'Fun', 'Streaming')", []).unwrap();
        let mut labels = MemoryLabels::load(&conn).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.lookup("NETFLIX.COM").unwrap().subcategory.as_deref(), Some("Streaming"));

        conn.execute("INSERT INTO mem_labels (keyword, category) VALUES ('gym', 'Health')", []).unwrap();
        labels.reload(&conn).unwrap();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_suggestion_thresholds() {
        let labels = MemoryLabels::default();
        let cases = [(0.9, Some(true)), (0.7, Some(false)), (0.5, None)];
        for (confidence, expected) in cases {
            let suggester = ScriptedSuggester::new().respond(
                Profile::Categorization,
                serde_json::json!({"category": "Pets", "subcategory": "Vet", "confidence": confidence}),
            );
            let engine = CategorizationEngine::new(&labels, Some(&suggester));
            let c = engine.categorize_one("Paws & Claws", Some(-40.0));
            match expected {
                Some(certain) => {
                    assert_eq!(c.category, "Pets");
                    assert_eq!(c.subcategory.as_deref(), Some("Vet"));
                    assert_eq!(c.certain, certain);
                }
                None => {
                    assert_eq!(c.category, UNCATEGORIZED);
                    assert!(!c.certain);
                }
            }
        }
    }

    #[test]
    fn test_suggestion_error_falls_back() {
        let labels = MemoryLabels::default();
        let suggester = ScriptedSuggester::new().fail(Profile::Categorization, "boom");
        let engine = CategorizationEngine::new(&labels, Some(&suggester));
        let c = engine.categorize_one("Mystery", Some(-1.0));
        assert_eq!(c.source, CategorySource::Fallback);
    }

    #[test]
    fn test_heuristic_match_skips_suggester() {
        let labels = MemoryLabels::default();
        let suggester = ScriptedSuggester::new();
        let engine = CategorizationEngine::new(&labels, Some(&suggester));
        engine.categorize_one("Uber trip", Some(-20.0));
        assert_eq!(suggester.call_count(Profile::Categorization), 0);
    }

    #[test]
    fn test_categorize_batch_dedups_uncertain() {
        let labels = MemoryLabels::default();
        let engine = CategorizationEngine::new(&labels, None);
        let records = vec![
            txn("Coffee Shop", -12.5),
            txn("Mystery Vendor", -3.0),
            txn(" Mystery Vendor ", -4.0),
            txn("Payroll", 1000.0),
        ];
        let (out, uncertain) = engine.categorize(records, "stmt.csv");
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].get_text("category"), Some("Dining"));
        assert_eq!(out[1].get_text("category"), Some(UNCATEGORIZED));
        assert_eq!(out[3].get_text("subcategory"), Some("Payroll"));
        assert_eq!(
            uncertain,
            vec![UncertainItem {
                description: "Mystery Vendor".to_string(),
                source_file: "stmt.csv".to_string(),
            }]
        );
    }
}
