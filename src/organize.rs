use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{FieldValue, IntermediateRepresentation, OrganizedRecordSet, Record};
use crate::suggest::{capped, create_instruct_prompt, Profile, SuggestionService};

pub const TRANSACTIONS: &str = "transactions";

const ORGANIZE_MAX_CHARS: usize = 6000;

// Extra shapes, keyed off the annotated document type.
const ANNOTATED_SHAPES: &[(&str, &[&str])] = &[
    ("accounts", &["account summary", "account_summary", "balance sheet", "net worth"]),
    ("budgets", &["budget"]),
    ("invoices", &["invoice", "bill"]),
    ("receipts", &["receipt"]),
    ("investments", &["brokerage", "investment", "portfolio"]),
];

const DATE_FIELDS: &[&str] = &[
    "date", "transaction date", "trans date", "txn date", "posting date", "posted date",
    "post date", "value date", "booking date",
];
const AMOUNT_FIELDS: &[&str] = &["amount", "amt", "transaction amount", "value", "sum", "total"];
const DESCRIPTION_FIELDS: &[&str] = &[
    "description", "desc", "details", "memo", "narrative", "payee", "merchant", "name",
    "transaction", "particulars", "reference",
];
const DEBIT_FIELDS: &[&str] = &["debit", "debit amount", "withdrawal", "withdrawals", "money out", "paid out"];
const CREDIT_FIELDS: &[&str] = &["credit", "credit amount", "deposit", "deposits", "money in", "paid in"];

// Written by the categorizer; source columns with these names are kept
// under a `source_` prefix.
const ASSIGNED_FIELDS: &[&str] = &["category", "subcategory"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%y"];

const ORGANIZE_INSTRUCTION: &str = "You extract transactions from financial statements. \
Return JSON of the form {\"transactions\": [{\"date\": \"YYYY-MM-DD\", \"amount\": number, \"description\": string}]}. \
Use negative amounts for money leaving the account and positive amounts for money coming in. \
Return {\"transactions\": []} if there are none.";

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Parses a money string: `$1,234.56`, `(500.00)`, `-$50`, `12.00 DR`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '"' | '$' | '€' | '£') && !c.is_whitespace())
        .collect();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_suffix("DR").or_else(|| s.strip_suffix("dr")) {
        sign = -1.0;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_suffix("CR").or_else(|| s.strip_suffix("cr")) {
        s = rest.to_string();
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        sign = -1.0;
        s = inner.to_string();
    }
    if s.is_empty() {
        return None;
    }
    let value: f64 = s.parse().ok()?;
    value.is_finite().then(|| {
        if sign < 0.0 {
            -value.abs()
        } else {
            value
        }
    })
}

/// Normalizes common date layouts to `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| chrono::NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finds the first field whose normalized name is a synonym, falling back to
/// a field whose name merely contains `stem`.
fn find_field<'r>(record: &'r Record, synonyms: &[&str], stem: Option<&str>) -> Option<&'r str> {
    let keys: Vec<(&str, String)> = record.keys().map(|k| (k, normalize_key(k))).collect();
    for syn in synonyms {
        if let Some((k, _)) = keys.iter().find(|(_, n)| n == syn) {
            return Some(*k);
        }
    }
    let stem = stem?;
    keys.iter().find(|(_, n)| n.contains(stem)).map(|(k, _)| *k)
}

fn value_as_amount(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Text(s) => parse_amount(s),
        other => other.as_f64(),
    }
}

/// Maps an arbitrary row onto date/amount/description. Unrecognised fields
/// are carried along untouched. Rows without a numeric amount yield `None`.
pub fn normalize_record(row: &Record) -> Option<Record> {
    let date_key = find_field(row, DATE_FIELDS, Some("date"));
    let desc_key = find_field(row, DESCRIPTION_FIELDS, Some("description"));
    let debit_key = find_field(row, DEBIT_FIELDS, None);
    let credit_key = find_field(row, CREDIT_FIELDS, None);
    // "Debit Amount" is a debit column, not a signed amount.
    let amount_key = find_field(row, AMOUNT_FIELDS, Some("amount"))
        .filter(|k| Some(*k) != debit_key && Some(*k) != credit_key);

    let amount = match amount_key.and_then(|k| row.get(k)).and_then(value_as_amount) {
        Some(a) => a,
        None => {
            let debit = debit_key.and_then(|k| row.get(k)).and_then(value_as_amount);
            let credit = credit_key.and_then(|k| row.get(k)).and_then(value_as_amount);
            if debit.is_none() && credit.is_none() {
                return None;
            }
            credit.unwrap_or(0.0).abs() - debit.unwrap_or(0.0).abs()
        }
    };

    let date = date_key
        .and_then(|k| row.get(k))
        .map(|v| {
            let s = v.to_string();
            normalize_date(&s).unwrap_or(s)
        })
        .unwrap_or_default();
    let description = desc_key
        .and_then(|k| row.get(k))
        .map(|v| v.to_string().trim().to_string())
        .unwrap_or_default();

    let consumed = [date_key, amount_key, desc_key, debit_key, credit_key];
    let mut out = Record::new()
        .with("date", date)
        .with("amount", amount)
        .with("description", description);
    for (key, value) in row.iter() {
        if consumed.contains(&Some(key)) || out.get(key).is_some() {
            continue;
        }
        let normalized = normalize_key(key);
        if ASSIGNED_FIELDS.contains(&normalized.as_str()) {
            out.insert(format!("source_{normalized}"), value.clone());
        } else {
            out.insert(key, value.clone());
        }
    }
    Some(out)
}

fn statement_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<date>\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|\d{1,2}\.\d{1,2}\.\d{4})\s+(?P<desc>.+?)\s+(?P<amount>\(?[-+]?[$€£]?[\d,]*\d\.\d{2}\)?(?:\s?(?:CR|DR))?)(?:\s+\(?[-+]?[$€£]?[\d,]*\d\.\d{2}\)?)?\s*$",
        )
        .expect("statement line pattern is valid")
    })
}

/// Pulls `date description amount [balance]` lines out of statement text.
pub fn scan_statement_lines(text: &str) -> Vec<Record> {
    let re = statement_line_regex();
    text.lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let amount = parse_amount(&caps["amount"])?;
            let raw_date = &caps["date"];
            Some(
                Record::new()
                    .with("date", normalize_date(raw_date).unwrap_or_else(|| raw_date.to_string()))
                    .with("amount", amount)
                    .with("description", caps["desc"].trim().to_string()),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Stage two: decides which data-shapes a document holds and reshapes it
/// into flat records per shape.
pub struct OrganizationStage<'a> {
    suggester: Option<&'a dyn SuggestionService>,
}

impl<'a> OrganizationStage<'a> {
    pub fn new(suggester: Option<&'a dyn SuggestionService>) -> Self {
        Self { suggester }
    }

    /// Always contains "transactions".
    pub fn classify(&self, repr: &IntermediateRepresentation) -> BTreeSet<String> {
        let mut shapes = BTreeSet::new();
        shapes.insert(TRANSACTIONS.to_string());
        if let Some(doc_type) = repr.document_type() {
            let doc_type = doc_type.replace('-', " ");
            for (shape, keywords) in ANNOTATED_SHAPES {
                if keywords.iter().any(|k| doc_type.contains(k)) {
                    shapes.insert(shape.to_string());
                }
            }
        }
        shapes
    }

    pub fn organize(&self, repr: &IntermediateRepresentation, shape: &str) -> OrganizedRecordSet {
        let records = if shape == TRANSACTIONS {
            self.transactions(repr)
        } else {
            // Recognised shape, no extractor for its records yet.
            Vec::new()
        };
        tracing::debug!(file = %repr.source_file, shape, count = records.len(), "Organized");
        OrganizedRecordSet::new(shape, records, &repr.source_file, &repr.extracted_at)
    }

    pub fn organize_all(&self, repr: &IntermediateRepresentation) -> Vec<OrganizedRecordSet> {
        self.classify(repr)
            .iter()
            .map(|shape| self.organize(repr, shape))
            .collect()
    }

    fn transactions(&self, repr: &IntermediateRepresentation) -> Vec<Record> {
        let suggested = self.suggested_transactions(repr);
        if !suggested.is_empty() {
            return suggested;
        }
        if let Some(rows) = repr.rows.as_ref().filter(|r| !r.is_empty()) {
            let before = rows.len();
            let records: Vec<Record> = rows.iter().filter_map(normalize_record).collect();
            if records.len() < before {
                tracing::debug!(file = %repr.source_file, dropped = before - records.len(), "Rows without amount dropped");
            }
            return records;
        }
        repr.text.as_deref().map(scan_statement_lines).unwrap_or_default()
    }

    fn suggested_transactions(&self, repr: &IntermediateRepresentation) -> Vec<Record> {
        let Some(suggester) = self.suggester.filter(|s| s.is_available()) else {
            return Vec::new();
        };
        let context = match repr.text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => capped(text, ORGANIZE_MAX_CHARS).to_string(),
            None => match &repr.rows {
                Some(rows) => capped(&serde_json::to_string(rows).unwrap_or_default(), ORGANIZE_MAX_CHARS).to_string(),
                None => return Vec::new(),
            },
        };
        let prompt = create_instruct_prompt(ORGANIZE_INSTRUCTION, &context);
        let response = match suggester.suggest(&prompt, 2048, 0.1, Profile::Organizer) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file = %repr.source_file, error = %e, "Transaction suggestion failed, using field mapping");
                return Vec::new();
            }
        };
        response
            .get("transactions")
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(Record::from_json_object)
                    .filter_map(|r| normalize_record(&r))
                    .collect()
            })
            .unwrap_or_default()
    }
}
