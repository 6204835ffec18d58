use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A single in-flight value. Schema inference at the persistence boundary
/// works only on this tag, never on the source format.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl FieldValue {
    /// Best-effort typing of a raw cell. Leading-zero numbers stay text so
    /// account numbers and zip codes survive.
    pub fn infer(raw: &str) -> Self {
        let s = raw.trim();
        match s.to_ascii_lowercase().as_str() {
            "true" => return Self::Boolean(true),
            "false" => return Self::Boolean(false),
            _ => {}
        }
        let digits = s.strip_prefix('-').unwrap_or(s);
        let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
        if !digits.is_empty() && !leading_zero && digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
            if !s.contains('.') {
                if let Ok(i) = s.parse::<i64>() {
                    return Self::Integer(i);
                }
            } else if let Ok(f) = s.parse::<f64>() {
                if f.is_finite() {
                    return Self::Real(f);
                }
            }
        }
        Self::Text(raw.to_string())
    }

    /// Converts a JSON scalar. `null` has no representation and yields `None`;
    /// arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Boolean(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Real),
            },
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(f) => Some(*f),
            Self::Text(_) | Self::Boolean(_) => None,
        }
    }

    #[cfg(test)]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQLite column affinity for this value.
    pub fn column_type(&self) -> &'static str {
        match self {
            Self::Integer(_) | Self::Boolean(_) => "INTEGER",
            Self::Real(_) => "REAL",
            Self::Text(_) => "TEXT",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        Self::Real(f)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Boolean(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
        })
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Real(f) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Ordered field-name → value mapping. Insertion order is preserved so
/// columns are created in the order the source presented them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[cfg(test)]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a record from a JSON object, skipping nulls. Anything that is
    /// not an object yields `None`.
    pub fn from_json_object(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut record = Self::new();
        for (key, v) in obj {
            if let Some(fv) = FieldValue::from_json(v) {
                record.insert(key.clone(), fv);
            }
        }
        Some(record)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A file found by a directory scan whose content hash is not yet known.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub hash: String,
}

impl CandidateFile {
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Pdf,
    Text,
    Unknown,
}

impl SourceFormat {
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "xlsx" | "xls" => Self::Xlsx,
            "pdf" => Self::Pdf,
            "txt" | "text" => Self::Text,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_hint)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Unknown => "unknown",
        }
    }
}

/// Uniform output of the extraction stage.
#[derive(Debug, Clone, Serialize)]
pub struct IntermediateRepresentation {
    pub source_file: String,
    pub format: SourceFormat,
    pub rows: Option<Vec<Record>>,
    pub text: Option<String>,
    pub annotations: Option<serde_json::Value>,
    pub extracted_at: String,
}

impl IntermediateRepresentation {
    pub fn has_rows(&self) -> bool {
        self.rows.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_text(&self) -> bool {
        self.text.as_ref().is_some_and(|t| !t.trim().is_empty())
    }

    /// The annotated document type, lower-cased, if enrichment supplied one.
    pub fn document_type(&self) -> Option<String> {
        self.annotations
            .as_ref()?
            .get("document_type")?
            .as_str()
            .map(|s| s.to_lowercase())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSetMetadata {
    pub source_file: String,
    pub extracted_at: String,
    pub record_count: usize,
}

/// Records of one data-shape, ready for categorization and persistence.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizedRecordSet {
    pub shape: String,
    pub records: Vec<Record>,
    pub metadata: RecordSetMetadata,
}

impl OrganizedRecordSet {
    pub fn new(shape: &str, records: Vec<Record>, source_file: &str, extracted_at: &str) -> Self {
        let record_count = records.len();
        Self {
            shape: shape.to_string(),
            records,
            metadata: RecordSetMetadata {
                source_file: source_file.to_string(),
                extracted_at: extracted_at.to_string(),
                record_count,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLabel {
    pub id: i64,
    pub keyword: String,
    pub category: String,
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UncertainItem {
    pub description: String,
    pub source_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_types() {
        assert_eq!(FieldValue::infer("42"), FieldValue::Integer(42));
        assert_eq!(FieldValue::infer("-12.50"), FieldValue::Real(-12.5));
        assert_eq!(FieldValue::infer("TRUE"), FieldValue::Boolean(true));
        assert_eq!(FieldValue::infer("2025-01-01"), FieldValue::Text("2025-01-01".into()));
        assert_eq!(FieldValue::infer("00123"), FieldValue::Text("00123".into()));
        assert_eq!(FieldValue::infer("0.75"), FieldValue::Real(0.75));
        assert_eq!(FieldValue::infer(""), FieldValue::Text(String::new()));
    }

    #[test]
    fn test_record_preserves_order_and_replaces() {
        let mut r = Record::new().with("date", "2025-01-01").with("amount", 5.0);
        r.insert("date", "2025-02-01");
        let keys: Vec<&str> = r.keys().collect();
        assert_eq!(keys, vec!["date", "amount"]);
        assert_eq!(r.get_text("date"), Some("2025-02-01"));
    }

    #[test]
    fn test_record_from_json_skips_nulls() {
        let v = serde_json::json!({"amount": -3.5, "memo": null, "count": 2});
        let r = Record::from_json_object(&v).unwrap();
        assert_eq!(r.get_f64("amount"), Some(-3.5));
        assert_eq!(r.get("count"), Some(&FieldValue::Integer(2)));
        assert!(r.get("memo").is_none());
        assert!(Record::from_json_object(&serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn test_source_format_detection() {
        assert_eq!(SourceFormat::from_path(Path::new("a/stmt.CSV")), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_hint(".pdf"), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_hint("txt"), SourceFormat::Text);
        assert_eq!(SourceFormat::from_path(Path::new("noext")), SourceFormat::Unknown);
    }
}
