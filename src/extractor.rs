use crate::models::{FieldValue, Record};

/// Result of decoding one file's bytes. Malformed input yields a partial
/// result with `error` set instead of failing.
#[derive(Debug, Default, Clone)]
pub struct RawContent {
    pub rows: Option<Vec<Record>>,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// Byte-level decoder for one file format.
pub trait RawContentExtractor {
    fn extract(&self, bytes: &[u8]) -> RawContent;
}

pub fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

pub struct TextExtractor;

impl RawContentExtractor for TextExtractor {
    fn extract(&self, bytes: &[u8]) -> RawContent {
        RawContent {
            rows: None,
            text: Some(decode_text(bytes)),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Delimited tables
// ---------------------------------------------------------------------------

pub struct CsvExtractor;

/// Header candidates have at least two non-empty cells and no numeric ones.
fn is_header_row(cells: &[String]) -> bool {
    let filled: Vec<&String> = cells.iter().filter(|c| !c.trim().is_empty()).collect();
    filled.len() >= 2
        && filled
            .iter()
            .all(|c| matches!(FieldValue::infer(c.trim()), FieldValue::Text(_)))
}

/// The header is the widest candidate above the first data row, earliest on
/// ties, so narrower preamble lines above it are skipped.
fn find_header(grid: &[Vec<String>]) -> Option<usize> {
    let mut header: Option<usize> = None;
    for (i, cells) in grid.iter().enumerate() {
        if is_header_row(cells) {
            if header.map_or(true, |h| cells.len() > grid[h].len()) {
                header = Some(i);
            }
        } else if header.is_some() && cells.iter().any(|c| !c.trim().is_empty()) {
            break;
        }
    }
    header
}

fn trim_trailing_blanks(mut cells: Vec<String>) -> Vec<String> {
    while cells.last().is_some_and(|c| c.trim().is_empty()) {
        cells.pop();
    }
    cells
}

/// Unique, non-empty header names.
fn header_names(cells: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let base = match cell.trim() {
            "" => format!("column_{}", i + 1),
            s => s.to_string(),
        };
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        names.push(name);
    }
    names
}

/// Turns a grid of cells into records, skipping any preamble above the
/// header and blank cells within rows.
pub fn rows_from_grid(grid: Vec<Vec<String>>) -> Vec<Record> {
    let grid: Vec<Vec<String>> = grid.into_iter().map(trim_trailing_blanks).collect();
    let Some(header_idx) = find_header(&grid) else {
        return Vec::new();
    };
    let headers = header_names(&grid[header_idx]);

    let mut rows = Vec::new();
    for cells in grid.into_iter().skip(header_idx + 1) {
        let mut record = Record::new();
        for (name, cell) in headers.iter().zip(cells.iter()) {
            if cell.trim().is_empty() {
                continue;
            }
            record.insert(name.clone(), FieldValue::infer(cell.trim()));
        }
        if !record.is_empty() {
            rows.push(record);
        }
    }
    rows
}

impl RawContentExtractor for CsvExtractor {
    fn extract(&self, bytes: &[u8]) -> RawContent {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);
        let mut grid = Vec::new();
        let mut bad_rows = 0usize;
        for result in rdr.byte_records() {
            let Ok(record) = result else {
                bad_rows += 1;
                continue;
            };
            grid.push(
                record
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).to_string())
                    .collect::<Vec<_>>(),
            );
        }
        let rows = rows_from_grid(grid);
        let error = match (bad_rows, rows.is_empty()) {
            (0, false) => None,
            (0, true) => Some("no header row found".to_string()),
            (n, _) => Some(format!("{n} malformed rows skipped")),
        };
        RawContent {
            rows: Some(rows),
            text: Some(decode_text(bytes)),
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Spreadsheets (feature-gated)
// ---------------------------------------------------------------------------

#[cfg(feature = "xlsx")]
pub struct XlsxExtractor;

#[cfg(feature = "xlsx")]
impl RawContentExtractor for XlsxExtractor {
    fn extract(&self, bytes: &[u8]) -> RawContent {
        use calamine::{Data, Reader, Xlsx};

        let cursor = std::io::Cursor::new(bytes.to_vec());
        let mut workbook: Xlsx<_> = match calamine::open_workbook_from_rs(cursor) {
            Ok(wb) => wb,
            Err(e) => {
                return RawContent {
                    error: Some(format!("Failed to open XLSX: {e}")),
                    ..RawContent::default()
                }
            }
        };
        let Some(sheet) = workbook.sheet_names().first().cloned() else {
            return RawContent {
                error: Some("workbook has no sheets".to_string()),
                ..RawContent::default()
            };
        };
        let range = match workbook.worksheet_range(&sheet) {
            Ok(r) => r,
            Err(e) => {
                return RawContent {
                    error: Some(format!("Failed to read sheet {sheet}: {e}")),
                    ..RawContent::default()
                }
            }
        };
        let grid: Vec<Vec<String>> = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Data::Empty => String::new(),
                        Data::String(s) => s.clone(),
                        Data::Float(f) => f.to_string(),
                        Data::Int(i) => i.to_string(),
                        Data::Bool(b) => b.to_string(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        let text = grid
            .iter()
            .map(|r| r.join("\t"))
            .collect::<Vec<_>>()
            .join("\n");
        RawContent {
            rows: Some(rows_from_grid(grid)),
            text: Some(text),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_basic() {
        let out = CsvExtractor.extract(b"date,amount,description\n2025-01-01,-12.50,Coffee Shop\n");
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_f64("amount"), Some(-12.5));
        assert_eq!(rows[0].get_text("description"), Some("Coffee Shop"));
        assert!(out.error.is_none());
    }

    #[test]
    fn test_csv_skips_preamble() {
        let content = "\
Account Name: Test Checking
Account Number: ****1234

Date,Description,Amount,Running Bal.
01/15/2025,ADOBE CREATIVE,-50.00,950.00
01/17/2025,STRIPE PAYOUT,2500.00,3450.00
";
        let rows = CsvExtractor.extract(content.as_bytes()).rows.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_text("Description"), Some("ADOBE CREATIVE"));
        assert_eq!(rows[1].get_f64("Running Bal."), Some(3450.0));
    }

    #[test]
    fn test_csv_trailing_commas() {
        let content = "date,amount,description\n2025-01-01,-12.50,Coffee Shop,\n2025-01-02,1000.00,Payroll,\n";
        let out = CsvExtractor.extract(content.as_bytes());
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_f64("amount"), Some(-12.5));
        assert_eq!(rows[1].get_text("description"), Some("Payroll"));
        assert!(out.error.is_none());
    }

    #[test]
    fn test_csv_two_column_preamble_is_skipped() {
        let content = "Account,Everyday Checking\nDate,Description,Amount\n01/15/2025,ADOBE,-50.00\n";
        let rows = CsvExtractor.extract(content.as_bytes()).rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("Description"), Some("ADOBE"));
        assert!(rows[0].get("Everyday Checking").is_none());
    }

    #[test]
    fn test_csv_all_text_rows_keep_first_header() {
        let content = "Date,Description,Amount\n01/30/2025,REFUND,\"1,000.00\"\n01/31/2025,DEPOSIT,\"2,000.00\"\n";
        let rows = CsvExtractor.extract(content.as_bytes()).rows.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_text("Description"), Some("DEPOSIT"));
    }

    #[test]
    fn test_csv_quoted_amounts_stay_text() {
        let content = "Date,Description,Amount\n01/31/2025,DEPOSIT,\"2,000.00\"\n";
        let rows = CsvExtractor.extract(content.as_bytes()).rows.unwrap();
        assert_eq!(rows[0].get_text("Amount"), Some("2,000.00"));
    }

    #[test]
    fn test_csv_invalid_utf8_does_not_fail() {
        let mut bytes = b"date,amount,description\n2025-01-01,5.00,Caf".to_vec();
        bytes.push(0xE9);
        bytes.push(b'\n');
        let out = CsvExtractor.extract(&bytes);
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get_text("description").unwrap().starts_with("Caf"));
    }

    #[test]
    fn test_csv_without_header_reports_error() {
        let out = CsvExtractor.extract(b"1,2,3\n4,5,6\n");
        assert!(out.rows.unwrap().is_empty());
        assert!(out.error.is_some());
    }

    #[test]
    fn test_duplicate_and_blank_headers() {
        let names = header_names(&["Amount".into(), "".into(), "Amount".into()]);
        assert_eq!(names, vec!["Amount", "column_2", "Amount_2"]);
    }

    #[test]
    fn test_text_strips_bom() {
        let out = TextExtractor.extract("\u{feff}hello".as_bytes());
        assert_eq!(out.text.as_deref(), Some("hello"));
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_xlsx_garbage_reports_error() {
        let out = XlsxExtractor.extract(b"definitely not a zip");
        assert!(out.error.is_some());
        assert!(out.rows.is_none());
    }
}
