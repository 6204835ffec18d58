use std::collections::HashMap;

use crate::error::{PennyError, Result};
use crate::extractor::{CsvExtractor, RawContentExtractor, TextExtractor};
use crate::models::{IntermediateRepresentation, SourceFormat};
use crate::session::ProcessingSession;
use crate::suggest::{capped, create_instruct_prompt, Profile, SuggestionService};

const ENRICH_MAX_CHARS: usize = 4000;
const ENRICH_MAX_ROWS: usize = 20;

const ENRICH_INSTRUCTION: &str = "You are a financial document analyst. \
Identify what kind of document this is and return JSON with fields: \
document_type (e.g. bank_statement, credit_card_statement, invoice, receipt, budget, brokerage_statement), \
date_range (object with start and end), account_info (object with institution, account_name, last_four), \
currency (ISO code), entities (list of notable payees or organisations).";

/// Stage one: bytes in, uniform representation out.
pub struct ExtractionStage<'a> {
    extractors: HashMap<SourceFormat, Box<dyn RawContentExtractor>>,
    suggester: Option<&'a dyn SuggestionService>,
}

impl<'a> ExtractionStage<'a> {
    pub fn new(suggester: Option<&'a dyn SuggestionService>) -> Self {
        let mut extractors: HashMap<SourceFormat, Box<dyn RawContentExtractor>> = HashMap::new();
        extractors.insert(SourceFormat::Csv, Box::new(CsvExtractor));
        extractors.insert(SourceFormat::Text, Box::new(TextExtractor));
        #[cfg(feature = "xlsx")]
        extractors.insert(SourceFormat::Xlsx, Box::new(crate::extractor::XlsxExtractor));
        Self { extractors, suggester }
    }

    /// Decodes and enriches one file. Both the raw and the enriched views are
    /// written to the session directory. Fails only when nothing usable was
    /// decoded.
    pub fn extract(
        &self,
        session: &ProcessingSession,
        bytes: &[u8],
        format_hint: Option<&str>,
    ) -> Result<IntermediateRepresentation> {
        let base = self.decode(&session.source_file, bytes, format_hint);
        session.write_artifact("extraction_raw", &base)?;
        if !base.has_rows() && !base.has_text() {
            return Err(PennyError::EmptyExtraction(session.source_file.clone()));
        }

        let enhanced = self.enrich(base);
        session.write_artifact("extraction_enhanced", &enhanced)?;
        Ok(enhanced)
    }

    fn resolve_format(filename: &str, format_hint: Option<&str>) -> SourceFormat {
        format_hint
            .map(SourceFormat::from_hint)
            .filter(|f| *f != SourceFormat::Unknown)
            .unwrap_or_else(|| SourceFormat::from_path(std::path::Path::new(filename)))
    }

    pub fn decode(&self, filename: &str, bytes: &[u8], format_hint: Option<&str>) -> IntermediateRepresentation {
        let format = Self::resolve_format(filename, format_hint);
        let raw = match self.extractors.get(&format) {
            Some(extractor) => extractor.extract(bytes),
            None => {
                tracing::debug!(file = filename, format = format.as_str(), "No extractor, decoding as text");
                TextExtractor.extract(bytes)
            }
        };
        if let Some(err) = &raw.error {
            tracing::warn!(file = filename, format = format.as_str(), error = %err, "Partial extraction");
        }
        IntermediateRepresentation {
            source_file: filename.to_string(),
            format,
            rows: raw.rows.filter(|r| !r.is_empty()),
            text: raw.text,
            annotations: None,
            extracted_at: chrono::Local::now().to_rfc3339(),
        }
    }

    fn enrichment_context(repr: &IntermediateRepresentation) -> String {
        if let Some(rows) = repr.rows.as_ref().filter(|r| !r.is_empty()) {
            let head = &rows[..rows.len().min(ENRICH_MAX_ROWS)];
            return serde_json::to_string(head).unwrap_or_default();
        }
        repr.text
            .as_deref()
            .map(|t| capped(t, ENRICH_MAX_CHARS).to_string())
            .unwrap_or_default()
    }

    fn enrich(&self, mut repr: IntermediateRepresentation) -> IntermediateRepresentation {
        let Some(suggester) = self.suggester.filter(|s| s.is_available()) else {
            return repr;
        };
        let prompt = create_instruct_prompt(ENRICH_INSTRUCTION, &Self::enrichment_context(&repr));
        match suggester.suggest(&prompt, 512, 0.1, Profile::Extraction) {
            Ok(annotations) => {
                tracing::debug!(file = %repr.source_file, "Document annotated");
                repr.annotations = Some(annotations);
            }
            Err(e) => {
                tracing::warn!(file = %repr.source_file, error = %e, "Enrichment failed, continuing without annotations");
            }
        }
        repr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::ScriptedSuggester;

    const CSV: &[u8] = b"date,amount,description\n2025-01-01,-12.50,Coffee Shop\n2025-01-02,1000.00,Payroll\n";

    #[test]
    fn test_csv_dispatch() {
        let stage = ExtractionStage::new(None);
        let repr = stage.decode("stmt.csv", CSV, None);
        assert_eq!(repr.format, SourceFormat::Csv);
        assert_eq!(repr.rows.as_ref().unwrap().len(), 2);
        assert!(repr.annotations.is_none());
    }

    #[test]
    fn test_hint_overrides_extension() {
        let stage = ExtractionStage::new(None);
        let repr = stage.decode("export.dat", CSV, Some("csv"));
        assert_eq!(repr.format, SourceFormat::Csv);
        assert!(repr.has_rows());
    }

    #[test]
    fn test_unknown_format_degrades_to_lossy_text() {
        let stage = ExtractionStage::new(None);
        let repr = stage.decode("blob.bin", &[b'o', b'k', 0xFF, b'!'], None);
        assert_eq!(repr.format, SourceFormat::Unknown);
        assert!(repr.rows.is_none());
        assert_eq!(repr.text.as_deref(), Some("ok\u{fffd}!"));
    }

    #[test]
    fn test_enrichment_attaches_annotations() {
        let root = tempfile::tempdir().unwrap();
        let suggester = ScriptedSuggester::new().respond(
            Profile::Extraction,
            serde_json::json!({"document_type": "bank_statement", "currency": "USD"}),
        );
        let stage = ExtractionStage::new(Some(&suggester));
        let session = ProcessingSession::start(root.path(), "stmt.csv", false).unwrap();
        let repr = stage.extract(&session, CSV, None).unwrap();
        assert_eq!(repr.document_type().as_deref(), Some("bank_statement"));
        assert!(session.dir().join("extraction_raw.json").exists());
        assert!(session.dir().join("extraction_enhanced.json").exists());
    }

    #[test]
    fn test_enrichment_failure_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let suggester = ScriptedSuggester::new().fail(Profile::Extraction, "timeout");
        let stage = ExtractionStage::new(Some(&suggester));
        let session = ProcessingSession::start(root.path(), "stmt.csv", false).unwrap();
        let repr = stage.extract(&session, CSV, None).unwrap();
        assert!(repr.annotations.is_none());
        assert!(repr.has_rows());
        assert!(session.dir().join("extraction_enhanced.json").exists());
    }

    #[test]
    fn test_unavailable_suggester_not_called() {
        let root = tempfile::tempdir().unwrap();
        let suggester = ScriptedSuggester::unavailable();
        let stage = ExtractionStage::new(Some(&suggester));
        let session = ProcessingSession::start(root.path(), "stmt.csv", false).unwrap();
        stage.extract(&session, CSV, None).unwrap();
        assert_eq!(suggester.call_count(Profile::Extraction), 0);
    }

    #[test]
    fn test_enrichment_prompt_is_capped() {
        let root = tempfile::tempdir().unwrap();
        let suggester = ScriptedSuggester::new().fail(Profile::Extraction, "x");
        let stage = ExtractionStage::new(Some(&suggester));
        let session = ProcessingSession::start(root.path(), "long.txt", false).unwrap();
        let text = "a".repeat(ENRICH_MAX_CHARS * 5);
        stage.extract(&session, text.as_bytes(), None).unwrap();
        let calls = suggester.calls.borrow();
        assert!(calls[0].1.len() < ENRICH_MAX_CHARS + ENRICH_INSTRUCTION.len() + 64);
    }

    #[test]
    fn test_empty_file_is_session_fatal() {
        let root = tempfile::tempdir().unwrap();
        let stage = ExtractionStage::new(None);
        let session = ProcessingSession::start(root.path(), "empty.txt", false).unwrap();
        let err = stage.extract(&session, b"   \n", None).unwrap_err();
        assert!(matches!(err, PennyError::EmptyExtraction(_)));
    }
}
