use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PennyError, Result};
use crate::settings::SuggesterSettings;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which "personality" a request is for. Each maps to its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Extraction,
    Organizer,
    Categorization,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Organizer => "organizer",
            Self::Categorization => "categorization",
        }
    }
}

/// A best-effort source of structured JSON answers. Every caller must
/// behave correctly when this is absent, unavailable, or failing.
pub trait SuggestionService {
    fn is_available(&self) -> bool;

    fn suggest(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        profile: Profile,
    ) -> Result<serde_json::Value>;
}

pub fn create_instruct_prompt(instruction: &str, context: &str) -> String {
    if context.is_empty() {
        format!("Instruction: {instruction}")
    } else {
        format!("Instruction: {instruction}\n\nContext:\n{context}")
    }
}

/// Parses a JSON object out of a model response, tolerating chatter around
/// it by falling back to the first `{` through the last `}`.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
        Ok(v @ serde_json::Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn capped(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Suggestion service backed by a local Ollama instance.
pub struct OllamaSuggester {
    base_url: String,
    client: reqwest::blocking::Client,
    settings: SuggesterSettings,
    available: OnceLock<bool>,
}

impl OllamaSuggester {
    pub fn new(settings: &SuggesterSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| PennyError::Suggestion(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            client,
            settings: settings.clone(),
            available: OnceLock::new(),
        })
    }

    fn model_for(&self, profile: Profile) -> &str {
        let models = &self.settings.models;
        match profile {
            Profile::Extraction => &models.extraction,
            Profile::Organizer => &models.organizer,
            Profile::Categorization => &models.categorization,
        }
    }

    fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send() {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(url = %self.base_url, "Suggestion service reachable");
                true
            }
            Ok(resp) => {
                tracing::info!(status = resp.status().as_u16(), "Suggestion service not ready");
                false
            }
            Err(e) => {
                tracing::info!(error = %e, "Suggestion service unreachable, continuing without it");
                false
            }
        }
    }

    fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32, profile: Profile) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: self.model_for(profile),
            prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature,
                top_p: 0.9,
            },
        };
        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                PennyError::Suggestion(format!("Request timed out after {}s", self.settings.timeout_secs))
            } else {
                PennyError::Suggestion(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PennyError::Suggestion(format!("HTTP {}: {body}", status.as_u16())));
        }
        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| PennyError::Suggestion(format!("Bad response body: {e}")))?;
        Ok(parsed.response.trim().to_string())
    }
}

impl SuggestionService for OllamaSuggester {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.probe())
    }

    fn suggest(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        profile: Profile,
    ) -> Result<serde_json::Value> {
        let text = self.generate(prompt, max_tokens, temperature, profile)?;
        extract_json_object(&text).ok_or_else(|| {
            PennyError::Suggestion(format!(
                "No JSON object in {} response: {}",
                profile.as_str(),
                capped(&text, 120)
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Answers each profile with a fixed value, or fails. Records every call.
#[cfg(test)]
pub struct ScriptedSuggester {
    available: bool,
    responses: std::collections::HashMap<Profile, std::result::Result<serde_json::Value, String>>,
    pub calls: std::cell::RefCell<Vec<(Profile, String)>>,
}

#[cfg(test)]
impl ScriptedSuggester {
    pub fn new() -> Self {
        Self {
            available: true,
            responses: std::collections::HashMap::new(),
            calls: std::cell::RefCell::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn respond(mut self, profile: Profile, value: serde_json::Value) -> Self {
        self.responses.insert(profile, Ok(value));
        self
    }

    pub fn fail(mut self, profile: Profile, message: &str) -> Self {
        self.responses.insert(profile, Err(message.to_string()));
        self
    }

    pub fn call_count(&self, profile: Profile) -> usize {
        self.calls.borrow().iter().filter(|(p, _)| *p == profile).count()
    }
}

#[cfg(test)]
impl SuggestionService for ScriptedSuggester {
    fn is_available(&self) -> bool {
        self.available
    }

    fn suggest(&self, prompt: &str, _max_tokens: u32, _temperature: f32, profile: Profile) -> Result<serde_json::Value> {
        self.calls.borrow_mut().push((profile, prompt.to_string()));
        match self.responses.get(&profile) {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(e)) => Err(PennyError::Suggestion(e.clone())),
            None => Err(PennyError::Suggestion("no scripted response".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_clean() {
        let v = extract_json_object(r#"{"category": "Dining", "confidence": 0.9}"#).unwrap();
        assert_eq!(v["category"], "Dining");
    }

    #[test]
    fn test_extract_json_with_surrounding_text() {
        let text = "Sure! Here is the result:\n{\"category\": \"Transport\", \"sub\": {\"a\": 1}}\nHope that helps.";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["category"], "Transport");
        assert_eq!(v["sub"]["a"], 1);
    }

    #[test]
    fn test_extract_json_failures() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("{broken").is_none());
    }

    #[test]
    fn test_instruct_prompt() {
        assert_eq!(create_instruct_prompt("Do it", ""), "Instruction: Do it");
        assert_eq!(create_instruct_prompt("Do it", "ctx"), "Instruction: Do it\n\nContext:\nctx");
    }

    #[test]
    fn test_capped_respects_char_boundaries() {
        assert_eq!(capped("héllo", 2), "hé");
        assert_eq!(capped("abc", 10), "abc");
    }

    #[test]
    fn test_unreachable_ollama_is_unavailable() {
        let settings = SuggesterSettings {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..SuggesterSettings::default()
        };
        let s = OllamaSuggester::new(&settings).unwrap();
        assert!(!s.is_available());
        assert!(s.suggest("x", 16, 0.1, Profile::Categorization).is_err());
    }
}
