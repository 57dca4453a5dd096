//! Classification engine: the external text → structure step.
//!
//! [`LlmClassificationEngine`] prompts an LLM for a single JSON object and
//! parses it leniently (markdown fences, surrounding prose, prices given as
//! strings).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClassifierError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for the classification call. Runs on every candidate message.
const CLASSIFY_MAX_TOKENS: u32 = 256;

const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Structured result from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// `true` for an offer (listing), `false` for a request.
    pub is_listing: bool,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub confidence_score: f32,
}

/// Text → structured classification.
#[async_trait]
pub trait ClassificationEngine: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

/// `ClassificationEngine` backed by an LLM provider.
pub struct LlmClassificationEngine {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassificationEngine {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClassificationEngine for LlmClassificationEngine {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(text)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        parse_classification(&response.content).inspect_err(|e| {
            warn!(
                error = %e,
                raw_response = %response.content,
                "Failed to parse classification response"
            );
        })
    }
}

fn build_system_prompt() -> String {
    r#"You classify chat messages about real estate.

Decide whether the message OFFERS a property (a listing: for rent, for sale, available)
or ASKS for one (a request: looking for, wanted, need). Extract what the message states.

Respond with ONLY a JSON object, no other text:
{"is_listing": true|false,
 "price": number or null,
 "location": string or null,
 "property_type": string or null,
 "confidence_score": number between 0 and 1}

Rules:
- price is a plain number without currency symbols or separators; for a request use the budget
- location is the neighbourhood or city as written
- property_type is a short noun such as "apartment", "house", "villa", "plot", "office"
- use null when the message does not say"#
        .to_string()
}

fn build_user_prompt(text: &str) -> String {
    format!("Message:\n{text}")
}

/// Parse the engine's JSON answer.
pub fn parse_classification(text: &str) -> Result<Classification, ClassifierError> {
    let json_str = extract_json_object(text);
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| ClassifierError::InvalidResponse(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ClassifierError::InvalidResponse("expected a JSON object".into()))?;

    let is_listing = match obj.get("is_listing") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => {
            return Err(ClassifierError::InvalidResponse(
                "missing is_listing".into(),
            ));
        }
    };

    let classification = Classification {
        is_listing,
        price: obj.get("price").and_then(lenient_number),
        location: obj.get("location").and_then(non_empty_string),
        property_type: obj.get("property_type").and_then(non_empty_string),
        confidence_score: obj
            .get("confidence_score")
            .and_then(lenient_number)
            .unwrap_or(0.0) as f32,
    };
    debug!(
        is_listing = classification.is_listing,
        confidence = classification.confidence_score,
        "Parsed classification"
    );
    Ok(classification)
}

/// Numbers may arrive as `2000`, `"2000"` or `"$2,000"`.
fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn non_empty_string(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
