//! Signal classifier: message text → listing, request, or nothing.
//!
//! Flow:
//! 1. Keyword pre-filter (fast, no engine) → may short-circuit to `None`
//! 2. Classification engine → structured fields
//! 3. Location fallback heuristic when the engine gave none

mod engine;
mod prefilter;

pub use engine::{
    Classification, ClassificationEngine, LlmClassificationEngine, parse_classification,
};
pub use prefilter::{KeywordFilter, extract_location};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifierError;

/// Kind of real-estate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// An offer: something for rent or sale.
    Listing,
    /// A want: someone looking for a property.
    Request,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Request => "request",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedSignal {
    pub kind: SignalKind,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub property_type: Option<String>,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    /// What the location heuristic found in the raw text, if anything.
    pub extracted_location_text: Option<String>,
}

pub struct SignalClassifier {
    prefilter: KeywordFilter,
    engine: Arc<dyn ClassificationEngine>,
}

impl SignalClassifier {
    pub fn new(prefilter: KeywordFilter, engine: Arc<dyn ClassificationEngine>) -> Self {
        Self { prefilter, engine }
    }

    /// Build from a keyword list.
    pub fn with_keywords<S: AsRef<str>>(
        keywords: &[S],
        engine: Arc<dyn ClassificationEngine>,
    ) -> Result<Self, ClassifierError> {
        Ok(Self::new(KeywordFilter::new(keywords)?, engine))
    }

    /// Cheap check; only text passing it reaches the engine.
    pub fn is_candidate(&self, text: &str) -> bool {
        self.prefilter.matches(text)
    }

    /// Classify `text`. `Ok(None)` means the pre-filter rejected it.
    pub async fn classify(&self, text: &str) -> Result<Option<ClassifiedSignal>, ClassifierError> {
        if !self.is_candidate(text) {
            return Ok(None);
        }

        let classification = self.engine.classify(text).await?;
        let extracted_location_text = extract_location(text);

        let signal = ClassifiedSignal {
            kind: if classification.is_listing {
                SignalKind::Listing
            } else {
                SignalKind::Request
            },
            price: classification.price,
            location: classification
                .location
                .or_else(|| extracted_location_text.clone()),
            property_type: classification.property_type,
            confidence: clamp_confidence(classification.confidence_score),
            extracted_location_text,
        };
        debug!(kind = %signal.kind, confidence = signal.confidence, "Message classified");
        Ok(Some(signal))
    }
}

fn clamp_confidence(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}
