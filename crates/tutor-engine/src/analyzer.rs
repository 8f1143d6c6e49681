//! Error analysis of single learner messages.
//!
//! The analyzer asks the generator for a JSON critique and checks it against
//! a strict schema. An unknown category or a blank field fails the whole
//! analysis, so nothing malformed ever reaches a session's error list.

use serde::Deserialize;
use tutor_review::ErrorCategory;

use crate::error::{Result, TutorError};
use crate::generation::{GenerationClient, GenerationRequest, GenerationTask};
use crate::session::{AnalyzedError, Language, Level};

const ANALYSIS_INSTRUCTIONS: &str = r#"Find the mistakes in the learner's message.
Respond with JSON only, in this exact shape:
{"errors": [{"errorText": "...", "correction": "...", "explanation": "...", "category": "grammar" | "vocabulary" | "syntax"}]}
Use an empty list when the message has no mistakes. Do not flag stylistic choices that are correct."#;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAnalysis {
    Wrapped { errors: Vec<RawError> },
    Bare(Vec<RawError>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawError {
    error_text: String,
    correction: String,
    #[serde(default)]
    explanation: String,
    category: String,
}

impl RawError {
    fn into_checked(self, position: usize) -> Result<AnalyzedError> {
        let category: ErrorCategory = self.category.parse()?;

        let error_text = self.error_text.trim();
        let correction = self.correction.trim();
        if error_text.is_empty() || correction.is_empty() {
            return Err(TutorError::validation(format!(
                "error {position} from the analyzer has a blank errorText or correction"
            )));
        }

        Ok(AnalyzedError {
            error_text: error_text.to_string(),
            correction: correction.to_string(),
            explanation: self.explanation.trim().to_string(),
            category,
        })
    }
}

/// Finds grammar, vocabulary and syntax errors in a learner message.
#[derive(Debug, Clone)]
pub struct ErrorAnalyzer {
    generator: GenerationClient,
}

impl ErrorAnalyzer {
    /// Creates an analyzer.
    #[must_use]
    pub const fn new(generator: GenerationClient) -> Self {
        Self { generator }
    }

    /// Analyzes one message, in the order the errors appear.
    ///
    /// An empty list means no mistakes were found.
    ///
    /// # Errors
    ///
    /// - `TutorError::GenerationFailed` if the generator fails
    /// - `TutorError::Validation` if the output does not match the schema,
    ///   including any category outside grammar, vocabulary and syntax
    pub async fn analyze(
        &self,
        message: &str,
        level: Level,
        language: Language,
    ) -> Result<Vec<AnalyzedError>> {
        if message.trim().is_empty() {
            return Ok(Vec::new());
        }

        let system = format!(
            "You are a meticulous {} teacher correcting a learner at CEFR level {level}. \
             Judge the message against what a {level} learner is expected to master.\n\
             {ANALYSIS_INSTRUCTIONS}",
            language.name()
        );
        let request = GenerationRequest::prompt(GenerationTask::ErrorAnalysis, system, message);

        let raw: RawAnalysis = self.generator.generate_json(request).await?;
        let raw = match raw {
            RawAnalysis::Wrapped { errors } | RawAnalysis::Bare(errors) => errors,
        };

        let errors = raw
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.into_checked(i))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                tracing::warn!(error = %e, "Rejected analyzer output");
                e
            })?;

        tracing::debug!(error_count = errors.len(), level = %level, "Analyzed learner message");
        Ok(errors)
    }
}
