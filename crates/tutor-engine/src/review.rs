//! End-of-session review generation.
//!
//! The review consumes the complete error list of a session. Grouping by
//! category and the required fields belong to [`tutor_review::Review`]; the
//! free-text assessment comes from the generator.

use std::fmt::Write;
use std::sync::Arc;

use tutor_review::{group_by_category, CorrectionInput, Review, ReviewNarrative};

use crate::error::{Result, TutorError};
use crate::generation::{GenerationClient, GenerationRequest, GenerationTask};
use crate::session::{Language, Level, SessionId, SessionOperation};
use crate::store::SessionStore;

const REVIEW_INSTRUCTIONS: &str = r#"Write an end-of-session review for the learner.
Respond with JSON only, in this exact shape:
{"overallAssessment": "...", "strengths": ["..."], "focusAreas": ["..."], "encouragement": "..."}
Base the focus areas on the categories with the most corrections."#;

/// Parameters of a review.
#[derive(Debug, Clone, Default)]
pub struct ReviewParams {
    /// Level to review against; defaults to the session's.
    pub level: Option<Level>,
    /// Language of the review; defaults to the session's.
    pub language: Option<Language>,
    /// Corrections to review; when empty the session's stored errors are used.
    pub errors: Vec<CorrectionInput>,
}

/// Produces structured reviews of finished or ongoing sessions.
#[derive(Clone)]
pub struct ReviewGenerator {
    store: Arc<dyn SessionStore>,
    generator: GenerationClient,
}

impl ReviewGenerator {
    /// Creates a review generator.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, generator: GenerationClient) -> Self {
        Self { store, generator }
    }

    /// Reviews a session.
    ///
    /// A session without corrections gets the fixed "no corrections needed"
    /// review without a generation call.
    ///
    /// # Errors
    ///
    /// - `TutorError::SessionNotFound` if the session does not exist
    /// - `TutorError::InvalidSessionType` if the session has no turns
    /// - `TutorError::GenerationFailed` if the narrative cannot be generated
    /// - `TutorError::Validation` if the narrative does not match the schema
    pub async fn review(&self, session_id: SessionId, params: ReviewParams) -> Result<Review> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| TutorError::session_not_found(session_id))?;
        session.ensure(SessionOperation::Review)?;

        let level = params.level.unwrap_or(session.level);
        let language = params.language.unwrap_or(session.language);
        let errors = if params.errors.is_empty() {
            session.corrections()
        } else {
            params.errors
        };

        let builder = Review::builder()
            .session_id(session_id.to_string())
            .level(level.as_str())
            .language(language.code());

        if errors.is_empty() {
            let review = builder.build()?;
            tracing::info!(session_id = %session_id, error_count = 0, "Review generated");
            return Ok(review);
        }

        let request = GenerationRequest::prompt(
            GenerationTask::Review,
            format!(
                "You are an encouraging {} tutor reviewing a CEFR {level} learner's session.\n\
                 {REVIEW_INSTRUCTIONS}",
                language.name()
            ),
            corrections_prompt(&errors),
        );
        let narrative: ReviewNarrative = self.generator.generate_json(request).await?;

        let review = builder.corrections(errors).narrative(narrative).build()?;
        tracing::info!(
            session_id = %session_id,
            error_count = review.total_errors,
            "Review generated"
        );
        Ok(review)
    }
}

/// Summary of the corrections, grouped by category, handed to the generator.
fn corrections_prompt(errors: &[CorrectionInput]) -> String {
    let mut prompt = String::new();
    for summary in group_by_category(errors) {
        let _ = writeln!(prompt, "{} ({} corrections):", summary.category.label(), summary.count);
        for error in errors.iter().filter(|e| e.category == summary.category) {
            let _ = writeln!(
                prompt,
                "- turn {}: \"{}\" -> \"{}\" ({})",
                error.turn_index, error.error_text, error.correction, error.explanation
            );
        }
    }
    prompt
}
