//! Lingo Tutor Review Model
//!
//! This crate provides the end-of-session review structure produced once a
//! learner has finished a tutoring conversation. It owns the review contract:
//! the fixed error categories, the required fields of a review, and the
//! grouping of accumulated corrections by category.
//!
//! # Types
//!
//! - [`ErrorCategory`] - The closed set of learner error categories
//! - [`CorrectionInput`] - One accumulated correction consumed by the review
//! - [`ReviewNarrative`] - The generated, free-text part of a review
//! - [`Review`] - The complete review returned to the learner
//! - [`CategorySummary`] - Corrections grouped under one category
//!
//! # Renderers
//!
//! - [`MarkdownGenerator`] - Render a review as a learner-facing Markdown document
//!
//! # Example
//!
//! ```rust
//! use tutor_review::{CorrectionInput, ErrorCategory, Review, ReviewNarrative};
//!
//! let review = Review::builder()
//!     .session_id("3f1c")
//!     .level("A2")
//!     .language("es")
//!     .correction(CorrectionInput {
//!         turn_index: 1,
//!         error_text: "yo es".to_string(),
//!         correction: "yo soy".to_string(),
//!         explanation: "'ser' conjugates to 'soy' in the first person".to_string(),
//!         category: ErrorCategory::Grammar,
//!     })
//!     .narrative(ReviewNarrative {
//!         overall_assessment: "Good effort overall.".to_string(),
//!         strengths: vec!["Clear greetings".to_string()],
//!         focus_areas: vec!["Present tense of 'ser'".to_string()],
//!         encouragement: None,
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert!(review.needs_corrections);
//! assert_eq!(review.weak_categories[0].category, ErrorCategory::Grammar);
//! ```

mod markdown;

pub use markdown::MarkdownGenerator;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of example corrections kept per category.
pub const MAX_EXAMPLES_PER_CATEGORY: usize = 3;

/// Assessment used when a session finished without a single correction.
pub const NO_CORRECTIONS_ASSESSMENT: &str =
    "No corrections needed: every message in this session was accurate.";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while assembling a review.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Failed to serialize the review to JSON.
    #[error("failed to serialize review: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A category outside the fixed enumeration was supplied.
    #[error("unknown error category '{0}': expected one of 'grammar', 'vocabulary', 'syntax'")]
    UnknownCategory(String),

    /// Invalid review data.
    #[error("invalid review data: {0}")]
    InvalidData(String),
}

/// Result type for review operations.
pub type Result<T> = std::result::Result<T, ReviewError>;

// ============================================================================
// ErrorCategory
// ============================================================================

/// Category of a learner error.
///
/// The set is closed: parsing any other label fails rather than mapping to a
/// catch-all, so corrupt categories never enter a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Conjugation, agreement, tense, article and similar morphology errors.
    Grammar,
    /// Wrong or non-existent word choice.
    Vocabulary,
    /// Word order and sentence structure errors.
    Syntax,
}

impl ErrorCategory {
    /// All categories in display order.
    pub const ALL: [Self; 3] = [Self::Grammar, Self::Vocabulary, Self::Syntax];

    /// Returns the lowercase wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grammar => "grammar",
            Self::Vocabulary => "vocabulary",
            Self::Syntax => "syntax",
        }
    }

    /// Returns a human-readable label for the category.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Grammar => "Grammar",
            Self::Vocabulary => "Vocabulary",
            Self::Syntax => "Syntax",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = ReviewError;

    /// Parses a category label, ignoring surrounding whitespace and case.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "grammar" => Ok(Self::Grammar),
            "vocabulary" => Ok(Self::Vocabulary),
            "syntax" => Ok(Self::Syntax),
            _ => Err(ReviewError::UnknownCategory(s.to_string())),
        }
    }
}

// ============================================================================
// CorrectionInput
// ============================================================================

/// A single accumulated correction, as recorded on the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionInput {
    /// Index of the learner turn the error was found in.
    pub turn_index: u32,
    /// The erroneous text as the learner wrote it.
    pub error_text: String,
    /// The corrected text.
    pub correction: String,
    /// Why the correction applies.
    pub explanation: String,
    /// Error category.
    pub category: ErrorCategory,
}

// ============================================================================
// CategorySummary
// ============================================================================

/// One example correction shown under a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionExample {
    /// Index of the learner turn.
    pub turn_index: u32,
    /// The erroneous text.
    pub error_text: String,
    /// The corrected text.
    pub correction: String,
}

/// Corrections grouped under a single category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    /// The category.
    pub category: ErrorCategory,
    /// Number of corrections in this category.
    pub count: usize,
    /// Up to [`MAX_EXAMPLES_PER_CATEGORY`] examples, in transcript order.
    pub examples: Vec<CorrectionExample>,
}

/// Groups corrections by category.
///
/// Categories without corrections are omitted. The result is ordered by
/// descending count; ties keep [`ErrorCategory::ALL`] order.
#[must_use]
pub fn group_by_category(corrections: &[CorrectionInput]) -> Vec<CategorySummary> {
    let mut summaries: Vec<CategorySummary> = ErrorCategory::ALL
        .iter()
        .map(|&category| {
            let matching: Vec<&CorrectionInput> = corrections
                .iter()
                .filter(|c| c.category == category)
                .collect();
            CategorySummary {
                category,
                count: matching.len(),
                examples: matching
                    .iter()
                    .take(MAX_EXAMPLES_PER_CATEGORY)
                    .map(|c| CorrectionExample {
                        turn_index: c.turn_index,
                        error_text: c.error_text.clone(),
                        correction: c.correction.clone(),
                    })
                    .collect(),
            }
        })
        .filter(|s| s.count > 0)
        .collect();

    // Stable sort keeps category order for equal counts.
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

// ============================================================================
// ReviewNarrative
// ============================================================================

/// The free-text part of a review, produced by the text-generation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNarrative {
    /// Holistic assessment of the learner's performance.
    pub overall_assessment: String,
    /// What the learner did well.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Suggested areas to practice next.
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Optional closing encouragement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,
}

impl ReviewNarrative {
    /// Narrative used for a session without corrections.
    #[must_use]
    pub fn no_corrections() -> Self {
        Self {
            overall_assessment: NO_CORRECTIONS_ASSESSMENT.to_string(),
            strengths: Vec::new(),
            focus_areas: Vec::new(),
            encouragement: None,
        }
    }

    /// Checks the required fields and normalizes list entries.
    ///
    /// Blank strengths and focus areas are dropped and entries are trimmed.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::InvalidData` if the assessment is blank.
    pub fn validated(self) -> Result<Self> {
        let overall_assessment = self.overall_assessment.trim().to_string();
        if overall_assessment.is_empty() {
            return Err(ReviewError::InvalidData(
                "overallAssessment must not be empty".to_string(),
            ));
        }

        let clean = |items: Vec<String>| -> Vec<String> {
            items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        Ok(Self {
            overall_assessment,
            strengths: clean(self.strengths),
            focus_areas: clean(self.focus_areas),
            encouragement: self
                .encouragement
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
        })
    }
}

// ============================================================================
// Review
// ============================================================================

/// Complete end-of-session review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// The reviewed session.
    pub session_id: String,

    /// Proficiency level of the session (e.g., "B1").
    pub level: String,

    /// Target language code of the session.
    pub language: String,

    /// `false` when the session accumulated no corrections at all.
    pub needs_corrections: bool,

    /// Total number of corrections consumed.
    pub total_errors: usize,

    /// Holistic assessment.
    pub overall_assessment: String,

    /// What the learner did well.
    pub strengths: Vec<String>,

    /// Categories with at least one correction, most frequent first.
    pub weak_categories: Vec<CategorySummary>,

    /// Suggested focus areas.
    pub focus_areas: Vec<String>,

    /// Optional closing encouragement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,

    /// When the review was generated.
    pub generated_at: DateTime<Utc>,
}

impl Review {
    /// Creates a new review builder.
    #[must_use]
    pub fn builder() -> ReviewBuilder {
        ReviewBuilder::default()
    }

    /// Serializes the review to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReviewError::from)
    }

    /// Returns the count of corrections in the given category.
    #[must_use]
    pub fn count_for(&self, category: ErrorCategory) -> usize {
        self.weak_categories
            .iter()
            .find(|s| s.category == category)
            .map_or(0, |s| s.count)
    }
}

// ============================================================================
// ReviewBuilder
// ============================================================================

/// Builder for constructing [`Review`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReviewBuilder {
    session_id: Option<String>,
    level: Option<String>,
    language: Option<String>,
    corrections: Vec<CorrectionInput>,
    narrative: Option<ReviewNarrative>,
}

impl ReviewBuilder {
    /// Sets the session id.
    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets the proficiency level.
    #[must_use]
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Sets the target language code.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Adds a correction.
    #[must_use]
    pub fn correction(mut self, correction: CorrectionInput) -> Self {
        self.corrections.push(correction);
        self
    }

    /// Sets all corrections at once.
    #[must_use]
    pub fn corrections(mut self, corrections: Vec<CorrectionInput>) -> Self {
        self.corrections = corrections;
        self
    }

    /// Sets the generated narrative.
    #[must_use]
    pub fn narrative(mut self, narrative: ReviewNarrative) -> Self {
        self.narrative = Some(narrative);
        self
    }

    /// Builds the review.
    ///
    /// A session without corrections may omit the narrative; it then gets the
    /// fixed "no corrections needed" assessment.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::InvalidData` if required fields are missing or the
    /// narrative fails validation.
    pub fn build(self) -> Result<Review> {
        let session_id = self
            .session_id
            .ok_or_else(|| ReviewError::InvalidData("session_id is required".to_string()))?;
        let level = self
            .level
            .ok_or_else(|| ReviewError::InvalidData("level is required".to_string()))?;
        let language = self
            .language
            .ok_or_else(|| ReviewError::InvalidData("language is required".to_string()))?;

        let needs_corrections = !self.corrections.is_empty();
        let narrative = match self.narrative {
            Some(narrative) => narrative.validated()?,
            None if !needs_corrections => ReviewNarrative::no_corrections(),
            None => {
                return Err(ReviewError::InvalidData(
                    "a narrative is required when corrections exist".to_string(),
                ))
            }
        };

        Ok(Review {
            session_id,
            level,
            language,
            needs_corrections,
            total_errors: self.corrections.len(),
            overall_assessment: narrative.overall_assessment,
            strengths: narrative.strengths,
            weak_categories: group_by_category(&self.corrections),
            focus_areas: narrative.focus_areas,
            encouragement: narrative.encouragement,
            generated_at: Utc::now(),
        })
    }
}
