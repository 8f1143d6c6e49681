//! Session model and state machine for tutoring conversations.
//!
//! A [`TutorSession`] is the durable record of one conversation: who plays
//! which role, the transcript, and every error found in the learner's turns.
//! All state changes go through [`SessionState::transition`], a single table
//! that decides which operations a session accepts in each state.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutor_review::{CorrectionInput, ErrorCategory};
use uuid::Uuid;

use crate::error::{Result, TutorError};

// ============================================================================
// SessionId
// ============================================================================

/// Opaque unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TutorError::validation(format!("'{s}' is not a valid session id")))
    }
}

// ============================================================================
// Level
// ============================================================================

/// Proficiency tier on the CEFR scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Beginner.
    #[default]
    A1,
    /// Elementary.
    A2,
    /// Intermediate.
    B1,
    /// Upper intermediate.
    B2,
    /// Advanced.
    C1,
    /// Proficient.
    C2,
}

impl Level {
    /// Returns the level label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    /// Short guidance on vocabulary and sentence complexity for this level.
    #[must_use]
    pub const fn guidance(&self) -> &'static str {
        match self {
            Self::A1 => "Use very short sentences, present tense and everyday words only.",
            Self::A2 => "Use short sentences, simple past and future, and common vocabulary.",
            Self::B1 => "Use connected sentences on familiar topics with some idioms.",
            Self::B2 => "Use natural, detailed speech including subordinate clauses.",
            Self::C1 => "Use fluent, nuanced speech with a broad and precise vocabulary.",
            Self::C2 => "Speak as a native would, including register shifts and wordplay.",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "A1" => Ok(Self::A1),
            "A2" => Ok(Self::A2),
            "B1" => Ok(Self::B1),
            "B2" => Ok(Self::B2),
            "C1" => Ok(Self::C1),
            "C2" => Ok(Self::C2),
            _ => Err(TutorError::validation(format!(
                "invalid level '{s}': expected one of A1, A2, B1, B2, C1, C2"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Level {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Language
// ============================================================================

/// Target language of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Language {
    /// Spanish (default).
    #[default]
    Spanish,
    /// French.
    French,
    /// German.
    German,
    /// Italian.
    Italian,
    /// Portuguese.
    Portuguese,
    /// English.
    English,
    /// Latin.
    Latin,
}

impl Language {
    /// Returns the ISO 639-1 code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Spanish => "es",
            Self::French => "fr",
            Self::German => "de",
            Self::Italian => "it",
            Self::Portuguese => "pt",
            Self::English => "en",
            Self::Latin => "la",
        }
    }

    /// Returns the English name of the language.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Spanish => "Spanish",
            Self::French => "French",
            Self::German => "German",
            Self::Italian => "Italian",
            Self::Portuguese => "Portuguese",
            Self::English => "English",
            Self::Latin => "Latin",
        }
    }

    /// Parses a language code, case-insensitively.
    fn from_code_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "es" => Some(Self::Spanish),
            "fr" => Some(Self::French),
            "de" => Some(Self::German),
            "it" => Some(Self::Italian),
            "pt" => Some(Self::Portuguese),
            "en" => Some(Self::English),
            "la" => Some(Self::Latin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Language {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_code_case_insensitive(s).ok_or_else(|| {
            TutorError::validation(format!(
                "invalid language '{s}': expected one of 'es', 'fr', 'de', 'it', 'pt', 'en', 'la'"
            ))
        })
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Language {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

// ============================================================================
// SessionMode
// ============================================================================

/// How the conversation is framed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMode {
    /// The AI tutor leads a free conversation about the source.
    GuidedDialog,
    /// Learner and AI each play one of the two participants of a dialog script.
    Roleplay {
        /// The role the learner plays.
        #[serde(rename = "selectedRole")]
        selected_role: String,
        /// The role the AI plays.
        #[serde(rename = "oppositeRole")]
        opposite_role: String,
    },
}

impl SessionMode {
    /// Returns `true` for roleplay sessions.
    #[must_use]
    pub const fn is_roleplay(&self) -> bool {
        matches!(self, Self::Roleplay { .. })
    }

    /// The role played by the AI, if any.
    #[must_use]
    pub fn ai_role(&self) -> Option<&str> {
        match self {
            Self::GuidedDialog => None,
            Self::Roleplay { opposite_role, .. } => Some(opposite_role),
        }
    }

    /// The role played by the learner, if any.
    #[must_use]
    pub fn learner_role(&self) -> Option<&str> {
        match self {
            Self::GuidedDialog => None,
            Self::Roleplay { selected_role, .. } => Some(selected_role),
        }
    }
}

// ============================================================================
// SessionState and the transition table
// ============================================================================

/// Lifecycle state of a stored session.
///
/// A session only exists in the store once it has been started, so the
/// pre-creation state has no variant here.
///
/// - `Started` -> `InProgress` (first learner turn)
/// - `Started` | `InProgress` -> `Completed` (caller completes)
/// - `Completed` is terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created with the AI's opening line; no learner turn yet.
    #[default]
    Started,
    /// At least one learner turn has been exchanged.
    InProgress,
    /// Closed by the caller. No further turns.
    Completed,
}

/// Operations that read or change a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOperation {
    /// Append a learner turn and the AI reply.
    AppendTurn,
    /// Close the session.
    Complete,
    /// Analyze the learner's turns for errors.
    Analyze,
    /// Produce the end-of-session review.
    Review,
}

impl std::fmt::Display for SessionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AppendTurn => "turn",
            Self::Complete => "complete",
            Self::Analyze => "analyze",
            Self::Review => "review",
        };
        write!(f, "{s}")
    }
}

impl SessionState {
    /// Returns the state reached by applying `op`, or `None` if the operation
    /// is not allowed in this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_engine::{SessionOperation, SessionState};
    ///
    /// assert_eq!(
    ///     SessionState::Started.transition(SessionOperation::AppendTurn),
    ///     Some(SessionState::InProgress)
    /// );
    /// assert_eq!(
    ///     SessionState::Completed.transition(SessionOperation::AppendTurn),
    ///     None
    /// );
    /// ```
    #[must_use]
    pub const fn transition(self, op: SessionOperation) -> Option<Self> {
        match (self, op) {
            (Self::Started | Self::InProgress, SessionOperation::AppendTurn) => {
                Some(Self::InProgress)
            }
            (Self::Started | Self::InProgress, SessionOperation::Complete) => Some(Self::Completed),
            (_, SessionOperation::Analyze | SessionOperation::Review) => Some(self),
            (Self::Completed, SessionOperation::AppendTurn | SessionOperation::Complete) => None,
        }
    }

    /// Returns `true` if this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` if turns may still be appended.
    #[must_use]
    pub const fn accepts_turns(&self) -> bool {
        matches!(self, Self::Started | Self::InProgress)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Turns and errors
// ============================================================================

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The AI tutor or roleplay partner.
    Ai,
    /// The learner.
    Learner,
}

/// One utterance in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the transcript, starting at 0.
    pub index: u32,
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

/// An error found in a single learner message, before it is tied to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedError {
    /// The erroneous text.
    pub error_text: String,
    /// The corrected text.
    pub correction: String,
    /// Why the correction applies.
    pub explanation: String,
    /// Error category.
    pub category: ErrorCategory,
}

impl AnalyzedError {
    /// Ties this error to the learner turn it was found in.
    #[must_use]
    pub fn at_turn(self, turn_index: u32) -> LearnerError {
        LearnerError {
            turn_index,
            error_text: self.error_text,
            correction: self.correction,
            explanation: self.explanation,
            category: self.category,
        }
    }
}

/// An error recorded on the session, tagged with its learner turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerError {
    /// Index of the learner turn.
    pub turn_index: u32,
    /// The erroneous text.
    pub error_text: String,
    /// The corrected text.
    pub correction: String,
    /// Why the correction applies.
    pub explanation: String,
    /// Error category.
    pub category: ErrorCategory,
}

impl From<LearnerError> for CorrectionInput {
    fn from(err: LearnerError) -> Self {
        Self {
            turn_index: err.turn_index,
            error_text: err.error_text,
            correction: err.correction,
            explanation: err.explanation,
            category: err.category,
        }
    }
}

// ============================================================================
// TutorSession
// ============================================================================

/// Durable record of one tutoring conversation.
///
/// The record is owned by the session store; the engine reads it, applies one
/// operation, and writes it back with the version it read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorSession {
    /// Unique id.
    pub id: SessionId,
    /// The text or dialog script being practiced.
    pub source_id: String,
    /// Proficiency tier.
    pub level: Level,
    /// Target language.
    pub language: Language,
    /// Guided dialog or roleplay.
    pub mode: SessionMode,
    /// Lifecycle state.
    pub state: SessionState,
    /// Transcript; index `i` is stored at position `i`.
    pub turns: Vec<Turn>,
    /// Errors accumulated across learner turns, in transcript order.
    pub errors: Vec<LearnerError>,
    /// Store version used for compare-and-write.
    pub version: u64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last changed.
    pub updated_at: DateTime<Utc>,
}

impl TutorSession {
    /// Creates a session in `Started` whose turn 0 is the AI's opening line.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        level: Level,
        language: Language,
        mode: SessionMode,
        opening_line: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            source_id: source_id.into(),
            level,
            language,
            mode,
            state: SessionState::Started,
            turns: vec![Turn {
                index: 0,
                speaker: Speaker::Ai,
                text: opening_line.into(),
                timestamp: now,
            }],
            errors: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks that `op` is allowed and returns the state it leads to.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidSessionType` if the transition table rejects
    /// the operation, or if an analyze/review is requested on an empty transcript.
    pub fn ensure(&self, op: SessionOperation) -> Result<SessionState> {
        let next = self.state.transition(op).ok_or_else(|| {
            TutorError::invalid_session_type(format!(
                "cannot {op} a session that is {}",
                self.state
            ))
        })?;

        if matches!(op, SessionOperation::Analyze | SessionOperation::Review)
            && self.turns.is_empty()
        {
            return Err(TutorError::invalid_session_type(format!(
                "cannot {op} a session without turns"
            )));
        }

        Ok(next)
    }

    /// Index the next appended turn will get.
    #[must_use]
    pub fn next_turn_index(&self) -> u32 {
        // Indices are gap-free, so the next index is the transcript length.
        u32::try_from(self.turns.len()).unwrap_or(u32::MAX)
    }

    /// Appends a turn and moves the session to `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidSessionType` if the session no longer accepts turns.
    pub fn append_turn(&mut self, speaker: Speaker, text: impl Into<String>) -> Result<u32> {
        let next = self.ensure(SessionOperation::AppendTurn)?;
        let index = self.next_turn_index();
        self.turns.push(Turn {
            index,
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        });
        self.state = next;
        self.touch();
        Ok(index)
    }

    /// Records the errors found in the learner turn at `turn_index`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` if `turn_index` is not a learner turn.
    pub fn record_errors(&mut self, turn_index: u32, errors: Vec<AnalyzedError>) -> Result<()> {
        let is_learner_turn = self
            .turns
            .get(turn_index as usize)
            .is_some_and(|t| t.speaker == Speaker::Learner);
        if !is_learner_turn {
            return Err(TutorError::validation(format!(
                "turn {turn_index} is not a learner turn"
            )));
        }

        if !errors.is_empty() {
            self.errors
                .extend(errors.into_iter().map(|e| e.at_turn(turn_index)));
            self.touch();
        }
        Ok(())
    }

    /// Moves the session to `Completed`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidSessionType` if the session is already completed.
    pub fn complete(&mut self) -> Result<()> {
        self.state = self.ensure(SessionOperation::Complete)?;
        self.touch();
        Ok(())
    }

    /// Returns `true` if the session is completed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Iterates over the learner's turns in order.
    pub fn learner_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.speaker == Speaker::Learner)
    }

    /// The accumulated errors in the shape the review consumes.
    #[must_use]
    pub fn corrections(&self) -> Vec<CorrectionInput> {
        self.errors.iter().cloned().map(CorrectionInput::from).collect()
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Tests
// ============================================================================
