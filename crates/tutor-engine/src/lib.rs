//! Lingo Tutor session engine
//!
//! Runs conversational language-practice sessions over a source text or
//! dialog: the AI opens, the learner answers, and every learner turn gets a
//! reply and an error analysis. Finished sessions are summarized in a
//! structured review.
//!
//! Sessions move through a small state machine:
//!
//! ```
//! use tutor_engine::{SessionOperation, SessionState};
//!
//! let state = SessionState::Started;
//! let state = state.transition(SessionOperation::AppendTurn).unwrap();
//! assert_eq!(state, SessionState::InProgress);
//!
//! let state = state.transition(SessionOperation::Complete).unwrap();
//! assert!(state.transition(SessionOperation::AppendTurn).is_none());
//! ```

pub mod analyzer;
pub mod api;
pub mod cache;
pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod generation;
pub mod rate_limit;
pub mod review;
pub mod session;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;

pub use analyzer::ErrorAnalyzer;
pub use api::{
    create_router, AnalyzeResponse, AppState, ErrorResponse, InvalidateResponse,
    OverviewRequest, ReviewFormat, ReviewRequest, SessionRequest, StartSessionRequest,
    StartSessionResponse, TurnRequest, USER_ID_HEADER,
};
pub use cache::ResponseCache;
pub use config::{CacheConfig, Config, GeneratorConfig, RateLimitConfig};
pub use dialog::{DialogOrchestrator, StartParams, TurnOutcome};
pub use engine::{Overview, TurnResult, TutorEngine};
pub use error::{Result, TutorError};
pub use generation::{
    ChatCompletionsGenerator, ChatMessage, ChatRole, GenerationClient, GenerationRequest,
    GenerationTask, GeneratorError, TextGenerator,
};
pub use rate_limit::RateLimiter;
pub use review::{ReviewGenerator, ReviewParams};
pub use session::{
    AnalyzedError, Language, LearnerError, Level, SessionId, SessionMode, SessionOperation,
    SessionState, Speaker, Turn, TutorSession,
};
pub use source::{
    resolve_counterpart, DialogLine, JsonSourceCatalog, SourceCatalog, SourceContent,
};
pub use store::{InMemorySessionStore, SessionStore};
