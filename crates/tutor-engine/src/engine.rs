//! The caller layer that runs session operations end to end.
//!
//! [`TutorEngine`] reads a session from the store, applies one operation and
//! writes it back. A turn runs the dialog reply and the error critique
//! concurrently and commits both in a single compare-and-write once both have
//! succeeded. Writes to one session are serialized by a per-session lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tutor_review::Review;

use crate::analyzer::ErrorAnalyzer;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::dialog::{DialogOrchestrator, StartParams};
use crate::error::{Result, TutorError};
use crate::generation::{GenerationClient, GenerationRequest, GenerationTask};
use crate::review::{ReviewGenerator, ReviewParams};
use crate::session::{
    Language, LearnerError, SessionId, SessionOperation, SessionState, TutorSession,
};
use crate::source::SourceCatalog;
use crate::store::SessionStore;

/// Outcome of a learner turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    /// The session.
    pub session_id: SessionId,
    /// Index of the learner's turn.
    pub learner_turn_index: u32,
    /// Index of the AI's reply.
    pub ai_turn_index: u32,
    /// The AI's reply.
    pub ai_utterance: String,
    /// Errors found in the learner's turn.
    pub errors: Vec<LearnerError>,
    /// Session state after the turn.
    pub state: SessionState,
}

/// An overview of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// The source.
    pub source_id: String,
    /// The overview text.
    pub overview: String,
    /// Whether it was served from the cache.
    pub cached: bool,
}

/// Per-session async locks.
#[derive(Debug, Default)]
struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, id: SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Locks nobody holds or waits on are dropped.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

/// Runs tutoring sessions against a store, a catalog and a generator.
pub struct TutorEngine {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn SourceCatalog>,
    generator: GenerationClient,
    orchestrator: DialogOrchestrator,
    analyzer: ErrorAnalyzer,
    reviewer: ReviewGenerator,
    overviews: ResponseCache<String>,
    locks: SessionLocks,
}

impl TutorEngine {
    /// Wires an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn SourceCatalog>,
        generator: GenerationClient,
        config: &Config,
    ) -> Self {
        Self {
            orchestrator: DialogOrchestrator::new(
                Arc::clone(&catalog),
                generator.clone(),
                config.default_language,
            ),
            analyzer: ErrorAnalyzer::new(generator.clone()),
            reviewer: ReviewGenerator::new(Arc::clone(&store), generator.clone()),
            overviews: ResponseCache::new(config.cache.overview_ttl()),
            locks: SessionLocks::default(),
            store,
            catalog,
            generator,
        }
    }

    /// Whether the text generator is ready to serve calls.
    #[must_use]
    pub fn generator_ready(&self) -> bool {
        self.generator.is_ready()
    }

    /// Name of the text generator backend.
    #[must_use]
    pub fn generator_backend(&self) -> &'static str {
        self.generator.backend()
    }

    /// Starts and stores a new session.
    ///
    /// # Errors
    ///
    /// See [`DialogOrchestrator::start`].
    pub async fn start(&self, params: StartParams) -> Result<TutorSession> {
        let session = self.orchestrator.start(params).await?;
        let session = self.store.create(session).await?;

        tracing::info!(
            session_id = %session.id,
            source_id = %session.source_id,
            level = %session.level,
            roleplay = session.mode.is_roleplay(),
            "Session started"
        );
        Ok(session)
    }

    /// Fetches a session.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::SessionNotFound` if it does not exist.
    pub async fn session(&self, id: SessionId) -> Result<TutorSession> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TutorError::session_not_found(id))
    }

    /// Runs one learner turn.
    ///
    /// The AI reply and the error critique are generated concurrently. If
    /// either fails, nothing is stored.
    ///
    /// # Errors
    ///
    /// - `TutorError::SessionNotFound` if the session does not exist
    /// - `TutorError::InvalidSessionType` if the session is completed
    /// - `TutorError::GenerationFailed` or `TutorError::Validation` from either branch
    /// - `TutorError::SessionConflict` if another writer updated the session
    pub async fn turn(
        &self,
        id: SessionId,
        learner_utterance: &str,
        language: Option<Language>,
    ) -> Result<TurnResult> {
        let _guard = self.locks.acquire(id).await;

        let session = self.session(id).await?;
        if let Err(e) = session.ensure(SessionOperation::AppendTurn) {
            tracing::warn!(session_id = %id, state = %session.state, "Rejected turn");
            return Err(e);
        }

        let version = session.version;
        let level = session.level;
        let analysis_language = language.unwrap_or(session.language);
        let mut working = session;

        let (outcome, found) = tokio::try_join!(
            self.orchestrator.advance(&mut working, learner_utterance),
            self.analyzer
                .analyze(learner_utterance, level, analysis_language),
        )?;

        working.record_errors(outcome.learner_turn_index, found.clone())?;
        let stored = self.store.update(working, version).await?;

        let errors: Vec<LearnerError> = found
            .into_iter()
            .map(|e| e.at_turn(outcome.learner_turn_index))
            .collect();

        tracing::info!(
            session_id = %id,
            turn_index = outcome.learner_turn_index,
            error_count = errors.len(),
            "Turn completed"
        );

        Ok(TurnResult {
            session_id: id,
            learner_turn_index: outcome.learner_turn_index,
            ai_turn_index: outcome.ai_turn_index,
            ai_utterance: outcome.reply,
            errors,
            state: stored.state,
        })
    }

    /// Completes a session.
    ///
    /// # Errors
    ///
    /// - `TutorError::SessionNotFound` if the session does not exist
    /// - `TutorError::InvalidSessionType` if it is already completed
    pub async fn complete(&self, id: SessionId) -> Result<TutorSession> {
        let _guard = self.locks.acquire(id).await;

        let mut session = self.session(id).await?;
        let version = session.version;
        session.complete()?;
        let session = self.store.update(session, version).await?;

        tracing::info!(session_id = %id, turns = session.turns.len(), "Session completed");
        Ok(session)
    }

    /// Re-analyzes every learner turn of a session.
    ///
    /// The turns are analyzed concurrently and the errors are returned in
    /// transcript order, tagged with their turn. The stored error list is not
    /// changed.
    ///
    /// # Errors
    ///
    /// - `TutorError::SessionNotFound` if the session does not exist
    /// - `TutorError::InvalidSessionType` if the session has no turns
    /// - `TutorError::GenerationFailed` or `TutorError::Validation` from any analysis
    pub async fn analyze(&self, id: SessionId) -> Result<Vec<LearnerError>> {
        let session = self.session(id).await?;
        session.ensure(SessionOperation::Analyze)?;

        let (level, language) = (session.level, session.language);
        let analyses = session.learner_turns().map(move |turn| async move {
            self.analyzer
                .analyze(&turn.text, level, language)
                .await
                .map(|found| (turn.index, found))
        });
        let results = futures::future::try_join_all(analyses).await?;

        let errors: Vec<LearnerError> = results
            .into_iter()
            .flat_map(|(index, found)| found.into_iter().map(move |e| e.at_turn(index)))
            .collect();

        tracing::info!(session_id = %id, error_count = errors.len(), "Session analyzed");
        Ok(errors)
    }

    /// Produces the review of a session.
    ///
    /// # Errors
    ///
    /// See [`ReviewGenerator::review`].
    pub async fn review(&self, id: SessionId, params: ReviewParams) -> Result<Review> {
        self.reviewer.review(id, params).await
    }

    /// Returns the overview of a source, generating and caching it on a miss.
    ///
    /// # Errors
    ///
    /// - `TutorError::SourceNotFound` if the source does not exist
    /// - `TutorError::GenerationFailed` if the overview cannot be generated
    pub async fn overview(&self, source_id: &str) -> Result<Overview> {
        if let Some(overview) = self.overviews.get(source_id) {
            tracing::debug!(source_id, cached = true, "Overview served from cache");
            return Ok(Overview {
                source_id: source_id.to_string(),
                overview,
                cached: true,
            });
        }

        let source = self
            .catalog
            .get(source_id)
            .ok_or_else(|| TutorError::source_not_found(source_id))?;

        let language = source
            .language
            .map_or_else(|| "the source".to_string(), |l| l.name().to_string());
        let request = GenerationRequest::prompt(
            GenerationTask::Overview,
            format!(
                "You help language learners prepare to read a text in {language}. \
                 Summarize what the text is about in a short paragraph and point out \
                 the vocabulary a learner should know before reading it."
            ),
            source.context(),
        );
        let generated = self.generator.generate(request).await?;

        // Concurrent misses may both generate; the first stored value wins.
        let overview = self.overviews.get_or_set(source_id, generated);
        tracing::debug!(source_id, cached = false, "Overview generated");

        Ok(Overview {
            source_id: source_id.to_string(),
            overview,
            cached: false,
        })
    }

    /// Drops the cached overview of a source. Returns `true` if one existed.
    pub fn invalidate_overview(&self, source_id: &str) -> bool {
        let removed = self.overviews.invalidate(source_id);
        tracing::info!(source_id, removed, "Overview invalidated");
        removed
    }
}
