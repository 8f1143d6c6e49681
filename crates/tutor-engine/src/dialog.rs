//! Dialog orchestration: opening a session and producing the AI's replies.
//!
//! The orchestrator works on a session value handed to it by the caller. It
//! never reads or writes the store; persistence and per-session serialization
//! belong to [`TutorEngine`](crate::engine::TutorEngine).

use std::sync::Arc;

use crate::error::{Result, TutorError};
use crate::generation::{seed_for, ChatMessage, GenerationClient, GenerationRequest, GenerationTask};
use crate::session::{Language, Level, SessionMode, SessionOperation, Speaker, TutorSession};
use crate::source::{resolve_counterpart, SourceCatalog, SourceContent};

const OPENING_PROMPT: &str = "Open the conversation with your first line.";

/// Parameters of a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    /// Source to practice.
    pub source_id: String,
    /// Learner level.
    pub level: Level,
    /// Role the learner plays; `None` starts a guided dialog.
    pub selected_role: Option<String>,
    /// Explicit target language.
    pub language: Option<Language>,
}

/// Result of one learner turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Index of the learner's turn.
    pub learner_turn_index: u32,
    /// Index of the AI's reply.
    pub ai_turn_index: u32,
    /// The AI's reply.
    pub reply: String,
}

/// Drives the conversation of a session.
#[derive(Clone)]
pub struct DialogOrchestrator {
    catalog: Arc<dyn SourceCatalog>,
    generator: GenerationClient,
    default_language: Language,
}

impl DialogOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        generator: GenerationClient,
        default_language: Language,
    ) -> Self {
        Self {
            catalog,
            generator,
            default_language,
        }
    }

    /// Builds a new session in `Started` whose turn 0 is the AI's opening line.
    ///
    /// The opening line is generated with a seed derived from the source id
    /// and level. The returned session is not yet stored.
    ///
    /// # Errors
    ///
    /// - `TutorError::SourceNotFound` if the source does not exist
    /// - `TutorError::InvalidStructure` if a roleplay cannot be cast from the source
    /// - `TutorError::GenerationFailed` if the opening line cannot be generated
    pub async fn start(&self, params: StartParams) -> Result<TutorSession> {
        let source = self
            .catalog
            .get(&params.source_id)
            .ok_or_else(|| TutorError::source_not_found(&params.source_id))?;

        let mode = match params.selected_role.as_deref() {
            Some(selected) => SessionMode::Roleplay {
                selected_role: selected.trim().to_string(),
                opposite_role: resolve_counterpart(&source, selected)?,
            },
            None => SessionMode::GuidedDialog,
        };

        let language = params
            .language
            .or(source.language)
            .unwrap_or(self.default_language);

        let request = GenerationRequest::prompt(
            GenerationTask::OpeningLine,
            system_prompt(&mode, params.level, language, &source),
            OPENING_PROMPT,
        )
        .with_seed(seed_for(&[source.id.as_str(), params.level.as_str()]));

        let opening = self.generator.generate(request).await?;

        Ok(TutorSession::new(
            source.id,
            params.level,
            language,
            mode,
            opening,
        ))
    }

    /// Appends the learner's turn and the AI's reply to `session`.
    ///
    /// The reply is generated from the whole transcript, in order, including
    /// the learner turn just appended. On error `session` may hold the learner
    /// turn without a reply; callers discard it instead of storing it.
    ///
    /// # Errors
    ///
    /// - `TutorError::InvalidSessionType` if the session no longer accepts turns
    /// - `TutorError::GenerationFailed` if the reply cannot be generated
    pub async fn advance(
        &self,
        session: &mut TutorSession,
        learner_text: &str,
    ) -> Result<TurnOutcome> {
        session.ensure(SessionOperation::AppendTurn)?;

        // A source removed from the catalog after the session started still
        // allows the conversation to continue, without its text as context.
        let source = self.catalog.get(&session.source_id).unwrap_or_else(|| SourceContent {
            id: session.source_id.clone(),
            ..SourceContent::default()
        });

        let learner_turn_index = session.append_turn(Speaker::Learner, learner_text)?;

        let request = GenerationRequest::conversation(
            GenerationTask::Reply,
            system_prompt(&session.mode, session.level, session.language, &source),
            history(session),
        );
        let reply = self.generator.generate(request).await?;

        let ai_turn_index = session.append_turn(Speaker::Ai, reply.as_str())?;

        Ok(TurnOutcome {
            learner_turn_index,
            ai_turn_index,
            reply,
        })
    }
}

/// The transcript as chat messages, oldest first.
fn history(session: &TutorSession) -> Vec<ChatMessage> {
    session
        .turns
        .iter()
        .map(|turn| match turn.speaker {
            Speaker::Ai => ChatMessage::assistant(turn.text.as_str()),
            Speaker::Learner => ChatMessage::user(turn.text.as_str()),
        })
        .collect()
}

fn system_prompt(
    mode: &SessionMode,
    level: Level,
    language: Language,
    source: &SourceContent,
) -> String {
    let persona = match mode {
        SessionMode::GuidedDialog => format!(
            "You are a friendly {} tutor talking with a learner at CEFR level {level} \
             about the text below. Keep the conversation going with one short question \
             at a time and never switch to another language.",
            language.name()
        ),
        SessionMode::Roleplay {
            selected_role,
            opposite_role,
        } => format!(
            "You are {opposite_role} in a roleplay based on the dialog below. The learner \
             plays {selected_role} and is at CEFR level {level}. Stay in character, speak \
             only {} and answer as {opposite_role} would.",
            language.name()
        ),
    };

    let mut prompt = format!("{persona}\n{}", level.guidance());
    let context = source.context();
    if !context.is_empty() {
        prompt.push_str("\n\n");
        if !source.title.is_empty() {
            prompt.push_str(&source.title);
            prompt.push('\n');
        }
        prompt.push_str(&context);
    }
    prompt
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::generation::ChatRole;
    use crate::session::SessionState;
    use crate::source::JsonSourceCatalog;
    use crate::testing::{catalog, client, text_source, ScriptedGenerator};

    fn orchestrator(generator: &Arc<ScriptedGenerator>) -> DialogOrchestrator {
        DialogOrchestrator::new(Arc::new(catalog()), client(generator), Language::German)
    }

    fn params(source_id: &str, selected_role: Option<&str>) -> StartParams {
        StartParams {
            source_id: source_id.to_string(),
            level: Level::A2,
            selected_role: selected_role.map(str::to_string),
            language: None,
        }
    }

    #[tokio::test]
    async fn test_start_roleplay_resolves_counterpart() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(GenerationTask::OpeningLine, "¡Hola, Maria! ¿Qué tomas?");

        let session = orchestrator(&generator)
            .start(params("D1", Some("Maria")))
            .await
            .unwrap();

        assert_eq!(
            session.mode,
            SessionMode::Roleplay {
                selected_role: "Maria".to_string(),
                opposite_role: "Carlos".to_string(),
            }
        );
        assert_eq!(session.state, SessionState::Started);
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].index, 0);
        assert_eq!(session.turns[0].speaker, Speaker::Ai);
        assert_eq!(session.turns[0].text, "¡Hola, Maria! ¿Qué tomas?");

        let system = &generator.requests_for(GenerationTask::OpeningLine)[0].system;
        assert!(system.contains("You are Carlos"));
    }

    #[tokio::test]
    async fn test_start_guided_on_text_source() {
        let generator = Arc::new(ScriptedGenerator::new());
        let session = orchestrator(&generator).start(params("T1", None)).await.unwrap();

        assert_eq!(session.mode, SessionMode::GuidedDialog);
        assert_eq!(session.language, Language::French);
    }

    #[tokio::test]
    async fn test_start_language_precedence() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);

        let mut explicit = params("T1", None);
        explicit.language = Some(Language::Italian);
        assert_eq!(
            orchestrator.start(explicit).await.unwrap().language,
            Language::Italian
        );

        let mut source = text_source();
        source.language = None;
        let catalog = JsonSourceCatalog::from_sources(vec![source]).unwrap();
        let orchestrator =
            DialogOrchestrator::new(Arc::new(catalog), client(&generator), Language::German);
        assert_eq!(
            orchestrator.start(params("T1", None)).await.unwrap().language,
            Language::German
        );
    }

    #[tokio::test]
    async fn test_opening_seed_depends_on_source_and_level() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);

        orchestrator.start(params("D1", Some("Maria"))).await.unwrap();
        orchestrator.start(params("D1", Some("Carlos"))).await.unwrap();
        let mut other_level = params("D1", Some("Maria"));
        other_level.level = Level::C1;
        orchestrator.start(other_level).await.unwrap();

        let seeds: Vec<_> = generator
            .requests_for(GenerationTask::OpeningLine)
            .iter()
            .map(|r| r.seed.unwrap())
            .collect();
        assert_eq!(seeds[0], seeds[1]);
        assert_ne!(seeds[0], seeds[2]);
    }

    #[tokio::test]
    async fn test_start_unknown_source() {
        let generator = Arc::new(ScriptedGenerator::new());
        let err = orchestrator(&generator)
            .start(params("nope", None))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::SourceNotFound { .. }));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_start_roleplay_invalid_structure() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);

        for (source, role) in [("D3", "Ana"), ("T1", "Maria"), ("D1", "Ana")] {
            let err = orchestrator
                .start(params(source, Some(role)))
                .await
                .unwrap_err();
            assert!(
                matches!(err, TutorError::InvalidStructure { .. }),
                "{source}/{role} gave {err:?}"
            );
        }
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_advance_appends_learner_and_reply() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);
        let mut session = orchestrator.start(params("D1", Some("Maria"))).await.unwrap();

        generator.push(GenerationTask::Reply, "Un café, por favor.");
        let outcome = orchestrator
            .advance(&mut session, "Hola Carlos, ¿qué quieres?")
            .await
            .unwrap();

        assert_eq!(outcome.learner_turn_index, 1);
        assert_eq!(outcome.ai_turn_index, 2);
        assert_eq!(outcome.reply, "Un café, por favor.");
        assert_eq!(session.state, SessionState::InProgress);
        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns[1].speaker, Speaker::Learner);
        assert_eq!(session.turns[2].speaker, Speaker::Ai);
    }

    #[tokio::test]
    async fn test_advance_passes_full_history_in_order() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);
        let mut session = orchestrator.start(params("T1", None)).await.unwrap();

        orchestrator.advance(&mut session, "Premier").await.unwrap();
        orchestrator.advance(&mut session, "Deuxième").await.unwrap();

        let last = generator.requests_for(GenerationTask::Reply).pop().unwrap();
        let transcript: Vec<_> = session.turns[..4].iter().map(|t| t.text.as_str()).collect();
        let history: Vec<_> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, transcript);
        assert_eq!(last.messages[0].role, ChatRole::Assistant);
        assert_eq!(last.messages[3].role, ChatRole::User);
    }

    #[tokio::test]
    async fn test_advance_rejected_on_completed_session() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);
        let mut session = orchestrator.start(params("T1", None)).await.unwrap();
        session.complete().unwrap();

        let err = orchestrator.advance(&mut session, "Encore").await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidSessionType { .. }));
        assert!(generator.requests_for(GenerationTask::Reply).is_empty());
        assert_eq!(session.turns.len(), 1);
    }

    #[tokio::test]
    async fn test_advance_generation_failure() {
        let generator = Arc::new(ScriptedGenerator::new());
        let orchestrator = orchestrator(&generator);
        let mut session = orchestrator.start(params("T1", None)).await.unwrap();

        generator.push_failure(GenerationTask::Reply, "connection reset");
        let err = orchestrator.advance(&mut session, "Bonjour").await.unwrap_err();
        assert!(matches!(err, TutorError::GenerationFailed { .. }));
    }
}
