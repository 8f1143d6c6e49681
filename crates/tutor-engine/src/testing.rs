//! Test doubles shared by the unit tests of this crate.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::generation::{
    GenerationClient, GenerationRequest, GenerationTask, GeneratorError, TextGenerator,
};
use crate::source::{DialogLine, JsonSourceCatalog, SourceContent};
use crate::session::Language;

/// Review narrative that passes schema validation.
pub const REVIEW_JSON: &str = r#"{
    "overallAssessment": "Good effort with clear communication.",
    "strengths": ["Greetings", "Question forms"],
    "focusAreas": ["Verb agreement"],
    "encouragement": "Keep practicing!"
}"#;

/// Generator that replays canned outputs per task.
///
/// Outputs queued with [`push`](Self::push) are consumed in order; once a
/// task's queue is empty a fixed default for that task is returned. Every
/// request is recorded.
#[derive(Default)]
pub struct ScriptedGenerator {
    queued: Mutex<HashMap<GenerationTask, VecDeque<Result<String, String>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, task: GenerationTask, output: impl Into<String>) {
        self.queued
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(Ok(output.into()));
    }

    pub fn push_failure(&self, task: GenerationTask, message: impl Into<String>) {
        self.queued
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, task: GenerationTask) -> Vec<GenerationRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.task == task)
            .collect()
    }

    fn default_output(task: GenerationTask) -> &'static str {
        match task {
            GenerationTask::OpeningLine => "¡Hola! ¿Cómo estás hoy?",
            GenerationTask::Reply => "Muy bien. ¿Y tú?",
            GenerationTask::ErrorAnalysis => r#"{"errors": []}"#,
            GenerationTask::Review => REVIEW_JSON,
            GenerationTask::Overview => "A short story about a city.",
        }
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<String, GeneratorError>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let task = request.task;
            self.requests.lock().unwrap().push(request);

            let next = self
                .queued
                .lock()
                .unwrap()
                .get_mut(&task)
                .and_then(VecDeque::pop_front);

            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(GeneratorError(message)),
                None => Ok(Self::default_output(task).to_string()),
            }
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Wraps a scripted generator in a client with a generous timeout.
pub fn client(generator: &Arc<ScriptedGenerator>) -> GenerationClient {
    GenerationClient::new(generator.clone(), Duration::from_secs(5))
}

/// Roleplay dialog `D1` between Maria and Carlos.
pub fn dialog_source() -> SourceContent {
    SourceContent {
        id: "D1".to_string(),
        title: "En el café".to_string(),
        language: Some(Language::Spanish),
        body: "Two friends meet at a café.".to_string(),
        participants: vec!["Maria".to_string(), "Carlos".to_string()],
        lines: vec![
            DialogLine {
                speaker: "Maria".to_string(),
                text: "¡Hola, Carlos!".to_string(),
            },
            DialogLine {
                speaker: "Carlos".to_string(),
                text: "¡Hola, Maria! ¿Qué tal?".to_string(),
            },
        ],
    }
}

/// Plain reading text `T1`.
pub fn text_source() -> SourceContent {
    SourceContent {
        id: "T1".to_string(),
        title: "Le marché".to_string(),
        language: Some(Language::French),
        body: "Le samedi, le marché est plein de monde.".to_string(),
        participants: Vec::new(),
        lines: Vec::new(),
    }
}

/// Dialog `D3` with three participants.
pub fn crowded_source() -> SourceContent {
    SourceContent {
        id: "D3".to_string(),
        participants: vec!["Ana".to_string(), "Luis".to_string(), "Sofia".to_string()],
        ..dialog_source()
    }
}

/// Catalog holding every fixture source.
pub fn catalog() -> JsonSourceCatalog {
    JsonSourceCatalog::from_sources(vec![dialog_source(), text_source(), crowded_source()])
        .unwrap()
}
