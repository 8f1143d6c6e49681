//! End-to-end integration tests for Lingo Tutor
//!
//! These tests serve the real router on a loopback port and drive complete
//! sessions over HTTP. Text generation is replaced by a deterministic
//! fixture backend so no network access is needed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tutor_engine::{
    create_router, AppState, Config, GenerationClient, GenerationRequest, GenerationTask,
    GeneratorError, InMemorySessionStore, JsonSourceCatalog, SourceCatalog, TextGenerator,
    TutorEngine,
};
use tutor_review::{MarkdownGenerator, Review};

/// Path to the integration fixtures.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Deterministic backend keyed on the task and the learner's last message.
///
/// Messages containing `yo es` get one grammar error; messages containing
/// `[fail]` make the reply fail.
struct FixtureGenerator {
    delay: Duration,
}

impl FixtureGenerator {
    fn respond(request: &GenerationRequest) -> Result<String, GeneratorError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match request.task {
            GenerationTask::OpeningLine => Ok("Buenos días, ¿qué desea?".to_string()),
            GenerationTask::Reply if last.contains("[fail]") => {
                Err(GeneratorError("upstream 500: internal trace".to_string()))
            }
            GenerationTask::Reply => Ok(format!("Entiendo: {last}")),
            GenerationTask::ErrorAnalysis if last.contains("yo es") => Ok(json!({
                "errors": [{
                    "errorText": "yo es",
                    "correction": "yo soy",
                    "explanation": "Use 'soy' with 'yo'.",
                    "category": "grammar"
                }]
            })
            .to_string()),
            GenerationTask::ErrorAnalysis => Ok(r#"{"errors": []}"#.to_string()),
            GenerationTask::Review => Ok(json!({
                "overallAssessment": "Clear and polite shopping dialog.",
                "strengths": ["Polite requests"],
                "focusAreas": ["Conjugation of ser"],
                "encouragement": "¡Muy bien!"
            })
            .to_string()),
            GenerationTask::Overview => Ok("A short description of Lyon.".to_string()),
        }
    }
}

impl TextGenerator for FixtureGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<String, GeneratorError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Self::respond(&request)
        })
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

/// A running server and a client pre-configured with the identity header.
struct TestServer {
    base: String,
    client: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: Config) -> Self {
        let catalog = JsonSourceCatalog::load(fixture_path().join("sources.json"))
            .expect("Failed to load fixture catalog");
        let generator = GenerationClient::new(
            Arc::new(FixtureGenerator {
                delay: Duration::from_millis(20),
            }),
            Duration::from_secs(5),
        );
        let engine = TutorEngine::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(catalog),
            generator,
            &config,
        );
        let router = create_router(AppState::new(config, engine));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server failed");
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-user-id",
            reqwest::header::HeaderValue::from_static("learner-42"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to build client");

        Self {
            base: format!("http://{addr}"),
            client,
            _handle: handle,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await
            .expect("Request failed");
        let status = response.status();
        (status, response.json().await.expect("Body was not JSON"))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("Request failed");
        let status = response.status();
        (status, response.json().await.expect("Body was not JSON"))
    }

    async fn start_market_roleplay(&self) -> String {
        let (status, body) = self
            .post(
                "/api/sessions",
                &json!({"sourceId": "mercado", "level": "A2", "selectedRole": "Maria"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "start failed: {body}");
        body["sessionId"].as_str().expect("missing sessionId").to_string()
    }

    async fn turn(&self, session_id: &str, utterance: &str) -> (StatusCode, Value) {
        self.post(
            "/api/sessions/turn",
            &json!({"sessionId": session_id, "learnerUtterance": utterance}),
        )
        .await
    }
}

/// Tests that the fixture config and catalog load.
#[test]
fn test_fixture_config_and_catalog_load() {
    let config = Config::load_from_dir(&fixture_path()).expect("Failed to load config");
    assert_eq!(config.sources_path, "sources.json");
    assert_eq!(config.max_utterance_chars, 500);
    assert_eq!(config.rate_limits.turn, 40);
    assert_eq!(config.generator.model, "tutor-test");

    let catalog = JsonSourceCatalog::load(fixture_path().join(&config.sources_path))
        .expect("Failed to load catalog");
    assert_eq!(catalog.len(), 3);
    assert_eq!(
        catalog.get("mercado").expect("mercado").distinct_participants(),
        vec!["Maria", "Carlos"]
    );
}

/// Tests a complete roleplay session from the opening line to the review.
#[tokio::test]
async fn test_full_roleplay_session() {
    let server = TestServer::spawn(Config::default()).await;

    let (status, started) = server
        .post(
            "/api/sessions",
            &json!({"sourceId": "mercado", "level": "A2", "selectedRole": "Maria"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["firstUtterance"], "Buenos días, ¿qué desea?");
    assert_eq!(started["oppositeRole"], "Carlos");
    let session_id = started["sessionId"].as_str().expect("sessionId").to_string();

    let (status, first) = server.turn(&session_id, "Hola, yo es Maria").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["learnerTurnIndex"], 1);
    assert_eq!(first["aiTurnIndex"], 2);
    assert_eq!(first["errors"][0]["correction"], "yo soy");
    assert_eq!(first["state"], "in_progress");

    let (status, second) = server
        .turn(&session_id, "Quiero naranjas, por favor")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["learnerTurnIndex"], 3);
    assert!(second["errors"].as_array().expect("errors").is_empty());

    let (status, analysis) = server
        .post("/api/sessions/analyze", &json!({"sessionId": session_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analysis["errors"].as_array().expect("errors").len(), 1);
    assert_eq!(analysis["errors"][0]["turnIndex"], 1);

    let (status, completed) = server
        .post(&format!("/api/sessions/{session_id}/complete"), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["state"], "completed");

    let (status, rejected) = server.turn(&session_id, "Una cosa más").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(rejected["code"], "invalid_session_type");

    let (status, body) = server
        .post("/api/sessions/review", &json!({"sessionId": session_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let review: Review = serde_json::from_value(body).expect("review shape");
    assert!(review.needs_corrections);
    assert_eq!(review.total_errors, 1);
    assert_eq!(review.level, "A2");
    assert_eq!(review.overall_assessment, "Clear and polite shopping dialog.");

    let markdown = MarkdownGenerator::new(&review).generate();
    assert!(markdown.contains("yo soy"));

    let (status, session) = server.get(&format!("/api/sessions/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let indices: Vec<u64> = session["turns"]
        .as_array()
        .expect("turns")
        .iter()
        .map(|t| t["index"].as_u64().expect("index"))
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
}

/// Tests that concurrent turns on one session are serialized without gaps.
#[tokio::test]
async fn test_concurrent_turns_are_serialized() {
    let server = Arc::new(TestServer::spawn(Config::default()).await);
    let session_id = server.start_market_roleplay().await;

    let turns = (0..4).map(|i| {
        let server = Arc::clone(&server);
        let session_id = session_id.clone();
        tokio::spawn(async move { server.turn(&session_id, &format!("Mensaje {i}")).await })
    });
    let results = futures::future::join_all(turns).await;

    let mut learner_indices: Vec<u64> = results
        .into_iter()
        .map(|r| {
            let (status, body) = r.expect("task panicked");
            assert_eq!(status, StatusCode::OK, "turn failed: {body}");
            body["learnerTurnIndex"].as_u64().expect("index")
        })
        .collect();
    learner_indices.sort_unstable();
    assert_eq!(learner_indices, vec![1, 3, 5, 7]);

    let (_, session) = server.get(&format!("/api/sessions/{session_id}")).await;
    assert_eq!(session["turns"].as_array().expect("turns").len(), 9);
    assert_eq!(session["version"], 4);
}

/// Tests that a failed generation leaves the session untouched and hides details.
#[tokio::test]
async fn test_generation_failure_commits_nothing() {
    let server = TestServer::spawn(Config::default()).await;
    let session_id = server.start_market_roleplay().await;

    let (status, body) = server.turn(&session_id, "yo es [fail]").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "generation_failed");
    assert!(!body["error"].as_str().expect("error").contains("internal trace"));

    let (_, session) = server.get(&format!("/api/sessions/{session_id}")).await;
    assert_eq!(session["turns"].as_array().expect("turns").len(), 1);
    assert!(session["errors"].as_array().expect("errors").is_empty());
    assert_eq!(session["state"], "started");
}

/// Tests shape checks on session start.
#[tokio::test]
async fn test_start_rejections() {
    let server = TestServer::spawn(Config::default()).await;

    let (status, body) = server
        .post(
            "/api/sessions",
            &json!({"sourceId": "reunion", "level": "B1", "selectedRole": "Ana"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_structure");

    let (status, _) = server
        .post(
            "/api/sessions",
            &json!({"sourceId": "mercado", "level": "A1", "selectedRole": "Pedro"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = server
        .post("/api/sessions", &json!({"sourceId": "missing", "level": "A1"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = reqwest::Client::new()
        .post(format!("{}/api/sessions", server.base))
        .json(&json!({"sourceId": "mercado", "level": "A1"}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Tests the turn quota and the Retry-After header.
#[tokio::test]
async fn test_turn_quota() {
    let mut config = Config::default();
    config.rate_limits.turn = 2;
    let server = TestServer::spawn(config).await;
    let session_id = server.start_market_roleplay().await;

    for _ in 0..2 {
        let (status, _) = server.turn(&session_id, "Hola").await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = server
        .client
        .post(format!("{}/api/sessions/turn", server.base))
        .json(&json!({"sessionId": session_id, "learnerUtterance": "Hola"}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("Retry-After header");
    assert!((1..=60).contains(&retry_after));
}

/// Tests overview caching for a reading text.
#[tokio::test]
async fn test_overview_is_cached() {
    let server = TestServer::spawn(Config::default()).await;

    let (status, first) = server
        .post("/api/overview", &json!({"sourceId": "la-ville"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert_eq!(first["overview"], "A short description of Lyon.");

    let (_, second) = server
        .post("/api/overview", &json!({"sourceId": "la-ville"}))
        .await;
    assert_eq!(second["cached"], true);

    let (status, _) = server
        .post("/api/overview", &json!({"sourceId": "missing"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Tests the health endpoint.
#[tokio::test]
async fn test_health() {
    let server = TestServer::spawn(Config::default()).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generator"]["backend"], "fixture");
}
