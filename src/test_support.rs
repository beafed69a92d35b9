use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::repositories::gradings::InMemoryGradingRepository;
use crate::services::ai_scoring::{Scorer, ScoringRequest};
use crate::services::baidu_ocr::TextExtractor;
use crate::services::error::ServiceError;
use crate::services::scoring_parse::{parse_structured, ParseOutcome};
use crate::services::storage::LocalFileStorage;
use crate::tasks::batch::BatchTaskTracker;
use crate::tasks::dispatcher::GradingDispatcher;
use crate::tasks::grading::GradingPipeline;

const SCRIPTED_COMPLETION: &str = r#"{"score":90,"totalScore":100,"feedback":"正确"}"#;

const MANAGED_ENV: &[&str] = &[
    "AUTOGRADE_HOST",
    "AUTOGRADE_PORT",
    "AUTOGRADE_ENV",
    "ENVIRONMENT",
    "PROJECT_NAME",
    "VERSION",
    "API_PREFIX",
    "BACKEND_CORS_ORIGINS",
    "DATABASE_URL",
    "DATABASE_MAX_CONNECTIONS",
    "UPLOAD_PATH",
    "MAX_UPLOAD_SIZE_MB",
    "ALLOWED_IMAGE_EXTENSIONS",
    "BAIDU_API_KEY",
    "BAIDU_SECRET_KEY",
    "BAIDU_OCR_BASE_URL",
    "BAIDU_OCR_ENDPOINT",
    "OCR_LANGUAGE_TYPE",
    "OCR_REQUEST_TIMEOUT",
    "DEEPSEEK_API_KEY",
    "DEEPSEEK_BASE_URL",
    "AI_MODEL",
    "AI_TEMPERATURE",
    "AI_REQUEST_TIMEOUT",
    "SCORING_RESPONSE_MODE",
    "GRADING_WORKERS",
    "GRADING_QUEUE_CAPACITY",
    "BATCH_ITEM_DELAY_MS",
    "BATCH_MESSAGE_EVERY",
    "AUTOGRADE_LOG_LEVEL",
    "AUTOGRADE_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

pub(crate) struct TestApp {
    pub(crate) state: AppState,
    router: Router,
    _shutdown: watch::Sender<bool>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl TestApp {
    pub(crate) fn router(&self) -> Router {
        self.router.clone()
    }
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    for key in MANAGED_ENV {
        std::env::remove_var(key);
    }
    std::env::set_var("AUTOGRADE_ENV", "test");
    std::env::set_var("BATCH_ITEM_DELAY_MS", "1");
}

pub(crate) async fn setup_test_app() -> TestApp {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let mut app = build_test_app(settings);
    app._guard = Some(guard);
    app
}

/// In-memory app: no database, uploads under a fresh temp dir, and fake
/// extraction/scoring that echo the image and score every paper 90.
pub(crate) fn build_test_app(settings: Settings) -> TestApp {
    let gradings = Arc::new(InMemoryGradingRepository::new());
    let upload_root = std::env::temp_dir().join(format!("autograde-test-{}", Uuid::new_v4()));
    let storage = LocalFileStorage::new(upload_root);

    let pipeline = GradingPipeline::new(
        gradings.clone(),
        Arc::new(storage.clone()),
        Arc::new(EchoExtractor),
        Arc::new(ScriptedScorer),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatcher, _handles) = GradingDispatcher::start(
        pipeline,
        settings.pipeline().workers,
        settings.pipeline().queue_capacity,
        shutdown_rx,
    );
    let tasks = BatchTaskTracker::from_settings(settings.batch());

    let state = AppState::new(settings, gradings, storage, dispatcher, tasks);
    let router = api::router::router(state.clone());

    TestApp { state, router, _shutdown: shutdown_tx, _guard: None }
}

struct EchoExtractor;

#[async_trait]
impl TextExtractor for EchoExtractor {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ServiceError> {
        if image.is_empty() {
            return Err(ServiceError::NothingRecognized);
        }
        Ok(String::from_utf8_lossy(image).into_owned())
    }
}

struct ScriptedScorer;

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn score(&self, _request: &ScoringRequest) -> Result<ParseOutcome, ServiceError> {
        Ok(parse_structured(SCRIPTED_COMPLETION))
    }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
