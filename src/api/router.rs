use axum::{
    http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
    http::{HeaderName, Method, Request, Response},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::api::{grading, handlers, tasks, upload};
use crate::core::{config::Settings, state::AppState};

pub(crate) fn router(state: AppState) -> Router {
    let cors = build_cors_layer(state.settings());
    let api_prefix = state.settings().api().api_prefix.trim_end_matches('/').to_string();
    let api = Router::new()
        .merge(grading::router())
        .merge(tasks::router())
        .merge(upload::router(state.settings().storage().max_upload_bytes()));

    let request_id_header = HeaderName::from_static("x-request-id");
    let request_id_header_for_span = request_id_header.clone();
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<_>| {
            let request_id = request
                .headers()
                .get(&request_id_header_for_span)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(|response: &Response<axum::body::Body>, latency: Duration, _span: &Span| {
            let status_label = response.status().as_u16().to_string();
            metrics::counter!(
                "http_requests_total",
                "status" => status_label.clone()
            )
            .increment(1);
            metrics::histogram!(
                "http_request_duration_seconds",
                "status" => status_label
            )
            .record(latency.as_secs_f64());
        });

    let mut router: Router<AppState> = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz).head(handlers::healthz));

    router = if api_prefix.is_empty() { router.merge(api) } else { router.nest(&api_prefix, api) };

    if state.settings().telemetry().prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings
        .cors()
        .origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            ORIGIN,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        // Wildcard origin cannot be combined with allow_credentials
        base.allow_origin(Any)
    } else {
        base.allow_credentials(true).allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::core::{config::Settings, metrics, time::now_utc};
    use crate::db::models::{GradingRecord, NewGrading};
    use crate::db::types::GradingStatus;
    use crate::test_support::{self, json_request, read_json, TestApp};

    async fn seed_record(app: &TestApp, id: &str, owner: &str, status: GradingStatus, score: i32) {
        let mut record = GradingRecord::new(NewGrading {
            id: id.to_string(),
            subject: Some("数学".to_string()),
            images: vec!["papers/a.png".to_string()],
            paper_image: None,
            answer_image: None,
            description: None,
            owner_username: owner.to_string(),
            owner_role: "parent".to_string(),
            now: now_utc(),
        });
        record.status = status;
        record.score = score;
        app.state.gradings().upsert(&record).await.expect("seed record");
    }

    async fn wait_for_terminal(app: &TestApp, id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let response = app
                .router()
                .oneshot(json_request(Method::GET, &format!("/api/grading/{id}"), None, None))
                .await
                .expect("response");
            let body = read_json(response).await;
            if body["status"] != "processing" {
                return body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("grading {id} never left processing");
    }

    #[tokio::test]
    async fn root_returns_banner() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/", None, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["message"], "Autograde API");
    }

    #[tokio::test]
    async fn healthz_reports_record_store() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/healthz", None, None))
            .await
            .expect("response");

        let json = read_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["records"], "healthy");
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/metrics", None, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_returns_200() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROMETHEUS_ENABLED", "1");
        let settings = Settings::load().expect("settings");
        std::env::remove_var("PROMETHEUS_ENABLED");
        metrics::init(&settings).expect("metrics init");
        let app = test_support::build_test_app(settings);

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/metrics", None, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn grading_without_image_ends_failed() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/parent/submit",
                None,
                Some(json!({ "subject": "数学", "images": [], "description": "期中" })),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        assert_eq!(created["status"], "processing");
        assert_eq!(created["totalScore"], 100);
        assert_eq!(created["completeTime"], "");
        assert_eq!(created["ownerUsername"], "anonymous");

        let id = created["id"].as_str().expect("id").to_string();
        let finished = wait_for_terminal(&app, &id).await;
        assert_eq!(finished["status"], "failed");
        assert_eq!(finished["score"], 0);
        assert_eq!(finished["feedback"], "未找到试卷图片路径");
    }

    #[tokio::test]
    async fn uploaded_image_is_graded_end_to_end() {
        let app = test_support::setup_test_app().await;
        let path = app
            .state
            .storage()
            .save("papers", "scan.png", b"3+4=7")
            .await
            .expect("save image");

        let request = json_request(
            Method::POST,
            "/api/grading",
            Some("mock_token_alice_parent"),
            Some(json!({ "subject": "数学", "images": [path] })),
        );
        let created = read_json(app.router().oneshot(request).await.expect("response")).await;
        let id = created["id"].as_str().expect("id").to_string();

        let finished = wait_for_terminal(&app, &id).await;
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["score"], 90);
        assert_eq!(finished["feedback"], "正确");
        assert_eq!(finished["ocrResult"], "3+4=7");
        assert_ne!(finished["completeTime"], "");

        let mine =
            json_request(Method::GET, "/api/parent/results", Some("mock_token_alice_parent"), None);
        let results = read_json(app.router().oneshot(mine).await.expect("response")).await;
        assert_eq!(results["total"], 1);
        assert_eq!(results["items"][0]["id"], id.as_str());
    }

    #[tokio::test]
    async fn process_unknown_grading_returns_404() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(Method::POST, "/api/grading/nope/process", None, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = read_json(response).await;
        assert_eq!(json["status"], 404);
    }

    #[tokio::test]
    async fn process_while_claimed_returns_409() {
        let app = test_support::setup_test_app().await;
        let created = read_json(
            app.router()
                .oneshot(json_request(
                    Method::POST,
                    "/api/grading",
                    None,
                    Some(json!({ "images": [] })),
                ))
                .await
                .expect("response"),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();
        wait_for_terminal(&app, &id).await;

        // The worker releases its claim just after the terminal write.
        let mut claim = None;
        for _ in 0..200 {
            if let Ok(held) = app.state.dispatcher().claim(&id) {
                claim = Some(held);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let _claim = claim.expect("claim");
        let response = app
            .router()
            .oneshot(json_request(Method::POST, &format!("/api/grading/{id}/process"), None, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn escaping_image_reference_is_rejected() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/grading",
                None,
                Some(json!({ "images": ["../../etc/passwd"] })),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_task_lifecycle_over_http() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/teacher/tasks",
                None,
                Some(json!({ "taskId": "t-1", "totalPapers": 50, "autoStart": false })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(read_json(response).await["status"], "pending");

        let response = app
            .router()
            .oneshot(json_request(Method::POST, "/api/teacher/tasks/t-1/execute", None, None))
            .await
            .expect("response");
        assert_eq!(read_json(response).await["status"], "running");

        let response = app
            .router()
            .oneshot(json_request(Method::POST, "/api/teacher/tasks/t-1/execute", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .router()
            .oneshot(json_request(Method::POST, "/api/teacher/tasks/t-1/cancel", None, None))
            .await
            .expect("response");
        let cancelled = read_json(response).await;
        assert_eq!(cancelled["status"], "cancelled");
        assert_eq!(cancelled["message"], "任务已取消");

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/teacher/tasks/t-1/status", None, None))
            .await
            .expect("response");
        assert_eq!(read_json(response).await["totalPapers"], 50);

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/teacher/tasks/missing/status", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn task_with_zero_papers_is_rejected() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/teacher/tasks",
                None,
                Some(json!({ "totalPapers": 0 })),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_statistics_and_delete_over_http() {
        let app = test_support::setup_test_app().await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/teacher/tasks",
                None,
                Some(json!({ "taskId": "t-2", "totalPapers": 10000 })),
            ))
            .await
            .expect("response");
        assert_eq!(read_json(response).await["status"], "running");

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/teacher/tasks/t-2/statistics", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let stats = read_json(response).await;
        assert_eq!(stats["totalPapers"], 10000);
        assert!(stats["passRate"].is_number());

        let response = app
            .router()
            .oneshot(json_request(Method::DELETE, "/api/teacher/tasks/t-2", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        app.router()
            .oneshot(json_request(Method::POST, "/api/teacher/tasks/t-2/cancel", None, None))
            .await
            .expect("response");

        let response = app
            .router()
            .oneshot(json_request(Method::DELETE, "/api/teacher/tasks/t-2", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let deleted = read_json(response).await;
        assert_eq!(deleted["taskId"], "t-2");
        assert_eq!(deleted["status"], "deleted");

        for uri in ["/api/teacher/tasks/t-2/status", "/api/teacher/tasks/t-2/statistics"] {
            let response = app
                .router()
                .oneshot(json_request(Method::GET, uri, None, None))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/teacher/tasks", None, None))
            .await
            .expect("response");
        assert_eq!(read_json(response).await["total"], 0);
    }

    #[tokio::test]
    async fn parent_dashboard_and_history_cover_only_own_records() {
        let app = test_support::setup_test_app().await;
        seed_record(&app, "a", "alice", GradingStatus::Completed, 90).await;
        seed_record(&app, "b", "alice", GradingStatus::Failed, 0).await;
        seed_record(&app, "c", "alice", GradingStatus::Completed, 70).await;
        seed_record(&app, "d", "alice", GradingStatus::Processing, 0).await;
        seed_record(&app, "e", "bob", GradingStatus::Completed, 10).await;
        let token = Some("mock_token_alice_parent");

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/parent/dashboard", token, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let dashboard = read_json(response).await;
        assert_eq!(dashboard["statistics"]["totalSubmissions"], 4);
        assert_eq!(dashboard["statistics"]["completed"], 2);
        assert_eq!(dashboard["statistics"]["failed"], 1);
        assert_eq!(dashboard["statistics"]["processing"], 1);
        assert_eq!(dashboard["statistics"]["averageScore"], 80.0);
        assert_eq!(dashboard["recentResults"].as_array().map(Vec::len), Some(4));

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/parent/history", token, None))
            .await
            .expect("response");
        let history = read_json(response).await;
        assert_eq!(history["history"].as_array().map(Vec::len), Some(4));
        assert_eq!(history["statistics"]["averageScore"], 80.0);

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/parent/result/a", token, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["score"], 90);

        let response = app
            .router()
            .oneshot(json_request(Method::GET, "/api/parent/result/e", token, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_lists_five_most_recent_results() {
        let app = test_support::setup_test_app().await;
        for index in 0..7 {
            seed_record(&app, &format!("g-{index}"), "alice", GradingStatus::Completed, 60).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let response = app
            .router()
            .oneshot(json_request(
                Method::GET,
                "/api/parent/dashboard",
                Some("mock_token_alice_parent"),
                None,
            ))
            .await
            .expect("response");
        let dashboard = read_json(response).await;

        let recent = dashboard["recentResults"].as_array().expect("recent results");
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0]["id"], "g-6");
        assert_eq!(dashboard["statistics"]["totalSubmissions"], 7);
    }
}
