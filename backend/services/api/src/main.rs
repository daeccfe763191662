mod analysis;
mod error;
mod extractors;
mod sessions;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use labelcheck_analysis::clock::SystemClock;
use labelcheck_analysis::completion::AnthropicClient;
use labelcheck_analysis::ingest::pdf::{PdftoppmRasterizer, TextLayerExtractor};
use labelcheck_analysis::{
    ComplianceEngine, IngestionNormalizer, LabelReviewService, RegulatoryContextCache,
    SessionStore,
};
use labelcheck_common::types::ServiceInfo;
use labelcheck_config::{
    init_tracing, AnalysisLimits, AppConfig, CompletionConfig, PdftoppmConfig,
};
use labelcheck_db::regulatory::pg_repository::PgRegulatoryRepository;
use labelcheck_db::sessions::pg_repository::PgSessionRepository;
use labelcheck_db::users::pg_repository::PgUserRepository;
use labelcheck_db::users::repositories::UserRepository;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LabelReviewService>,
    pub users: Arc<dyn UserRepository>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("labelcheck-api"))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
        ])
}

fn build_router(state: AppState, cors_origins: &[String], max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(analysis::router())
        .merge(sessions::router())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    let limits = AnalysisLimits::from_env().expect("failed to load analysis limits");
    let completion_config = CompletionConfig::from_env().expect("failed to load completion config");
    tracing::info!(service = "labelcheck-api", model = %completion_config.model, "starting");

    let pool = labelcheck_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");

    let regulatory = Arc::new(RegulatoryContextCache::new(
        Arc::new(PgRegulatoryRepository::new(pool.clone())),
        Arc::new(SystemClock),
        limits.regulatory_cache_ttl_secs,
        limits.max_regulatory_context_chars,
    ));
    let normalizer = IngestionNormalizer::new(
        Arc::new(TextLayerExtractor),
        Arc::new(PdftoppmRasterizer::new(
            PdftoppmConfig::from_env().expect("failed to load PDF rasterizer config"),
        )),
        limits.clone(),
    );
    let max_tokens = completion_config.max_tokens;
    let client = AnthropicClient::new(completion_config).expect("failed to build completion client");
    let engine = ComplianceEngine::new(Arc::new(client), max_tokens);
    let store = SessionStore::new(Arc::new(PgSessionRepository::new(pool.clone())));

    let state = AppState {
        service: Arc::new(LabelReviewService::new(
            store, regulatory, normalizer, engine, limits,
        )),
        users: Arc::new(PgUserRepository::new(pool)),
    };

    let app = build_router(state, &config.cors_origins, config.max_upload_bytes);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use labelcheck_analysis::testing::{
        sample_report_json, test_service, InMemoryUserRepository, ScriptedCompletionService,
        PNG_BYTES,
    };
    use labelcheck_common::error::UpstreamError;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "labelcheck-test-boundary";
    const USER: &str = "auth0|alice";
    const OTHER_USER: &str = "auth0|bob";

    struct TestApp {
        router: Router,
        completion: Arc<ScriptedCompletionService>,
    }

    fn test_app() -> TestApp {
        let harness = test_service();
        let users = InMemoryUserRepository::new();
        users.add(USER);
        users.add(OTHER_USER);

        let state = AppState {
            service: Arc::new(harness.service),
            users: Arc::new(users),
        };
        TestApp {
            router: build_router(state, &["http://localhost:3000".to_string()], 1024 * 1024),
            completion: harness.completion,
        }
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File {
            name: &'a str,
            file_name: &'a str,
            content_type: &'a str,
            bytes: &'a [u8],
        },
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, user: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(user) = user {
            builder = builder.header(extractors::USER_HEADER, user);
        }
        builder.body(Body::from(multipart_body(parts))).unwrap()
    }

    fn json_request(uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(extractors::USER_HEADER, user)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(extractors::USER_HEADER, user)
            .body(Body::empty())
            .unwrap()
    }

    fn png_part() -> Part<'static> {
        Part::File {
            name: "image",
            file_name: "label.png",
            content_type: "image/png",
            bytes: PNG_BYTES,
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Uploads a label image and returns the new session id.
    async fn start_session(app: &TestApp) -> Uuid {
        app.completion.push_text(&sample_report_json("non_compliant"));
        let (status, body) = send(
            &app.router,
            multipart_request("/analyze-image", Some(USER), &[png_part()]),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["session_id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn info_names_the_service() {
        let app = test_app();
        let req = Request::builder().uri("/info").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "labelcheck-api");
    }

    #[tokio::test]
    async fn missing_identity_header_is_unauthorized() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            multipart_request("/analyze-image", None, &[png_part()]),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_error");
        assert!(app.completion.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_identity_is_unauthorized() {
        let app = test_app();
        let (status, _) = send(&app.router, get_request("/sessions", "auth0|mallory")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn analyze_image_creates_session_and_returns_report() {
        let app = test_app();
        app.completion.push_text(&sample_report_json("non_compliant"));

        let (status, body) = send(
            &app.router,
            multipart_request("/analyze-image", Some(USER), &[png_part()]),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["iteration_type"], "image_analysis");
        assert_eq!(body["comparison_check"], "not_expected");
        assert_eq!(body["history_saved"], true);
        assert_eq!(body["product_name"], "Oat Crunch Bar");
        assert_eq!(
            body["overall_assessment"]["primary_compliance_status"],
            "non_compliant"
        );
        assert!(body["iteration_id"].is_string());
    }

    #[tokio::test]
    async fn second_image_in_session_is_a_revision() {
        let app = test_app();
        let session_id = start_session(&app).await;
        let session_field = session_id.to_string();

        app.completion.push_text(&sample_report_json("likely_compliant"));
        let (status, body) = send(
            &app.router,
            multipart_request(
                "/analyze-image",
                Some(USER),
                &[Part::Text("session_id", &session_field), png_part()],
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["iteration_type"], "revised_analysis");
        assert_eq!(body["session_id"], session_field);
    }

    #[tokio::test]
    async fn analyze_image_without_file_is_bad_request() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            multipart_request("/analyze-image", Some(USER), &[Part::Text("file_ref", "x")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn analyze_image_rejects_unknown_file_type() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            multipart_request(
                "/analyze-image",
                Some(USER),
                &[Part::File {
                    name: "file",
                    file_name: "label.bin",
                    content_type: "application/octet-stream",
                    bytes: b"\x00\x01\x02\x03not a label",
                }],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE, "{body}");
        assert!(app.completion.requests().is_empty());
    }

    #[tokio::test]
    async fn analyze_text_records_text_check() {
        let app = test_app();
        let session_id = start_session(&app).await;
        let session_field = session_id.to_string();

        app.completion.push_text(&sample_report_json("likely_compliant"));
        let (status, body) = send(
            &app.router,
            multipart_request(
                "/analyze-text",
                Some(USER),
                &[
                    Part::Text("sessionId", &session_field),
                    Part::Text("text", "Ingredients: oats, milk. Contains: Milk."),
                ],
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["iteration_type"], "text_check");
        assert_eq!(body["history_saved"], true);
        assert_eq!(body["comparison_check"], "missing");
    }

    #[tokio::test]
    async fn analyze_text_requires_session() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            multipart_request(
                "/analyze-text",
                Some(USER),
                &[Part::Text("text", "Ingredients: oats")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("session_id"));
    }

    #[tokio::test]
    async fn analyze_text_rejects_text_and_file_together() {
        let app = test_app();
        let session_id = start_session(&app).await;
        let session_field = session_id.to_string();

        let (status, _) = send(
            &app.router,
            multipart_request(
                "/analyze-text",
                Some(USER),
                &[
                    Part::Text("session_id", &session_field),
                    Part::Text("text", "Ingredients: oats"),
                    Part::File {
                        name: "pdf",
                        file_name: "label.pdf",
                        content_type: "application/pdf",
                        bytes: b"%PDF-1.4 minimal",
                    },
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_answers_within_session() {
        let app = test_app();
        let session_id = start_session(&app).await;

        app.completion
            .push_text("Add a Contains statement listing milk.");
        let (status, body) = send(
            &app.router,
            json_request(
                "/chat",
                USER,
                serde_json::json!({
                    "sessionId": session_id,
                    "message": "How do I fix the allergen issue?"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["response"], "Add a Contains statement listing milk.");
        assert_eq!(body["history_saved"], true);
        assert!(body["parent_iteration_id"].is_string());
    }

    #[tokio::test]
    async fn chat_with_malformed_json_is_bad_request() {
        let app = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .header(extractors::USER_HEADER, USER)
            .body(Body::from("{\"message\": "))
            .unwrap();
        let (status, body) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn foreign_session_is_forbidden() {
        let app = test_app();
        let session_id = start_session(&app).await;
        let calls_before = app.completion.requests().len();

        let (status, body) = send(
            &app.router,
            json_request(
                "/chat",
                OTHER_USER,
                serde_json::json!({ "session_id": session_id, "message": "hello" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "authorization_error");
        assert_eq!(app.completion.requests().len(), calls_before);

        let (status, _) = send(
            &app.router,
            get_request(&format!("/sessions/{session_id}"), OTHER_USER),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn sessions_list_and_detail() {
        let app = test_app();
        let session_id = start_session(&app).await;

        let (status, body) = send(&app.router, get_request("/sessions?limit=500", USER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["id"], session_id.to_string());

        let (status, body) = send(
            &app.router,
            get_request(&format!("/sessions/{session_id}"), USER),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let iterations = body["data"]["iterations"].as_array().unwrap();
        assert_eq!(iterations.len(), 1);

        let (status, _) = send(&app.router, get_request("/sessions", OTHER_USER)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            get_request(&format!("/sessions/{}", Uuid::new_v4()), USER),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn upstream_rate_limit_maps_to_service_unavailable() {
        let app = test_app();
        app.completion.push_error(UpstreamError::RateLimited {
            retry_after_secs: Some(12),
        });

        let resp = app
            .router
            .clone()
            .oneshot(multipart_request("/analyze-image", Some(USER), &[png_part()]))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "12");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "upstream_rate_limited");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn unparseable_model_output_is_bad_gateway() {
        let app = test_app();
        app.completion.push_text("I cannot review this label.");

        let (status, body) = send(
            &app.router,
            multipart_request("/analyze-image", Some(USER), &[png_part()]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "response_parse_error");
    }

    async fn assert_validation_envelope(router: &Router, req: Request<Body>) {
        let (status, body) = send(router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["code"], "validation_error");
        assert!(body["error"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn non_multipart_analysis_bodies_use_the_error_envelope() {
        let app = test_app();
        for uri in ["/analyze-image", "/analyze-text"] {
            let req = json_request(uri, USER, serde_json::json!({ "text": "Ingredients: oats" }));
            assert_validation_envelope(&app.router, req).await;
        }
        assert!(app.completion.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_session_id_in_path_uses_the_error_envelope() {
        let app = test_app();
        assert_validation_envelope(&app.router, get_request("/sessions/not-a-uuid", USER)).await;
    }

    #[tokio::test]
    async fn malformed_paging_query_uses_the_error_envelope() {
        let app = test_app();
        assert_validation_envelope(&app.router, get_request("/sessions?limit=abc", USER)).await;
    }
}
