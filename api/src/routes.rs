use axum::{
    routing::{any, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState, webhook_base_path: &str) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trigger_routes = Router::new()
        .route(
            "/api/flows/:flow_id/triggers",
            post(handlers::triggers::register_trigger),
        )
        .route("/api/triggers", get(handlers::triggers::list_triggers))
        .route(
            "/api/triggers/:id",
            get(handlers::triggers::get_trigger)
                .put(handlers::triggers::update_trigger)
                .delete(handlers::triggers::delete_trigger),
        )
        .route(
            "/api/triggers/:id/enable",
            put(handlers::triggers::enable_trigger),
        )
        .route(
            "/api/triggers/:id/disable",
            put(handlers::triggers::disable_trigger),
        )
        .route(
            "/api/triggers/:id/test",
            post(handlers::triggers::test_trigger),
        )
        .route(
            "/api/triggers/:id/status",
            get(handlers::triggers::get_trigger_status),
        )
        .route(
            "/api/triggers/:id/executions",
            get(handlers::executions::list_executions),
        )
        .route(
            "/api/triggers/:id/next-runs",
            get(handlers::triggers::get_next_runs),
        );

    // Every method reaches the webhook handler; method checks are per trigger
    let webhook_routes = Router::new().route(
        &format!("{}/:trigger_id", webhook_base_path.trim_end_matches('/')),
        any(handlers::webhooks::handle_webhook),
    );

    let system_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    // Combine all routes
    Router::new()
        .merge(trigger_routes)
        .merge(webhook_routes)
        .merge(system_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use common::config::EngineConfig;
    use common::db::InMemoryStore;
    use common::errors::{GatewayError, MailError};
    use common::gateway::FlowGateway;
    use common::models::Trigger;
    use common::processors::email::{EmailConfig, MailboxClient, MailboxConnector};
    use common::TriggerService;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct AcceptingGateway;

    #[async_trait]
    impl FlowGateway for AcceptingGateway {
        async fn execute_flow_from_trigger(
            &self,
            _trigger: &Trigger,
            _payload: &Value,
        ) -> Result<String, GatewayError> {
            Ok("flow-exec-42".to_string())
        }
    }

    struct NoMail;

    #[async_trait]
    impl MailboxConnector for NoMail {
        async fn connect(
            &self,
            _config: &EmailConfig,
        ) -> Result<Box<dyn MailboxClient>, MailError> {
            Err(MailError::Protocol("no mail in tests".to_string()))
        }
    }

    async fn test_app() -> (Router, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let flow_id = Uuid::new_v4();
        store.add_flow(flow_id).await;

        let service = TriggerService::new(
            store.clone(),
            store,
            Arc::new(AcceptingGateway),
            &EngineConfig::default(),
            Arc::new(NoMail),
        );
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        (create_router(AppState::new(service, metrics), "/webhook"), flow_id)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_webhook(app: &Router, flow_id: Uuid, config: Value) -> Uuid {
        let (status, body) = send(
            app,
            json_request(
                Method::POST,
                &format!("/api/flows/{}/triggers", flow_id),
                json!({"trigger_type": "webhook", "name": "orders", "config": config}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_token_webhook_over_http() {
        let (app, flow_id) = test_app().await;
        let trigger_id = create_webhook(
            &app,
            flow_id,
            json!({"method": "POST", "authType": "token", "token": "secret123"}),
        )
        .await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhook/{}", trigger_id))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer secret123")
            .body(Body::from(r#"{"order_id": 42}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["data"]["execution_id"].as_str().unwrap().is_empty());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhook/{}", trigger_id))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::from(r#"{"order_id": 42}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (_, body) = send(
            &app,
            Request::get(format!("/api/triggers/{}/executions", trigger_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_errors() {
        let (app, flow_id) = test_app().await;
        let trigger_id = create_webhook(&app, flow_id, json!({"method": "POST"})).await;

        let (status, _) = send(
            &app,
            Request::get(format!("/webhook/{}", trigger_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(
            &app,
            json_request(Method::POST, &format!("/webhook/{}", Uuid::new_v4()), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/webhook/not-a-uuid", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            Request::post(format!("/webhook/{}", trigger_id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_payload");
    }

    #[tokio::test]
    async fn test_trigger_crud_flow() {
        let (app, flow_id) = test_app().await;
        let trigger_id = create_webhook(&app, flow_id, json!({})).await;
        let base = format!("/api/triggers/{}", trigger_id);

        let (status, body) = send(
            &app,
            json_request(Method::PUT, &base, json!({"name": "renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "renamed");

        // The type is not patchable
        let (status, _) = send(
            &app,
            json_request(Method::PUT, &base, json!({"trigger_type": "schedule"})),
        )
        .await;
        assert!(status.is_client_error());

        let (status, body) = send(
            &app,
            Request::put(format!("{}/disable", base)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], false);

        let (status, body) = send(
            &app,
            json_request(Method::POST, &format!("{}/test", base), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "trigger_disabled");

        send(
            &app,
            Request::put(format!("{}/enable", base)).body(Body::empty()).unwrap(),
        )
        .await;
        let (status, body) = send(
            &app,
            json_request(Method::POST, &format!("{}/test", base), json!({"probe": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["execution_id"].is_string());

        let (_, body) = send(
            &app,
            Request::get(format!("{}/status", base)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["data"]["health"], "armed");
        assert_eq!(body["data"]["fire_count"], 1);

        let (_, body) = send(
            &app,
            Request::get(format!("/api/triggers?flow_id={}&trigger_type=webhook", flow_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, Request::delete(&base).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Request::delete(&base).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Request::get(&base).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_next_runs_preview() {
        let (app, flow_id) = test_app().await;
        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/flows/{}/triggers", flow_id),
                json!({
                    "trigger_type": "schedule",
                    "name": "every five",
                    "config": {"scheduleType": "cron", "cronExpression": "*/5 * * * *"}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Request::get(format!("/api/triggers/{}/next-runs?count=4", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["next_runs"].as_array().unwrap().len(), 4);

        let (status, _) = send(
            &app,
            Request::get(format!("/api/triggers/{}/next-runs?count=0", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_for_unknown_flow() {
        let (app, _) = test_app().await;
        let (status, _) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/flows/{}/triggers", Uuid::new_v4()),
                json!({"trigger_type": "webhook", "name": "orphan"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["armed_triggers"], 0);

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
