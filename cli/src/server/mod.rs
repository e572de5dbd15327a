//! HTTP surface: streaming chat, cancellation and tool listing

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ServerError;
pub use state::AppState;

use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

/// Build the application router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/chat/stream", post(routes::chat::stream_chat))
        .route(
            "/api/chat/tool-calls/cancel",
            post(routes::cancel::cancel_tool_call),
        )
        .route(
            "/api/chat/turns/{turn_id}/cancel",
            post(routes::cancel::cancel_turn),
        )
        .route("/api/tools", get(routes::tools::list_tools))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(routes::conversations::list_messages),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until ctrl-c
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures::{FutureExt, StreamExt};
    use loomchat_core::error::ToolError;
    use loomchat_core::llm::{
        ChatRequest, FinishReason, LlmClient, LlmStream, LlmStreamChunk,
    };
    use loomchat_core::tools::{ExecutionHandle, ExecutionLimits};
    use loomchat_core::{
        InMemoryMessageRepository, MessageStatus, Orchestrator, OrchestratorConfig,
        ToolExecutionTracker, ToolRegistry,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Answers every request with the same canned chunks
    struct CannedClient {
        chunks: Vec<LlmStreamChunk>,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn chat_completion_stream(
            &self,
            _request: ChatRequest,
        ) -> loomchat_core::Result<LlmStream> {
            let chunks = self.chunks.clone().into_iter().map(Ok);
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        fn model_name(&self) -> &str {
            "canned"
        }

        fn provider_name(&self) -> &str {
            "test"
        }
    }

    fn test_state() -> AppState {
        let client = CannedClient {
            chunks: vec![
                LlmStreamChunk::answer("Hello there"),
                LlmStreamChunk::finish(FinishReason::Stop),
            ],
        };
        let registry = crate::tools::create_tool_registry(&Default::default())
            .unwrap()
            .freeze();
        let orchestrator = Orchestrator::new(
            Arc::new(client),
            registry,
            Arc::new(ToolExecutionTracker::new()),
            Arc::new(InMemoryMessageRepository::new()),
            OrchestratorConfig::default(),
        );

        let tokens = HashMap::from([
            ("alice-token".to_string(), "alice".to_string()),
            ("bob-token".to_string(), "bob".to_string()),
        ]);
        AppState::new(Arc::new(orchestrator), tokens)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let response = router(test_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_missing_and_unknown_tokens_are_rejected() {
        let app = router(test_state());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/chat/tool-calls/cancel",
                None,
                json!({"toolCallId": "call_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error_code"], "AUTH_MISSING_TOKEN");

        let response = app
            .oneshot(post_json(
                "/api/chat/tool-calls/cancel",
                Some("nope"),
                json!({"toolCallId": "call_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error_code"], "AUTH_INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_cancel_validates_tool_call_id() {
        let app = router(test_state());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/chat/tool-calls/cancel",
                Some("alice-token"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error_code"],
            "VALID_MISSING_REQUIRED_FIELD"
        );

        let response = app
            .oneshot(post_json(
                "/api/chat/tool-calls/cancel",
                Some("alice-token"),
                json!({"toolCallId": 42}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "VALID_INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_cancel_unknown_call_reports_failure() {
        let response = router(test_state())
            .oneshot(post_json(
                "/api/chat/tool-calls/cancel",
                Some("alice-token"),
                json!({"toolCallId": "call_missing"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": false}));
    }

    fn start_waiting_call(state: &AppState, turn_id: &str, call_id: &str) -> ExecutionHandle {
        state
            .orchestrator()
            .tracker()
            .start(
                turn_id,
                call_id,
                "slow",
                &CancellationToken::new(),
                ExecutionLimits {
                    timeout: Duration::from_secs(60),
                    cancel_grace: Duration::from_secs(1),
                },
                |cancel| {
                    async move {
                        cancel.cancelled().await;
                        Err(ToolError::Cancelled {
                            name: "slow".to_string(),
                        })
                    }
                    .boxed()
                },
            )
            .unwrap()
    }

    fn cancel_call(token: &str, call_id: &str) -> Request<Body> {
        post_json(
            "/api/chat/tool-calls/cancel",
            Some(token),
            json!({ "toolCallId": call_id }),
        )
    }

    #[tokio::test]
    async fn test_cancel_running_call_once() {
        let state = test_state();
        state
            .turns()
            .register("turn-a", "alice", CancellationToken::new());
        let handle = start_waiting_call(&state, "turn-a", "call_1");

        let app = router(state);
        let first = app.clone().oneshot(cancel_call("alice-token", "call_1")).await.unwrap();
        assert_eq!(body_json(first).await, json!({"success": true}));

        let settled = handle.wait().await;
        assert!(settled.is_cancelled());

        let second = app.oneshot(cancel_call("alice-token", "call_1")).await.unwrap();
        assert_eq!(body_json(second).await, json!({"success": false}));
    }

    #[tokio::test]
    async fn test_cannot_cancel_another_users_call() {
        let state = test_state();
        state
            .turns()
            .register("turn-a", "alice", CancellationToken::new());
        state.turns().register("turn-b", "bob", CancellationToken::new());
        let handle = start_waiting_call(&state, "turn-a", "call_1");

        let app = router(state.clone());
        let response = app.oneshot(cancel_call("bob-token", "call_1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": false}));

        let tracker = Arc::clone(state.orchestrator().tracker());
        assert!(tracker.is_running("turn-a", "call_1"));
        assert!(tracker.cancel("turn-a", "call_1"));
        assert!(handle.wait().await.is_cancelled());
    }

    /// Answers once and then keeps the stream open
    struct StallingClient;

    #[async_trait]
    impl LlmClient for StallingClient {
        async fn chat_completion_stream(
            &self,
            _request: ChatRequest,
        ) -> loomchat_core::Result<LlmStream> {
            let first = futures::stream::iter(vec![Ok(LlmStreamChunk::answer("Thinking about"))]);
            Ok(Box::pin(first.chain(futures::stream::pending())))
        }

        fn model_name(&self) -> &str {
            "stalling"
        }

        fn provider_name(&self) -> &str {
            "test"
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_turn() {
        let orchestrator = Orchestrator::new(
            Arc::new(StallingClient),
            ToolRegistry::new().freeze(),
            Arc::new(ToolExecutionTracker::new()),
            Arc::new(InMemoryMessageRepository::new()),
            OrchestratorConfig::default(),
        );
        let tokens = HashMap::from([("alice-token".to_string(), "alice".to_string())]);
        let state = AppState::new(Arc::new(orchestrator), tokens);

        let response = router(state.clone())
            .oneshot(post_json(
                "/api/chat/stream",
                Some("alice-token"),
                json!({"conversation_id": "conv-1", "content": "Hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.turns().len(), 1);

        // Dropping the body is what a closed browser tab looks like
        drop(response);

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.turns().len() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let messages = state
            .orchestrator()
            .repository()
            .list_by_conversation("conv-1")
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_chat_stream_emits_events_and_persists() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/chat/stream",
                Some("alice-token"),
                json!({"conversation_id": "conv-1", "content": "Hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let text = body_text(response).await;
        let connected = text.find("event: connected").unwrap();
        let answer = text.find("event: answer").unwrap();
        let done = text.find("event: done").unwrap();
        assert!(connected < answer && answer < done);
        assert!(text.contains("Hello there"));

        let response = app
            .clone()
            .oneshot(get_with("/api/conversations/conv-1/messages", "alice-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let messages = body_json(response).await;
        assert_eq!(messages.as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["content"], "Hello there");
        assert_eq!(messages[1]["status"], "complete");

        // Another user cannot read or continue the conversation
        let response = app
            .clone()
            .oneshot(get_with("/api/conversations/conv-1/messages", "bob-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_json(
                "/api/chat/stream",
                Some("bob-token"),
                json!({"conversation_id": "conv-1", "content": "Hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.turns().len(), 0);
    }

    #[tokio::test]
    async fn test_chat_requires_content() {
        let response = router(test_state())
            .oneshot(post_json(
                "/api/chat/stream",
                Some("alice-token"),
                json!({"content": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_unknown_turn() {
        let response = router(test_state())
            .oneshot(post_json(
                "/api/chat/turns/turn-x/cancel",
                Some("alice-token"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"success": false}));
    }

    #[tokio::test]
    async fn test_list_tools() {
        let response = router(test_state())
            .oneshot(get_with("/api/tools", "alice-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tools = body_json(response).await;
        assert!(tools
            .as_array()
            .unwrap()
            .iter()
            .any(|tool| tool["function"]["name"] == "current_time"));
    }
}
