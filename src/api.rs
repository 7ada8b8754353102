use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bail_server;
use crate::error::ServerResult;
use crate::inference::TextGenerator;

fn default_max_tokens() -> usize {
    50
}

#[derive(Deserialize, Debug)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    /// The single model instance every request shares. Generation needs
    /// exclusive access, so concurrent requests serialize here.
    pub generator: Arc<Mutex<dyn TextGenerator>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handle_chat_request))
        .route("/health", get(handle_health_request))
        .with_state(state)
}

#[axum_macros::debug_handler]
async fn handle_chat_request(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> ServerResult<(StatusCode, Json<ChatResponse>)> {
    let response = {
        let mut generator = match state.generator.lock() {
            Ok(generator) => generator,
            Err(_) => bail_server!(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Model worker poisoned by an earlier panic"
            ),
        };
        generator.generate(&req.prompt, req.max_tokens)?
    };
    info!(max_tokens = req.max_tokens, "chat request served");

    Ok((StatusCode::OK, Json(ChatResponse { response })))
}

#[axum_macros::debug_handler]
async fn handle_health_request() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;

    struct EchoGenerator;

    impl TextGenerator for EchoGenerator {
        fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> anyhow::Result<String> {
            Ok(format!("{prompt} [{max_new_tokens} tokens]"))
        }
    }

    struct FailingGenerator;

    impl TextGenerator for FailingGenerator {
        fn generate(&mut self, _prompt: &str, _max_new_tokens: usize) -> anyhow::Result<String> {
            Err(anyhow!("weights went missing"))
        }
    }

    fn echo_app() -> Router {
        router(AppState {
            generator: Arc::new(Mutex::new(EchoGenerator)),
        })
    }

    fn post_chat(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_generated_text() {
        let request = post_chat(json!({"prompt": "Hello world", "max_tokens": 10}));
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"response": "Hello world [10 tokens]"})
        );
    }

    #[tokio::test]
    async fn omitted_max_tokens_defaults_to_fifty() {
        let request = post_chat(json!({"prompt": "Hello world"}));
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"response": "Hello world [50 tokens]"})
        );
    }

    #[tokio::test]
    async fn identical_requests_get_identical_responses() {
        let app = echo_app();
        let body = json!({"prompt": "same seed", "max_tokens": 7});

        let first = app.clone().oneshot(post_chat(body.clone())).await.unwrap();
        let second = app.oneshot(post_chat(body)).await.unwrap();

        assert_eq!(body_json(first).await, body_json(second).await);
    }

    #[tokio::test]
    async fn missing_prompt_is_a_client_error() {
        let request = post_chat(json!({"max_tokens": 10}));
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn wrong_typed_prompt_is_a_client_error() {
        let request = post_chat(json!({"prompt": 17, "max_tokens": 10}));
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn non_integer_max_tokens_is_a_client_error() {
        let request = post_chat(json!({"prompt": "Hello world", "max_tokens": "ten"}));
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generator_failure_surfaces_as_internal_error() {
        let app = router(AppState {
            generator: Arc::new(Mutex::new(FailingGenerator)),
        });
        let request = post_chat(json!({"prompt": "Hello world", "max_tokens": 10}));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "weights went missing");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = echo_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }
}
