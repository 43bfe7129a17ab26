use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use straylight_agent::runtime::AgentRuntime;
use straylight_agent::session::{InMemorySessionStore, SessionId};
use straylight_core::tool::ToolDescriptor;
use straylight_mcp::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<InMemorySessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/tools", get(list_tools))
        .route("/v1/turn", post(turn))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    providers: Vec<ProviderStatus>,
    tools: usize,
}

#[derive(Debug, Serialize)]
struct ProviderStatus {
    name: String,
    state: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = state
        .orchestrator
        .provider_states()
        .into_iter()
        .map(|(name, provider_state)| ProviderStatus {
            name,
            state: provider_state.to_string(),
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        providers,
        tools: state.orchestrator.registry().len(),
    })
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.orchestrator.registry().catalog().to_vec())
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    session_id: Option<SessionId>,
    message: String,
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    session_id: SessionId,
    response: String,
    tool_calls: u32,
    tools_used: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message must not be empty".into(),
            }),
        ));
    }

    let session_id = request.session_id.unwrap_or_else(SessionId::new_v4);
    match state
        .runtime
        .execute_turn(&state.sessions, session_id, request.message)
        .await
    {
        Ok(outcome) => Ok(Json(TurnResponse {
            session_id,
            response: outcome.text,
            tool_calls: outcome.tool_calls,
            tools_used: outcome.tools_used,
        })),
        Err(err) => {
            // One generic failure for the caller; details stay in the log.
            error!(session_id = %session_id, error = %err, "turn failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "processing failed".into(),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use straylight_agent::llm::{MockModelClient, ModelResponse};
    use straylight_agent::runtime::AgentOptions;

    async fn spawn_app(responses: Vec<ModelResponse>) -> String {
        let orchestrator = Arc::new(Orchestrator::connect(&[]).await);
        let model = Arc::new(MockModelClient::new(responses));
        let runtime = Arc::new(AgentRuntime::new(
            model,
            orchestrator.broker(),
            AgentOptions::new(5, "test prompt"),
        ));
        let state = AppState {
            runtime,
            sessions: Arc::new(InMemorySessionStore::new()),
            orchestrator,
            started_at: Instant::now(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, api_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn healthz_reports_catalog_size() {
        let base = spawn_app(vec![]).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/healthz"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tools"], 0);
    }

    #[tokio::test]
    async fn turn_round_trips_through_the_runtime() {
        let base = spawn_app(vec![ModelResponse {
            text: Some("the answer".into()),
            tool_calls: vec![],
        }])
        .await;

        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .post(format!("{base}/v1/turn"))
            .json(&serde_json::json!({"message": "a question"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["response"], "the answer");
        assert_eq!(body["tools_used"], false);
        assert!(body["session_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let base = spawn_app(vec![]).await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/v1/turn"))
            .json(&serde_json::json!({"message": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}
