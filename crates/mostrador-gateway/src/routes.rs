//! HTTP handlers

use crate::auth::LoginRequest;
use crate::error::ApiError;
use crate::server::AppState;
use crate::stream::ndjson_response;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use mostrador_agent::{AgentInfo, RunRequest};
use mostrador_core::{Error, SessionKey, Turn};
use mostrador_team::TeamInfo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub session_id: String,
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_intermediate_steps: bool,
}

impl RunBody {
    fn into_request(self) -> Result<RunRequest, Error> {
        if self.session_id.trim().is_empty() || self.user_id.trim().is_empty() {
            return Err(Error::Input("session_id and user_id are required".into()));
        }
        Ok(RunRequest::new(self.session_id, self.user_id, self.message)
            .with_intermediate_steps(self.stream_intermediate_steps))
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.agents.len(),
        "teams": state.teams.len(),
        "uptime_s": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(state.agents.list())
}

pub async fn run_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    payload: Result<Json<RunBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let agent = state.agents.require(&agent_id)?;
    let stream = body.stream;
    let request = body.into_request()?;

    if stream {
        return Ok(ndjson_response(move |tx, cancel| async move {
            let _ = agent.run(request, Some(tx), cancel).await;
        }));
    }
    let outcome = agent.run(request, None, CancellationToken::new()).await?;
    Ok(Json(outcome).into_response())
}

pub async fn session_turns(
    State(state): State<AppState>,
    Path((agent_id, session_id)): Path<(String, String)>,
) -> Result<Json<Vec<Turn>>, ApiError> {
    let agent = state.agents.require(&agent_id)?;
    let turns = agent.transcript(&SessionKey::new(session_id)).await?;
    Ok(Json(turns))
}

pub async fn list_teams(State(state): State<AppState>) -> Json<Vec<TeamInfo>> {
    Json(state.teams.list())
}

pub async fn run_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    payload: Result<Json<RunBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let team = state.teams.require(&team_id)?;
    let stream = body.stream;
    let request = body.into_request()?;

    if stream {
        return Ok(ndjson_response(move |tx, cancel| async move {
            let _ = team.route(request, Some(tx), cancel).await;
        }));
    }
    let outcome = team.route(request, None, CancellationToken::new()).await?;
    Ok(Json(outcome).into_response())
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(credentials) = payload?;
    Ok(Json(state.auth.login(&credentials).await?))
}

pub async fn login_by_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::Input("token is required".into()))?;
    Ok(Json(state.auth.login_by_token(&token, Utc::now())?))
}
