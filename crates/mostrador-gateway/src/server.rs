//! Gateway server: shared state, router and listener

use crate::auth::AuthService;
use crate::routes;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use mostrador_agent::AgentRegistry;
use mostrador_core::config::ServerConfig;
use mostrador_team::TeamRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<AgentRegistry>,
    pub teams: Arc<TeamRegistry>,
    pub auth: Arc<AuthService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(agents: AgentRegistry, teams: TeamRegistry, auth: AuthService) -> Self {
        Self {
            agents: Arc::new(agents),
            teams: Arc::new(teams),
            auth: Arc::new(auth),
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/agents", get(routes::list_agents))
        .route("/agents/{agent_id}/runs", post(routes::run_agent))
        .route(
            "/agents/{agent_id}/sessions/{session_id}/turns",
            get(routes::session_turns),
        )
        .route("/teams", get(routes::list_teams))
        .route("/teams/{team_id}/runs", post(routes::run_team))
        .route("/auth/login", post(routes::login))
        .route("/auth/login-by-token", get(routes::login_by_token))
        .layer(cors_layer(&server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Empty list or `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub async fn start_gateway(state: AppState, server: &ServerConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", server.bind, server.port).parse()?;
    let app = router(state.clone(), server);

    info!("Mostrador gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Agents: {}", state.agents.len());
    info!("  Teams: {}", state.teams.len());
    if server.cors_origins.is_empty() {
        info!("  CORS: any origin");
    } else {
        info!("  CORS: {}", server.cors_origins.join(", "));
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
