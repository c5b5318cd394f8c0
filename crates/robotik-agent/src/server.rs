//! HTTP surface of the learning agent.
//!
//! | Route | Auth | Body / query | Reply |
//! |---|---|---|---|
//! | `GET /v1/health` | no | – | `{status}` |
//! | `GET /v1/learn/next` | PSK | `?context=<json>` | `{theta_id, theta, skill, source}` |
//! | `POST /v1/learn/report` | PSK | [`ReportRequest`] | `{status}` |
//! | `GET /v1/learn/stats` | PSK | `?context=<json>` | `{trials, success_rate, best, latest}` |
//! | `POST /v1/chess/move` | PSK | `{fen}` | `{uci, source}` |
//!
//! Handlers receive the shared [`AppState`] built once at startup. Store and
//! optimizer work is blocking, so it runs on the blocking pool.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use robotik_memory::{BestTheta, StoreError, ThetaSet, Trial, TrialStore};
use robotik_types::{
    ChessMoveRequest, ChessMoveResponse, Context, NextThetaResponse, ReportRequest,
    StatusResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::PskAuth;
use crate::chess::{ChessEngine, ChessError};
use crate::config::AgentConfig;
use crate::optimizer::Optimizer;

/// Skill the agent currently trains.
const DEFAULT_SKILL: &str = "pick";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chess(#[from] ChessError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Chess(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("opening trial store: {0}")]
    Store(#[from] StoreError),
    #[error("chess engine setup: {0}")]
    Chess(#[from] ChessError),
    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Application context
// ─────────────────────────────────────────────────────────────────────────────

pub struct AppState {
    pub auth: PskAuth,
    pub store: Arc<TrialStore>,
    pub optimizer: Arc<Optimizer>,
    pub chess: ChessEngine,
}

impl AppState {
    pub fn new(config: &AgentConfig, store: TrialStore) -> Result<Self, AgentError> {
        Ok(Self {
            auth: PskAuth::new(&config.auth),
            store: Arc::new(store),
            optimizer: Arc::new(Optimizer::new(config.optimizer, config.theta_clamps.clone())),
            chess: ChessEngine::new(config.chess.clone())?,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/learn/next", get(learn_next))
        .route("/v1/learn/report", post(learn_report))
        .route("/v1/learn/stats", get(learn_stats))
        .route("/v1/chess/move", post(chess_move))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_psk));
    Router::new()
        .route("/v1/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Open the store, bind and serve until Ctrl-C.
pub async fn serve(config: AgentConfig) -> Result<(), AgentError> {
    let store = TrialStore::open(&config.database.path)?;
    let state = Arc::new(AppState::new(&config, store)?);
    if !state.auth.is_enabled() {
        warn!("no PSK configured, learning routes are unauthenticated");
    }
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, db = %config.database.path.display(), "agent listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn require_psk(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.auth.verify(req.headers()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

#[derive(Debug, Deserialize)]
struct ContextQuery {
    context: Option<String>,
}

async fn learn_next(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<NextThetaResponse>, ApiError> {
    let context = Context::from_query(query.context.as_deref());
    let proposal = run_blocking(move || {
        Ok(state.optimizer.next_theta(&context, &state.store)?)
    })
    .await?;
    Ok(Json(NextThetaResponse {
        theta_id: proposal.theta_id,
        theta: proposal.theta,
        skill: DEFAULT_SKILL.to_string(),
        source: Some(proposal.source),
    }))
}

async fn learn_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ReportRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    run_blocking(move || {
        let ReportRequest {
            theta_id,
            context,
            theta,
            outcome,
            metrics,
            failure_code,
        } = report;
        let trial = Trial::new(context, theta_id, theta, outcome, metrics, failure_code);
        let perf = state.store.record_trial(&trial)?;
        state.optimizer.report(&trial.context, &trial.theta, outcome);
        info!(theta_id = %trial.theta_id, outcome, failure_code = ?trial.failure_code,
            success_rate = perf.success_rate, "trial recorded");
        Ok(())
    })
    .await?;
    Ok(Json(StatusResponse::ok()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub trials: u64,
    pub success_rate: f64,
    pub best: Option<BestTheta>,
    pub latest: Option<ThetaSet>,
}

async fn learn_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let context = Context::from_query(query.context.as_deref());
    let stats = run_blocking(move || {
        let totals = state.store.get_trial_stats(&context)?;
        Ok(StatsResponse {
            trials: totals.trials,
            success_rate: totals.success_rate,
            best: state.store.get_best_theta(&context)?,
            latest: state.store.get_latest_theta(&context)?,
        })
    })
    .await?;
    Ok(Json(stats))
}

async fn chess_move(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChessMoveRequest>,
) -> Result<Json<ChessMoveResponse>, ApiError> {
    let (uci, source) = state.chess.best_move(&req.fen).await?;
    Ok(Json(ChessMoveResponse { uci, source }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request as HttpRequest;
    use robotik_types::default_theta_clamps;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn state(psk: &str) -> Arc<AppState> {
        let mut cfg = AgentConfig::default();
        cfg.auth.psk = psk.into();
        cfg.optimizer.exploit_after = 2;
        cfg.theta_clamps = default_theta_clamps();
        Arc::new(AppState::new(&cfg, TrialStore::open_in_memory().unwrap()).unwrap())
    }

    fn context_query(square: &str) -> String {
        let key = Context::for_square(square.parse().unwrap()).canonical_key();
        let encoded: String = key
            .bytes()
            .map(|b| match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => (b as char).to_string(),
                _ => format!("%{b:02X}"),
            })
            .collect();
        format!("/v1/learn/next?context={encoded}")
    }

    async fn send(app: Router, req: HttpRequest<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str, psk: Option<&str>) -> HttpRequest<Body> {
        let mut b = HttpRequest::get(uri);
        if let Some(psk) = psk {
            b = b.header("X-PSK", psk);
        }
        b.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, psk: Option<&str>, body: &Value) -> HttpRequest<Body> {
        let mut b = HttpRequest::post(uri).header("content-type", "application/json");
        if let Some(psk) = psk {
            b = b.header("X-PSK", psk);
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let (status, body) = send(router(state("k")), get("/v1/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_psk_is_rejected() {
        let app = router(state("k"));
        let (status, body) = send(app.clone(), get(&context_query("a2"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "unauthorized");

        let (status, _) = send(app, get(&context_query("a2"), Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_psk_disables_auth() {
        let (status, body) = send(router(state("")), get(&context_query("a2"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skill"], "pick");
        assert_eq!(body["source"], "sampled");
    }

    #[tokio::test]
    async fn report_then_exploit_best() {
        let st = state("k");
        let app = router(st.clone());

        let (status, next) = send(app.clone(), get(&context_query("a2"), Some("k"))).await;
        assert_eq!(status, StatusCode::OK);
        let theta_id = next["theta_id"].as_str().unwrap().to_string();

        for outcome in [true, false] {
            let report = json!({
                "theta_id": theta_id,
                // piece_class omitted: must land on the same key as the query.
                "context": {"square": "a2", "region_id": "r0"},
                "theta": next["theta"],
                "outcome": outcome,
                "metrics": {"failure_code": if outcome { Value::Null } else { json!("VISION_LOW_CONF") }},
                "failure_code": if outcome { Value::Null } else { json!("VISION_LOW_CONF") },
            });
            let (status, body) = send(app.clone(), post_json("/v1/learn/report", Some("k"), &report)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }

        let (_, best) = send(app.clone(), get(&context_query("a2"), Some("k"))).await;
        assert_eq!(best["source"], "best");
        assert_eq!(best["theta_id"], theta_id);

        let stats_uri = context_query("a2").replace("/next", "/stats");
        let (status, stats) = send(app, get(&stats_uri, Some("k"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["trials"], 2);
        assert_eq!(stats["success_rate"], 0.5);
        assert_eq!(stats["best"]["theta_id"], theta_id);
        assert_eq!(stats["latest"]["theta_id"], theta_id);

        let ctx = Context::for_square("a2".parse().unwrap());
        assert_eq!(st.optimizer.state(&ctx).unwrap().trials, 2);
    }

    #[tokio::test]
    async fn malformed_report_is_client_error() {
        let (status, _) = send(
            router(state("")),
            post_json("/v1/learn/report", None, &json!({"theta_id": 5})),
        )
        .await;
        assert!(status.is_client_error());
    }
}
