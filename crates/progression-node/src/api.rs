//! HTTP API for the progression engine.

use crate::node::AppState;
use crate::ws::ws_progression_handler;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use progression_engine::{
    lock_reason, ContributionBreakdown, Engagement, EngagementOutcome, ErrorKind, LeaderboardEntry,
    ProgressView, ProgressionStatus, SessionView, UnlockEstimate, VelocityMetrics, VoteReceipt,
    DEFAULT_LEADERBOARD_LIMIT,
};
use progression_tree::TreeNode;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/progression/tree", get(get_tree))
        .route("/api/v1/progression/status", get(get_status))
        .route("/api/v1/progression/progress", get(get_progress))
        .route("/api/v1/progression/session", get(get_session))
        .route("/api/v1/progression/vote", post(cast_vote))
        .route("/api/v1/progression/engagement", post(record_engagement))
        .route("/api/v1/progression/features/:key", get(get_feature))
        .route("/api/v1/progression/items/:name", get(get_item))
        .route("/api/v1/progression/estimate/:node_key", get(get_estimate))
        .route("/api/v1/progression/velocity", get(get_velocity))
        .route("/api/v1/progression/leaderboard", get(get_leaderboard))
        .route("/api/v1/progression/engagement/:actor", get(get_user_engagement))
        // WebSocket for committed progression events
        .route("/api/v1/ws/progression", get(ws_progression_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Engine error rendered as `{ "error", "kind" }` with a matching status.
#[derive(Debug)]
pub struct ApiError(progression_engine::Error);

impl From<progression_engine::Error> for ApiError {
    fn from(e: progression_engine::Error) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = status_for(self.0.kind());
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self.0, "Request failed on storage");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    // Ready once a target or vote exists (or the tree is complete).
    let status = state.engine.status().await;
    if status.unlock_progress.is_some() || status.active_session.is_some() || status.all_nodes_unlocked {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// --- Tree and status ---

async fn get_tree(State(state): State<AppState>) -> Json<Vec<TreeNode>> {
    Json(state.engine.progression_tree().await)
}

async fn get_status(State(state): State<AppState>) -> Json<ProgressionStatus> {
    Json(state.engine.status().await)
}

async fn get_progress(State(state): State<AppState>) -> Json<Option<ProgressView>> {
    Json(state.engine.get_unlock_progress().await)
}

async fn get_session(State(state): State<AppState>) -> Json<Option<SessionView>> {
    Json(state.engine.active_session().await)
}

// --- Voting ---

#[derive(Debug, Deserialize)]
struct VoteRequest {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    platform_id: String,
    /// Account identity; falls back to `platform:platform_id`.
    #[serde(default)]
    username: String,
    option_index: usize,
}

async fn cast_vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<VoteReceipt> {
    let receipt = state
        .engine
        .vote_for_unlock(&req.platform, &req.platform_id, &req.username, req.option_index)
        .await?;
    Ok(Json(receipt))
}

// --- Engagement ---

async fn record_engagement(
    State(state): State<AppState>,
    Json(engagement): Json<Engagement>,
) -> Result<(StatusCode, Json<EngagementOutcome>), ApiError> {
    let outcome = state.engine.record_engagement(engagement).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

async fn get_user_engagement(
    State(state): State<AppState>,
    Path(actor): Path<String>,
) -> Json<ContributionBreakdown> {
    Json(state.engine.user_engagement(&actor).await)
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<LeaderboardEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    Json(state.engine.contribution_leaderboard(limit).await)
}

// --- Gate ---

/// Gate answer for one feature.
#[derive(Debug, Serialize)]
struct FeatureStatus {
    feature: String,
    unlocked: bool,
    /// Names of nodes still blocking the feature.
    required: Vec<String>,
    message: Option<String>,
}

async fn get_feature(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<FeatureStatus> {
    let required = state.engine.required_nodes(&key).await?;
    Ok(Json(FeatureStatus {
        unlocked: required.is_empty(),
        message: lock_reason(&required),
        required: required.into_iter().map(|n| n.name).collect(),
        feature: key,
    }))
}

#[derive(Debug, Serialize)]
struct ItemStatus {
    item: String,
    unlocked: bool,
}

async fn get_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ItemStatus> {
    let unlocked = state.engine.is_item_unlocked(&name).await?;
    Ok(Json(ItemStatus { item: name, unlocked }))
}

// --- Estimation ---

async fn get_estimate(
    State(state): State<AppState>,
    Path(node_key): Path<String>,
) -> ApiResult<UnlockEstimate> {
    Ok(Json(state.engine.estimate_unlock_time(&node_key).await?))
}

#[derive(Debug, Deserialize)]
struct VelocityQuery {
    days: Option<u32>,
}

async fn get_velocity(
    State(state): State<AppState>,
    Query(query): Query<VelocityQuery>,
) -> Json<VelocityMetrics> {
    Json(state.engine.engagement_velocity(query.days.unwrap_or(0)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::NodeState;
    use crate::ws::BroadcastSink;
    use progression_engine::{Engine, Error, ManualClock, MemoryStore};
    use progression_tree::load_tree_str;
    use std::sync::Arc;

    const TREE: &str = r#"{ "nodes": [
        { "key": "forge_1", "name": "Forge", "costs": [100] },
        { "key": "garden", "name": "Garden", "costs": [100] },
        { "key": "forge_2", "name": "Great Forge", "prerequisites": ["forge_1"], "costs": [200],
          "features": ["feature_compost"] },
        { "key": "item_lantern", "name": "Lantern", "costs": [50] }
    ] }"#;

    async fn state() -> AppState {
        let catalog = Arc::new(load_tree_str(TREE).unwrap());
        let sink = BroadcastSink::new();
        let engine = Engine::builder(catalog, Arc::new(MemoryStore::new()))
            .clock(Arc::new(ManualClock::new(0)))
            .event_sink(Arc::new(sink.clone()))
            .open()
            .await
            .unwrap();
        Arc::new(NodeState {
            engine: Arc::new(engine),
            sink,
            config: NodeConfig::from_lookup(|_| None).unwrap(),
        })
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        let status = |e: Error| ApiError(e).into_response().status();
        assert_eq!(
            status(Error::InvalidOption { index: 9, options: 2 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(Error::UnknownIdentity), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::NoEligibleNodes), StatusCode::CONFLICT);
        assert_eq!(
            status(Error::NodeNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(Error::Store(progression_engine::StoreError::Unavailable(
                "down".into()
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn feature_reports_blocking_nodes() {
        let state = state().await;
        let Json(feature) = get_feature(State(state), Path("feature_compost".into()))
            .await
            .unwrap();
        assert!(!feature.unlocked);
        assert_eq!(feature.required, vec!["Forge", "Great Forge"]);
        assert_eq!(
            feature.message.as_deref(),
            Some("locked because of: Forge, Great Forge")
        );
    }

    #[tokio::test]
    async fn ungated_feature_is_open_without_message() {
        let state = state().await;
        let Json(feature) = get_feature(State(state), Path("feature_slots".into()))
            .await
            .unwrap();
        assert!(feature.unlocked);
        assert!(feature.required.is_empty());
        assert_eq!(feature.message, None);
    }

    #[tokio::test]
    async fn item_follows_its_node() {
        let state = state().await;
        let Json(item) = get_item(State(state.clone()), Path("lantern".into()))
            .await
            .unwrap();
        assert!(!item.unlocked);

        state.engine.admin_unlock("item_lantern", 1).await.unwrap();
        let Json(item) = get_item(State(state), Path("lantern".into())).await.unwrap();
        assert!(item.unlocked);
        assert_eq!(item.item, "lantern");
    }

    #[tokio::test]
    async fn vote_twice_is_conflict() {
        let state = state().await;
        let vote = || VoteRequest {
            platform: "discord".into(),
            platform_id: "42".into(),
            username: String::new(),
            option_index: 0,
        };

        let Json(receipt) = cast_vote(State(state.clone()), Json(vote())).await.unwrap();
        assert_eq!(receipt.voter, "discord:42");
        assert_eq!(receipt.votes, 1);

        let err = cast_vote(State(state), Json(vote())).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn engagement_is_accepted_and_banked() {
        let state = state().await;
        let (status, Json(outcome)) = record_engagement(
            State(state.clone()),
            Json(Engagement::new("u1", "command", 5)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(outcome.score, 10);

        let Json(breakdown) = get_user_engagement(State(state), Path("u1".into())).await;
        assert_eq!(breakdown.total_score, 10);
    }

    #[tokio::test]
    async fn estimate_for_untargeted_node_is_not_found() {
        let state = state().await;
        let err = get_estimate(State(state), Path("forge_2".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ready_once_vote_is_open() {
        let state = state().await;
        assert_eq!(ready(State(state)).await, Ok("OK"));
    }
}
