//! Component Framework and Handshake routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use grace_core::{
    ComponentKind, ComponentRecord, ComponentStatus, Event, HandshakeRequest, ManifestQuery,
    ManifestStats, RouteRule, TrustLevel,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/clarity/components", get(snapshot))
        .route("/clarity/events", get(events))
        .route("/clarity/mesh", get(mesh_routes))
        .route("/components/register", post(register))
        .route("/components/handshake", post(handshake))
        .route("/components/stats", get(stats))
        .route("/components", get(query))
        .route("/components/:id", get(get_component))
        .route("/components/:id/transition", post(transition))
        .route("/components/:id/heartbeat", post(heartbeat))
        .route("/components/:id/trust", post(set_trust))
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Json<Vec<ComponentRecord>> {
    Json(state.manifest.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: usize,
    pub event_type: Option<String>,
}

fn default_events_limit() -> usize {
    100
}

async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<Event>> {
    Json(state.mesh.recent(query.limit, query.event_type.as_deref()).await)
}

async fn mesh_routes(State(state): State<Arc<AppState>>) -> Json<Vec<RouteRule>> {
    Json(state.mesh.routes())
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub component_id: String,
    pub component_type: String,
    pub version: String,
    #[serde(default = "default_trust")]
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub role_tags: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub expected_metrics: Vec<String>,
    #[serde(default = "default_kind")]
    pub kind: ComponentKind,
}

fn default_trust() -> TrustLevel {
    TrustLevel::Untrusted
}

fn default_kind() -> ComponentKind {
    ComponentKind::Generic
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Json<ComponentRecord> {
    Json(state.manifest.register(
        body.component_id,
        body.component_type,
        body.version,
        body.trust_level,
        body.role_tags,
        body.capabilities,
        body.expected_metrics,
        body.kind,
    ))
}

async fn handshake(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HandshakeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let update_id = state.handshake.initiate(body).await?;
    Ok(Json(serde_json::json!({ "update_id": update_id })))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<ManifestStats> {
    Json(state.manifest.stats())
}

#[derive(Debug, Deserialize, Default)]
pub struct ComponentQuery {
    pub trust_at_least: Option<TrustLevel>,
    pub tag: Option<String>,
    pub component_type: Option<String>,
    pub status: Option<ComponentStatus>,
}

async fn query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ComponentQuery>,
) -> Json<Vec<ComponentRecord>> {
    Json(state.manifest.query(&ManifestQuery {
        trust_at_least: query.trust_at_least,
        tag: query.tag,
        component_type: query.component_type,
        status: query.status,
    }))
}

async fn get_component(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ComponentRecord>, ApiError> {
    state
        .manifest
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("component not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub status: ComponentStatus,
}

async fn transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<ComponentRecord>, ApiError> {
    Ok(Json(state.manifest.transition(&id, body.status).await?))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manifest.record_heartbeat(&id)?;
    Ok(Json(serde_json::json!({ "component_id": id, "status": "heartbeat_recorded" })))
}

#[derive(Debug, Deserialize)]
pub struct TrustBody {
    pub trust_level: TrustLevel,
}

async fn set_trust(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TrustBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manifest.set_trust(&id, body.trust_level)?;
    Ok(Json(serde_json::json!({ "component_id": id, "trust_level": body.trust_level })))
}
