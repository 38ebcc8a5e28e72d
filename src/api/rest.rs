//! Read-only dashboard API.

use crate::config::ApiConfig;
use crate::error::Error;
use crate::intelligence::{IncidentFilter, IncidentStatistics, IncidentSummary, IncidentView, IntelligenceService};
use crate::models::{Actor, AlertRecord, HotspotCluster, OperationalIssue};
use crate::security::TokenVerifier;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

const DEFAULT_HOTSPOT_LIMIT: usize = 20;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub intelligence: Arc<IntelligenceService>,
    pub verifier: Arc<TokenVerifier>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    fn unauthorized(message: &str) -> Self {
        ApiError {
            message: message.to_string(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::TransitionRejected { .. } => StatusCode::CONFLICT,
            Error::StorageUnavailable(_) | Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Resolve the caller from the bearer token
fn actor(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    let token = TokenVerifier::bearer(value).ok_or_else(|| ApiError::unauthorized("expected a bearer token"))?;
    state.verifier.verify(token).map_err(|e| {
        warn!("Rejected dashboard token: {}", e);
        ApiError::unauthorized(&e.to_string())
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct HotspotQuery {
    pub window_days: Option<u32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQuery {
    pub since: Option<DateTime<Utc>>,
}

async fn list_incidents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<IncidentFilter>,
) -> ApiResult<Json<Vec<IncidentSummary>>> {
    let actor = actor(&state, &headers)?;
    Ok(Json(state.intelligence.list_incidents(&actor, &filter).await?))
}

async fn get_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IncidentView>> {
    let actor = actor(&state, &headers)?;
    Ok(Json(state.intelligence.incident(&actor, id).await?))
}

async fn export_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let actor = actor(&state, &headers)?;
    let document = state.intelligence.export(&actor, id).await?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        document,
    )
        .into_response())
}

async fn list_hotspots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HotspotQuery>,
) -> ApiResult<Json<Vec<HotspotCluster>>> {
    let actor = actor(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_HOTSPOT_LIMIT);
    Ok(Json(state.intelligence.hotspots(&actor, query.window_days, limit).await?))
}

async fn list_alerts(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<AlertRecord>>> {
    let actor = actor(&state, &headers)?;
    Ok(Json(state.intelligence.alerts(&actor).await?))
}

async fn list_issues(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<OperationalIssue>>> {
    let actor = actor(&state, &headers)?;
    Ok(Json(state.intelligence.operational_issues(&actor).await?))
}

async fn statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult<Json<IncidentStatistics>> {
    let actor = actor(&state, &headers)?;
    Ok(Json(state.intelligence.statistics(&actor, query.since).await?))
}

/// Dashboard routes over the given state
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/:id", get(get_incident))
        .route("/api/incidents/:id/export", get(export_incident))
        .route("/api/hotspots", get(list_hotspots))
        .route("/api/alerts", get(list_alerts))
        .route("/api/operations/issues", get(list_issues))
        .route("/api/statistics", get(statistics))
        .with_state(state)
        .layer(cors)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    /// Serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid API address {}", addr))?;

        info!("API server listening on {}", addr);

        axum::Server::try_bind(&addr)
            .with_context(|| format!("Failed to bind {}", addr))?
            .serve(router(self.state.clone()).into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("API server failed")?;

        info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertLedger;
    use crate::config::{DecayModel, HotspotConfig, SecurityConfig};
    use crate::hotspots::HotspotEngine;
    use crate::incidents::{IncidentManager, MemoryIncidentStore, Submission};
    use crate::models::{Category, Role, Scope};
    use std::collections::BTreeMap;

    struct Fixture {
        state: AppState,
        incidents: Arc<IncidentManager>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryIncidentStore::new());
        let incidents = Arc::new(IncidentManager::new(store.clone()));
        let hotspots = Arc::new(HotspotEngine::new(
            HotspotConfig {
                windows_days: vec![30],
                decay: DecayModel::Linear { zero_after_days: 30.0 },
                category_weights: BTreeMap::new(),
                recompute_workers: 1,
                refresh_interval_secs: 300,
            },
            store,
        ));
        let intelligence = IntelligenceService::new(incidents.clone(), hotspots, Arc::new(AlertLedger::new()));
        Fixture {
            state: AppState {
                intelligence: Arc::new(intelligence),
                verifier: Arc::new(TokenVerifier::new(SecurityConfig {
                    jwt_secret: "dashboard-test".to_string(),
                })),
            },
            incidents,
        }
    }

    fn bearer(state: &AppState, actor: &Actor) -> anyhow::Result<HeaderMap> {
        let token = state.verifier.issue(actor, chrono::Duration::minutes(5))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token))?);
        Ok(headers)
    }

    #[tokio::test]
    async fn requests_without_a_token_are_unauthorized() {
        let f = fixture();
        let result = list_alerts(State(f.state.clone()), HeaderMap::new()).await;
        assert_eq!(result.err().map(|e| e.status), Some(401));
    }

    #[tokio::test]
    async fn incidents_are_listed_for_the_token_actor() -> anyhow::Result<()> {
        let f = fixture();
        let admin = Actor::new("Dayo", Role::Admin, Scope::institution("unilag"));
        f.incidents
            .submit(
                &admin,
                Submission {
                    description: "Exam papers leaked".to_string(),
                    location: "Senate Building".to_string(),
                    category: Some(Category::Other),
                    severity: Some(35),
                    ..Default::default()
                },
            )
            .await?;

        let headers = bearer(&f.state, &admin)?;
        let Json(listed) = list_incidents(State(f.state.clone()), headers, Query(IncidentFilter::default()))
            .await
            .map_err(|e| anyhow::anyhow!(e.message))?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].location_key, "senate-building");
        Ok(())
    }

    #[tokio::test]
    async fn viewers_are_forbidden_from_operational_issues() -> anyhow::Result<()> {
        let f = fixture();
        let viewer = Actor::new("Kemi", Role::Viewer, Scope::institution("unilag"));
        let headers = bearer(&f.state, &viewer)?;

        let result = list_issues(State(f.state.clone()), headers).await;
        assert_eq!(result.err().map(|e| e.status), Some(403));
        Ok(())
    }

    #[test]
    fn transition_vetoes_map_to_conflict() {
        let err = Error::TransitionRejected {
            from: crate::models::IncidentStatus::Submitted,
            action: crate::models::IncidentAction::Resolve,
            reason: crate::incidents::Rejection::IllegalTransition,
        };
        assert_eq!(ApiError::from(err).status, 409);
    }
}
