use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use repsync_core::models::SyncSummary;
use repsync_core::remote::{DataApiDocumentStore, DocumentStore, LibSqlRelationalStore};
use repsync_core::SyncResult;

use crate::auth::{authenticate, Caller};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::fanout::{user_fingerprint, Fanout};
use crate::trigger::{parse_trigger, FanoutTrigger, ManualRequest, ManualScope, SyncQuery};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    fanout: Fanout,
}

impl AppState {
    /// Connect both stores named by the configuration
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let relational = open_relational(&config).await?;
        let documents = DataApiDocumentStore::new(config.data_api())
            .map_err(|error| AppError::Config(format!("document store client: {error}")))?;
        Ok(Self::new(config, Arc::new(relational), Arc::new(documents)))
    }

    pub fn new(
        config: Arc<AppConfig>,
        relational: Arc<LibSqlRelationalStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            fanout: Fanout::new(relational, documents, config.sync),
            config,
        }
    }
}

async fn open_relational(config: &AppConfig) -> Result<LibSqlRelationalStore, AppError> {
    let url = config.relational_url.as_str();
    let opened = if url.starts_with("libsql://") || url.starts_with("https://") {
        let token = config.relational_auth_token.clone().unwrap_or_default();
        LibSqlRelationalStore::open_remote(url, token).await
    } else if url == ":memory:" {
        LibSqlRelationalStore::open_in_memory().await
    } else {
        LibSqlRelationalStore::open(url).await
    };
    opened.map_err(|error| {
        AppError::Config(format!(
            "relational store: {}",
            repsync_core::util::sanitize(&error)
        ))
    })
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", get(sync_from_query).post(sync_from_body))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = authenticate(request.headers(), &state.config).inspect_err(|error| {
        tracing::warn!(path = %request.uri().path(), "Rejected caller: {error}");
    })?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    results: Vec<SyncResult>,
    summary: SyncSummary,
}

impl SyncResponse {
    fn from_results(results: Vec<SyncResult>) -> Self {
        let summary = SyncSummary::from_results(&results);
        Self {
            success: summary.failed_tables == 0,
            results,
            summary,
        }
    }
}

async fn sync_from_query(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncResponse>, AppError> {
    let trigger = parse_trigger(caller, &query, None)?;
    run(&state, caller, trigger).await
}

async fn sync_from_body(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<SyncQuery>,
    body: Bytes,
) -> Result<Json<SyncResponse>, AppError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&body)
                .map_err(|error| AppError::bad_request(format!("Body is not JSON: {error}")))?,
        )
    };
    let trigger = parse_trigger(caller, &query, body)?;
    run(&state, caller, trigger).await
}

async fn run(
    state: &AppState,
    caller: Caller,
    trigger: FanoutTrigger,
) -> Result<Json<SyncResponse>, AppError> {
    tracing::info!(caller = caller.as_str(), trigger = trigger.kind(), "Sync requested");
    let fanout = &state.fanout;
    let results = match trigger {
        FanoutTrigger::Webhook(event) => vec![fanout.apply_webhook(&event).await?],
        FanoutTrigger::Cron { force } => fanout.run_cron(force).await?,
        FanoutTrigger::Manual(ManualRequest {
            user_id,
            scope,
            force,
        }) => {
            tracing::info!(user = %user_fingerprint(&user_id), force, "Manual sync");
            match scope {
                ManualScope::AllTables => fanout.sync_user(&user_id, force).await?,
                ManualScope::Table(table) => {
                    vec![fanout.sync_user_table(table, &user_id, force).await?]
                }
                ManualScope::Record { table, record_id } => {
                    vec![fanout.sync_record(table, &user_id, &record_id).await?]
                }
            }
        }
    };
    Ok(Json(SyncResponse::from_results(results)))
}
