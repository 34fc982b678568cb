// HTTP API routes (headhunt tracker, operator stat calculator, API keys).

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Json, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::auth::{self, AuthUser, OptionalAuthUser};
use crate::cache::TtlCache;
use crate::calculator::{StatTable, MAX_BREAKTHROUGH};
use crate::config::Config;
use crate::db::Database;
use crate::error::HeadhuntError;
use crate::headhunt::{self, GlobalStats, Leaderboard, LeaderboardQuery, SubmitPullsRequest};
use crate::llms_txt;
use crate::metrics;
use crate::rate_limit::{RateLimitError, RateLimitType, RateLimiter};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatsQuery {
    pub banner: Option<String>,
}

#[derive(Deserialize)]
pub struct OperatorStatsQuery {
    pub level: Option<u32>,
    pub breakthrough: Option<u8>,
    pub talent: Option<u8>,
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Option<String>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub rate_limiter: RateLimiter,
    pub stats_cache: TtlCache<GlobalStats>,
    pub leaderboard_cache: TtlCache<Leaderboard>,
    pub stat_table: Arc<StatTable>,
}

impl AppState {
    pub fn new(db: Arc<Database>, stat_table: StatTable, config: &Config) -> Self {
        let rate_limiter = if config.rate_limits_enabled {
            RateLimiter::new()
        } else {
            RateLimiter::disabled()
        };
        Self {
            db,
            rate_limiter,
            stats_cache: TtlCache::new("global_stats", config.stats_cache_ttl),
            leaderboard_cache: TtlCache::new("leaderboard", config.stats_cache_ttl),
            stat_table: Arc::new(stat_table),
        }
    }

    fn invalidate_aggregates(&self) {
        self.stats_cache.clear();
        self.leaderboard_cache.clear();
    }
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

fn internal_error(e: sqlx::Error) -> Response {
    HeadhuntError::Storage(e).into_response()
}

fn rate_limited(e: RateLimitError) -> Response {
    let mut response = json_error(StatusCode::TOO_MANY_REQUESTS, &e.to_string());
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(e.retry_after_secs));
    response
}

// ── Router ────────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "zerosanity-backend" }))
}

/// Full application: auth routes, API routes and the shared middleware.
pub fn app(state: AppState) -> Router {
    let db_for_ext = state.db.clone();

    Router::new()
        .route("/health", get(health_check))
        // Auth routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .with_state(state.db.clone())
        .merge(router(state))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(track_requests))
        // API token lookups in the auth extractors read the database from
        // request extensions.
        .layer(axum::middleware::from_fn(
            move |mut req: Request<Body>, next: Next| {
                let db = db_for_ext.clone();
                async move {
                    req.extensions_mut().insert(db);
                    next.run(req).await
                }
            },
        ))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Headhunt tracker
        .route("/api/headhunt/pulls", post(submit_pulls))
        .route("/api/headhunt/stats", get(global_stats))
        .route("/api/headhunt/leaderboard", get(leaderboard))
        .route("/api/headhunt/history", get(my_history))
        // Operator calculator
        .route("/api/operators/{name}/stats", get(operator_stats))
        // API keys
        .route("/api/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api/api-keys/{id}", delete(delete_api_key))
        // Ops / docs
        .route("/metrics", get(get_metrics))
        .route("/llms.txt", get(get_llms_txt))
        .with_state(state)
}

async fn track_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint, response.status().as_str()])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(started.elapsed().as_secs_f64());
    response
}

// ── Headhunt handlers ─────────────────────────────────────────────────

async fn submit_pulls(
    State(state): State<AppState>,
    OptionalAuthUser(claims): OptionalAuthUser,
    body: Result<Json<SubmitPullsRequest>, JsonRejection>,
) -> Response {
    let Some(claims) = claims else {
        return HeadhuntError::Unauthenticated.into_response();
    };
    if !auth::has_scope(&claims, auth::SCOPE_PULLS_WRITE) {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope");
    }
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return HeadhuntError::validation(rejection.body_text()).into_response(),
    };
    if let Err(e) = state
        .rate_limiter
        .check_limit(claims.sub, RateLimitType::PullImports)
    {
        return rate_limited(e);
    }

    match headhunt::submit_pulls(state.db.as_ref(), Some(claims.sub), req).await {
        Ok(saved) => {
            state.invalidate_aggregates();
            (StatusCode::OK, Json(json!(saved))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn global_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Response {
    let banner = params.banner.filter(|b| !b.trim().is_empty());
    let key = match &banner {
        Some(b) => format!("={b}"),
        None => "*".to_string(),
    };
    let generation = state.stats_cache.generation();
    if let Some(stats) = state.stats_cache.get(&key) {
        return (StatusCode::OK, Json(json!(stats))).into_response();
    }

    match headhunt::get_global_stats(state.db.as_ref(), banner).await {
        Ok(stats) => {
            state.stats_cache.insert(key, stats.clone(), generation);
            (StatusCode::OK, Json(json!(stats))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let params = match query.resolve() {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };
    let key = params.cache_key();
    let generation = state.leaderboard_cache.generation();
    if let Some(board) = state.leaderboard_cache.get(&key) {
        return (StatusCode::OK, Json(json!(board))).into_response();
    }

    match headhunt::load_leaderboard(state.db.as_ref(), &params).await {
        Ok(board) => {
            state.leaderboard_cache.insert(key, board.clone(), generation);
            (StatusCode::OK, Json(json!(board))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn my_history(
    State(state): State<AppState>,
    OptionalAuthUser(claims): OptionalAuthUser,
) -> Response {
    if let Some(claims) = &claims {
        if !auth::has_scope(claims, auth::SCOPE_PULLS_READ) {
            return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope");
        }
    }
    match headhunt::get_my_history(state.db.as_ref(), claims.map(|c| c.sub)).await {
        Ok(history) => (StatusCode::OK, Json(json!(history))).into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Operator calculator ───────────────────────────────────────────────

async fn operator_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<OperatorStatsQuery>,
) -> Response {
    let breakthrough = params.breakthrough.unwrap_or(0);
    if breakthrough > MAX_BREAKTHROUGH {
        return HeadhuntError::validation("breakthrough must be between 0 and 4").into_response();
    }
    let level = params.level.unwrap_or(1);

    let Some(result) = state.stat_table.calculate(&name, level, breakthrough) else {
        return HeadhuntError::NotFound(format!("Operator '{name}'")).into_response();
    };
    let talent_bonus = params
        .talent
        .and_then(|tier| state.stat_table.talent_bonus(&name, tier));

    (
        StatusCode::OK,
        Json(json!({
            "operator": name,
            "breakthrough": breakthrough,
            "maxLevel": crate::calculator::max_level_for_breakthrough(breakthrough),
            "level": result.level,
            "stats": result.stats,
            "talentBonus": talent_bonus,
        })),
    )
        .into_response()
}

// ── API Key handlers ──────────────────────────────────────────────────

async fn list_api_keys(State(state): State<AppState>, auth: AuthUser) -> Response {
    match state.db.list_api_tokens(auth.0.sub).await {
        Ok(tokens) => (StatusCode::OK, Json(json!(tokens))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn create_api_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateApiKeyRequest>,
) -> Response {
    // API tokens cannot mint further tokens
    if auth.0.scopes.is_some() {
        return json_error(StatusCode::FORBIDDEN, "API tokens cannot create API keys");
    }
    if req.name.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required");
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.0.sub, RateLimitType::ApiKeys)
    {
        return rate_limited(e);
    }

    let scopes = req
        .scopes
        .unwrap_or_else(|| format!("{},{}", auth::SCOPE_PULLS_READ, auth::SCOPE_PULLS_WRITE));
    let raw_token = auth::generate_api_token();
    let token_hash = auth::hash_api_token(&raw_token);

    match state
        .db
        .create_api_token(auth.0.sub, &req.name, &token_hash, &scopes)
        .await
    {
        Ok(token_record) => (
            StatusCode::CREATED,
            Json(json!({
                "id": token_record.id,
                "name": token_record.name,
                "token": raw_token,
                "scopes": token_record.scopes,
                "created_at": token_record.created_at,
            })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_api_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Response {
    match state.db.delete_api_token(id, auth.0.sub).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "API key not found"),
        Err(e) => internal_error(e),
    }
}

// ── Ops / docs ────────────────────────────────────────────────────────

async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn get_llms_txt() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        llms_txt::LLMS_TXT,
    )
}
