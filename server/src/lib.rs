use anyhow::Result;
use axum::{extract::{Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use bm25_core::stats::LengthStats;
use bm25_core::{load_cached, SearchIndex};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { bm25_core::config::DEFAULT_TOP_K }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub doc_id: String,
    pub score: f64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub num_docs: usize,
    pub num_terms: usize,
    pub k1: f64,
    pub b: f64,
    pub built_at: Option<String>,
    pub lengths: LengthStats,
}

#[derive(Clone)]
pub struct AppState {
    pub cache_path: PathBuf,
    /// Swapped wholesale on reload; readers clone the inner `Arc` and never
    /// hold the lock while scoring.
    pub index: Arc<RwLock<Arc<SearchIndex>>>,
    pub admin_token: Option<String>,
}

impl AppState {
    fn current(&self) -> Arc<SearchIndex> {
        Arc::clone(&self.index.read())
    }
}

pub fn build_app(cache_path: PathBuf) -> Result<Router> {
    // Load the cached index at startup; building is the indexer's job.
    let index = load_cached(&cache_path)?;
    tracing::info!(num_docs = index.index().num_docs(), "serving cached index");
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState { cache_path, index: Arc::new(RwLock::new(Arc::new(index))), admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/stats", get(stats_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let index = state.current();
    let k = params.k.clamp(1, 100);
    let results = index
        .engine()
        .query(&params.q, k)
        .into_iter()
        .enumerate()
        .map(|(i, hit)| SearchHit { rank: i + 1, doc_id: hit.doc_id, score: hit.score })
        .collect();
    let elapsed = start.elapsed();
    Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), results })
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let index = state.current();
    let params = index.index().params();
    Json(StatsResponse {
        num_docs: index.index().num_docs(),
        num_terms: index.index().num_terms(),
        k1: params.k1,
        b: params.b,
        built_at: index.built_at().map(str::to_string),
        lengths: index.length_stats(),
    })
}

async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let path = state.cache_path.clone();
    let loaded = tokio::task::spawn_blocking(move || load_cached(&path))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("reload task failed: {e}")))?;
    match loaded {
        Ok(index) => {
            let num_docs = index.index().num_docs();
            *state.index.write() = Arc::new(index);
            tracing::info!(num_docs, "index reloaded");
            Ok(Json(serde_json::json!({ "reloaded": true, "num_docs": num_docs })))
        }
        Err(e) => {
            tracing::warn!(error = %e, "reload failed; keeping current index");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
