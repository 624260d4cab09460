//! # HTTP API
//!
//! Builds the axum router that exposes the node's read-only HTTP surface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                          |
//! |--------|------------|--------------------------------------|
//! | GET    | `/health`  | Liveness probe                       |
//! | GET    | `/status`  | Tip, confirmed height, mempool depth |
//! | GET    | `/metrics` | Prometheus text exposition           |

use std::sync::Arc;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use kestrel_protocol::chain::Chain;
use kestrel_protocol::crypto::Address;
use kestrel_protocol::mempool::Mempool;

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    /// Address this node produces blocks as.
    pub producer: Address,
    pub chain: Arc<Chain>,
    pub mempool: Arc<Mempool>,
    pub metrics: SharedMetrics,
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Body of `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub producer: String,
    pub height: u64,
    pub confirmed_height: u64,
    pub tip_hash: String,
    /// Tip timestamp, RFC 3339.
    pub tip_time: String,
    pub mempool_ready: usize,
    pub mempool_cache: usize,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tip = state.chain.tip();
    let tip_time = i64::try_from(tip.time)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| tip.time.to_string());

    Json(StatusResponse {
        version: state.version.clone(),
        producer: state.producer.to_string(),
        height: tip.height,
        confirmed_height: state.chain.confirmed_height(),
        tip_hash: tip.hash_hex(),
        tip_time,
        mempool_ready: state.mempool.ready_len(),
        mempool_cache: state.mempool.cache_len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use kestrel_protocol::config::ChainConfig;
    use kestrel_protocol::crypto::KestrelKeypair;
    use kestrel_protocol::mempool::MempoolConfig;
    use kestrel_protocol::storage::ChainDb;

    use crate::metrics::NodeMetrics;

    fn test_app_state() -> AppState {
        let producer = Address::from(KestrelKeypair::from_seed(&[1u8; 32]).public_key());
        let mut config = ChainConfig::devnet(producer, "peer-0", 1_000);
        config.genesis.time = 1_700_000_000;
        let chain = Chain::open(ChainDb::open_temporary().unwrap(), Arc::new(config)).unwrap();
        AppState {
            version: "test".into(),
            producer,
            chain: Arc::new(chain),
            mempool: Arc::new(Mempool::new(MempoolConfig::default())),
            metrics: Arc::new(NodeMetrics::new().unwrap()),
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_the_genesis_tip() {
        let state = test_app_state();
        let genesis = state.chain.tip();
        let router = create_router(state.clone());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.height, 0);
        assert_eq!(resp.confirmed_height, 0);
        assert_eq!(resp.tip_hash, genesis.hash_hex());
        assert_eq!(resp.tip_time, "2023-11-14T22:13:20+00:00");
        assert_eq!(resp.producer, state.producer.to_string());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let state = test_app_state();
        state.metrics.refresh(&state.chain, &state.mempool);
        let router = create_router(state);
        let (status, body) = get(&router, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("kestrel_block_height 0"));
        assert!(text.contains("kestrel_mempool_size 0"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/blocks/0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
