//! # Prometheus Metrics
//!
//! Exposes operational metrics for the node. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `kestrel` prefix so they do not collide with the default global
//! registry.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use kestrel_protocol::chain::{AppliedSink, Chain};
use kestrel_protocol::mempool::Mempool;
use kestrel_protocol::message::Message;

/// Holds all Prometheus metric handles for the node.
///
/// Prometheus handles are reference-counted, so clones share counters.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Blocks inserted into the local chain, produced here or received.
    pub blocks_inserted_total: IntCounter,
    /// Blocks this node built and inserted in its own slots.
    pub blocks_produced_total: IntCounter,
    /// Messages applied by inserted blocks, coinbase included.
    pub messages_applied_total: IntCounter,
    /// Production ticks that failed to build or insert a block.
    pub insert_failures_total: IntCounter,
    pub block_height: IntGauge,
    pub confirmed_height: IntGauge,
    /// Messages across both mempool queues.
    pub mempool_size: IntGauge,
    pub mempool_ready: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("kestrel".into()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let blocks_inserted_total =
            counter("blocks_inserted_total", "Blocks inserted into the local chain")?;
        let blocks_produced_total =
            counter("blocks_produced_total", "Blocks built by this node")?;
        let messages_applied_total = counter(
            "messages_applied_total",
            "Messages applied by inserted blocks",
        )?;
        let insert_failures_total = counter(
            "insert_failures_total",
            "Production ticks that failed to build or insert",
        )?;

        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let block_height = gauge("block_height", "Height of the chain tip")?;
        let confirmed_height = gauge("confirmed_height", "Highest confirmed block height")?;
        let mempool_size = gauge("mempool_size", "Messages waiting in the mempool")?;
        let mempool_ready = gauge("mempool_ready", "Messages in the mempool ready queue")?;

        Ok(Self {
            registry,
            blocks_inserted_total,
            blocks_produced_total,
            messages_applied_total,
            insert_failures_total,
            block_height,
            confirmed_height,
            mempool_size,
            mempool_ready,
        })
    }

    /// Sample the chain and pool gauges.
    pub fn refresh(&self, chain: &Chain, mempool: &Mempool) {
        self.block_height.set(to_gauge(chain.last_height()));
        self.confirmed_height.set(to_gauge(chain.confirmed_height()));
        self.mempool_size.set(to_gauge(mempool.len() as u64));
        self.mempool_ready.set(to_gauge(mempool.ready_len() as u64));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn to_gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub type SharedMetrics = Arc<NodeMetrics>;

// ---------------------------------------------------------------------------
// Applied-message sink
// ---------------------------------------------------------------------------

/// Counts every inserted block, then evicts its messages from the mempool.
pub struct MetricsSink {
    mempool: Arc<Mempool>,
    metrics: SharedMetrics,
}

impl MetricsSink {
    pub fn new(mempool: Arc<Mempool>, metrics: SharedMetrics) -> Self {
        Self { mempool, metrics }
    }
}

impl AppliedSink for MetricsSink {
    fn delete_applied(&self, messages: &[Message]) {
        self.metrics.blocks_inserted_total.inc();
        self.metrics
            .messages_applied_total
            .inc_by(messages.len() as u64);
        self.mempool.delete_applied(messages);
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
