//! # Prometheus Metrics
//!
//! Operational metrics for the marketplace node, scraped by Prometheus at
//! `/metrics` on the configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] so they do not
//! collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use mech_contracts::MarketplaceEvent;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Requests posted, one per request id.
    pub requests_total: IntCounter,
    /// Deliveries, one per request id, signed fast path included.
    pub deliveries_total: IntCounter,
    /// Deliveries made by a mech other than the priority mech.
    pub failovers_total: IntCounter,
    /// Requests currently waiting for a delivery.
    pub undelivered_requests: IntGauge,
    /// Every emitted marketplace event, by kind.
    pub events_total: IntCounterVec,
    /// Value released to mechs, by payment type.
    pub payout_volume_total: IntCounterVec,
    /// Rejected write calls, by error kind.
    pub failed_calls_total: IntCounterVec,
    /// Time spent executing a signed write call, persistence included.
    pub call_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("mech".into()), None)
            .expect("failed to create prometheus registry");

        let requests_total = IntCounter::new("requests_total", "Total number of requests posted")
            .expect("metric creation");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration");

        let deliveries_total =
            IntCounter::new("deliveries_total", "Total number of delivered requests")
                .expect("metric creation");
        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("metric registration");

        let failovers_total = IntCounter::new(
            "failovers_total",
            "Deliveries made after the priority mech missed its deadline",
        )
        .expect("metric creation");
        registry
            .register(Box::new(failovers_total.clone()))
            .expect("metric registration");

        let undelivered_requests = IntGauge::new(
            "undelivered_requests",
            "Number of requests waiting for a delivery",
        )
        .expect("metric creation");
        registry
            .register(Box::new(undelivered_requests.clone()))
            .expect("metric registration");

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Marketplace events emitted, by kind"),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(events_total.clone()))
            .expect("metric registration");

        let payout_volume_total = IntCounterVec::new(
            Opts::new("payout_volume_total", "Value released to mechs, by payment type"),
            &["payment_type"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(payout_volume_total.clone()))
            .expect("metric registration");

        let failed_calls_total = IntCounterVec::new(
            Opts::new("failed_calls_total", "Rejected write calls, by error kind"),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(failed_calls_total.clone()))
            .expect("metric registration");

        let call_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "call_latency_seconds",
                "Signed call execution latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(call_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            requests_total,
            deliveries_total,
            failovers_total,
            undelivered_requests,
            events_total,
            payout_volume_total,
            failed_calls_total,
            call_latency_seconds,
        }
    }

    /// Folds a batch of emitted events into the counters.
    pub fn observe_events(&self, events: &[MarketplaceEvent]) {
        for event in events {
            self.events_total.with_label_values(&[event.kind()]).inc();
            match event {
                MarketplaceEvent::Request { .. } => self.requests_total.inc(),
                MarketplaceEvent::Deliver { .. } => self.deliveries_total.inc(),
                MarketplaceEvent::DeliverWithSignature { .. } => {
                    self.requests_total.inc();
                    self.deliveries_total.inc();
                }
                MarketplaceEvent::Failover { .. } => self.failovers_total.inc(),
                MarketplaceEvent::Withdraw {
                    payment_type,
                    payout,
                    ..
                } => self
                    .payout_volume_total
                    .with_label_values(&[payment_type.as_str()])
                    .inc_by(*payout),
                _ => {}
            }
        }
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

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

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
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
