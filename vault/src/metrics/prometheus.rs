//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and the strongly-typed vault metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{
    self, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

/// Storage, replication, proof, and GC metrics.
///
/// These are registered into a [`Registry`] and updated from the engine's
/// pipelines.
#[derive(Clone)]
pub struct VaultMetrics {
    /// Blobs accepted by the local store (idempotent re-stores excluded).
    pub blobs_stored_total: IntCounter,
    /// Successful blob retrievals.
    pub blobs_retrieved_total: IntCounter,
    /// End-to-end store latency in seconds, admission included.
    pub store_seconds: Histogram,
    /// Blob retrieval latency in seconds.
    pub retrieve_seconds: Histogram,
    /// Outbound replication attempts, successful or not.
    pub replication_attempts_total: IntCounter,
    /// Replication attempts that exhausted their retry budget.
    pub replication_failures_total: IntCounter,
    /// Blobs whose confirmed replicas reached the replication factor.
    pub replication_complete_total: IntCounter,
    /// Storage proofs generated locally.
    pub proofs_generated_total: IntCounter,
    /// Proof generations refused (blob missing, signing failure).
    pub proof_failures_total: IntCounter,
    /// Completed GC runs (simulated runs included).
    pub gc_runs_total: IntCounter,
    /// Blobs deleted by GC.
    pub gc_deleted_total: IntCounter,
    /// Bytes reclaimed by GC.
    pub gc_bytes_reclaimed_total: IntCounter,
    /// Current bytes under `blobs/`.
    pub storage_used_bytes: Gauge,
    /// Blob-cache hit ratio over process lifetime (0..1).
    pub cache_hit_ratio: Gauge,
}

impl VaultMetrics {
    /// Registers the vault metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let blobs_stored_total = IntCounter::with_opts(Opts::new(
            "blobs_stored_total",
            "Total blobs accepted by the local store",
        ))?;
        registry.register(Box::new(blobs_stored_total.clone()))?;

        let blobs_retrieved_total = IntCounter::with_opts(Opts::new(
            "blobs_retrieved_total",
            "Total successful blob retrievals",
        ))?;
        registry.register(Box::new(blobs_retrieved_total.clone()))?;

        let store_seconds = Histogram::with_opts(
            HistogramOpts::new("store_seconds", "Blob store latency in seconds").buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(store_seconds.clone()))?;

        let retrieve_seconds = Histogram::with_opts(
            HistogramOpts::new("retrieve_seconds", "Blob retrieval latency in seconds").buckets(
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            ),
        )?;
        registry.register(Box::new(retrieve_seconds.clone()))?;

        let replication_attempts_total = IntCounter::with_opts(Opts::new(
            "replication_attempts_total",
            "Outbound replication attempts",
        ))?;
        registry.register(Box::new(replication_attempts_total.clone()))?;

        let replication_failures_total = IntCounter::with_opts(Opts::new(
            "replication_failures_total",
            "Replication attempts that exhausted their retry budget",
        ))?;
        registry.register(Box::new(replication_failures_total.clone()))?;

        let replication_complete_total = IntCounter::with_opts(Opts::new(
            "replication_complete_total",
            "Blobs that reached their replication factor",
        ))?;
        registry.register(Box::new(replication_complete_total.clone()))?;

        let proofs_generated_total = IntCounter::with_opts(Opts::new(
            "proofs_generated_total",
            "Storage proofs generated locally",
        ))?;
        registry.register(Box::new(proofs_generated_total.clone()))?;

        let proof_failures_total = IntCounter::with_opts(Opts::new(
            "proof_failures_total",
            "Proof generations that failed",
        ))?;
        registry.register(Box::new(proof_failures_total.clone()))?;

        let gc_runs_total =
            IntCounter::with_opts(Opts::new("gc_runs_total", "Completed GC runs"))?;
        registry.register(Box::new(gc_runs_total.clone()))?;

        let gc_deleted_total =
            IntCounter::with_opts(Opts::new("gc_deleted_total", "Blobs deleted by GC"))?;
        registry.register(Box::new(gc_deleted_total.clone()))?;

        let gc_bytes_reclaimed_total = IntCounter::with_opts(Opts::new(
            "gc_bytes_reclaimed_total",
            "Bytes reclaimed by GC",
        ))?;
        registry.register(Box::new(gc_bytes_reclaimed_total.clone()))?;

        let storage_used_bytes = Gauge::with_opts(Opts::new(
            "storage_used_bytes",
            "Current bytes stored under blobs/",
        ))?;
        registry.register(Box::new(storage_used_bytes.clone()))?;

        let cache_hit_ratio = Gauge::with_opts(Opts::new(
            "cache_hit_ratio",
            "Blob cache hit ratio over process lifetime (0..1)",
        ))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;

        Ok(Self {
            blobs_stored_total,
            blobs_retrieved_total,
            store_seconds,
            retrieve_seconds,
            replication_attempts_total,
            replication_failures_total,
            replication_complete_total,
            proofs_generated_total,
            proof_failures_total,
            gc_runs_total,
            gc_deleted_total,
            gc_bytes_reclaimed_total,
            storage_used_bytes,
            cache_hit_ratio,
        })
    }
}

/// Wrapper around a Prometheus registry and the vault metrics.
///
/// This is the main handle you pass around in the node. It can be wrapped
/// in an [`Arc`] and shared across tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub vault: VaultMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the vault metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("vault".to_string()), None)?;
        let vault = VaultMetrics::register(&registry)?;
        Ok(Self { registry, vault })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404. Intended
/// to be spawned onto a Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::warn!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}
