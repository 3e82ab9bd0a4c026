//! Metrics and instrumentation for the vault node.
//!
//! Prometheus-compatible counters and histograms for the storage,
//! replication, proof, and GC pipelines, plus a small HTTP exporter that
//! serves `/metrics` in Prometheus text format.
//!
//! Typical usage in a node:
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use vault::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let addr: SocketAddr = "127.0.0.1:9898".parse()?;
//!
//! // Spawn the HTTP exporter in the background:
//! tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
//!
//! // Elsewhere in the code:
//! registry.vault.blobs_stored_total.inc();
//! ```

pub mod prometheus;

pub use prometheus::{MetricsRegistry, VaultMetrics, run_prometheus_http_server};
