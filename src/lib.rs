//! Prometheus metrics for pgx-style PostgreSQL connection pools and query
//! tracing.
//!
//! This crate adapts two signals from an external PostgreSQL driver into
//! Prometheus series: pool statistics, re-read on every scrape, and
//! query/batch lifecycle events, counted and timed as they happen. The pool,
//! the driver, and the metrics registry all live elsewhere; nothing here
//! owns a connection or stores a sample.
//!
//! # Key Concepts
//!
//! - **PoolCollector**: a `prometheus_client` collector holding handles to
//!   monitored pools. Each scrape fetches a fresh [`PoolStat`] snapshot per
//!   pool and emits the ten `pgx_pool_*` gauges, labeled by database name.
//! - **QueryTracer**: the driver's lifecycle hooks. Start hooks open a
//!   correlation span and return a token; end hooks redeem the token to
//!   count errors and observe latency in the `pgx_conn_*` vectors.
//! - **PoolStatSource**: the consumed pool interface — a database name and
//!   a `stat()` snapshot call.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use prometheus_client::registry::Registry;
//! use pgx_metrics::{Config, PoolCollector, QueryTracer};
//!
//! let mut registry = Registry::default();
//!
//! let pools = PoolCollector::new();
//! registry.register_collector(Box::new(pools.clone()));
//! pools.register(Arc::new(my_pool));
//!
//! let tracer = QueryTracer::new(Config::default())?;
//! tracer.register(&mut registry);
//!
//! // In the driver integration:
//! let token = tracer.query_start("orders", sql);
//! let result = run_query(sql);
//! tracer.query_end(token, result.as_ref().err());
//! ```

mod config;
mod error;
mod operation;
mod pool;
mod span;
mod tracer;

pub use config::{Config, DEFAULT_DURATION_BUCKETS};
pub use error::{Error, Result};
pub use operation::{operation_name, UNKNOWN_OPERATION};
pub use pool::{PoolCollector, PoolStat, PoolStatSource};
pub use span::{BatchToken, QueryToken};
pub use tracer::{Phase, QueryTracer, RequestLabels};
