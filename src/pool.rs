//! Pool statistics collection.
//!
//! [`PoolCollector`] bridges an external connection pool's statistics into
//! Prometheus series. It holds handles to the monitored pools, not the pools
//! themselves: on every scrape it asks each pool for a fresh
//! [`PoolStat`] snapshot and re-exports the fields, labeled by database
//! name. Nothing is cached between scrapes.
//!
//! All ten fields are emitted as gauges, including the semantically
//! monotonic destroy/acquire counts: snapshots report absolute values, and
//! the exposition encoder renames counter samples with a `_total` suffix,
//! which would break the fixed metric names. Prometheus `rate()` works on
//! gauges for the monotonic fields.

use std::fmt;
use std::sync::{Arc, RwLock};

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::metrics::MetricType;

/// Point-in-time statistics snapshot of a connection pool.
///
/// Retrieved fresh from the pool on every collection pass and never mutated
/// here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStat {
    /// Number of connections currently acquired from the pool.
    pub acquired_conns: u32,
    /// Number of times a connection acquire was canceled.
    pub canceled_acquire_count: u64,
    /// Number of connections currently being constructed.
    pub constructing_conns: u32,
    /// Number of acquires that waited because the pool was empty.
    pub empty_acquire_count: u64,
    /// Number of idle connections in the pool.
    pub idle_conns: u32,
    /// Maximum number of connections allowed in the pool.
    pub max_conns: u32,
    /// Total number of connections in the pool.
    pub total_conns: u32,
    /// Number of connections opened since the pool was created.
    pub new_conns_count: u64,
    /// Number of connections destroyed for exceeding the maximum lifetime.
    pub max_lifetime_destroy_count: u64,
    /// Number of connections destroyed for exceeding the maximum idle time.
    pub max_idle_destroy_count: u64,
}

/// The consumed interface of a monitored connection pool.
///
/// Implemented by whatever owns the actual pool. `stat` must return a fresh
/// snapshot on every call; retrieval on a live pool is assumed infallible.
pub trait PoolStatSource: Send + Sync {
    /// The database name, used as the `database` label value.
    fn database(&self) -> String;

    /// A fresh statistics snapshot.
    fn stat(&self) -> PoolStat;
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PoolLabels {
    database: String,
}

/// Prometheus collector that re-exports pool statistics on every scrape.
///
/// Cloning is cheap and clones share one monitored set, so a handle kept by
/// the application can keep registering and unregistering pools after a
/// boxed clone has been handed to
/// [`Registry::register_collector`](prometheus_client::registry::Registry::register_collector).
///
/// # Example
///
/// ```ignore
/// use prometheus_client::registry::Registry;
/// use pgx_metrics::PoolCollector;
///
/// let mut registry = Registry::default();
/// let collector = PoolCollector::new();
/// registry.register_collector(Box::new(collector.clone()));
///
/// collector.register(pool);
/// ```
#[derive(Clone, Default)]
pub struct PoolCollector {
    pools: Arc<RwLock<Vec<Arc<dyn PoolStatSource>>>>,
}

impl PoolCollector {
    /// Creates a collector with an empty monitored set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pool to the monitored set.
    ///
    /// Registering the same handle again is a no-op.
    pub fn register(&self, pool: Arc<dyn PoolStatSource>) {
        let mut pools = self.pools.write().expect("pool set lock poisoned");
        if pools.iter().any(|monitored| Arc::ptr_eq(monitored, &pool)) {
            return;
        }

        tracing::debug!(database = %pool.database(), "monitoring pool");
        pools.push(pool);
    }

    /// Removes a pool from the monitored set.
    ///
    /// Unregistering a handle that was never registered is a no-op.
    pub fn unregister(&self, pool: &Arc<dyn PoolStatSource>) {
        let mut pools = self.pools.write().expect("pool set lock poisoned");
        let before = pools.len();
        pools.retain(|monitored| !Arc::ptr_eq(monitored, pool));

        if pools.len() < before {
            tracing::debug!(database = %pool.database(), "stopped monitoring pool");
        }
    }
}

impl fmt::Debug for PoolCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.pools.read().map(|pools| pools.len()).unwrap_or(0);
        f.debug_struct("PoolCollector").field("pools", &count).finish()
    }
}

impl Collector for PoolCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        // One stat() call per pool per pass; the snapshot is reused for all
        // ten metrics.
        let stats: Vec<(PoolLabels, PoolStat)> = {
            let pools = self.pools.read().expect("pool set lock poisoned");
            pools
                .iter()
                .map(|pool| {
                    (
                        PoolLabels {
                            database: pool.database(),
                        },
                        pool.stat(),
                    )
                })
                .collect()
        };

        encode_stat(
            &mut encoder,
            "pgx_pool_acquire_connections",
            "Number of connections currently acquired from the pool",
            &stats,
            |stat| stat.acquired_conns as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_canceled_acquire_count",
            "Number of times a connection acquire was canceled",
            &stats,
            |stat| stat.canceled_acquire_count as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_constructing_connections",
            "Number of connections currently being constructed",
            &stats,
            |stat| stat.constructing_conns as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_empty_acquire_count",
            "Number of acquires that waited because the pool was empty",
            &stats,
            |stat| stat.empty_acquire_count as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_idle_connections",
            "Number of idle connections in the pool",
            &stats,
            |stat| stat.idle_conns as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_max_connections",
            "Maximum number of connections allowed in the pool",
            &stats,
            |stat| stat.max_conns as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_total_connections",
            "Total number of connections in the pool",
            &stats,
            |stat| stat.total_conns as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_new_connections_count",
            "Number of connections opened since the pool was created",
            &stats,
            |stat| stat.new_conns_count as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_max_lifetime_destroy_count",
            "Number of connections destroyed for exceeding the maximum lifetime",
            &stats,
            |stat| stat.max_lifetime_destroy_count as i64,
        )?;
        encode_stat(
            &mut encoder,
            "pgx_pool_max_idle_destroy_count",
            "Number of connections destroyed for exceeding the maximum idle time",
            &stats,
            |stat| stat.max_idle_destroy_count as i64,
        )?;

        Ok(())
    }
}

fn encode_stat(
    encoder: &mut DescriptorEncoder,
    name: &str,
    help: &str,
    stats: &[(PoolLabels, PoolStat)],
    value: impl Fn(&PoolStat) -> i64,
) -> Result<(), fmt::Error> {
    let mut metric = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
    for (labels, stat) in stats {
        let gauge = ConstGauge::new(value(stat));
        gauge.encode(metric.encode_family(labels)?)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    use prometheus_client::registry::Registry;

    struct StubPool {
        database: &'static str,
        stat: PoolStat,
    }

    impl PoolStatSource for StubPool {
        fn database(&self) -> String {
            self.database.to_string()
        }

        fn stat(&self) -> PoolStat {
            self.stat
        }
    }

    /// Pool whose snapshot changes on every retrieval.
    struct CountingPool {
        stat_calls: AtomicU64,
    }

    impl PoolStatSource for CountingPool {
        fn database(&self) -> String {
            "orders".to_string()
        }

        fn stat(&self) -> PoolStat {
            let calls = self.stat_calls.fetch_add(1, Ordering::Relaxed) + 1;
            PoolStat {
                new_conns_count: calls,
                ..Default::default()
            }
        }
    }

    fn registry_with(collector: &PoolCollector) -> Registry {
        let mut registry = Registry::default();
        registry.register_collector(Box::new(collector.clone()));
        registry
    }

    fn scrape(registry: &Registry) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, registry)
            .expect("encoding metrics should not fail");
        buffer
    }

    #[test]
    fn should_emit_all_stat_fields_labeled_by_database() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        collector.register(Arc::new(StubPool {
            database: "orders",
            stat: PoolStat {
                acquired_conns: 2,
                canceled_acquire_count: 1,
                constructing_conns: 1,
                empty_acquire_count: 4,
                idle_conns: 3,
                max_conns: 10,
                total_conns: 6,
                new_conns_count: 7,
                max_lifetime_destroy_count: 1,
                max_idle_destroy_count: 2,
            },
        }));

        // when
        let exposition = scrape(&registry);

        // then
        assert!(exposition.contains("pgx_pool_acquire_connections{database=\"orders\"} 2"));
        assert!(exposition.contains("pgx_pool_canceled_acquire_count{database=\"orders\"} 1"));
        assert!(exposition.contains("pgx_pool_constructing_connections{database=\"orders\"} 1"));
        assert!(exposition.contains("pgx_pool_empty_acquire_count{database=\"orders\"} 4"));
        assert!(exposition.contains("pgx_pool_idle_connections{database=\"orders\"} 3"));
        assert!(exposition.contains("pgx_pool_max_connections{database=\"orders\"} 10"));
        assert!(exposition.contains("pgx_pool_total_connections{database=\"orders\"} 6"));
        assert!(exposition.contains("pgx_pool_new_connections_count{database=\"orders\"} 7"));
        assert!(exposition.contains("pgx_pool_max_lifetime_destroy_count{database=\"orders\"} 1"));
        assert!(exposition.contains("pgx_pool_max_idle_destroy_count{database=\"orders\"} 2"));
    }

    #[test]
    fn should_emit_one_series_per_registered_pool() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        collector.register(Arc::new(StubPool {
            database: "orders",
            stat: PoolStat::default(),
        }));
        collector.register(Arc::new(StubPool {
            database: "billing",
            stat: PoolStat::default(),
        }));

        // when
        let exposition = scrape(&registry);

        // then
        assert!(exposition.contains("pgx_pool_max_connections{database=\"orders\"}"));
        assert!(exposition.contains("pgx_pool_max_connections{database=\"billing\"}"));
    }

    #[test]
    fn should_stop_emitting_series_for_unregistered_pool() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        let orders: Arc<dyn PoolStatSource> = Arc::new(StubPool {
            database: "orders",
            stat: PoolStat::default(),
        });
        let billing: Arc<dyn PoolStatSource> = Arc::new(StubPool {
            database: "billing",
            stat: PoolStat::default(),
        });
        collector.register(orders.clone());
        collector.register(billing.clone());

        // when
        collector.unregister(&billing);
        let exposition = scrape(&registry);

        // then
        assert!(exposition.contains("database=\"orders\""));
        assert!(!exposition.contains("database=\"billing\""));
    }

    #[test]
    fn should_ignore_duplicate_pool_registration() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        let pool: Arc<dyn PoolStatSource> = Arc::new(StubPool {
            database: "orders",
            stat: PoolStat::default(),
        });

        // when
        collector.register(pool.clone());
        collector.register(pool.clone());
        let exposition = scrape(&registry);

        // then
        let series = exposition
            .matches("pgx_pool_max_connections{database=\"orders\"}")
            .count();
        assert_eq!(series, 1);
    }

    #[test]
    fn should_ignore_unregistering_absent_pool() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        let pool: Arc<dyn PoolStatSource> = Arc::new(StubPool {
            database: "orders",
            stat: PoolStat::default(),
        });

        // when - never registered
        collector.unregister(&pool);

        // then
        assert!(!scrape(&registry).contains("database=\"orders\""));
    }

    #[test]
    fn should_fetch_a_fresh_snapshot_on_every_pass() {
        // given
        let collector = PoolCollector::new();
        let registry = registry_with(&collector);
        collector.register(Arc::new(CountingPool {
            stat_calls: AtomicU64::new(0),
        }));

        // when - two scrapes
        let first = scrape(&registry);
        let second = scrape(&registry);

        // then - each pass sees the value current at that moment
        assert!(first.contains("pgx_pool_new_connections_count{database=\"orders\"} 1"));
        assert!(second.contains("pgx_pool_new_connections_count{database=\"orders\"} 2"));
    }
}
