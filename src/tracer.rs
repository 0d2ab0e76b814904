//! Query and batch lifecycle tracing.

use std::time::Instant;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::config::Config;
use crate::error::Result;
use crate::operation::operation_name;
use crate::span::{BatchSpan, BatchToken, QuerySpan, QueryToken, SpanStore};

/// Lifecycle phase that emitted a series.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Phase {
    QueryStart,
    QueryEnd,
    BatchStart,
    BatchQuery,
    BatchEnd,
}

impl Phase {
    /// The label value for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::QueryStart => "query_start",
            Phase::QueryEnd => "query_end",
            Phase::BatchStart => "batch_start",
            Phase::BatchQuery => "batch_query",
            Phase::BatchEnd => "batch_end",
        }
    }
}

impl EncodeLabelValue for Phase {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> std::fmt::Result {
        use std::fmt::Write;

        encoder.write_str(self.as_str())
    }
}

/// Labels attached to every request series.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Database name from the connection config.
    pub database: String,
    /// Operation derived from the statement's `-- name:` comment.
    pub operation: String,
    /// Lifecycle phase that emitted the series.
    pub phase: Phase,
}

/// Constructs duration histograms with the configured buckets.
#[derive(Clone, Debug)]
struct DurationBuckets(Vec<f64>);

impl MetricConstructor<Histogram> for DurationBuckets {
    fn new_metric(&self) -> Histogram {
        Histogram::new(self.0.iter().copied())
    }
}

/// Traces query and batch lifecycle events into Prometheus series.
///
/// The driver integration calls [`query_start`](QueryTracer::query_start) /
/// [`query_end`](QueryTracer::query_end) around single statements and
/// [`batch_start`](QueryTracer::batch_start) /
/// [`batch_query`](QueryTracer::batch_query) /
/// [`batch_end`](QueryTracer::batch_end) around batches, handing the token
/// returned by the start hook unchanged to the later hooks of the same
/// request. Hooks are safe to call from any number of threads against one
/// tracer.
///
/// Metric identity is fixed at construction: three vectors under the
/// `pgx_conn` prefix (`requests`, `request_errors`, and
/// `requests_duration_seconds`), labeled by
/// `{database, operation, phase}`. Operation labels are derived per
/// statement, also inside batches.
pub struct QueryTracer {
    requests: Family<RequestLabels, Counter>,
    request_errors: Family<RequestLabels, Counter>,
    duration: Family<RequestLabels, Histogram, DurationBuckets>,
    spans: SpanStore,
}

impl QueryTracer {
    /// Creates a tracer, validating the configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            requests: Family::default(),
            request_errors: Family::default(),
            duration: Family::new_with_constructor(DurationBuckets(config.duration_buckets)),
            spans: SpanStore::new(),
        })
    }

    /// Registers the three metric vectors under the `pgx_conn` prefix.
    pub fn register(&self, registry: &mut Registry) {
        let sub = registry.sub_registry_with_prefix("pgx_conn");
        sub.register(
            "requests",
            "Total number of database requests",
            self.requests.clone(),
        );
        sub.register(
            "request_errors",
            "Total number of database request errors",
            self.request_errors.clone(),
        );
        sub.register(
            "requests_duration_seconds",
            "Time taken to complete a database request and process the response",
            self.duration.clone(),
        );
    }

    /// Opens a query span and counts the start event.
    ///
    /// The returned token must be passed unchanged to
    /// [`query_end`](QueryTracer::query_end).
    pub fn query_start(&self, database: &str, sql: &str) -> QueryToken {
        self.requests
            .get_or_create(&RequestLabels {
                database: database.to_string(),
                operation: operation_name(sql).to_string(),
                phase: Phase::QueryStart,
            })
            .inc();

        self.spans.begin_query(QuerySpan {
            database: database.to_string(),
            sql: sql.to_string(),
            started_at: Instant::now(),
        })
    }

    /// Closes a query span: counts an error if one occurred and observes the
    /// elapsed time.
    ///
    /// A token that does not resolve to an open span (never started, ended
    /// twice, or minted by another tracer) is ignored.
    pub fn query_end(&self, token: QueryToken, error: Option<&dyn std::error::Error>) {
        let Some(span) = self.spans.end_query(token) else {
            tracing::debug!(?token, "query end without an open span");
            return;
        };

        let elapsed = span.started_at.elapsed().as_secs_f64();
        let labels = RequestLabels {
            operation: operation_name(&span.sql).to_string(),
            database: span.database,
            phase: Phase::QueryEnd,
        };

        if error.is_some() {
            self.request_errors.get_or_create(&labels).inc();
        }
        self.duration.get_or_create(&labels).observe(elapsed);
    }

    /// Opens a batch span and counts one start event per queued statement,
    /// each with its own derived operation label.
    ///
    /// The returned token must be passed unchanged to
    /// [`batch_query`](QueryTracer::batch_query) and
    /// [`batch_end`](QueryTracer::batch_end).
    pub fn batch_start(&self, database: &str, statements: &[String]) -> BatchToken {
        for sql in statements {
            self.requests
                .get_or_create(&RequestLabels {
                    database: database.to_string(),
                    operation: operation_name(sql).to_string(),
                    phase: Phase::BatchStart,
                })
                .inc();
        }

        self.spans.begin_batch(BatchSpan {
            database: database.to_string(),
            statements: statements.to_vec(),
            started_at: Instant::now(),
        })
    }

    /// Records one statement's completion while its batch is still open,
    /// observing elapsed time against the shared batch start.
    pub fn batch_query(&self, token: BatchToken, sql: &str, error: Option<&dyn std::error::Error>) {
        let Some((database, started_at)) = self.spans.batch_context(token) else {
            tracing::debug!(?token, "batch query without an open span");
            return;
        };

        let labels = RequestLabels {
            database,
            operation: operation_name(sql).to_string(),
            phase: Phase::BatchQuery,
        };

        if error.is_some() {
            self.request_errors.get_or_create(&labels).inc();
        }
        self.duration
            .get_or_create(&labels)
            .observe(started_at.elapsed().as_secs_f64());
    }

    /// Closes a batch span: for every queued statement, counts an error if
    /// the batch failed and observes the shared elapsed time.
    pub fn batch_end(&self, token: BatchToken, error: Option<&dyn std::error::Error>) {
        let Some(span) = self.spans.end_batch(token) else {
            tracing::debug!(?token, "batch end without an open span");
            return;
        };

        let elapsed = span.started_at.elapsed().as_secs_f64();
        for sql in &span.statements {
            let labels = RequestLabels {
                database: span.database.clone(),
                operation: operation_name(sql).to_string(),
                phase: Phase::BatchEnd,
            };

            if error.is_some() {
                self.request_errors.get_or_create(&labels).inc();
            }
            self.duration.get_or_create(&labels).observe(elapsed);
        }
    }
}
