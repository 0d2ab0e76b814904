//! Configuration options for the query tracer.

use crate::error::{Error, Result};

/// Default request duration histogram buckets, in seconds.
///
/// The conventional Prometheus latency ladder, covering 5ms to 10s.
pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Configuration for constructing a [`QueryTracer`](crate::QueryTracer).
///
/// # Example
///
/// ```
/// use pgx_metrics::{Config, QueryTracer};
///
/// let config = Config {
///     duration_buckets: vec![0.001, 0.01, 0.1, 1.0],
/// };
/// let tracer = QueryTracer::new(config).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bounds, in seconds, of the request duration histogram buckets.
    ///
    /// Must be non-empty, finite, and strictly increasing. Defaults to
    /// [`DEFAULT_DURATION_BUCKETS`].
    pub duration_buckets: Vec<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            duration_buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.duration_buckets.is_empty() {
            return Err(Error::InvalidConfig(
                "duration_buckets must not be empty".to_string(),
            ));
        }

        if self.duration_buckets.iter().any(|b| !b.is_finite()) {
            return Err(Error::InvalidConfig(
                "duration_buckets must be finite".to_string(),
            ));
        }

        if !self.duration_buckets.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidConfig(
                "duration_buckets must be strictly increasing".to_string(),
            ));
        }

        Ok(())
    }
}
