//! Request correlation records and their store.
//!
//! The original driver threads a correlation record from each start hook to
//! its matching end hook through an ambient per-request carrier. Here the
//! carrier is explicit: a start hook stores the record under a fresh token
//! and hands the token back, and the end hook redeems the token to recover
//! the record. A token that resolves to nothing is the "no open request"
//! state and end hooks treat it as a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Handle returned by [`QueryTracer::query_start`](crate::QueryTracer::query_start)
/// and redeemed by the matching end hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryToken(u64);

/// Handle returned by [`QueryTracer::batch_start`](crate::QueryTracer::batch_start)
/// and redeemed by the per-statement and end hooks of the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchToken(u64);

/// Correlation record for one in-flight query.
pub(crate) struct QuerySpan {
    pub database: String,
    pub sql: String,
    pub started_at: Instant,
}

/// Correlation record for one in-flight batch. All queued statements share
/// the batch start time.
pub(crate) struct BatchSpan {
    pub database: String,
    pub statements: Vec<String>,
    pub started_at: Instant,
}

/// Store of in-flight correlation records, keyed by token.
///
/// A record lives from the start hook that inserts it to the end hook that
/// removes it. A record whose end hook never fires stays in the store for
/// the process lifetime.
pub(crate) struct SpanStore {
    next_id: AtomicU64,
    queries: Mutex<HashMap<u64, QuerySpan>>,
    batches: Mutex<HashMap<u64, BatchSpan>>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            queries: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin_query(&self, span: QuerySpan) -> QueryToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.queries
            .lock()
            .expect("span store lock poisoned")
            .insert(id, span);
        QueryToken(id)
    }

    /// Removes and returns the query record, if the token still names one.
    pub fn end_query(&self, token: QueryToken) -> Option<QuerySpan> {
        self.queries
            .lock()
            .expect("span store lock poisoned")
            .remove(&token.0)
    }

    pub fn begin_batch(&self, span: BatchSpan) -> BatchToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.batches
            .lock()
            .expect("span store lock poisoned")
            .insert(id, span);
        BatchToken(id)
    }

    /// Reads the batch's shared context without consuming the record, for
    /// per-statement events that fire while the batch is still open.
    pub fn batch_context(&self, token: BatchToken) -> Option<(String, Instant)> {
        self.batches
            .lock()
            .expect("span store lock poisoned")
            .get(&token.0)
            .map(|span| (span.database.clone(), span.started_at))
    }

    /// Removes and returns the batch record, if the token still names one.
    pub fn end_batch(&self, token: BatchToken) -> Option<BatchSpan> {
        self.batches
            .lock()
            .expect("span store lock poisoned")
            .remove(&token.0)
    }

    #[cfg(test)]
    pub fn open_spans(&self) -> usize {
        self.queries.lock().expect("span store lock poisoned").len()
            + self.batches.lock().expect("span store lock poisoned").len()
    }
}
