use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::RwLock;

use logsieve_types::LogRecord;

/// Thread-safe bounded history of delivered records, oldest first
#[derive(Clone)]
pub struct RetentionBuffer {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    records: VecDeque<LogRecord>,
    capacity: NonZeroUsize,
}

impl Inner {
    /// Drop records from the head until the length fits, returning how many went
    fn evict_overflow(&mut self) -> usize {
        let overflow = self.records.len().saturating_sub(self.capacity.get());
        self.records.drain(..overflow);
        overflow
    }
}

impl RetentionBuffer {
    /// Create a new buffer with the given capacity.
    ///
    /// Storage grows with the records actually appended, so any capacity is
    /// accepted.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                records: VecDeque::new(),
                capacity,
            })),
        }
    }

    /// Append a batch to the tail, then evict from the head.
    ///
    /// Returns the exact number of records evicted so callers can shift any
    /// position-dependent state.
    pub fn append(&self, batch: &[LogRecord]) -> usize {
        let mut inner = self.inner.write();
        inner.records.extend(batch.iter().cloned());
        inner.evict_overflow()
    }

    /// Change the capacity, evicting the oldest records if it shrank
    pub fn set_capacity(&self, capacity: NonZeroUsize) -> usize {
        let mut inner = self.inner.write();
        inner.capacity = capacity;
        inner.evict_overflow()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.inner.read().capacity
    }

    /// Get all records in arrival order
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.inner.read().records.iter().cloned().collect()
    }

    /// Get records matching a predicate, in arrival order
    pub fn filtered<F>(&self, predicate: F) -> Vec<LogRecord>
    where
        F: Fn(&LogRecord) -> bool,
    {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Export all records as plain text, one `L/ message` per line
    pub fn export_plain(&self) -> String {
        let inner = self.inner.read();
        let mut out = String::new();
        for record in &inner.records {
            out.push_str(&record.to_plain());
            out.push('\n');
        }
        out
    }

    /// Clear all records; the capacity is kept
    pub fn clear(&self) {
        self.inner.write().records.clear();
    }
}

impl std::fmt::Debug for RetentionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RetentionBuffer")
            .field("len", &inner.records.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}
