use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use logsieve_types::{LogRecord, SieveConfig};

use crate::buffer::RetentionBuffer;
use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::filter::CompiledFilter;
use crate::parser::LogParser;
use crate::source::{LineListener, LogSource, SourceFactory, SourceState};

/// Receives flushed batches on the delivery context
pub trait Subscriber: Send + Sync {
    fn on_batch(&self, batch: &Batch);

    /// The retained history was emptied
    fn on_clear(&self) {}
}

impl<F> Subscriber for F
where
    F: Fn(&Batch) + Send + Sync,
{
    fn on_batch(&self, batch: &Batch) {
        self(batch)
    }
}

/// Handle returned by [`StreamEngine::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchKind {
    /// Newly read records, already appended to the retained history
    Live,
    /// Retained records passing the current filter, re-sent after a reconfiguration
    Replay,
}

/// One delivery to subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub records: Vec<LogRecord>,
    /// Records dropped from the head of the retained history by this delivery
    pub evicted: usize,
    pub kind: BatchKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
}

/// Reads lines from a log source, filters them and delivers rate-limited batches
pub struct StreamEngine {
    shared: Arc<Shared>,
    sources: Box<dyn SourceFactory>,
    /// Current source instance; replaced on restart
    source: Mutex<Box<dyn LogSource>>,
}

struct Shared {
    state: Mutex<Inner>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    buffer: RetentionBuffer,
}

struct Inner {
    status: EngineState,
    /// Bumped on every stop/restart; lines tagged with an older value are ignored
    generation: u64,
    filter: CompiledFilter,
    flush_interval_ms: u64,
    pending: Vec<LogRecord>,
    last_flush: Option<u64>,
    subscribers: Vec<(SubscriptionId, Arc<dyn Subscriber>)>,
    next_subscription: u64,
}

impl Inner {
    fn should_flush(&self, now: u64) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        match self.last_flush {
            Some(last) => now.saturating_sub(last) > self.flush_interval_ms,
            None => true,
        }
    }
}

impl StreamEngine {
    pub fn new(
        sources: impl SourceFactory + 'static,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        buffer: RetentionBuffer,
        config: &SieveConfig,
    ) -> Self {
        let source = sources.create();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    status: EngineState::Idle,
                    generation: 0,
                    filter: CompiledFilter::from_config(config),
                    flush_interval_ms: config.flush_interval_ms,
                    pending: Vec::new(),
                    last_flush: None,
                    subscribers: Vec::new(),
                    next_subscription: 0,
                }),
                dispatcher,
                clock,
                buffer,
            }),
            sources: Box::new(sources),
            source: Mutex::new(source),
        }
    }

    /// Start reading. No-op if already running.
    pub fn start(&self) {
        let mut source = self.source.lock();
        let generation = {
            let mut inner = self.shared.state.lock();
            if inner.status == EngineState::Running {
                return;
            }
            inner.status = EngineState::Running;
            inner.generation += 1;
            inner.generation
        };

        // A stopped source can't be started again
        if source.state() != SourceState::NotStarted {
            *source = self.sources.create();
        }
        self.launch(&mut **source, generation);
        debug!(generation, "stream engine started");
    }

    /// Stop reading. No-op if already idle.
    pub fn stop(&self) {
        let mut source = self.source.lock();
        {
            let mut inner = self.shared.state.lock();
            if inner.status == EngineState::Idle {
                return;
            }
            inner.status = EngineState::Idle;
            inner.generation += 1;
        }
        source.stop();
        debug!("stream engine stopped");
    }

    /// Replace the source with a fresh instance and start it.
    ///
    /// Records read but not yet flushed are discarded.
    pub fn restart(&self) {
        let mut source = self.source.lock();
        let generation = {
            let mut inner = self.shared.state.lock();
            inner.status = EngineState::Running;
            inner.generation += 1;
            inner.pending.clear();
            inner.last_flush = None;
            inner.generation
        };

        source.stop();
        *source = self.sources.create();
        self.launch(&mut **source, generation);
        debug!(generation, "stream engine restarted");
    }

    fn launch(&self, source: &mut dyn LogSource, generation: u64) {
        source.set_listener(self.listener(generation));
        // The engine stays running; callers notice the silence and restart
        if let Err(err) = source.start() {
            error!(error = %err, "log source failed to start");
        }
    }

    fn listener(&self, generation: u64) -> LineListener {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |line: &str| shared.handle_line(generation, line))
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Install a new filter; records already read keep their verdict
    pub fn set_filter(&self, filter: CompiledFilter) {
        self.shared.state.lock().filter = filter;
    }

    pub fn filter(&self) -> CompiledFilter {
        self.shared.state.lock().filter.clone()
    }

    /// Take the filter and flush interval from a configuration
    pub fn apply_config(&self, config: &SieveConfig) {
        let mut inner = self.shared.state.lock();
        inner.filter = CompiledFilter::from_config(config);
        inner.flush_interval_ms = config.flush_interval_ms;
    }

    /// Number of matching records waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn buffer(&self) -> &RetentionBuffer {
        &self.shared.buffer
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let mut inner = self.shared.state.lock();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner.subscribers.push((id, subscriber));
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.shared.state.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        inner.subscribers.len() != before
    }

    /// Re-send the retained records that pass the filter.
    ///
    /// Runs on the delivery context, after any batch already posted, and
    /// uses the filter installed at that point.
    pub fn post_replay(&self, evicted: usize) {
        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.post(Box::new(move || {
            let filter = shared.state.lock().filter.clone();
            let records = shared.buffer.filtered(|r| filter.matches(r));
            shared.notify(&Batch {
                records,
                evicted,
                kind: BatchKind::Replay,
            });
        }));
    }

    /// Empty the retained history on the delivery context and tell subscribers
    pub fn post_clear(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.post(Box::new(move || {
            shared.buffer.clear();
            for subscriber in shared.subscribers() {
                subscriber.on_clear();
            }
        }));
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.source.get_mut().stop();
    }
}

impl Shared {
    /// Per-line callback, runs on the source's reader task
    fn handle_line(self: &Arc<Self>, generation: u64, line: &str) {
        let record = match LogParser::parse(line) {
            Ok(record) => record,
            Err(err) => {
                trace!(error = %err, "dropping malformed line");
                return;
            }
        };

        let batch = {
            let mut inner = self.state.lock();
            if inner.generation != generation {
                return;
            }

            if inner.filter.matches(&record) {
                inner.pending.push(record);
            }

            let now = self.clock.now_millis();
            if !inner.should_flush(now) {
                return;
            }

            let batch = std::mem::take(&mut inner.pending);
            inner.last_flush = Some(self.clock.now_millis());
            batch
        };

        trace!(records = batch.len(), "flushing batch");
        let shared = Arc::clone(self);
        self.dispatcher
            .post(Box::new(move || shared.deliver_live(batch)));
    }

    fn deliver_live(&self, records: Vec<LogRecord>) {
        let evicted = self.buffer.append(&records);
        self.notify(&Batch {
            records,
            evicted,
            kind: BatchKind::Live,
        });
    }

    fn notify(&self, batch: &Batch) {
        for subscriber in self.subscribers() {
            subscriber.on_batch(batch);
        }
    }

    /// Snapshot so callbacks run without holding the state lock
    fn subscribers(&self) -> Vec<Arc<dyn Subscriber>> {
        self.state
            .lock()
            .subscribers
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect()
    }
}
