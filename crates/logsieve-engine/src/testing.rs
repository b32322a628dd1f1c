//! In-memory sources, clocks and dispatchers for unit tests.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::dispatch::{Dispatcher, Task};
use crate::error::SourceError;
use crate::source::{LineListener, LogSource, SourceFactory, SourceState};
use crate::stream::{Batch, Subscriber};
use logsieve_types::LogRecord;

pub fn cap(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[derive(Default)]
struct SourceLog {
    created: usize,
    started: usize,
    stopped: usize,
    current: Option<LineListener>,
}

/// Counts source lifecycle calls and exposes the live listener
#[derive(Clone, Default)]
pub struct FakeSources {
    log: Arc<Mutex<SourceLog>>,
}

impl FakeSources {
    pub fn factory(&self) -> impl SourceFactory + 'static {
        let log = Arc::clone(&self.log);
        move || -> Box<dyn LogSource> {
            log.lock().created += 1;
            Box::new(FakeSource {
                log: Arc::clone(&log),
                listener: None,
                state: SourceState::NotStarted,
            })
        }
    }

    pub fn created(&self) -> usize {
        self.log.lock().created
    }

    pub fn started(&self) -> usize {
        self.log.lock().started
    }

    pub fn stopped(&self) -> usize {
        self.log.lock().stopped
    }

    /// Listener of the most recently started source
    pub fn current_listener(&self) -> Option<LineListener> {
        self.log.lock().current.clone()
    }

    /// Push one raw line through the most recently started source
    pub fn feed(&self, line: &str) {
        let listener = self.current_listener().expect("no source was started");
        listener(line);
    }
}

struct FakeSource {
    log: Arc<Mutex<SourceLog>>,
    listener: Option<LineListener>,
    state: SourceState,
}

impl LogSource for FakeSource {
    fn set_listener(&mut self, listener: LineListener) {
        self.listener = Some(listener);
    }

    fn listener(&self) -> Option<LineListener> {
        self.listener.clone()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.state != SourceState::NotStarted {
            return Err(SourceError::AlreadyStarted);
        }
        self.state = SourceState::Running;
        let mut log = self.log.lock();
        log.started += 1;
        log.current = self.listener.clone();
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == SourceState::Running {
            self.log.lock().stopped += 1;
        }
        self.state = SourceState::Stopped;
    }

    fn state(&self) -> SourceState {
        self.state
    }
}

/// Source whose start always fails
#[derive(Default)]
pub struct FailingSource {
    listener: Option<LineListener>,
    state: Option<SourceState>,
}

impl LogSource for FailingSource {
    fn set_listener(&mut self, listener: LineListener) {
        self.listener = Some(listener);
    }

    fn listener(&self) -> Option<LineListener> {
        self.listener.clone()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        self.state = Some(SourceState::Stopped);
        Err(SourceError::Spawn {
            program: "logcat".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    }

    fn stop(&mut self) {
        self.state = Some(SourceState::Stopped);
    }

    fn state(&self) -> SourceState {
        self.state.unwrap_or(SourceState::NotStarted)
    }
}

/// Replays a fixed sequence of readings, then repeats the last one
pub struct ScriptedClock {
    readings: Mutex<(VecDeque<u64>, u64)>,
}

impl ScriptedClock {
    pub fn new(readings: &[u64]) -> Self {
        let last = readings.last().copied().unwrap_or(0);
        Self {
            readings: Mutex::new((readings.iter().copied().collect(), last)),
        }
    }

    pub fn fixed(now: u64) -> Self {
        Self::new(&[now])
    }
}

impl Clock for ScriptedClock {
    fn now_millis(&self) -> u64 {
        let mut readings = self.readings.lock();
        let (queue, last) = &mut *readings;
        queue.pop_front().unwrap_or(*last)
    }
}

/// Holds posted tasks until the test runs them
#[derive(Default)]
pub struct QueueDispatcher {
    tasks: Mutex<Vec<Task>>,
}

impl QueueDispatcher {
    pub fn queued(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn run_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task();
        }
    }
}

impl Dispatcher for QueueDispatcher {
    fn post(&self, task: Task) {
        self.tasks.lock().push(task);
    }
}

#[derive(Default)]
struct Recorded {
    batches: Vec<Batch>,
    clears: usize,
}

/// Subscriber that records everything it receives
#[derive(Clone, Default)]
pub struct BatchLog {
    recorded: Arc<Mutex<Recorded>>,
}

impl BatchLog {
    pub fn subscriber(&self) -> Arc<dyn Subscriber> {
        Arc::new(self.clone())
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.recorded.lock().batches.clone()
    }

    /// Records of every batch, one entry per batch
    pub fn records(&self) -> Vec<Vec<LogRecord>> {
        self.recorded
            .lock()
            .batches
            .iter()
            .map(|b| b.records.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.recorded.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clears(&self) -> usize {
        self.recorded.lock().clears
    }
}

impl Subscriber for BatchLog {
    fn on_batch(&self, batch: &Batch) {
        self.recorded.lock().batches.push(batch.clone());
    }

    fn on_clear(&self) {
        self.recorded.lock().clears += 1;
    }
}
