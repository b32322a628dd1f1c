use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use logsieve_types::{LogLevel, LogRecord, SieveConfig};

use crate::buffer::RetentionBuffer;
use crate::clock::{Clock, MonotonicClock};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::source::SourceFactory;
use crate::stream::{EngineState, StreamEngine, Subscriber, SubscriptionId};

/// Tail following stays on while the last visible row is this close to the end
pub const FOLLOW_TAIL_SLACK: usize = 3;

/// Public entry point: one engine, its retained history and its configuration
pub struct LogSieve {
    /// Held for the whole of a reconfiguration so the stored configuration,
    /// the buffer capacity and the engine filter always agree
    config: Mutex<SieveConfig>,
    engine: StreamEngine,
}

impl LogSieve {
    pub fn new(
        config: SieveConfig,
        sources: impl SourceFactory + 'static,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self::with_clock(config, sources, dispatcher, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: SieveConfig,
        sources: impl SourceFactory + 'static,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let buffer = RetentionBuffer::new(config.max_retained);
        let engine = StreamEngine::new(sources, dispatcher, clock, buffer, &config);
        Self {
            config: Mutex::new(config),
            engine,
        }
    }

    pub fn start(&self) {
        self.engine.start();
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Stop and start again with a fresh source
    pub fn restart(&self) {
        self.engine.restart();
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.engine.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.unsubscribe(id)
    }

    /// Independent copy of the current configuration
    pub fn config(&self) -> SieveConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration.
    ///
    /// The retained history is resized first, then the new filter and flush
    /// interval take effect, then subscribers get a replay of the retained
    /// records that pass the new filter. The replay carries the number of
    /// records the resize discarded.
    pub fn set_config(&self, config: SieveConfig) {
        let evicted = {
            let mut current = self.config.lock();
            self.install(&mut current, config)
        };
        self.engine.post_replay(evicted);
    }

    /// Resize the retained history, rejecting zero
    pub fn set_max_retained(&self, max_retained: usize) -> Result<()> {
        let evicted = {
            let mut current = self.config.lock();
            let config = current.clone().with_max_retained(max_retained)?;
            self.install(&mut current, config)
        };
        self.engine.post_replay(evicted);
        Ok(())
    }

    /// Push a configuration into the buffer and engine, returning the
    /// number of records the resize discarded
    fn install(&self, current: &mut SieveConfig, config: SieveConfig) -> usize {
        let evicted = self.engine.buffer().set_capacity(config.max_retained);
        self.engine.apply_config(&config);
        debug!(
            max_retained = config.max_retained.get(),
            filter = %config.text_filter,
            min_level = %config.min_level,
            evicted,
            "configuration updated"
        );
        *current = config;
        evicted
    }

    /// Change the text and level filter.
    ///
    /// While running this discards the retained history and restarts the
    /// source so the view is rebuilt from the new filter only.
    pub fn refilter(&self, text: &str, min_level: LogLevel) {
        {
            let mut current = self.config.lock();
            let config = current.clone().with_text_filter(text).with_min_level(min_level);
            self.engine.apply_config(&config);
            *current = config;
        }

        if self.engine.is_running() {
            info!(filter = %text, %min_level, "refiltering from a fresh source");
            self.engine.post_clear();
            self.engine.restart();
        }
    }

    /// Empty the retained history; subscribers get `on_clear`
    pub fn clear(&self) {
        self.engine.post_clear();
    }

    pub fn retained(&self) -> Vec<LogRecord> {
        self.engine.buffer().snapshot()
    }

    pub fn retained_len(&self) -> usize {
        self.engine.buffer().len()
    }

    /// Retained history as text, one `L/ message` line per record
    pub fn export_plain(&self) -> String {
        self.engine.buffer().export_plain()
    }

    /// Whether a view showing rows up to `last_visible` should keep
    /// scrolling with new records
    pub fn should_follow_tail(&self, last_visible: usize) -> bool {
        self.retained_len().saturating_sub(last_visible) < FOLLOW_TAIL_SLACK
    }
}
