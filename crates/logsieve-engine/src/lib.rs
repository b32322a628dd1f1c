//! Log tailing engine.
//!
//! Raw `logcat -v time` lines flow from a [`LogSource`] through the
//! [`LogParser`] and a [`CompiledFilter`] into the [`StreamEngine`], which
//! batches matching records and posts them to a [`Dispatcher`]. On delivery
//! each batch is appended to the [`RetentionBuffer`] and handed to every
//! [`Subscriber`]. [`LogSieve`] ties these together behind one configuration.

pub mod buffer;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod parser;
pub mod sieve;
pub mod source;
pub mod stream;

#[cfg(test)]
mod testing;

pub use buffer::RetentionBuffer;
pub use clock::{Clock, MonotonicClock};
pub use dispatch::{Dispatcher, InlineDispatcher, Task, TaskDispatcher};
pub use error::{MalformedRecordError, Result, SieveError, SourceError};
pub use filter::CompiledFilter;
pub use parser::LogParser;
pub use sieve::{FOLLOW_TAIL_SLACK, LogSieve};
pub use source::{
    ChannelSource, ChannelSourceFactory, CommandSource, LineListener, LineSender, LogSource,
    SourceFactory, SourceState, line_channel,
};
pub use stream::{Batch, BatchKind, EngineState, StreamEngine, Subscriber, SubscriptionId};

pub use logsieve_types::{ConfigError, LogLevel, LogRecord, SieveConfig};
