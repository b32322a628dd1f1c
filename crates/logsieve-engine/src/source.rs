//! Raw line producers.
//!
//! A [`LogSource`] reads lines on its own task and hands each one to a
//! listener. Sources are single-use: once stopped they cannot be started
//! again, so restarting means asking a [`SourceFactory`] for a new instance
//! and moving the listener over to it.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::SourceError;

/// Callback invoked once per raw line, on the source's reader task
pub type LineListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle of a single source instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    NotStarted,
    Running,
    Stopped,
}

/// Producer of raw log lines
pub trait LogSource: Send {
    fn set_listener(&mut self, listener: LineListener);

    fn listener(&self) -> Option<LineListener>;

    /// Begin reading. Only valid on a source that was never started.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Stop reading, unblocking any pending read
    fn stop(&mut self);

    fn state(&self) -> SourceState;
}

/// Builds fresh source instances
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn LogSource>;
}

impl<F> SourceFactory for F
where
    F: Fn() -> Box<dyn LogSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn LogSource> {
        self()
    }
}

fn noop_listener() -> LineListener {
    Arc::new(|_: &str| {})
}

// ============================================================================
// Command source
// ============================================================================

/// Reads the stdout of a spawned command, `logcat -v time` by default
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    runtime: Handle,
    listener: Option<LineListener>,
    cancel: CancellationToken,
    state: SourceState,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, runtime: Handle) -> Self {
        Self {
            program: program.into(),
            args,
            runtime,
            listener: None,
            cancel: CancellationToken::new(),
            state: SourceState::NotStarted,
        }
    }

    /// Source over the Android system log
    pub fn logcat(runtime: Handle) -> Self {
        Self::new("logcat", vec!["-v".to_string(), "time".to_string()], runtime)
    }

    /// Factory producing a fresh source for the same command on every call
    pub fn factory(
        program: impl Into<String>,
        args: Vec<String>,
        runtime: Handle,
    ) -> impl SourceFactory {
        let program = program.into();
        move || -> Box<dyn LogSource> {
            Box::new(CommandSource::new(program.clone(), args.clone(), runtime.clone()))
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn spawn_child(&self) -> Result<Child, SourceError> {
        // Child processes register with the reactor of the current runtime
        let _guard = self.runtime.enter();
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

impl LogSource for CommandSource {
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
        let child = match self.spawn_child() {
            Ok(child) => child,
            Err(err) => {
                self.state = SourceState::Stopped;
                return Err(err);
            }
        };
        self.state = SourceState::Running;

        let listener = self.listener.clone().unwrap_or_else(noop_listener);
        let cancel = self.cancel.clone();
        let program = self.program.clone();

        debug!(%program, "log command started");
        self.runtime
            .spawn(read_command_output(child, program, listener, cancel));
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.state = SourceState::Stopped;
    }

    fn state(&self) -> SourceState {
        self.state
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_command_output(
    mut child: Child,
    program: String,
    listener: LineListener,
    cancel: CancellationToken,
) {
    let Some(stdout) = child.stdout.take() else {
        error!(%program, "log command has no stdout");
        return;
    };

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            result = reader.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => {
                        warn!(%program, "log stream closed");
                        break;
                    }
                    Ok(_) => {
                        // logcat is not guaranteed to emit valid UTF-8
                        let line = String::from_utf8_lossy(&buf);
                        listener(line.trim_end_matches(['\n', '\r']));
                    }
                    Err(err) => {
                        warn!(%program, error = %err, "error reading log stream");
                        break;
                    }
                }
            }
        }
    }

    if let Err(err) = child.kill().await {
        debug!(%program, error = %err, "log command already exited");
    }
}

// ============================================================================
// Channel source
// ============================================================================

/// Handle for pushing raw lines into a [`ChannelSource`]
#[derive(Clone)]
pub struct LineSender {
    sender: mpsc::UnboundedSender<String>,
}

impl LineSender {
    /// Queue a line. Returns false once every source for this feed is gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.sender.send(line.into()).is_ok()
    }
}

type SharedFeed = Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>;

/// In-process source fed through a [`LineSender`].
///
/// Every instance made by the same factory reads the same feed, so lines
/// queued while a restart is in progress go to the new instance.
pub struct ChannelSource {
    feed: SharedFeed,
    runtime: Handle,
    listener: Option<LineListener>,
    cancel: CancellationToken,
    state: SourceState,
}

/// Factory for [`ChannelSource`] instances sharing one feed
#[derive(Clone)]
pub struct ChannelSourceFactory {
    feed: SharedFeed,
    runtime: Handle,
}

impl SourceFactory for ChannelSourceFactory {
    fn create(&self) -> Box<dyn LogSource> {
        Box::new(ChannelSource {
            feed: Arc::clone(&self.feed),
            runtime: self.runtime.clone(),
            listener: None,
            cancel: CancellationToken::new(),
            state: SourceState::NotStarted,
        })
    }
}

/// Create a line feed and the factory for sources reading from it
pub fn line_channel(runtime: Handle) -> (LineSender, ChannelSourceFactory) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        LineSender { sender },
        ChannelSourceFactory {
            feed: Arc::new(AsyncMutex::new(receiver)),
            runtime,
        },
    )
}

impl LogSource for ChannelSource {
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

        let feed = Arc::clone(&self.feed);
        let listener = self.listener.clone().unwrap_or_else(noop_listener);
        let cancel = self.cancel.clone();

        self.runtime.spawn(async move {
            // Wait for the previous instance to let go of the feed
            let mut feed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                guard = feed.lock_owned() => guard,
            };

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    next = feed.recv() => match next {
                        Some(line) => listener(&line),
                        None => {
                            debug!("line feed closed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.state = SourceState::Stopped;
    }

    fn state(&self) -> SourceState {
        self.state
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn collecting_listener() -> (LineListener, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: LineListener = Arc::new(move |line: &str| {
            let _ = tx.send(line.to_string());
        });
        (listener, rx)
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("line timed out")
            .expect("listener dropped")
    }

    #[tokio::test]
    async fn test_channel_source_delivers_lines() {
        let (sender, factory) = line_channel(Handle::current());
        let (listener, mut rx) = collecting_listener();

        let mut source = factory.create();
        source.set_listener(listener);
        assert_eq!(source.state(), SourceState::NotStarted);
        source.start().unwrap();
        assert_eq!(source.state(), SourceState::Running);

        assert!(sender.send("first"));
        assert!(sender.send("second"));
        assert_eq!(next_line(&mut rx).await, "first");
        assert_eq!(next_line(&mut rx).await, "second");

        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_source_cannot_start_twice() {
        let (_sender, factory) = line_channel(Handle::current());
        let mut source = factory.create();
        source.start().unwrap();
        assert!(matches!(source.start(), Err(SourceError::AlreadyStarted)));

        source.stop();
        assert!(matches!(source.start(), Err(SourceError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_fresh_instance_resumes_feed() {
        let (sender, factory) = line_channel(Handle::current());
        let (listener, mut rx) = collecting_listener();

        let mut first = factory.create();
        first.set_listener(Arc::clone(&listener));
        first.start().unwrap();
        sender.send("before");
        assert_eq!(next_line(&mut rx).await, "before");
        first.stop();

        let mut second = factory.create();
        second.set_listener(first.listener().unwrap());
        second.start().unwrap();
        sender.send("after");
        assert_eq!(next_line(&mut rx).await, "after");
        second.stop();
    }

    /// Wait until the reader task has dropped its copy of the listener
    async fn wait_for_release(listener: &LineListener, remaining: usize) {
        timeout(Duration::from_secs(2), async {
            while Arc::strong_count(listener) > remaining {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reader task still holds the listener");
    }

    #[tokio::test]
    async fn test_stop_unblocks_idle_channel_source() {
        let (_sender, factory) = line_channel(Handle::current());
        let (listener, _rx) = collecting_listener();

        let mut source = factory.create();
        source.set_listener(Arc::clone(&listener));
        source.start().unwrap();
        // Ours, the source's, and the reader task's
        assert_eq!(Arc::strong_count(&listener), 3);

        source.stop();
        wait_for_release(&listener, 2).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_unblocks_silent_command() {
        let (listener, _rx) = collecting_listener();
        let mut source = CommandSource::new("sleep", vec!["30".to_string()], Handle::current());
        source.set_listener(Arc::clone(&listener));
        source.start().unwrap();
        assert_eq!(Arc::strong_count(&listener), 3);

        source.stop();
        wait_for_release(&listener, 2).await;
    }

    #[tokio::test]
    async fn test_logcat_source_defaults() {
        let source = CommandSource::logcat(Handle::current());
        assert_eq!(source.program(), "logcat");
        assert_eq!(source.state(), SourceState::NotStarted);
        assert!(source.listener().is_none());
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let mut source = CommandSource::new(
            "logsieve-definitely-not-a-command",
            Vec::new(),
            Handle::current(),
        );
        assert!(matches!(source.start(), Err(SourceError::Spawn { .. })));
        assert_eq!(source.state(), SourceState::Stopped);
    }
}
