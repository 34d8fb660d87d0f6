//! Test doubles for the session layer.
//!
//! `MockStream` and `MockSession` implement the disposal traits used by
//! [`safe_teardown`](crate::teardown::safe_teardown) and record what was done
//! to them. `MockLineMonitor` drives a real [`EventLoopRunner`] without
//! hardware and can be held inside `poll` to imitate a driver call that hangs
//! after the device was unplugged.
//!
//! # Example
//! ```
//! use solid_serial::port::mock::{MockSession, MockStream};
//! use solid_serial::teardown::safe_teardown;
//!
//! let mut session = MockSession::new();
//! let mut stream = MockStream::with_event_loop();
//!
//! let report = safe_teardown(&mut session, &mut stream);
//! assert!(report.is_clean());
//! assert!(!session.is_open());
//! ```

use super::error::PortError;
use crate::teardown::{
    Disposable, EventLoopRunner, EventLoopState, EventStream, LineMonitor, LineState,
    ManualResetEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct MonitorState {
    line: Mutex<LineState>,
    /// Polls block while this is reset.
    gate: ManualResetEvent,
    polls: AtomicUsize,
    fail: AtomicBool,
}

/// Scriptable [`LineMonitor`]. Clones share state.
#[derive(Debug, Clone)]
pub struct MockLineMonitor {
    inner: Arc<MonitorState>,
}

impl Default for MockLineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLineMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MonitorState {
                line: Mutex::new(LineState::default()),
                gate: ManualResetEvent::new(true),
                polls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }),
        }
    }

    /// Line levels reported by subsequent polls.
    pub fn set_line(&self, state: LineState) {
        *self.inner.line.lock() = state;
    }

    /// Block every poll until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.inner.gate.reset();
    }

    pub fn release(&self) {
        self.inner.gate.set();
    }

    /// Make polls fail as they would on a removed device.
    pub fn fail_polls(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }
}

impl LineMonitor for MockLineMonitor {
    fn poll(&mut self) -> Result<LineState, PortError> {
        self.inner.polls.fetch_add(1, Ordering::SeqCst);
        while !self.inner.gate.wait_timeout(Duration::from_millis(10)) {}
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device removed",
            )));
        }
        Ok(*self.inner.line.lock())
    }
}

/// How [`MockStream::close`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseBehavior {
    Normal,
    Fail,
    Panic,
}

/// In-memory [`EventStream`].
#[derive(Debug)]
pub struct MockStream {
    runner: Option<EventLoopRunner>,
    open: bool,
    finalizer_suppressed: bool,
    close_calls: usize,
    state_at_close: Option<EventLoopState>,
    behavior: CloseBehavior,
}

impl MockStream {
    /// A stream whose event loop is driven by a default [`MockLineMonitor`].
    pub fn with_event_loop() -> Self {
        Self::with_monitor(MockLineMonitor::new())
    }

    /// A stream whose event loop is driven by `monitor`.
    pub fn with_monitor(monitor: MockLineMonitor) -> Self {
        // Spawning only fails when the OS refuses a new thread; tests then
        // proceed with a stream that has no event loop.
        let runner = EventLoopRunner::spawn("MOCK", monitor, Duration::from_millis(1)).ok();
        Self::new(runner)
    }

    /// A stream with no event loop, as when its handle could not be cloned.
    pub fn without_event_loop() -> Self {
        Self::new(None)
    }

    fn new(runner: Option<EventLoopRunner>) -> Self {
        Self {
            runner,
            open: true,
            finalizer_suppressed: false,
            close_calls: 0,
            state_at_close: None,
            behavior: CloseBehavior::Normal,
        }
    }

    /// Make `close` fail as it does on a detached device.
    pub fn fail_on_close(mut self) -> Self {
        self.behavior = CloseBehavior::Fail;
        self
    }

    pub fn panic_on_close(mut self) -> Self {
        self.behavior = CloseBehavior::Panic;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn finalizer_suppressed(&self) -> bool {
        self.finalizer_suppressed
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls
    }

    /// State of the event loop when `close` was last called.
    pub fn event_loop_state_at_close(&self) -> Option<EventLoopState> {
        self.state_at_close
    }

    pub fn event_loop_state(&self) -> Option<EventLoopState> {
        self.runner.as_ref().map(EventLoopRunner::state)
    }
}

impl Disposable for MockStream {
    fn suppress_finalizer(&mut self) {
        self.finalizer_suppressed = true;
    }

    fn close(&mut self) -> Result<(), PortError> {
        self.close_calls += 1;
        self.state_at_close = self.event_loop_state();
        match self.behavior {
            CloseBehavior::Panic => panic!("stream close panicked"),
            CloseBehavior::Fail => Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "the device does not recognize the command",
            ))),
            CloseBehavior::Normal if !self.open => Err(PortError::NotOpen),
            CloseBehavior::Normal => {
                self.open = false;
                Ok(())
            }
        }
    }
}

impl EventStream for MockStream {
    fn event_loop(&mut self) -> Option<&mut EventLoopRunner> {
        self.runner.as_mut()
    }
}

/// In-memory session.
#[derive(Debug)]
pub struct MockSession {
    open: bool,
    finalizer_suppressed: bool,
    close_calls: usize,
    fail_close: bool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            open: true,
            finalizer_suppressed: false,
            close_calls: 0,
            fail_close: false,
        }
    }

    pub fn fail_on_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn finalizer_suppressed(&self) -> bool {
        self.finalizer_suppressed
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls
    }
}

impl Disposable for MockSession {
    fn suppress_finalizer(&mut self) {
        self.finalizer_suppressed = true;
    }

    fn close(&mut self) -> Result<(), PortError> {
        self.close_calls += 1;
        let was_open = std::mem::replace(&mut self.open, false);
        if self.fail_close {
            return Err(PortError::config("session close rejected"));
        }
        if was_open {
            Ok(())
        } else {
            Err(PortError::NotOpen)
        }
    }
}
