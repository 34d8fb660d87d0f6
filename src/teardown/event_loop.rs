//! Background line-status thread owned by a [`SerialStream`](crate::port::SerialStream).
//!
//! The thread blocks on a "new event" wait handle, polls the modem status
//! lines through a [`LineMonitor`] and publishes changes as [`LineEvent`]s.
//! Shutdown is cooperative: the owner raises a termination flag, signals the
//! wait handle, and waits for the thread to acknowledge through a separate
//! "loop ended" event before anything the thread touches is closed.

use crate::port::PortError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long teardown waits for the loop-ended signal before signalling again.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// Default interval between line-status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Latched event: stays signalled until explicitly reset.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl ManualResetEvent {
    pub fn new(initial: bool) -> Self {
        Self {
            signaled: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until signalled or `timeout` elapses. Returns whether the event
    /// was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

/// Modem status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    ClearToSend,
    DataSetReady,
    RingIndicator,
    CarrierDetect,
}

/// Levels of the modem status lines at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineState {
    pub cts: bool,
    pub dsr: bool,
    pub ri: bool,
    pub cd: bool,
}

impl LineState {
    /// Pins whose level differs between `self` and `next`.
    pub fn changes(&self, next: &LineState) -> Vec<LineEvent> {
        [
            (Pin::ClearToSend, self.cts, next.cts),
            (Pin::DataSetReady, self.dsr, next.dsr),
            (Pin::RingIndicator, self.ri, next.ri),
            (Pin::CarrierDetect, self.cd, next.cd),
        ]
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(pin, _, level)| LineEvent { pin, level })
        .collect()
    }
}

/// A status line changed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    pub pin: Pin,
    pub level: bool,
}

/// Source of line status polled by the event thread.
pub trait LineMonitor: Send + 'static {
    fn poll(&mut self) -> Result<LineState, PortError>;
}

/// Polls the status lines of a cloned `serialport` handle.
pub struct SerialLineMonitor {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLineMonitor {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

impl LineMonitor for SerialLineMonitor {
    fn poll(&mut self) -> Result<LineState, PortError> {
        Ok(LineState {
            cts: self.port.read_clear_to_send()?,
            dsr: self.port.read_data_set_ready()?,
            ri: self.port.read_ring_indicator()?,
            cd: self.port.read_carrier_detect()?,
        })
    }
}

/// Observable lifecycle of the event thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopState {
    Running,
    TerminationRequested,
    Ended,
}

/// Result of [`EventLoopRunner::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventLoopOutcome {
    /// The stream had no event loop to stop.
    #[default]
    Absent,
    /// A previous shutdown already joined the thread.
    AlreadyEnded,
    /// The thread acknowledged after `wait_rounds` signal-and-wait rounds.
    Ended { wait_rounds: u32 },
    /// The thread ended by panicking.
    Panicked,
}

#[derive(Debug, Default)]
struct Shared {
    end_requested: AtomicBool,
    /// "New event available": wakes the thread early.
    wake: ManualResetEvent,
    /// "Loop ended": set by the thread as its last action.
    ended: ManualResetEvent,
}

impl Shared {
    fn end_requested(&self) -> bool {
        self.end_requested.load(Ordering::Acquire)
    }
}

/// Signals loop-ended when the thread body exits, including by panic.
struct EndedGuard(Arc<Shared>);

impl Drop for EndedGuard {
    fn drop(&mut self) {
        self.0.ended.set();
    }
}

/// Owner of the background event thread.
pub struct EventLoopRunner {
    name: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    events: Option<Receiver<LineEvent>>,
    shutdown_wait: Duration,
}

impl EventLoopRunner {
    /// Start the event thread for `port_name`.
    pub fn spawn<M: LineMonitor>(
        port_name: &str,
        monitor: M,
        poll_interval: Duration,
    ) -> Result<Self, PortError> {
        Self::spawn_with_wait(port_name, monitor, poll_interval, SHUTDOWN_WAIT)
    }

    pub(crate) fn spawn_with_wait<M: LineMonitor>(
        port_name: &str,
        monitor: M,
        poll_interval: Duration,
        shutdown_wait: Duration,
    ) -> Result<Self, PortError> {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("serial-events-{port_name}"))
            .spawn(move || run_event_loop(thread_shared, monitor, poll_interval, tx))?;

        Ok(Self {
            name: port_name.to_string(),
            shared,
            thread: Some(thread),
            events: Some(rx),
            shutdown_wait,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EventLoopState {
        if self.shared.ended.is_set() {
            EventLoopState::Ended
        } else if self.shared.end_requested() {
            EventLoopState::TerminationRequested
        } else {
            EventLoopState::Running
        }
    }

    /// Line changes published by the thread. Only the first call returns the
    /// receiver.
    pub fn take_events(&mut self) -> Option<Receiver<LineEvent>> {
        self.events.take()
    }

    /// Raise the termination flag without waiting.
    pub fn request_shutdown(&self) {
        self.shared.end_requested.store(true, Ordering::Release);
    }

    /// Stop the thread and wait until it has acknowledged.
    ///
    /// The wake handle is signalled again every [`SHUTDOWN_WAIT`] until the
    /// loop-ended event is observed; there is no overall deadline.
    pub fn shutdown(&mut self) -> EventLoopOutcome {
        let Some(thread) = self.thread.take() else {
            return EventLoopOutcome::AlreadyEnded;
        };

        debug!(port = %self.name, "Stopping serial event loop");
        self.request_shutdown();

        let mut wait_rounds = 0;
        loop {
            wait_rounds += 1;
            self.shared.wake.set();
            if self.shared.ended.wait_timeout(self.shutdown_wait) {
                break;
            }
            warn!(
                port = %self.name,
                wait_rounds,
                "Serial event loop still running, signalling again"
            );
        }

        match thread.join() {
            Ok(()) => {
                debug!(port = %self.name, wait_rounds, "Serial event loop ended");
                EventLoopOutcome::Ended { wait_rounds }
            }
            Err(_) => EventLoopOutcome::Panicked,
        }
    }
}

impl Drop for EventLoopRunner {
    fn drop(&mut self) {
        // Never block here; an unjoined thread is told to stop and detached.
        if self.thread.is_some() {
            self.request_shutdown();
            self.shared.wake.set();
        }
    }
}

impl std::fmt::Debug for EventLoopRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopRunner")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run_event_loop<M: LineMonitor>(
    shared: Arc<Shared>,
    mut monitor: M,
    poll_interval: Duration,
    events: Sender<LineEvent>,
) {
    let _ended = EndedGuard(Arc::clone(&shared));
    let mut last: Option<LineState> = None;
    let mut failing = false;

    while !shared.end_requested() {
        shared.wake.wait_timeout(poll_interval);
        shared.wake.reset();
        if shared.end_requested() {
            break;
        }

        match monitor.poll() {
            Ok(state) => {
                failing = false;
                if let Some(previous) = last {
                    for event in previous.changes(&state) {
                        trace!(?event, "Line status changed");
                        // Receiver may be gone; keep polling regardless.
                        let _ = events.send(event);
                    }
                }
                last = Some(state);
            }
            Err(e) => {
                if !failing {
                    debug!(error = %e, "Line status poll failed");
                    failing = true;
                }
            }
        }
    }
}
