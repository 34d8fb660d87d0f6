//! Byte stream over an open `serialport` handle, plus its event thread.

use super::error::PortError;
use crate::teardown::{
    Disposable, EventLoopRunner, EventLoopState, EventStream, LineEvent, SerialLineMonitor,
};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{debug, warn};

/// Owns the open port handle and the background thread that watches its
/// status lines.
///
/// The thread works on a cloned handle, so the stream must not be closed
/// until the thread has confirmed it ended. [`close`](Disposable::close)
/// refuses to run before that; dropping the stream without suppressing the
/// finalizer stops the thread first.
pub struct SerialStream {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    event_loop: Option<EventLoopRunner>,
    line_events: Option<Receiver<LineEvent>>,
    finalize_on_drop: bool,
}

impl SerialStream {
    /// Wrap `port` and start its event thread.
    ///
    /// If the handle cannot be cloned or the thread cannot be spawned, the
    /// stream works without an event loop.
    pub fn new(
        name: impl Into<String>,
        port: Box<dyn serialport::SerialPort>,
        poll_interval: Duration,
    ) -> Self {
        let name = name.into();
        let event_loop = match port.try_clone() {
            Ok(clone) => {
                match EventLoopRunner::spawn(&name, SerialLineMonitor::new(clone), poll_interval) {
                    Ok(runner) => Some(runner),
                    Err(e) => {
                        warn!(port = %name, error = %e, "Could not start serial event loop");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(port = %name, error = %e, "Could not clone port handle for event loop");
                None
            }
        };
        Self::from_parts(name, port, event_loop)
    }

    /// Assemble a stream from an already-running event loop (or none).
    pub fn from_parts(
        name: impl Into<String>,
        port: Box<dyn serialport::SerialPort>,
        mut event_loop: Option<EventLoopRunner>,
    ) -> Self {
        let line_events = event_loop.as_mut().and_then(EventLoopRunner::take_events);
        Self {
            name: name.into(),
            port: Some(port),
            event_loop,
            line_events,
            finalize_on_drop: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Status-line changes published by the event thread.
    pub fn line_events(&self) -> Option<&Receiver<LineEvent>> {
        self.line_events.as_ref()
    }

    pub fn event_loop_state(&self) -> Option<EventLoopState> {
        self.event_loop.as_ref().map(EventLoopRunner::state)
    }

    pub fn port(&self) -> Result<&dyn serialport::SerialPort, PortError> {
        self.port.as_deref().ok_or(PortError::NotOpen)
    }

    pub fn port_mut(&mut self) -> Result<&mut dyn serialport::SerialPort, PortError> {
        match self.port.as_mut() {
            Some(port) => Ok(port.as_mut()),
            None => Err(PortError::NotOpen),
        }
    }
}

impl Disposable for SerialStream {
    fn suppress_finalizer(&mut self) {
        self.finalize_on_drop = false;
    }

    fn close(&mut self) -> Result<(), PortError> {
        if let Some(state) = self.event_loop_state() {
            if state != EventLoopState::Ended {
                return Err(PortError::EventLoopActive);
            }
        }
        match self.port.take() {
            Some(port) => {
                drop(port);
                debug!(port = %self.name, "Serial stream closed");
                Ok(())
            }
            None => Err(PortError::NotOpen),
        }
    }
}

impl EventStream for SerialStream {
    fn event_loop(&mut self) -> Option<&mut EventLoopRunner> {
        self.event_loop.as_mut()
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        if !self.finalize_on_drop {
            return;
        }
        if let Some(runner) = self.event_loop.as_mut() {
            runner.shutdown();
        }
        // Field drop order releases the handle after the thread is gone.
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("event_loop", &self.event_loop_state())
            .finish()
    }
}
