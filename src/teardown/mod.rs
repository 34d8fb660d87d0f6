//! Safe disposal of a serial session and its stream.
//!
//! When a USB serial adapter is unplugged, naive disposal goes wrong in three
//! ways: the session reports itself closed and skips closing the stream, so
//! the OS handle leaks; closing the stream while its event thread is still
//! inside a wait makes that thread fail later on a dead handle; and because
//! the close fails, the drop-time cleanup still runs afterwards and repeats
//! the damage. [`safe_teardown`] avoids all three by turning off drop-time
//! cleanup first, stopping the event thread and waiting for it, and only then
//! closing the stream and the session, absorbing any error along the way.

pub mod event_loop;

pub use event_loop::{
    EventLoopOutcome, EventLoopRunner, EventLoopState, LineEvent, LineMonitor, LineState,
    ManualResetEvent, Pin, SerialLineMonitor, DEFAULT_POLL_INTERVAL, SHUTDOWN_WAIT,
};

use crate::port::PortError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// A resource that is closed explicitly and otherwise cleaned up on drop.
pub trait Disposable {
    /// Disable the drop-time cleanup; the caller closes explicitly.
    fn suppress_finalizer(&mut self);

    fn close(&mut self) -> Result<(), PortError>;
}

/// A byte stream that may own a background event thread.
pub trait EventStream: Disposable {
    /// The stream's event thread, if it has one.
    fn event_loop(&mut self) -> Option<&mut EventLoopRunner>;
}

/// Non-fatal problem observed during teardown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeardownAnomaly {
    #[error("stream has no event loop; skipped event thread shutdown")]
    EventLoopMissing,

    #[error("event thread panicked")]
    EventLoopPanicked,

    #[error("closing the stream failed: {0}")]
    StreamClose(String),

    #[error("closing the session failed: {0}")]
    SessionClose(String),

    #[error("{step} panicked: {message}")]
    Panicked { step: &'static str, message: String },
}

/// What [`safe_teardown`] did. Purely informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub event_loop: EventLoopOutcome,
    pub stream_closed: bool,
    pub session_closed: bool,
    pub anomalies: Vec<TeardownAnomaly>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Dispose of `session` and `stream` in an order that is safe even when the
/// device has been physically removed.
///
/// Never fails and never panics: every step is isolated, and problems are
/// logged and collected in the returned report. May block while the event
/// thread is brought down.
pub fn safe_teardown<S, T>(session: &mut S, stream: &mut T) -> TeardownReport
where
    S: Disposable + ?Sized,
    T: EventStream + ?Sized,
{
    let mut report = TeardownReport::default();

    if let Err(anomaly) = isolate("suppress_finalizer", || {
        session.suppress_finalizer();
        stream.suppress_finalizer();
    }) {
        report.anomalies.push(anomaly);
    }

    match isolate("event_loop_shutdown", || {
        stream.event_loop().map(EventLoopRunner::shutdown)
    }) {
        Ok(Some(outcome)) => {
            if outcome == EventLoopOutcome::Panicked {
                warn!("Serial event thread panicked before teardown");
                report.anomalies.push(TeardownAnomaly::EventLoopPanicked);
            }
            report.event_loop = outcome;
        }
        Ok(None) => {
            warn!(
                "Stream has no event loop; disposal continues without waiting for it"
            );
            report.anomalies.push(TeardownAnomaly::EventLoopMissing);
        }
        Err(anomaly) => report.anomalies.push(anomaly),
    }

    debug!("Closing serial stream");
    match isolate("stream_close", || stream.close()) {
        Ok(Ok(())) => report.stream_closed = true,
        Ok(Err(e)) => {
            debug!(error = %e, "Stream close failed");
            report.anomalies.push(TeardownAnomaly::StreamClose(e.to_string()));
        }
        Err(anomaly) => report.anomalies.push(anomaly),
    }

    debug!("Closing serial session");
    match isolate("session_close", || session.close()) {
        Ok(Ok(())) => report.session_closed = true,
        Ok(Err(e)) => {
            debug!(error = %e, "Session close failed");
            report.anomalies.push(TeardownAnomaly::SessionClose(e.to_string()));
        }
        Err(anomaly) => report.anomalies.push(anomaly),
    }

    report
}

fn isolate<R>(step: &'static str, f: impl FnOnce() -> R) -> Result<R, TeardownAnomaly> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(step, %message, "Teardown step panicked");
        TeardownAnomaly::Panicked { step, message }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockSession, MockStream};

    #[test]
    fn test_order_of_operations() {
        let mut session = MockSession::new();
        let mut stream = MockStream::with_event_loop();

        let report = safe_teardown(&mut session, &mut stream);

        assert!(report.is_clean(), "{:?}", report.anomalies);
        assert!(matches!(report.event_loop, EventLoopOutcome::Ended { .. }));
        assert!(session.finalizer_suppressed());
        assert!(stream.finalizer_suppressed());
        assert_eq!(
            stream.event_loop_state_at_close(),
            Some(EventLoopState::Ended)
        );
        assert!(report.stream_closed && report.session_closed);
    }

    #[test]
    fn test_panic_in_step_is_absorbed() {
        let mut session = MockSession::new();
        let mut stream = MockStream::without_event_loop().panic_on_close();

        let report = safe_teardown(&mut session, &mut stream);

        assert!(!report.stream_closed);
        assert!(report.session_closed);
        assert!(report
            .anomalies
            .iter()
            .any(|a| matches!(a, TeardownAnomaly::Panicked { step: "stream_close", .. })));
    }
}
