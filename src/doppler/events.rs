//! Structured narration of the tracker's internal state changes.

use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// A trend reached the certification count.
    TrendCertified { bin: usize },
    /// An established trend vanished and is held for a few frames.
    TrendWounded { bin: usize, count: u32 },
    /// A wounded trend reappeared before its grace period ran out.
    TrendRevived { bin: usize },
    /// A certified trend stayed away and is now searched for as a shift.
    TrendLost { bin: usize, count: u32 },
    /// Two peaks fell into one family; the later one was dropped.
    PeakMerged { bin: usize },
    /// A missing trend reappeared inside its own family.
    TrendMerged { origin: usize, bin: usize },
    /// A missing trend ran out its doppler window.
    MissingExpired { origin: usize },
    /// A missing trend found nothing to follow for too long.
    MissingAbandoned { origin: usize },
    SpeedFound {
        origin: usize,
        bin: usize,
        speed: f64,
        weight: f64,
    },
    /// The shift settled but implied an implausible speed.
    SpeedRejected { origin: usize, bin: usize, speed: f64 },
}

pub trait DiagnosticsSink: Send {
    fn record(&mut self, frame: u64, event: &TrackingEvent);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&mut self, frame: u64, event: &TrackingEvent) {
        match event {
            TrackingEvent::TrendCertified { bin } => {
                debug!("[doppler] [{frame}] trend at {bin} peaked")
            }
            TrackingEvent::TrendLost { bin, count } => {
                debug!("[doppler] [{frame}] trend at {bin} lost after {count} frames")
            }
            TrackingEvent::SpeedFound {
                origin,
                bin,
                speed,
                weight,
            } => debug!(
                "[doppler] [{frame}] speed {speed:.2} m/s (weight {weight:.3}) from {origin} to {bin}"
            ),
            TrackingEvent::SpeedRejected { origin, bin, speed } => debug!(
                "[doppler] [{frame}] rejected speed {speed:.2} m/s from {origin} to {bin}"
            ),
            TrackingEvent::MissingAbandoned { origin } => {
                debug!("[doppler] [{frame}] missing trend {origin} died prematurely")
            }
            other => trace!("[doppler] [{frame}] {other:?}"),
        }
    }
}

/// Shared in-memory record of events, handy for inspecting a run.
pub type EventLog = Arc<Mutex<Vec<TrackingEvent>>>;

impl DiagnosticsSink for EventLog {
    fn record(&mut self, _frame: u64, event: &TrackingEvent) {
        if let Ok(mut log) = self.lock() {
            log.push(event.clone());
        }
    }
}

/// Current frame number plus the sink events are routed to.
pub struct Diagnostics {
    frame: u64,
    sink: Box<dyn DiagnosticsSink>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Box::new(TracingSink))
    }
}

impl Diagnostics {
    pub fn new(sink: Box<dyn DiagnosticsSink>) -> Self {
        Self { frame: 0, sink }
    }

    pub(crate) fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn replace_sink(&mut self, sink: Box<dyn DiagnosticsSink>) -> Box<dyn DiagnosticsSink> {
        std::mem::replace(&mut self.sink, sink)
    }

    pub fn emit(&mut self, event: TrackingEvent) {
        self.sink.record(self.frame, &event);
    }
}
