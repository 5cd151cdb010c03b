//! Drives a [`DopplerEngine`] from capture frames on a worker thread and
//! turns per-frame candidates into reported speeds.

use crate::audio::capture::CaptureFrame;
use crate::doppler::DopplerEngine;
use crate::doppler::config::BandConfiguration;
use crate::doppler::speed::SpeedCandidate;
use crate::doppler::temperature::TemperatureHandle;
use crate::dsp::Reconfigurable;
use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender, TrySendError};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a detection is held open for better-weighted candidates.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedSpeed {
    pub id: u64,
    /// Metres per second.
    pub speed: f64,
    /// Stream time at which the speed was reported.
    pub at: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    SpeedDetected(DetectedSpeed),
    SpeedRemoved(DetectedSpeed),
    HighestChanged(Option<DetectedSpeed>),
    Finished { frames: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    speed: f64,
    weight: f64,
    since: Duration,
}

/// Holds the best-weighted candidate for a report interval after the first
/// detection, then publishes it into the session's speed list.
#[derive(Debug, Clone)]
pub struct SpeedReporter {
    interval: Duration,
    pending: Option<Pending>,
    speeds: Vec<DetectedSpeed>,
    highest: Option<DetectedSpeed>,
    next_id: u64,
}

impl Default for SpeedReporter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

impl SpeedReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            speeds: Vec::new(),
            highest: None,
            next_id: 0,
        }
    }

    pub fn speeds(&self) -> &[DetectedSpeed] {
        &self.speeds
    }

    pub fn highest(&self) -> Option<DetectedSpeed> {
        self.highest
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one frame's candidates. Returns the speed published on this
    /// frame, if the hold interval has run out.
    pub fn observe(&mut self, candidates: &[SpeedCandidate], now: Duration) -> Option<DetectedSpeed> {
        for candidate in candidates {
            let pending = self.pending.get_or_insert(Pending {
                speed: candidate.speed,
                weight: 0.0,
                since: now,
            });
            if candidate.weight > pending.weight {
                pending.speed = candidate.speed;
                pending.weight = candidate.weight;
            }
        }

        let due = self
            .pending
            .is_some_and(|p| now.saturating_sub(p.since) > self.interval);
        if due { self.flush(now) } else { None }
    }

    /// Publishes the held candidate immediately.
    pub fn flush(&mut self, now: Duration) -> Option<DetectedSpeed> {
        let pending = self.pending.take()?;
        Some(self.record(pending.speed, now))
    }

    fn record(&mut self, speed: f64, at: Duration) -> DetectedSpeed {
        let detected = DetectedSpeed {
            id: self.next_id,
            speed,
            at,
        };
        self.next_id += 1;
        self.speeds.push(detected);
        if self.highest.is_none_or(|h| speed > h.speed) {
            self.highest = Some(detected);
        }
        detected
    }

    /// Forgets every speed of the session, returning them.
    pub fn clear(&mut self) -> Vec<DetectedSpeed> {
        self.highest = None;
        std::mem::take(&mut self.speeds)
    }

    pub fn remove(&mut self, id: u64) -> Option<DetectedSpeed> {
        let position = self.speeds.iter().position(|s| s.id == id)?;
        let removed = self.speeds.remove(position);
        if self.highest.is_some_and(|h| h.id == id) {
            self.highest = self
                .speeds
                .iter()
                .copied()
                .reduce(|best, s| if s.speed > best.speed { s } else { best });
        }
        Some(removed)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub band: BandConfiguration,
    pub sample_rate: f32,
    pub temperature_c: f64,
    pub report_interval: Duration,
}

enum Command {
    Reconfigure(BandConfiguration),
}

/// Handle to the engine worker. Dropping the capture side of the frame
/// channel ends the worker; [`Controller::join`] waits for it.
#[derive(Debug)]
pub struct Controller {
    events: AsyncReceiver<ControllerEvent>,
    event_tx: AsyncSender<ControllerEvent>,
    commands: AsyncSender<Command>,
    reporter: Arc<Mutex<SpeedReporter>>,
    temperature: TemperatureHandle,
    worker: JoinHandle<u64>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Reconfigure(_) => f.write_str("Reconfigure"),
        }
    }
}

impl Controller {
    pub fn spawn(config: ControllerConfig, frames: AsyncReceiver<CaptureFrame>) -> io::Result<Self> {
        let (event_tx, events) = async_channel::bounded(EVENT_CAPACITY);
        let (commands, command_rx) = async_channel::unbounded();
        let reporter = Arc::new(Mutex::new(SpeedReporter::new(config.report_interval)));

        let engine = DopplerEngine::new(config.band, config.sample_rate);
        engine.set_temperature(config.temperature_c);
        let temperature = engine.temperature_handle();

        let worker = Worker {
            engine,
            sample_rate: config.sample_rate,
            frames,
            commands: command_rx,
            events: event_tx.clone(),
            reporter: Arc::clone(&reporter),
        };
        let worker = thread::Builder::new()
            .name("dopplermeter-engine".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            events,
            event_tx,
            commands,
            reporter,
            temperature,
            worker,
        })
    }

    /// Event queue of the session. Events are never waited on: once the
    /// queue is full further events are dropped with a warning, so drain it
    /// regularly.
    pub fn events(&self) -> &AsyncReceiver<ControllerEvent> {
        &self.events
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.temperature.set(celsius);
    }

    /// Applies a new band configuration from the next frame on.
    pub fn reconfigure(&self, band: BandConfiguration) {
        if self.commands.try_send(Command::Reconfigure(band)).is_err() {
            warn!("[controller] engine worker gone; configuration dropped");
        }
    }

    pub fn detected_speeds(&self) -> Vec<DetectedSpeed> {
        lock(&self.reporter).speeds().to_vec()
    }

    pub fn highest_speed(&self) -> Option<DetectedSpeed> {
        lock(&self.reporter).highest()
    }

    pub fn clear_speeds(&self) -> Vec<DetectedSpeed> {
        info!("[controller] clearing speeds");
        clear_speeds(&self.reporter, &self.event_tx)
    }

    pub fn remove_speed(&self, id: u64) -> Option<DetectedSpeed> {
        remove_speed(&self.reporter, &self.event_tx, id)
    }

    /// Waits for the worker to drain the frame channel. Returns the number of
    /// frames processed.
    pub fn join(self) -> u64 {
        self.worker.join().unwrap_or_else(|_| {
            warn!("[controller] engine worker panicked");
            0
        })
    }
}

fn lock(reporter: &Mutex<SpeedReporter>) -> MutexGuard<'_, SpeedReporter> {
    reporter.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queues an event without waiting for the consumer. Returns `false` when the
/// event was dropped.
fn emit(events: &AsyncSender<ControllerEvent>, event: ControllerEvent) -> bool {
    match events.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!("[controller] event queue full; dropped {event:?}");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[controller] event receiver dropped");
            false
        }
    }
}

fn clear_speeds(
    reporter: &Mutex<SpeedReporter>,
    events: &AsyncSender<ControllerEvent>,
) -> Vec<DetectedSpeed> {
    let (cleared, had_highest) = {
        let mut reporter = lock(reporter);
        let had_highest = reporter.highest().is_some();
        (reporter.clear(), had_highest)
    };
    for speed in &cleared {
        emit(events, ControllerEvent::SpeedRemoved(*speed));
    }
    if had_highest {
        emit(events, ControllerEvent::HighestChanged(None));
    }
    cleared
}

fn remove_speed(
    reporter: &Mutex<SpeedReporter>,
    events: &AsyncSender<ControllerEvent>,
    id: u64,
) -> Option<DetectedSpeed> {
    let (removed, before, after) = {
        let mut reporter = lock(reporter);
        let before = reporter.highest();
        let removed = reporter.remove(id);
        (removed, before, reporter.highest())
    };
    let removed = removed?;
    emit(events, ControllerEvent::SpeedRemoved(removed));
    if before != after {
        emit(events, ControllerEvent::HighestChanged(after));
    }
    Some(removed)
}

struct Worker {
    engine: DopplerEngine,
    sample_rate: f32,
    frames: AsyncReceiver<CaptureFrame>,
    commands: AsyncReceiver<Command>,
    events: AsyncSender<ControllerEvent>,
    reporter: Arc<Mutex<SpeedReporter>>,
}

impl Worker {
    fn run(mut self) -> u64 {
        info!("[controller] engine worker started");
        let mut now = Duration::ZERO;

        while let Ok(frame) = self.frames.recv_blocking() {
            while let Ok(Command::Reconfigure(band)) = self.commands.try_recv() {
                self.engine.update_config(band);
            }

            now = frame.elapsed(self.sample_rate);
            if !self.engine.push_frame(&frame.samples, frame.rotation) {
                continue;
            }
            self.engine.next_frame();

            let reported = lock(&self.reporter).observe(self.engine.speeds(), now);
            if let Some(speed) = reported {
                self.publish(speed);
            }
        }

        let leftover = lock(&self.reporter).flush(now);
        if let Some(speed) = leftover {
            self.publish(speed);
        }

        let frames = self.engine.frame_count();
        info!("[controller] engine worker finished after {frames} frames");
        emit(&self.events, ControllerEvent::Finished { frames });
        frames
    }

    fn publish(&self, speed: DetectedSpeed) {
        info!("[controller] speed detected: {:.2} m/s", speed.speed);
        let highest = lock(&self.reporter).highest();
        let new_highest = highest.is_some_and(|h| h.id == speed.id);

        if emit(&self.events, ControllerEvent::SpeedDetected(speed)) && new_highest {
            emit(&self.events, ControllerEvent::HighestChanged(highest));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(speed: f64, weight: f64) -> SpeedCandidate {
        SpeedCandidate {
            speed,
            weight,
            source_frequency: 0.0,
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn reporter_holds_best_weight_for_interval() {
        let mut reporter = SpeedReporter::default();
        assert_eq!(reporter.observe(&[candidate(30.0, 0.4)], ms(1_000)), None);
        assert!(reporter.is_pending());
        assert_eq!(reporter.observe(&[candidate(35.0, 0.9), candidate(20.0, 0.5)], ms(1_200)), None);
        assert_eq!(reporter.observe(&[candidate(40.0, 0.6)], ms(1_400)), None);
        // Exactly the interval is not enough.
        assert_eq!(reporter.observe(&[], ms(1_500)), None);

        let reported = reporter.observe(&[], ms(1_550)).expect("interval elapsed");
        assert_eq!(reported.speed, 35.0);
        assert_eq!(reported.at, ms(1_550));
        assert!(!reporter.is_pending());
        assert_eq!(reporter.speeds(), &[reported]);
        assert_eq!(reporter.highest(), Some(reported));
    }

    #[test]
    fn reporter_tracks_highest_across_removals() {
        let mut reporter = SpeedReporter::new(Duration::ZERO);
        let a = reporter.observe(&[candidate(30.0, 0.5)], ms(0));
        assert_eq!(a, None);
        let a = reporter.flush(ms(10)).expect("pending");
        reporter.observe(&[candidate(50.0, 0.5)], ms(20));
        let b = reporter.flush(ms(30)).expect("pending");
        reporter.observe(&[candidate(40.0, 0.5)], ms(40));
        let c = reporter.flush(ms(50)).expect("pending");

        assert_eq!(reporter.highest(), Some(b));
        assert_eq!(reporter.remove(b.id), Some(b));
        assert_eq!(reporter.highest(), Some(c));
        assert_eq!(reporter.remove(b.id), None);
        assert_eq!(reporter.remove(a.id), Some(a));
        assert_eq!(reporter.highest(), Some(c));
        assert_eq!(reporter.remove(c.id), Some(c));
        assert_eq!(reporter.highest(), None);
    }

    #[test]
    fn clearing_resets_highest() {
        let mut reporter = SpeedReporter::new(Duration::ZERO);
        reporter.observe(&[candidate(12.0, 0.3)], ms(0));
        reporter.observe(&[], ms(1));
        assert_eq!(reporter.speeds().len(), 1);
        let cleared = reporter.clear();
        assert_eq!(cleared.len(), 1);
        assert!(reporter.speeds().is_empty());
        assert_eq!(reporter.highest(), None);
    }

    fn session(speeds: &[f64]) -> Mutex<SpeedReporter> {
        let mut reporter = SpeedReporter::new(Duration::ZERO);
        for (i, &speed) in speeds.iter().enumerate() {
            reporter.observe(&[candidate(speed, 0.5)], ms(i as u64 * 10));
            reporter.flush(ms(i as u64 * 10 + 5));
        }
        Mutex::new(reporter)
    }

    fn drain(events: &AsyncReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn clearing_announces_every_removal() {
        let reporter = session(&[30.0, 50.0]);
        let speeds = lock(&reporter).speeds().to_vec();
        let (tx, rx) = async_channel::bounded(8);

        assert_eq!(clear_speeds(&reporter, &tx), speeds);
        assert_eq!(
            drain(&rx),
            vec![
                ControllerEvent::SpeedRemoved(speeds[0]),
                ControllerEvent::SpeedRemoved(speeds[1]),
                ControllerEvent::HighestChanged(None),
            ]
        );

        assert!(clear_speeds(&reporter, &tx).is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn removal_announces_highest_only_when_it_changes() {
        let reporter = session(&[30.0, 50.0, 40.0]);
        let speeds = lock(&reporter).speeds().to_vec();
        let (a, b, c) = (speeds[0], speeds[1], speeds[2]);
        let (tx, rx) = async_channel::bounded(8);

        assert_eq!(remove_speed(&reporter, &tx, a.id), Some(a));
        assert_eq!(drain(&rx), vec![ControllerEvent::SpeedRemoved(a)]);

        assert_eq!(remove_speed(&reporter, &tx, b.id), Some(b));
        assert_eq!(
            drain(&rx),
            vec![
                ControllerEvent::SpeedRemoved(b),
                ControllerEvent::HighestChanged(Some(c)),
            ]
        );

        assert_eq!(remove_speed(&reporter, &tx, b.id), None);
        assert!(drain(&rx).is_empty());

        assert_eq!(remove_speed(&reporter, &tx, c.id), Some(c));
        assert_eq!(
            drain(&rx),
            vec![
                ControllerEvent::SpeedRemoved(c),
                ControllerEvent::HighestChanged(None),
            ]
        );
    }

    #[test]
    fn full_event_queue_drops_instead_of_blocking() {
        let (tx, rx) = async_channel::bounded(1);
        assert!(emit(&tx, ControllerEvent::Finished { frames: 1 }));
        assert!(!emit(&tx, ControllerEvent::Finished { frames: 2 }));
        assert_eq!(drain(&rx), vec![ControllerEvent::Finished { frames: 1 }]);

        drop(rx);
        assert!(!emit(&tx, ControllerEvent::Finished { frames: 3 }));
    }

    #[test]
    fn worker_finishes_when_capture_closes() {
        let (frames_tx, frames_rx) = async_channel::bounded(8);
        let config = ControllerConfig {
            band: BandConfiguration::default(),
            sample_rate: 22_050.0,
            temperature_c: 20.0,
            report_interval: DEFAULT_REPORT_INTERVAL,
        };
        let controller = Controller::spawn(config, frames_rx).expect("spawn worker");
        controller.set_temperature(15.0);
        controller.reconfigure(BandConfiguration::default());

        for i in 0..3u64 {
            let frame = CaptureFrame {
                samples: vec![0; 1024],
                rotation: 0,
                position: (i + 1) * 1024,
            };
            frames_tx.send_blocking(frame).expect("worker alive");
        }
        // Too short for a frame; skipped.
        frames_tx
            .send_blocking(CaptureFrame {
                samples: vec![0; 10],
                rotation: 0,
                position: 4096,
            })
            .expect("worker alive");
        drop(frames_tx);

        let events = controller.events().clone();
        assert_eq!(controller.join(), 3);
        let collected: Vec<ControllerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(collected, vec![ControllerEvent::Finished { frames: 3 }]);
    }
}
