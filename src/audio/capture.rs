//! Rotating i16 capture ring and the tap thread that fills it from a PCM
//! stream (signed 16-bit little-endian, mono).

use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

const CHANNEL_CAPACITY: usize = 64;

/// Fixed-length ring of the most recent samples. Once full, `rotation()` is
/// the index of the oldest sample, i.e. the logical start of the window.
#[derive(Debug, Clone)]
pub struct RotatingCapture {
    buffer: Vec<i16>,
    write: usize,
    filled: usize,
}

impl RotatingCapture {
    pub fn new(len: usize) -> Self {
        Self {
            buffer: vec![0; len.max(1)],
            write: 0,
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.buffer.len()
    }

    pub fn rotation(&self) -> usize {
        self.write
    }

    pub fn push(&mut self, samples: &[i16]) {
        let len = self.buffer.len();
        // Only the tail can survive a chunk longer than the ring.
        let samples = &samples[samples.len().saturating_sub(len)..];
        for &sample in samples {
            self.buffer[self.write] = sample;
            self.write = (self.write + 1) % len;
        }
        self.filled = (self.filled + samples.len()).min(len);
    }

    pub fn frame(&self, position: u64) -> CaptureFrame {
        CaptureFrame {
            samples: self.buffer.clone(),
            rotation: self.write,
            position,
        }
    }
}

/// Snapshot of the capture ring handed to the engine thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub samples: Vec<i16>,
    pub rotation: usize,
    /// Samples consumed from the stream when this snapshot was taken.
    pub position: u64,
}

impl CaptureFrame {
    /// Stream time of the newest sample in the frame.
    pub fn elapsed(&self, sample_rate: f32) -> Duration {
        if sample_rate <= 0.0 || !sample_rate.is_finite() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.position as f64 / sample_rate as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapConfig {
    /// Length of the capture ring handed out with every frame.
    pub ring_len: usize,
    /// Fresh samples read between two frames.
    pub hop: usize,
}

/// Spawns the tap thread. The returned channel closes when the stream ends
/// or fails; the thread yields the number of frames it forwarded.
pub fn spawn_frame_tap<R>(
    reader: R,
    config: TapConfig,
) -> io::Result<(AsyncReceiver<CaptureFrame>, JoinHandle<u64>)>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = async_channel::bounded(CHANNEL_CAPACITY);
    let handle = thread::Builder::new()
        .name("dopplermeter-capture-tap".into())
        .spawn(move || tap_loop(reader, config, sender))?;
    Ok((receiver, handle))
}

fn tap_loop<R: Read>(mut reader: R, config: TapConfig, sender: AsyncSender<CaptureFrame>) -> u64 {
    let hop = config.hop.max(1);
    let mut ring = RotatingCapture::new(config.ring_len);
    let mut bytes = vec![0u8; hop * 2];
    let mut chunk = Vec::with_capacity(hop);
    let mut position = 0u64;
    let mut forwarded = 0u64;

    info!(
        "[capture] tap started: ring {} samples, hop {hop}",
        ring.len()
    );

    loop {
        let read = match read_samples(&mut reader, &mut bytes, &mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                error!("[capture] read failed: {err}");
                break;
            }
        };

        ring.push(&chunk);
        position += read as u64;
        if !ring.is_full() {
            continue;
        }

        if sender.send_blocking(ring.frame(position)).is_err() {
            debug!("[capture] frame receiver dropped; stopping tap");
            break;
        }
        forwarded += 1;
    }

    info!("[capture] tap finished after {position} samples, {forwarded} frames");
    forwarded
}

/// Reads up to `bytes.len() / 2` samples into `out`. Returns the sample count;
/// zero means end of stream. A dangling odd byte at the end is dropped.
fn read_samples<R: Read>(reader: &mut R, bytes: &mut [u8], out: &mut Vec<i16>) -> io::Result<usize> {
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    out.clear();
    out.extend(
        bytes[..filled - filled % 2]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
    Ok(out.len())
}
