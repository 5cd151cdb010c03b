//! Magnitude spectra for the tracking engine, built on a real-input FFT.

use crate::util::audio::apply_window;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::sync::Arc;
use tracing::warn;

/// Turns one frame of time-domain samples into a magnitude spectrum and maps
/// between bin indices and frequencies.
pub trait SpectrumSource {
    /// Samples consumed by [`SpectrumSource::transform`].
    fn frame_size(&self) -> usize;

    /// Writes `frame_size / 2 + 1` magnitudes into `magnitudes`.
    fn transform(&mut self, samples: &[f32], magnitudes: &mut [f32]);

    fn bin_to_frequency(&self, bin: usize) -> f32;

    fn frequency_to_bin(&self, frequency: f32) -> usize;

    /// Called when the engine is reconfigured with a different frame size.
    fn resize(&mut self, frame_size: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
}

impl WindowKind {
    fn coefficients(self, len: usize) -> Vec<f32> {
        match self {
            WindowKind::Rectangular => vec![1.0; len],
            WindowKind::Hann => (0..len)
                .map(|n| {
                    let phase = (n as f32) * core::f32::consts::TAU / (len as f32);
                    0.5 * (1.0 - phase.cos())
                })
                .collect(),
        }
    }
}

pub struct FftSpectrum {
    sample_rate: f32,
    size: usize,
    window_kind: WindowKind,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    buf: Vec<f32>,
    out: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for FftSpectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftSpectrum")
            .field("sample_rate", &self.sample_rate)
            .field("size", &self.size)
            .field("window", &self.window_kind)
            .finish_non_exhaustive()
    }
}

impl FftSpectrum {
    pub fn new(size: usize, sample_rate: f32) -> Self {
        Self::with_window(size, sample_rate, WindowKind::default())
    }

    pub fn with_window(size: usize, sample_rate: f32, window_kind: WindowKind) -> Self {
        let fft = RealFftPlanner::new().plan_fft_forward(size);
        Self {
            sample_rate: sample_rate.max(1.0),
            size,
            window_kind,
            scratch: vec![Complex32::default(); fft.get_scratch_len()],
            window: window_kind.coefficients(size),
            buf: vec![0.0; size],
            out: vec![Complex32::default(); size / 2 + 1],
            fft,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn bin_width(&self) -> f32 {
        self.sample_rate / self.size as f32
    }
}

impl SpectrumSource for FftSpectrum {
    fn frame_size(&self) -> usize {
        self.size
    }

    fn transform(&mut self, samples: &[f32], magnitudes: &mut [f32]) {
        magnitudes.fill(0.0);
        if samples.len() != self.size {
            warn!(
                "[spectrum] expected {} samples, got {}; emitting silence",
                self.size,
                samples.len()
            );
            return;
        }

        self.buf.copy_from_slice(samples);
        apply_window(&mut self.buf, &self.window);
        self.out.fill(Complex32::default());
        if let Err(err) = self
            .fft
            .process_with_scratch(&mut self.buf, &mut self.out, &mut self.scratch)
        {
            warn!("[spectrum] fft failed: {err}");
            return;
        }

        for (value, bin) in magnitudes.iter_mut().zip(self.out.iter()) {
            *value = bin.norm();
        }
    }

    fn bin_to_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_width()
    }

    fn frequency_to_bin(&self, frequency: f32) -> usize {
        if !frequency.is_finite() || frequency <= 0.0 {
            return 0;
        }
        ((frequency / self.bin_width()).round() as usize).min(self.size / 2)
    }

    fn resize(&mut self, frame_size: usize) {
        if frame_size == self.size {
            return;
        }
        *self = Self::with_window(frame_size, self.sample_rate, self.window_kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn sine_lands_in_expected_bin() {
        let mut source = FftSpectrum::new(1024, 22_050.0);
        let mut magnitudes = vec![0.0; 513];
        let freq = 4_000.0;
        source.transform(&sine(freq, 22_050.0, 1024), &mut magnitudes);

        let max_index = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(idx, _)| idx)
            .unwrap();
        assert_eq!(max_index, source.frequency_to_bin(freq));
    }

    #[test]
    fn bin_frequency_mapping_is_consistent() {
        let source = FftSpectrum::new(1024, 22_050.0);
        for bin in [0usize, 23, 300, 464, 512] {
            assert_eq!(source.frequency_to_bin(source.bin_to_frequency(bin)), bin);
        }
        assert_eq!(source.frequency_to_bin(500.0), 23);
        assert_eq!(source.frequency_to_bin(10_000.0), 464);
        assert_eq!(source.frequency_to_bin(1.0e9), 512);
        assert_eq!(source.frequency_to_bin(-5.0), 0);
    }

    #[test]
    fn wrong_length_produces_silence() {
        let mut source = FftSpectrum::with_window(256, 22_050.0, WindowKind::Rectangular);
        let mut magnitudes = vec![1.0; 129];
        source.transform(&[1.0; 100], &mut magnitudes);
        assert!(magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn resize_replans() {
        let mut source = FftSpectrum::new(1024, 22_050.0);
        source.resize(2048);
        assert_eq!(source.frame_size(), 2048);
        let mut magnitudes = vec![0.0; 1025];
        source.transform(&sine(1_000.0, 22_050.0, 2048), &mut magnitudes);
        assert!(magnitudes.iter().any(|&m| m > 0.0));
    }
}
