//! Band-aware local-maximum search over a magnitude spectrum.

use crate::doppler::config::BandMap;

#[derive(Debug, Clone, Default)]
pub struct PeakDetector {
    peaks: Vec<usize>,
}

impl PeakDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peaks found by the last call to [`PeakDetector::find_peaks`].
    pub fn peaks(&self) -> &[usize] {
        &self.peaks
    }

    /// Collects every bin in the band map's range that strictly dominates
    /// `widths[band(x)]` neighbours on each side. Result is ascending.
    pub fn find_peaks(&mut self, spectrum: &[f32], widths: &[usize], bands: &BandMap) -> &[usize] {
        self.peaks.clear();
        let (Some(&first), Some(&last)) = (widths.first(), widths.last()) else {
            return &self.peaks;
        };

        let lo = bands.start() + first;
        let hi = bands.end().saturating_sub(last).min(spectrum.len());
        for x in lo..hi {
            let width = widths[bands.band(x).min(widths.len() - 1)];
            if is_peak(spectrum, x, width) {
                self.peaks.push(x);
            }
        }
        &self.peaks
    }

    pub fn clear(&mut self) {
        self.peaks.clear();
    }
}

fn is_peak(spectrum: &[f32], x: usize, width: usize) -> bool {
    if x < width || x + width >= spectrum.len() {
        return false;
    }
    let value = spectrum[x];
    (1..=width).all(|i| spectrum[x - i] < value && spectrum[x + i] < value)
}
