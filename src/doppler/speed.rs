//! Reconnects missing trends with newly emerged ones and turns the frequency
//! pair into a speed.

use super::config::{BandConfiguration, BandMap};
use super::events::{Diagnostics, TrackingEvent};
use super::temperature::speed_of_sound;
use super::trend::TrendTable;
use crate::util::audio::lerp;

/// Weight given to a speed derived at `freq_min`; `freq_max` gets 1.0.
pub const MIN_SPEED_WEIGHT: f64 = 0.125;

/// A missing trend is dropped once it has gone this many frames without
/// anything to follow.
pub const MAX_SILENT_FRAMES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedCandidate {
    /// Metres per second.
    pub speed: f64,
    /// Confidence in `[MIN_SPEED_WEIGHT, 1.0]`.
    pub weight: f64,
    /// Mean of the approach and recession frequencies, in Hz.
    pub source_frequency: f64,
}

/// Source speed implied by hearing `approach_hz` before and `recede_hz`
/// after the pass, at `celsius`.
pub fn doppler_speed(approach_hz: f64, recede_hz: f64, celsius: f64) -> f64 {
    let sos = speed_of_sound(celsius);
    approach_hz / ((approach_hz + recede_hz) / 2.0) * sos - sos
}

/// Relative shifts grow with the carrier, so speeds measured on higher
/// tones are trusted more.
pub fn speed_weight(source_frequency: f64, freq_min: f64, freq_max: f64) -> f64 {
    let span = freq_max - freq_min;
    let position = if span > 0.0 {
        ((source_frequency - freq_min) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    (1.0 - MIN_SPEED_WEIGHT) * position + MIN_SPEED_WEIGHT
}

/// Frequency at a fractional bin position, interpolated between the two
/// neighbouring bins.
pub fn fuzzy_frequency(position: f64, bin_to_frequency: impl Fn(usize) -> f32) -> f64 {
    let position = position.max(0.0);
    let floor = position.floor();
    let low = bin_to_frequency(floor as usize) as f64;
    let high = bin_to_frequency(position.ceil() as usize) as f64;
    lerp(low, high, position - floor)
}

#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    candidates: Vec<SpeedCandidate>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates produced by the latest scan.
    pub fn candidates(&self) -> &[SpeedCandidate] {
        &self.candidates
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Walks every missing trend once, replacing the previous frame's
    /// candidates.
    pub fn scan(
        &mut self,
        table: &mut TrendTable,
        config: &BandConfiguration,
        bands: &BandMap,
        celsius: f64,
        bin_to_frequency: &dyn Fn(usize) -> f32,
        diag: &mut Diagnostics,
    ) -> &[SpeedCandidate] {
        self.candidates.clear();
        let candidates = &mut self.candidates;
        let (trends, missing) = table.split_mut();
        if trends.is_empty() {
            missing.clear();
            return candidates;
        }

        let families = config.family_boundary();
        let separations = config.max_freq_separation();
        let accept_after = config.min_frames_until_accept();
        let speed_range = config.min_speed()..=config.max_speed();
        let (freq_min, freq_max) = (config.freq_min() as f64, config.freq_max() as f64);

        missing.retain_mut(|m| {
            if m.silent_frames >= MAX_SILENT_FRAMES {
                diag.emit(TrackingEvent::MissingAbandoned { origin: m.origin });
                return false;
            }

            let interest = m.current_interest.min(trends.len() - 1);
            let limit = interest.saturating_sub(bands.pick(separations, interest));
            for i in (limit..=interest).rev() {
                let found = trends[i].count;
                if found == 0 {
                    continue;
                }

                if m.origin.abs_diff(i) < bands.pick(families, i) {
                    // The same tone came back; this was a dropout, not a shift.
                    if i == m.origin {
                        trends[i].count = m.old_count + found;
                    } else {
                        trends[m.origin].count = m.old_count + found;
                        trends[i].count = 0;
                    }
                    diag.emit(TrackingEvent::TrendMerged {
                        origin: m.origin,
                        bin: i,
                    });
                    return false;
                }

                if i == m.current_interest && found > accept_after {
                    let approach = fuzzy_frequency(m.index as f64, bin_to_frequency);
                    let recede = fuzzy_frequency(trends[i].index as f64, bin_to_frequency);
                    let speed = doppler_speed(approach, recede, celsius);
                    if speed_range.contains(&speed) {
                        let source_frequency = (approach + recede) / 2.0;
                        let weight = speed_weight(source_frequency, freq_min, freq_max);
                        candidates.push(SpeedCandidate {
                            speed,
                            weight,
                            source_frequency,
                        });
                        diag.emit(TrackingEvent::SpeedFound {
                            origin: m.origin,
                            bin: i,
                            speed,
                            weight,
                        });
                    } else {
                        diag.emit(TrackingEvent::SpeedRejected {
                            origin: m.origin,
                            bin: i,
                            speed,
                        });
                    }
                    return false;
                }

                m.current_interest = i;
                m.signature = trends[i].signature;
                m.silent_frames = 0;
                return true;
            }

            m.silent_frames += 1;
            true
        });

        candidates
    }
}
