//! Per-bin trend arena and the wounded/missing holding lists.
//!
//! Slots are addressed by bin index and never destroyed; a slot that stops
//! being fed is snapshotted into the wounded list (if it was established)
//! and reset. Wounded trends either come back within a few frames or, when
//! certified, become missing trends that the speed estimator chases.

use super::config::{BandConfiguration, BandMap};
use super::events::{Diagnostics, TrackingEvent};

/// Frames a vanished trend may stay away and still be revived in place.
pub const WOUNDED_LIFESPAN: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Trend {
    /// Running average of the bins that fed this trend.
    pub index: f32,
    /// Magnitude of the most recent contributing peak.
    pub signature: f32,
    /// Frames this trend has been fed.
    pub count: u32,
    /// Fed during the current frame.
    pub touched: bool,
}

impl Trend {
    fn idle(bin: usize) -> Self {
        Self {
            index: bin as f32,
            ..Self::default()
        }
    }

    pub fn reset(&mut self, bin: usize) {
        self.count = 0;
        self.index = bin as f32;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WoundedTrend {
    pub snapshot: Trend,
    pub origin: usize,
    pub lifespan: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissingTrend {
    pub origin: usize,
    /// Fractional bin position the trend had when it vanished.
    pub index: f32,
    pub signature: f32,
    /// Bin currently suspected to carry the shifted tone.
    pub current_interest: usize,
    pub silent_frames: u32,
    pub old_count: u32,
    pub lifespan: u32,
}

impl MissingTrend {
    fn from_wounded(wounded: &WoundedTrend, lifespan: u32) -> Self {
        Self {
            origin: wounded.origin,
            index: wounded.snapshot.index,
            signature: wounded.snapshot.signature,
            current_interest: wounded.origin,
            silent_frames: 0,
            old_count: wounded.snapshot.count,
            lifespan,
        }
    }
}

/// Lifecycle stage of one bin slot as seen after the latest update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Active,
    Stale,
    Wounded,
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct TrendTable {
    trends: Vec<Trend>,
    wounded: Vec<WoundedTrend>,
    missing: Vec<MissingTrend>,
}

impl TrendTable {
    pub fn new(bins: usize) -> Self {
        Self {
            trends: (0..bins).map(Trend::idle).collect(),
            wounded: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trends.is_empty()
    }

    pub fn trend(&self, bin: usize) -> Option<&Trend> {
        self.trends.get(bin)
    }

    pub fn trends(&self) -> &[Trend] {
        &self.trends
    }

    pub fn wounded(&self) -> &[WoundedTrend] {
        &self.wounded
    }

    pub fn missing(&self) -> &[MissingTrend] {
        &self.missing
    }

    pub(crate) fn split_mut(&mut self) -> (&mut [Trend], &mut Vec<MissingTrend>) {
        (&mut self.trends, &mut self.missing)
    }

    pub fn slot_state(&self, bin: usize) -> SlotState {
        if self.missing.iter().any(|m| m.origin == bin) {
            return SlotState::Missing;
        }
        if self.wounded.iter().any(|w| w.origin == bin) {
            return SlotState::Wounded;
        }
        match self.trends.get(bin) {
            Some(trend) if trend.count > 0 && trend.touched => SlotState::Active,
            Some(trend) if trend.count > 0 => SlotState::Stale,
            _ => SlotState::Idle,
        }
    }

    /// Drops every trend and holding-list entry.
    pub fn clear(&mut self) {
        for (bin, trend) in self.trends.iter_mut().enumerate() {
            *trend = Trend::idle(bin);
        }
        self.wounded.clear();
        self.missing.clear();
    }

    pub fn resize(&mut self, bins: usize) {
        *self = Self::new(bins);
    }

    /// Advances every trend by one frame given this frame's peaks, which
    /// must be ascending.
    pub fn update(
        &mut self,
        spectrum: &[f32],
        peaks: &[usize],
        config: &BandConfiguration,
        bands: &BandMap,
        diag: &mut Diagnostics,
    ) {
        self.age_missing(diag);
        self.age_wounded(config, diag);

        let len = self.trends.len();
        if len == 0 {
            return;
        }

        let families = config.family_boundary();
        let wound_at = config.wounded_threshold();
        let certified = config.min_trend_count_until_certified();

        let mut peaks = peaks.iter().copied().filter(|&p| p < len).peekable();
        // Touched flags are cleared for bins entering the leading edge of the
        // family window, and bins leaving its trailing edge are retired.
        let mut cleared = 0;
        let mut checked = 0;
        for x in 0..len {
            let family = bands.pick(families, x);

            let lead = (x + family).min(len - 1);
            while cleared <= lead {
                self.trends[cleared].touched = false;
                cleared += 1;
            }

            while checked + family <= x {
                self.retire_if_untouched(checked, wound_at, diag);
                checked += 1;
            }

            while peaks.next_if(|&p| p < x).is_some() {}
            if peaks.next_if_eq(&x).is_some() {
                self.apply_peak(x, family, spectrum, certified, diag);
            }
        }

        for bin in checked..len {
            self.retire_if_untouched(bin, wound_at, diag);
        }
    }

    fn age_missing(&mut self, diag: &mut Diagnostics) {
        self.missing.retain_mut(|missing| {
            missing.lifespan = missing.lifespan.saturating_sub(1);
            if missing.lifespan == 0 {
                diag.emit(TrackingEvent::MissingExpired {
                    origin: missing.origin,
                });
                false
            } else {
                true
            }
        });
    }

    fn age_wounded(&mut self, config: &BandConfiguration, diag: &mut Diagnostics) {
        let certified = config.min_trend_count_until_certified();
        let window = config.max_doppler_window();
        let missing = &mut self.missing;
        self.wounded.retain_mut(|wounded| {
            wounded.lifespan = wounded.lifespan.saturating_sub(1);
            if wounded.lifespan > 0 {
                return true;
            }
            if wounded.snapshot.count >= certified {
                diag.emit(TrackingEvent::TrendLost {
                    bin: wounded.origin,
                    count: wounded.snapshot.count,
                });
                missing.push(MissingTrend::from_wounded(wounded, window));
            }
            false
        });
    }

    fn retire_if_untouched(&mut self, bin: usize, wound_at: u32, diag: &mut Diagnostics) {
        let trend = self.trends[bin];
        if trend.touched {
            return;
        }
        if trend.count > 0 && trend.count >= wound_at {
            diag.emit(TrackingEvent::TrendWounded {
                bin,
                count: trend.count,
            });
            self.wounded.push(WoundedTrend {
                snapshot: trend,
                origin: bin,
                lifespan: WOUNDED_LIFESPAN,
            });
        }
        self.trends[bin].reset(bin);
    }

    fn apply_peak(
        &mut self,
        x: usize,
        family: usize,
        spectrum: &[f32],
        certified: u32,
        diag: &mut Diagnostics,
    ) {
        let len = self.trends.len();

        if let Some(pos) = self
            .wounded
            .iter()
            .position(|wounded| wounded.origin.abs_diff(x) < family)
        {
            let wounded = self.wounded.remove(pos);
            let origin = wounded.origin;
            self.trends[origin] = Trend {
                touched: self.trends[origin].touched,
                ..wounded.snapshot
            };
            // Whatever built up around the gap belongs to the revived trend.
            for f in 1..family {
                if let Some(lo) = origin.checked_sub(f) {
                    self.trends[lo].reset(lo);
                }
                if origin + f < len {
                    self.trends[origin + f].reset(origin + f);
                }
            }
            diag.emit(TrackingEvent::TrendRevived { bin: origin });
        }

        let mut winner = x;
        let mut best = self.trends[x].count;
        for f in 1..family {
            if let Some(lo) = x.checked_sub(f) {
                if self.trends[lo].count > best {
                    winner = lo;
                    best = self.trends[lo].count;
                }
            }
            if x + f < len && self.trends[x + f].count > best {
                winner = x + f;
                best = self.trends[x + f].count;
            }
        }

        let trend = &mut self.trends[winner];
        if trend.touched {
            diag.emit(TrackingEvent::PeakMerged { bin: x });
            return;
        }

        let count = trend.count as f32;
        trend.index = (trend.index * count + x as f32) / (count + 1.0);
        trend.count += 1;
        trend.signature = spectrum.get(x).copied().unwrap_or_default();
        trend.touched = true;
        if trend.count == certified {
            diag.emit(TrackingEvent::TrendCertified { bin: winner });
        }
    }
}
