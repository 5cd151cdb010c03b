//! Tunable, per-frequency-band parameters for the tracking engine.
//!
//! Every width-like parameter is stored per band so that it can grow with
//! frequency: a given speed produces a larger absolute shift (in bins) on a
//! higher carrier, so higher bands need wider families and search windows.

use crate::util::audio::DEFAULT_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Curve used to spread a single scalar parameter across 19 bands.
pub const EXPANSION_RATIOS: [f64; 19] = [
    0.4, 0.5, 0.64, 0.8, 0.93, 1.0, 1.15, 1.31, 1.48, 1.64, 1.79, 1.9, 2.1, 2.27, 2.36, 2.5, 2.6,
    2.7, 2.8,
];

/// Width of one band when the band count is derived from the frequency range.
const DIVISION_WIDTH_HZ: f32 = 500.0;
const MIN_FRAME_SIZE: usize = 4;

const HIGH_SPEED_PEAK_WIDTH: [usize; 19] = [
    30, 30, 30, // 500-2000 Hz
    30, 30, 30, 30, // 2000-4000 Hz
    34, 38, 40, 43, // 4000-6000 Hz
    47, 52, 56, 60, // 6000-8000 Hz
    62, 63, 64, 65, // 8000-10000 Hz
];
const HIGH_SPEED_FAMILY_BOUNDARY: [usize; 19] = [
    3, 3, 3, //
    4, 4, 4, 4, //
    7, 7, 7, 7, //
    8, 8, 8, 9, //
    10, 10, 10, 11,
];
const HIGH_SPEED_FREQ_SEPARATION: [usize; 19] = [
    16, 18, 20, //
    22, 24, 26, 28, //
    30, 32, 34, 36, //
    38, 40, 42, 44, //
    46, 48, 50, 52,
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(
        "band arrays disagree in length (peak width {peak_width}, family boundary {family_boundary}, frequency separation {max_freq_separation})"
    )]
    BandLengthMismatch {
        peak_width: usize,
        family_boundary: usize,
        max_freq_separation: usize,
    },
    #[error("configuration needs at least one frequency band")]
    NoBands,
    #[error("invalid frequency range {min} Hz .. {max} Hz")]
    FrequencyRange { min: f32, max: f32 },
    #[error("invalid speed range {min} m/s .. {max} m/s")]
    SpeedRange { min: f64, max: f64 },
    #[error("{0} must be at least 1 in every band")]
    ZeroBandValue(&'static str),
    #[error("doppler window must span at least one frame")]
    EmptyDopplerWindow,
    #[error("frame size {0} must be even and at least 4")]
    FrameSize(usize),
    #[error("samples per frame must be positive")]
    SamplesPerFrame,
}

/// Named parameter sets shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Normal passes.
    #[default]
    Default,
    /// Unusually brief passes, e.g. the microphone sits at one end of an
    /// elliptical circuit. Trends certify after fewer frames.
    FastPass,
    /// Very fast aircraft (roughly 200 MPH and above): explicit wide bands.
    HighSpeed,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Default, Preset::FastPass, Preset::HighSpeed];

    pub fn configuration(self) -> BandConfiguration {
        match self {
            Preset::Default => BandConfiguration::builder(500.0, 10_000.0)
                .peak_width(15)
                .family_boundary(3)
                .max_freq_separation(10)
                .min_trend_count_until_certified(15)
                .max_doppler_window(55)
                .speed_range(20.0, 250.0)
                .min_frames_until_accept(10)
                .assemble(),
            Preset::FastPass => BandConfiguration::builder(500.0, 10_000.0)
                .peak_width(15)
                .family_boundary(3)
                .max_freq_separation(10)
                .min_trend_count_until_certified(5)
                .max_doppler_window(55)
                .speed_range(20.0, 250.0)
                .min_frames_until_accept(10)
                .assemble(),
            Preset::HighSpeed => BandConfiguration::builder(500.0, 10_000.0)
                .peak_widths(HIGH_SPEED_PEAK_WIDTH.to_vec())
                .family_boundaries(HIGH_SPEED_FAMILY_BOUNDARY.to_vec())
                .max_freq_separations(HIGH_SPEED_FREQ_SEPARATION.to_vec())
                .min_trend_count_until_certified(10)
                .max_doppler_window(55)
                .speed_range(100.0, 250.0)
                .min_frames_until_accept(10)
                .assemble(),
        }
    }
}

/// Validated, immutable parameter set. Build one with
/// [`BandConfiguration::builder`] or take a [`Preset`].
#[derive(Debug, Clone, PartialEq)]
pub struct BandConfiguration {
    freq_min: f32,
    freq_max: f32,
    peak_width: Vec<usize>,
    family_boundary: Vec<usize>,
    max_freq_separation: Vec<usize>,
    min_trend_count_until_certified: u32,
    max_doppler_window: u32,
    min_speed: f64,
    max_speed: f64,
    min_frames_until_accept: u32,
    frame_size: usize,
    samples_per_frame: usize,
}

impl Default for BandConfiguration {
    fn default() -> Self {
        Preset::Default.configuration()
    }
}

impl BandConfiguration {
    pub fn builder(freq_min: f32, freq_max: f32) -> BandConfigBuilder {
        BandConfigBuilder::new(freq_min, freq_max)
    }

    /// Lowest frequency considered for detection; anything below is too
    /// coarse in bins to resolve a shift.
    pub fn freq_min(&self) -> f32 {
        self.freq_min
    }

    /// Highest frequency considered; phone microphones roll off above it.
    pub fn freq_max(&self) -> f32 {
        self.freq_max
    }

    pub fn divisions(&self) -> usize {
        self.peak_width.len()
    }

    /// Neighbours on each side a bin must dominate to count as a peak.
    pub fn peak_width(&self) -> &[usize] {
        &self.peak_width
    }

    /// Bin distance within which detections belong to the same tone. A peak
    /// inside a trend's family keeps feeding that trend and pulls its index
    /// towards itself.
    pub fn family_boundary(&self) -> &[usize] {
        &self.family_boundary
    }

    /// How far (in bins) a missing trend may be followed downwards per frame.
    /// Larger values catch faster passes but produce more false readings.
    pub fn max_freq_separation(&self) -> &[usize] {
        &self.max_freq_separation
    }

    /// Frames a trend must be seen before its disappearance is treated as a
    /// possible Doppler shift.
    pub fn min_trend_count_until_certified(&self) -> u32 {
        self.min_trend_count_until_certified
    }

    /// Count at which a vanished trend is held as wounded rather than
    /// dropped outright.
    pub fn wounded_threshold(&self) -> u32 {
        self.min_trend_count_until_certified / 2
    }

    /// Frames a missing trend is searched before it is abandoned. The new
    /// trend has to emerge and settle within this window.
    pub fn max_doppler_window(&self) -> u32 {
        self.max_doppler_window
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Frames a shifted tone has to persist ("bottom out") before its speed
    /// is accepted.
    pub fn min_frames_until_accept(&self) -> u32 {
        self.min_frames_until_accept
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Fresh samples per frame; fewer than `frame_size` means frames overlap.
    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Number of trend slots (one per bin below Nyquist).
    pub fn bins(&self) -> usize {
        self.frame_size / 2
    }

    /// Rescales every bin-denominated parameter for a different FFT size.
    pub fn scale_frame_size(mut self, frame_size: usize) -> Result<Self, ConfigError> {
        if frame_size < MIN_FRAME_SIZE || frame_size % 2 != 0 {
            return Err(ConfigError::FrameSize(frame_size));
        }
        let factor = frame_size as f64 / self.frame_size as f64;
        for values in [
            &mut self.peak_width,
            &mut self.family_boundary,
            &mut self.max_freq_separation,
        ] {
            for value in values.iter_mut() {
                *value = ((*value as f64 * factor) as usize).max(1);
            }
        }
        self.frame_size = frame_size;
        Ok(self)
    }

    /// Rescales the doppler window when frames advance by a different number
    /// of fresh samples, keeping the window constant in wall-clock time.
    pub fn scale_samples_per_frame(mut self, samples_per_frame: usize) -> Result<Self, ConfigError> {
        if samples_per_frame == 0 {
            return Err(ConfigError::SamplesPerFrame);
        }
        let factor = samples_per_frame as f64 / self.samples_per_frame as f64;
        self.max_doppler_window = ((self.max_doppler_window as f64 * factor) as u32).max(1);
        self.samples_per_frame = samples_per_frame;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.freq_min.is_finite()
            || !self.freq_max.is_finite()
            || self.freq_min < 0.0
            || self.freq_min >= self.freq_max
        {
            return Err(ConfigError::FrequencyRange {
                min: self.freq_min,
                max: self.freq_max,
            });
        }

        let divisions = self.peak_width.len();
        if self.family_boundary.len() != divisions || self.max_freq_separation.len() != divisions {
            return Err(ConfigError::BandLengthMismatch {
                peak_width: divisions,
                family_boundary: self.family_boundary.len(),
                max_freq_separation: self.max_freq_separation.len(),
            });
        }
        if divisions == 0 {
            return Err(ConfigError::NoBands);
        }

        for (name, values) in [
            ("peak width", &self.peak_width),
            ("family boundary", &self.family_boundary),
            ("frequency separation", &self.max_freq_separation),
        ] {
            if values.contains(&0) {
                return Err(ConfigError::ZeroBandValue(name));
            }
        }

        if !self.min_speed.is_finite() || !self.max_speed.is_finite() || self.min_speed > self.max_speed
        {
            return Err(ConfigError::SpeedRange {
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        if self.max_doppler_window == 0 {
            return Err(ConfigError::EmptyDopplerWindow);
        }
        if self.frame_size < MIN_FRAME_SIZE || self.frame_size % 2 != 0 {
            return Err(ConfigError::FrameSize(self.frame_size));
        }
        if self.samples_per_frame == 0 {
            return Err(ConfigError::SamplesPerFrame);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum BandValues {
    Scalar(usize),
    Explicit(Vec<usize>),
}

impl BandValues {
    fn explicit_len(&self) -> Option<usize> {
        match self {
            BandValues::Scalar(_) => None,
            BandValues::Explicit(values) => Some(values.len()),
        }
    }

    fn resolve(self, divisions: usize) -> Vec<usize> {
        match self {
            BandValues::Explicit(values) => values,
            BandValues::Scalar(value) => expand(value, divisions),
        }
    }
}

/// Spreads one scalar over `divisions` bands along [`EXPANSION_RATIOS`],
/// truncating each product. Any other band count gets a flat curve.
pub fn expand(value: usize, divisions: usize) -> Vec<usize> {
    if divisions != EXPANSION_RATIOS.len() {
        warn!(
            "[config] flattening band parameters: {divisions} divisions do not match the {}-point curve",
            EXPANSION_RATIOS.len()
        );
        return vec![value.max(1); divisions];
    }

    EXPANSION_RATIOS
        .iter()
        .map(|ratio| ((ratio * value as f64) as usize).max(1))
        .collect()
}

#[derive(Debug, Clone)]
pub struct BandConfigBuilder {
    freq_min: f32,
    freq_max: f32,
    peak_width: BandValues,
    family_boundary: BandValues,
    max_freq_separation: BandValues,
    min_trend_count_until_certified: u32,
    max_doppler_window: u32,
    min_speed: f64,
    max_speed: f64,
    min_frames_until_accept: u32,
    frame_size: usize,
    samples_per_frame: usize,
}

impl BandConfigBuilder {
    fn new(freq_min: f32, freq_max: f32) -> Self {
        Self {
            freq_min,
            freq_max,
            peak_width: BandValues::Scalar(15),
            family_boundary: BandValues::Scalar(3),
            max_freq_separation: BandValues::Scalar(10),
            min_trend_count_until_certified: 15,
            max_doppler_window: 55,
            min_speed: 20.0,
            max_speed: 250.0,
            min_frames_until_accept: 10,
            frame_size: DEFAULT_FRAME_SIZE,
            samples_per_frame: DEFAULT_FRAME_SIZE,
        }
    }

    pub fn peak_width(mut self, width: usize) -> Self {
        self.peak_width = BandValues::Scalar(width);
        self
    }

    pub fn peak_widths(mut self, widths: Vec<usize>) -> Self {
        self.peak_width = BandValues::Explicit(widths);
        self
    }

    pub fn family_boundary(mut self, boundary: usize) -> Self {
        self.family_boundary = BandValues::Scalar(boundary);
        self
    }

    pub fn family_boundaries(mut self, boundaries: Vec<usize>) -> Self {
        self.family_boundary = BandValues::Explicit(boundaries);
        self
    }

    pub fn max_freq_separation(mut self, separation: usize) -> Self {
        self.max_freq_separation = BandValues::Scalar(separation);
        self
    }

    pub fn max_freq_separations(mut self, separations: Vec<usize>) -> Self {
        self.max_freq_separation = BandValues::Explicit(separations);
        self
    }

    pub fn min_trend_count_until_certified(mut self, count: u32) -> Self {
        self.min_trend_count_until_certified = count;
        self
    }

    pub fn max_doppler_window(mut self, frames: u32) -> Self {
        self.max_doppler_window = frames;
        self
    }

    pub fn speed_range(mut self, min: f64, max: f64) -> Self {
        self.min_speed = min;
        self.max_speed = max;
        self
    }

    pub fn min_frames_until_accept(mut self, frames: u32) -> Self {
        self.min_frames_until_accept = frames;
        self
    }

    /// FFT size the band widths are expressed for.
    pub fn frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn samples_per_frame(mut self, samples: usize) -> Self {
        self.samples_per_frame = samples;
        self
    }

    /// Band count: the length of any explicit array, otherwise one band per
    /// 500 Hz of the frequency range.
    fn divisions(&self) -> usize {
        [
            &self.peak_width,
            &self.family_boundary,
            &self.max_freq_separation,
        ]
        .iter()
        .find_map(|values| values.explicit_len())
        .unwrap_or_else(|| {
            let span = (self.freq_max - self.freq_min) / DIVISION_WIDTH_HZ;
            if span.is_finite() && span > 0.0 {
                span as usize
            } else {
                0
            }
        })
    }

    fn assemble(self) -> BandConfiguration {
        let divisions = self.divisions();
        BandConfiguration {
            freq_min: self.freq_min,
            freq_max: self.freq_max,
            peak_width: self.peak_width.resolve(divisions),
            family_boundary: self.family_boundary.resolve(divisions),
            max_freq_separation: self.max_freq_separation.resolve(divisions),
            min_trend_count_until_certified: self.min_trend_count_until_certified,
            max_doppler_window: self.max_doppler_window,
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            min_frames_until_accept: self.min_frames_until_accept,
            frame_size: self.frame_size,
            samples_per_frame: self.samples_per_frame,
        }
    }

    pub fn build(self) -> Result<BandConfiguration, ConfigError> {
        let config = self.assemble();
        config.validate()?;
        Ok(config)
    }
}

/// Maps bin indices onto configuration bands. The band of bin `x` is
/// `divisions * (x - start) / (end - start)`, clamped to the valid range, and
/// every component of the engine uses this one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandMap {
    start: usize,
    end: usize,
    divisions: usize,
}

impl BandMap {
    pub fn new(start: usize, end: usize, divisions: usize) -> Self {
        Self {
            start,
            end: end.max(start + 1),
            divisions: divisions.max(1),
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn band(&self, bin: usize) -> usize {
        let offset = bin.saturating_sub(self.start);
        (self.divisions * offset / (self.end - self.start)).min(self.divisions - 1)
    }

    /// Value of a band-indexed parameter at `bin`.
    pub fn pick(&self, values: &[usize], bin: usize) -> usize {
        values
            .get(self.band(bin))
            .or_else(|| values.last())
            .copied()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_expansion_follows_curve() {
        let config = BandConfiguration::builder(500.0, 10_000.0)
            .peak_width(15)
            .build()
            .expect("valid configuration");
        assert_eq!(config.divisions(), 19);
        let widths = config.peak_width();
        assert_eq!(widths.iter().copied().min(), Some(6));
        assert_eq!(widths.iter().copied().max(), Some(42));
        assert_eq!(widths[5], 15);
        assert!(widths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn zero_expansion_is_raised_to_one() {
        assert_eq!(expand(1, 19)[0], 1);
        assert!(expand(1, 19).iter().all(|&v| v >= 1));
    }

    #[test]
    fn off_curve_band_count_is_flattened() {
        assert_eq!(expand(7, 4), vec![7, 7, 7, 7]);
        let config = BandConfiguration::builder(500.0, 2_500.0)
            .peak_width(7)
            .build()
            .expect("valid configuration");
        assert_eq!(config.divisions(), 4);
        assert_eq!(config.peak_width(), &[7, 7, 7, 7]);
    }

    #[test]
    fn presets_match_tables() {
        let default = Preset::Default.configuration();
        assert!(default.validate().is_ok());
        assert_eq!(default.divisions(), 19);
        assert_eq!(default.min_trend_count_until_certified(), 15);
        assert_eq!(default.wounded_threshold(), 7);
        assert_eq!(default.max_doppler_window(), 55);
        assert_eq!(
            default.peak_width(),
            &[6, 7, 9, 12, 13, 15, 17, 19, 22, 24, 26, 28, 31, 34, 35, 37, 39, 40, 42]
        );
        assert_eq!(
            default.family_boundary(),
            &[1, 1, 1, 2, 2, 3, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 7, 8, 8]
        );
        assert_eq!(
            default.max_freq_separation(),
            &[4, 5, 6, 8, 9, 10, 11, 13, 14, 16, 17, 19, 21, 22, 23, 25, 26, 27, 28]
        );

        let fast = Preset::FastPass.configuration();
        assert!(fast.validate().is_ok());
        assert_eq!(fast.min_trend_count_until_certified(), 5);
        assert_eq!(fast.peak_width(), default.peak_width());
        assert_eq!(fast.family_boundary(), default.family_boundary());
        assert_eq!(fast.max_freq_separation(), default.max_freq_separation());

        let high = Preset::HighSpeed.configuration();
        assert!(high.validate().is_ok());
        assert_eq!(high.peak_width(), &HIGH_SPEED_PEAK_WIDTH);
        assert_eq!(high.family_boundary(), &HIGH_SPEED_FAMILY_BOUNDARY);
        assert_eq!(high.max_freq_separation(), &HIGH_SPEED_FREQ_SEPARATION);
        assert_eq!(high.min_speed(), 100.0);
        assert_eq!(high.min_trend_count_until_certified(), 10);

        for preset in Preset::ALL {
            let config = preset.configuration();
            assert!(config.validate().is_ok(), "{preset:?}");
            assert_eq!(config.divisions(), 19);
            assert_eq!(config.max_speed(), 250.0);
        }
    }

    #[test]
    fn rejects_mismatched_band_lengths() {
        let err = BandConfiguration::builder(500.0, 10_000.0)
            .peak_widths(vec![4; 19])
            .family_boundaries(vec![3; 18])
            .max_freq_separations(vec![10; 19])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::BandLengthMismatch {
                peak_width: 19,
                family_boundary: 18,
                max_freq_separation: 19,
            }
        );
    }

    #[test]
    fn rejects_degenerate_ranges() {
        assert!(matches!(
            BandConfiguration::builder(1_000.0, 1_000.0).build(),
            Err(ConfigError::FrequencyRange { .. })
        ));
        assert!(matches!(
            BandConfiguration::builder(2_000.0, 1_000.0).build(),
            Err(ConfigError::FrequencyRange { .. })
        ));
        // Less than one 500 Hz band.
        assert_eq!(
            BandConfiguration::builder(500.0, 900.0).build(),
            Err(ConfigError::NoBands)
        );
        assert!(matches!(
            BandConfiguration::builder(500.0, 10_000.0)
                .speed_range(50.0, 10.0)
                .build(),
            Err(ConfigError::SpeedRange { .. })
        ));
        assert_eq!(
            BandConfiguration::builder(500.0, 10_000.0)
                .max_doppler_window(0)
                .build(),
            Err(ConfigError::EmptyDopplerWindow)
        );
        assert_eq!(
            BandConfiguration::builder(500.0, 10_000.0)
                .family_boundaries(vec![0; 19])
                .build(),
            Err(ConfigError::ZeroBandValue("family boundary"))
        );
        assert_eq!(
            BandConfiguration::builder(500.0, 10_000.0)
                .frame_size(1023)
                .build(),
            Err(ConfigError::FrameSize(1023))
        );
    }

    #[test]
    fn frame_size_scaling_multiplies_widths() {
        let base = Preset::HighSpeed.configuration();
        let doubled = base.clone().scale_frame_size(2048).expect("valid size");
        assert_eq!(doubled.frame_size(), 2048);
        assert_eq!(doubled.bins(), 1024);
        for (scaled, original) in doubled.peak_width().iter().zip(base.peak_width()) {
            assert_eq!(*scaled, original * 2);
        }
        let halved = base.clone().scale_frame_size(512).expect("valid size");
        assert_eq!(halved.family_boundary()[0], 1);
        assert!(base.scale_frame_size(3).is_err());
    }

    #[test]
    fn samples_per_frame_scales_window() {
        let config = Preset::Default
            .configuration()
            .scale_samples_per_frame(512)
            .expect("positive");
        assert_eq!(config.samples_per_frame(), 512);
        assert_eq!(config.max_doppler_window(), 27);
        assert_eq!(
            Preset::Default.configuration().scale_samples_per_frame(0),
            Err(ConfigError::SamplesPerFrame)
        );
    }

    #[test]
    fn band_map_is_clamped() {
        let map = BandMap::new(23, 464, 19);
        assert_eq!(map.band(0), 0);
        assert_eq!(map.band(23), 0);
        assert_eq!(map.band(300), 11);
        assert_eq!(map.band(464), 18);
        assert_eq!(map.band(511), 18);
        assert_eq!(map.pick(&[1, 2, 3], 511), 3);
    }
}
