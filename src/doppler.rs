//! Doppler tracking engine: spectrum → peaks → trends → speed candidates.

pub mod config;
pub mod events;
pub mod speed;
pub mod temperature;
pub mod trend;

use crate::dsp::Reconfigurable;
use crate::dsp::peaks::PeakDetector;
use crate::dsp::spectrum::{FftSpectrum, SpectrumSource};
use crate::util::audio::decimate_rotating;
use config::{BandConfiguration, BandMap};
use events::{Diagnostics, DiagnosticsSink};
use speed::{SpeedCandidate, SpeedEstimator};
use temperature::TemperatureHandle;
use tracing::{info, warn};
use trend::{Trend, TrendTable};

/// One tracking session. Frame operations take `&mut self` and must be
/// driven from a single thread; only the temperature may be updated from
/// elsewhere, through [`DopplerEngine::temperature_handle`].
pub struct DopplerEngine<S: SpectrumSource = FftSpectrum> {
    config: BandConfiguration,
    source: S,
    bands: BandMap,
    samples: Vec<f32>,
    spectrum: Vec<f32>,
    detector: PeakDetector,
    trends: TrendTable,
    estimator: SpeedEstimator,
    temperature: TemperatureHandle,
    frame_count: u64,
    diagnostics: Diagnostics,
}

impl<S: SpectrumSource> std::fmt::Debug for DopplerEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DopplerEngine")
            .field("frame_size", &self.config.frame_size())
            .field("frame_count", &self.frame_count)
            .field("bands", &self.bands)
            .field("missing", &self.trends.missing().len())
            .finish_non_exhaustive()
    }
}

impl DopplerEngine<FftSpectrum> {
    pub fn new(config: BandConfiguration, sample_rate: f32) -> Self {
        let source = FftSpectrum::new(config.frame_size(), sample_rate);
        Self::with_source(config, source)
    }
}

impl<S: SpectrumSource> DopplerEngine<S> {
    pub fn with_source(config: BandConfiguration, mut source: S) -> Self {
        let frame_size = config.frame_size();
        source.resize(frame_size);
        Self {
            bands: band_map(&config, &source),
            samples: vec![0.0; frame_size],
            spectrum: vec![0.0; frame_size / 2 + 1],
            detector: PeakDetector::new(),
            trends: TrendTable::new(config.bins()),
            estimator: SpeedEstimator::new(),
            temperature: TemperatureHandle::default(),
            frame_count: 0,
            diagnostics: Diagnostics::default(),
            config,
            source,
        }
    }

    pub fn config(&self) -> &BandConfiguration {
        &self.config
    }

    /// Applies a new parameter set. A different frame size reallocates every
    /// buffer and returns all trends to idle; otherwise tracking continues.
    pub fn configure(&mut self, config: BandConfiguration) {
        let frame_size = config.frame_size();
        if frame_size != self.config.frame_size() {
            info!(
                "[doppler] frame size {} -> {frame_size}; resetting trends",
                self.config.frame_size()
            );
            self.source.resize(frame_size);
            self.samples = vec![0.0; frame_size];
            self.spectrum = vec![0.0; frame_size / 2 + 1];
            self.trends.resize(config.bins());
            self.detector.clear();
            self.estimator.clear();
        }
        self.bands = band_map(&config, &self.source);
        self.config = config;
    }

    pub fn set_temperature(&self, celsius: f64) {
        info!("[doppler] temperature set to {celsius:.1} C");
        self.temperature.set(celsius);
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.get()
    }

    /// Handle for updating the temperature from another thread. Changes
    /// apply from the next frame on.
    pub fn temperature_handle(&self) -> TemperatureHandle {
        self.temperature.clone()
    }

    pub fn set_diagnostics(&mut self, sink: Box<dyn DiagnosticsSink>) {
        self.diagnostics.replace_sink(sink);
    }

    /// Loads the working buffer from a rotating capture buffer whose logical
    /// start is `rotation`. Returns `false` and keeps the previous contents
    /// when `raw` cannot fill a frame.
    pub fn push_frame(&mut self, raw: &[i16], rotation: usize) -> bool {
        let accepted = decimate_rotating(&mut self.samples, raw, rotation);
        if !accepted {
            warn!(
                "[doppler] rejected capture buffer of {} samples (rotation {rotation}) for frame size {}",
                raw.len(),
                self.samples.len()
            );
        }
        accepted
    }

    pub fn frame_buffer(&self) -> &[f32] {
        &self.samples
    }

    /// Processes the working buffer filled by [`DopplerEngine::push_frame`].
    pub fn next_frame(&mut self) {
        let samples = std::mem::take(&mut self.samples);
        self.process_samples(&samples);
        self.samples = samples;
    }

    /// Processes one frame of time-domain samples. A frame of the wrong
    /// length is ignored.
    pub fn process_samples(&mut self, samples: &[f32]) {
        if samples.len() != self.config.frame_size() {
            warn!(
                "[doppler] invalid frame of {} samples (expected {}); skipped",
                samples.len(),
                self.config.frame_size()
            );
            return;
        }
        self.source.transform(samples, &mut self.spectrum);
        self.track();
    }

    /// Runs the tracker on an externally computed magnitude spectrum of
    /// `frame_size / 2 + 1` bins.
    pub fn process_spectrum(&mut self, spectrum: &[f32]) {
        if spectrum.len() != self.spectrum.len() {
            warn!(
                "[doppler] invalid spectrum of {} bins (expected {}); skipped",
                spectrum.len(),
                self.spectrum.len()
            );
            return;
        }
        self.spectrum.copy_from_slice(spectrum);
        self.track();
    }

    fn track(&mut self) {
        self.frame_count += 1;
        self.diagnostics.set_frame(self.frame_count);
        let celsius = self.temperature.get();

        let peaks =
            self.detector
                .find_peaks(&self.spectrum, self.config.peak_width(), &self.bands);
        self.trends.update(
            &self.spectrum,
            peaks,
            &self.config,
            &self.bands,
            &mut self.diagnostics,
        );

        let source = &self.source;
        self.estimator.scan(
            &mut self.trends,
            &self.config,
            &self.bands,
            celsius,
            &|bin| source.bin_to_frequency(bin),
            &mut self.diagnostics,
        );
    }

    pub fn num_speeds(&self) -> usize {
        self.estimator.candidates().len()
    }

    /// Speed in m/s of candidate `index` from the latest frame.
    pub fn speed(&self, index: usize) -> Option<f64> {
        self.estimator.candidates().get(index).map(|c| c.speed)
    }

    pub fn speed_weight(&self, index: usize) -> Option<f64> {
        self.estimator.candidates().get(index).map(|c| c.weight)
    }

    pub fn speeds(&self) -> &[SpeedCandidate] {
        self.estimator.candidates()
    }

    pub fn average_speed(&self) -> Option<f64> {
        let speeds = self.estimator.candidates();
        if speeds.is_empty() {
            return None;
        }
        Some(speeds.iter().map(|c| c.speed).sum::<f64>() / speeds.len() as f64)
    }

    /// Highest-weighted candidate of the latest frame.
    pub fn best_speed(&self) -> Option<SpeedCandidate> {
        self.estimator
            .candidates()
            .iter()
            .copied()
            .reduce(|best, c| if c.weight > best.weight { c } else { best })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn peaks(&self) -> &[usize] {
        self.detector.peaks()
    }

    pub fn trend(&self, bin: usize) -> Option<&Trend> {
        self.trends.trend(bin)
    }

    pub fn trend_table(&self) -> &TrendTable {
        &self.trends
    }

    pub fn bin_to_frequency(&self, bin: usize) -> f32 {
        self.source.bin_to_frequency(bin)
    }

    pub fn frequency_to_bin(&self, frequency: f32) -> usize {
        self.source.frequency_to_bin(frequency)
    }
}

impl<S: SpectrumSource> Reconfigurable<BandConfiguration> for DopplerEngine<S> {
    fn update_config(&mut self, config: BandConfiguration) {
        self.configure(config);
    }
}

fn band_map<S: SpectrumSource>(config: &BandConfiguration, source: &S) -> BandMap {
    BandMap::new(
        source.frequency_to_bin(config.freq_min()),
        source.frequency_to_bin(config.freq_max()),
        config.divisions(),
    )
}
