//! Acoustic Doppler speed tracking: estimates the speed of a passing sound
//! source from the frequency shift of its tones in a mono PCM stream.

pub mod audio;
pub mod controller;
pub mod doppler;
pub mod dsp;
pub mod settings;
pub mod util;
