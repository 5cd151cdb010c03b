//! Ambient temperature shared between the frame thread and whoever learns
//! about weather changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_TEMPERATURE_C: f64 = 27.0;

/// Speed of sound in dry air at `celsius`, in m/s.
#[inline]
pub fn speed_of_sound(celsius: f64) -> f64 {
    331.0 + 0.606 * celsius
}

/// Cloneable handle to one temperature value. Writers never block the
/// frame thread; readers see the latest completed store.
#[derive(Debug, Clone)]
pub struct TemperatureHandle(Arc<AtomicU64>);

impl Default for TemperatureHandle {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE_C)
    }
}

impl TemperatureHandle {
    pub fn new(celsius: f64) -> Self {
        Self(Arc::new(AtomicU64::new(celsius.to_bits())))
    }

    pub fn set(&self, celsius: f64) {
        if celsius.is_finite() {
            self.0.store(celsius.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}
