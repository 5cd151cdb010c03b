//! Display units for speeds and temperatures. The engine itself always works
//! in metres per second and degrees Celsius.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    #[default]
    Mph,
    KilometersPerHour,
    MetersPerSecond,
}

impl SpeedUnit {
    pub const ALL: [SpeedUnit; 3] = [
        SpeedUnit::Mph,
        SpeedUnit::KilometersPerHour,
        SpeedUnit::MetersPerSecond,
    ];

    fn factor(self) -> f64 {
        match self {
            SpeedUnit::Mph => 2.24,
            SpeedUnit::KilometersPerHour => 3.6,
            SpeedUnit::MetersPerSecond => 1.0,
        }
    }

    pub fn from_mps(self, mps: f64) -> f64 {
        mps * self.factor()
    }

    pub fn to_mps(self, value: f64) -> f64 {
        value / self.factor()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            SpeedUnit::Mph => "MPH",
            SpeedUnit::KilometersPerHour => "km/h",
            SpeedUnit::MetersPerSecond => "m/s",
        }
    }

    pub fn format(self, mps: f64) -> String {
        format!("{:.1} {}", self.from_mps(mps), self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    #[default]
    Fahrenheit,
    Celsius,
}

impl TemperatureUnit {
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            TemperatureUnit::Celsius => celsius,
        }
    }

    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            TemperatureUnit::Celsius => value,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "°F",
            TemperatureUnit::Celsius => "°C",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn speed_units_convert_both_ways() {
        assert_relative_eq!(SpeedUnit::KilometersPerHour.from_mps(10.0), 36.0);
        assert_relative_eq!(SpeedUnit::Mph.from_mps(10.0), 22.4);
        for unit in SpeedUnit::ALL {
            assert_relative_eq!(unit.to_mps(unit.from_mps(42.5)), 42.5, epsilon = 1e-9);
        }
        assert_eq!(SpeedUnit::MetersPerSecond.format(12.345), "12.3 m/s");
    }

    #[test]
    fn temperature_units_convert() {
        assert_relative_eq!(TemperatureUnit::Fahrenheit.from_celsius(100.0), 212.0);
        assert_relative_eq!(TemperatureUnit::Fahrenheit.to_celsius(32.0), 0.0);
        assert_relative_eq!(TemperatureUnit::Celsius.to_celsius(27.0), 27.0);
    }
}
