//! Unit conversion utilities
//!
//! Handles the two unit selections a host can change at run time:
//! linear units (G20/G21, millimetres or inches) and temperature units
//! (M149, Celsius, Fahrenheit or Kelvin). Internally everything is stored in
//! millimetres and degrees Celsius.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimetres per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Linear input unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearUnit {
    /// Millimetres (G21)
    #[default]
    Millimeters,
    /// Inches (G20)
    Inches,
}

impl LinearUnit {
    /// Scale factor from this unit to millimetres
    pub fn factor(self) -> f64 {
        match self {
            Self::Millimeters => 1.0,
            Self::Inches => MM_PER_INCH,
        }
    }

    /// Convert a value in this unit to millimetres
    pub fn to_mm(self, value: f64) -> f64 {
        value * self.factor()
    }

    /// Convert millimetres to this unit
    pub fn from_mm(self, value_mm: f64) -> f64 {
        value_mm / self.factor()
    }
}

impl fmt::Display for LinearUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millimeters => write!(f, "mm"),
            Self::Inches => write!(f, "in"),
        }
    }
}

impl FromStr for LinearUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mm" | "millimeters" | "metric" => Ok(Self::Millimeters),
            "in" | "inch" | "inches" | "imperial" => Ok(Self::Inches),
            _ => Err(format!("Unknown linear unit: {}", s)),
        }
    }
}

/// Temperature input unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    /// Degrees Celsius
    #[default]
    Celsius,
    /// Degrees Fahrenheit
    Fahrenheit,
    /// Kelvin
    Kelvin,
}

impl TemperatureUnit {
    /// Unit for an M149 letter (`C`, `F` or `K`)
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'C' => Some(Self::Celsius),
            'F' => Some(Self::Fahrenheit),
            'K' => Some(Self::Kelvin),
            _ => None,
        }
    }

    /// Convert an absolute temperature in this unit to Celsius
    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Celsius => value,
            Self::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            Self::Kelvin => value - 273.15,
        }
    }

    /// Convert a temperature difference in this unit to Celsius degrees
    pub fn diff_to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Celsius | Self::Kelvin => value,
            Self::Fahrenheit => value * 5.0 / 9.0,
        }
    }

    /// Convert an absolute Celsius temperature to this unit
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            Self::Kelvin => celsius + 273.15,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Celsius => write!(f, "C"),
            Self::Fahrenheit => write!(f, "F"),
            Self::Kelvin => write!(f, "K"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_conversion() {
        assert_eq!(LinearUnit::Millimeters.to_mm(10.5), 10.5);
        assert_eq!(LinearUnit::Inches.to_mm(1.0), 25.4);
        assert_eq!(LinearUnit::Inches.from_mm(12.7), 0.5);
    }

    #[test]
    fn test_linear_from_str() {
        assert_eq!("mm".parse::<LinearUnit>(), Ok(LinearUnit::Millimeters));
        assert_eq!("Inch".parse::<LinearUnit>(), Ok(LinearUnit::Inches));
        assert!("furlong".parse::<LinearUnit>().is_err());
    }

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(TemperatureUnit::Celsius.to_celsius(200.0), 200.0);
        assert!((TemperatureUnit::Fahrenheit.to_celsius(392.0) - 200.0).abs() < 1e-9);
        assert!((TemperatureUnit::Kelvin.to_celsius(473.15) - 200.0).abs() < 1e-9);
        assert!((TemperatureUnit::Fahrenheit.from_celsius(100.0) - 212.0).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_letters() {
        assert_eq!(TemperatureUnit::from_letter('f'), Some(TemperatureUnit::Fahrenheit));
        assert_eq!(TemperatureUnit::from_letter('K'), Some(TemperatureUnit::Kelvin));
        assert_eq!(TemperatureUnit::from_letter('X'), None);
    }

    #[test]
    fn test_temperature_difference() {
        assert!((TemperatureUnit::Fahrenheit.diff_to_celsius(9.0) - 5.0).abs() < 1e-9);
        assert_eq!(TemperatureUnit::Kelvin.diff_to_celsius(5.0), 5.0);
    }
}
