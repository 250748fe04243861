//! Weather readings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse weather condition code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherCondition {
    /// Clear sky.
    Clear,
    /// Cloud cover.
    Clouds,
    /// Rain.
    Rain,
    /// Thunderstorm.
    Thunderstorm,
    /// Drizzle.
    Drizzle,
    /// Snow.
    Snow,
    /// Mist.
    Mist,
    /// Fog.
    Fog,
    /// Any code this build does not know about.
    #[serde(other)]
    Unknown,
}

impl WeatherCondition {
    /// Every known condition, in a stable order.
    pub const KNOWN: [Self; 8] = [
        Self::Clear,
        Self::Clouds,
        Self::Rain,
        Self::Thunderstorm,
        Self::Drizzle,
        Self::Snow,
        Self::Mist,
        Self::Fog,
    ];
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clear => "Clear",
            Self::Clouds => "Clouds",
            Self::Rain => "Rain",
            Self::Thunderstorm => "Thunderstorm",
            Self::Drizzle => "Drizzle",
            Self::Snow => "Snow",
            Self::Mist => "Mist",
            Self::Fog => "Fog",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One weather observation for one location.
///
/// Readings are shared behind `Arc` once produced and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature in °C.
    pub temperature: f64,
    /// Apparent temperature in °C.
    pub feels_like: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<u8>,
    /// Wind speed in m/s.
    pub wind_speed: Option<f64>,
    /// Condition code.
    pub condition: WeatherCondition,
    /// Free-text description.
    pub description: String,
    /// When the reading was produced.
    pub timestamp: DateTime<Utc>,
    /// Display form of the location (`"City, Country"`).
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Reading {
        Reading {
            temperature: 22.5,
            feels_like: Some(23.1),
            humidity: Some(55),
            wind_speed: Some(3.2),
            condition: WeatherCondition::Clear,
            description: "Simulated weather data".into(),
            timestamp: "2026-01-01T06:00:00Z".parse().unwrap(),
            location: "Kathmandu, Nepal".into(),
        }
    }

    #[test]
    fn serializes_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["temperature"], 22.5);
        assert_eq!(value["feels_like"], 23.1);
        assert_eq!(value["humidity"], 55);
        assert_eq!(value["wind_speed"], 3.2);
        assert_eq!(value["condition"], "Clear");
        assert_eq!(value["description"], "Simulated weather data");
        assert_eq!(value["location"], "Kathmandu, Nepal");
        assert!(value["timestamp"].as_str().unwrap().starts_with("2026-01-01T06:00:00"));
    }

    #[test]
    fn missing_optionals_serialize_as_null() {
        let reading = Reading {
            feels_like: None,
            humidity: None,
            wind_speed: None,
            ..sample()
        };
        let value = serde_json::to_value(reading).unwrap();
        assert!(value["feels_like"].is_null());
        assert!(value["humidity"].is_null());
    }

    #[test]
    fn unknown_condition_deserializes() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["condition"] = "Haze".into();
        let reading: Reading = serde_json::from_value(value).unwrap();
        assert_eq!(reading.condition, WeatherCondition::Unknown);
    }

    #[test]
    fn display_matches_serialized_name() {
        for condition in WeatherCondition::KNOWN {
            let json = serde_json::to_string(&condition).unwrap();
            assert_eq!(json, format!("\"{condition}\""));
        }
    }
}
