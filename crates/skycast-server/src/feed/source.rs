//! Where readings come from.

use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use skycast_core::{Location, Reading, WeatherCondition};

use crate::errors::FeedError;

/// Produces one reading for a location. Opaque to the rest of the core.
pub trait ReadingSource: Send + Sync {
    /// Produce a fresh reading for `location`.
    fn produce(&self, location: &Location) -> Result<Reading, FeedError>;
}

/// Random but plausible readings, for demos and load tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedSource;

/// Description attached to every simulated reading.
pub const SIMULATED_DESCRIPTION: &str = "Simulated weather data";

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl ReadingSource for SimulatedSource {
    fn produce(&self, location: &Location) -> Result<Reading, FeedError> {
        let mut rng = rand::rng();
        let condition = *WeatherCondition::KNOWN
            .choose(&mut rng)
            .ok_or_else(|| FeedError::Source("no conditions to choose from".into()))?;
        Ok(Reading {
            temperature: one_decimal(rng.random_range(10.0..=35.0)),
            feels_like: Some(one_decimal(rng.random_range(5.0..=40.0))),
            humidity: Some(rng.random_range(30..=90)),
            wind_speed: Some(one_decimal(rng.random_range(0.5..=15.0))),
            condition,
            description: SIMULATED_DESCRIPTION.into(),
            timestamp: Utc::now(),
            location: location.display_name(),
        })
    }
}
