//! Locations and the normalized key used to route readings to subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building a location or its key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    /// The name was empty or whitespace only.
    #[error("location name must not be empty")]
    EmptyName,
}

/// Normalized routing key for a location.
///
/// Built from a human-readable name by case-folding and collapsing every run
/// of whitespace into a single `_`, so `"New  York"`, `" new york "` and
/// `"NEW YORK"` all map to `new_york`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationKey(String);

impl LocationKey {
    /// Normalize `name` into a key.
    pub fn from_name(name: &str) -> Result<Self, LocationError> {
        let key = name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_");
        if key.is_empty() {
            return Err(LocationError::EmptyName);
        }
        Ok(Self(key))
    }

    /// The normalized key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel-style group name (`weather_<key>`), used in logs and metrics.
    pub fn group_name(&self) -> String {
        format!("weather_{}", self.0)
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LocationKey {
    type Error = LocationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

impl From<LocationKey> for String {
    fn from(key: LocationKey) -> Self {
        key.0
    }
}

/// A place readings are produced for.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// City name as entered.
    pub city: String,
    /// Country name as entered.
    pub country: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Only active locations are fed by the generator.
    pub is_active: bool,
    #[serde(skip)]
    key: LocationKey,
}

impl Location {
    /// Build an active location; the key is derived from `city`.
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Result<Self, LocationError> {
        let city = city.into();
        let key = LocationKey::from_name(&city)?;
        Ok(Self {
            city,
            country: country.into(),
            latitude: 0.0,
            longitude: 0.0,
            is_active: true,
            key,
        })
    }

    /// Set coordinates.
    #[must_use]
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    /// Set the active flag.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Routing key for this location.
    pub fn key(&self) -> &LocationKey {
        &self.key
    }

    /// `"City, Country"`.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }
}
