//! Telemetry payload types.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// String-valued event properties.
pub type Properties = BTreeMap<String, String>;

/// Numeric event measurements.
pub type Measurements = BTreeMap<String, f64>;

/// A named event handed to a reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: None,
            measurements: None,
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    /// Look up a property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(key))
            .map(String::as_str)
    }

    /// Look up a measurement by key.
    pub fn measurement(&self, key: &str) -> Option<f64> {
        self.measurements.as_ref().and_then(|m| m.get(key)).copied()
    }
}

/// An error report sent on the exception channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEvent {
    pub name: String,
    pub message: String,
}

impl ExceptionEvent {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Properties and measurements collected by a [`TelemetryBuilder`].
///
/// A map is `None` when nothing was added to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryData {
    pub properties: Option<Properties>,
    pub measurements: Option<Measurements>,
}

/// Accumulates properties and measurements for a custom event.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBuilder {
    data: TelemetryData,
}

impl TelemetryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.data
            .properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn add_measurement(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.data
            .measurements
            .get_or_insert_with(Measurements::new)
            .insert(key.into(), value);
        self
    }

    pub fn build(&self) -> TelemetryData {
        self.data.clone()
    }
}

/// Milliseconds elapsed since `start`.
pub fn elapsed_millis(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
