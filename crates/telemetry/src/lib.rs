//! Extension telemetry: forwards activation, command and error events to a
//! remote collector, but only while both the editor setting and the companion
//! CLI allow it.

pub mod consent;
pub mod models;
pub mod reporter;
pub mod service;

pub use consent::{CliConsent, HostSettings, SfdxCliConsent};
pub use models::{
    ExceptionEvent, Measurements, Properties, TelemetryBuilder, TelemetryData, TelemetryEvent,
};
pub use reporter::{
    HttpReporter, HttpReporterFactory, ReporterFactory, ReporterIdentity, TelemetryReporter,
};
pub use service::{ExtensionContext, ExtensionMode, TelemetryService};
