//! The telemetry service: consent resolution, lazy reporter construction and
//! event shaping.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consent::{CliConsent, HostSettings};
use crate::models::{
    elapsed_millis, ExceptionEvent, Measurements, Properties, TelemetryEvent,
};
use crate::reporter::{ReporterFactory, ReporterIdentity, TelemetryReporter};

pub const ACTIVATION_EVENT: &str = "activationEvent";
pub const DEACTIVATION_EVENT: &str = "deactivationEvent";
pub const COMMAND_EVENT: &str = "commandExecution";

/// Machine id the host reports when running from an extension development host.
pub const DEV_MACHINE_ID: &str = "someValue.machineId";

const EXTENSION_NAME_KEY: &str = "extensionName";
const COMMAND_NAME_KEY: &str = "commandName";
const STARTUP_TIME_KEY: &str = "startupTime";
const EXECUTION_TIME_KEY: &str = "executionTime";

/// How the host launched the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionMode {
    #[default]
    Production,
    Development,
    Test,
}

/// Host-provided context handed to [`TelemetryService::initialize_service`].
#[derive(Debug, Clone, Default)]
pub struct ExtensionContext {
    pub mode: ExtensionMode,
}

impl ExtensionContext {
    pub fn new(mode: ExtensionMode) -> Self {
        Self { mode }
    }
}

#[derive(Default)]
struct ServiceState {
    cli_telemetry_enabled: bool,
    reporter: Option<Arc<dyn TelemetryReporter>>,
}

/// Forwards extension telemetry to a reporter, gated by the editor setting
/// and the CLI's own opt-in.
///
/// One instance is built at startup and shared as an `Arc` with every call
/// site. Nothing is sent until [`initialize_service`](Self::initialize_service)
/// has granted consent and built a reporter.
pub struct TelemetryService {
    extension_name: String,
    session_id: String,
    settings: Arc<dyn HostSettings>,
    cli: Arc<dyn CliConsent>,
    factory: Arc<dyn ReporterFactory>,
    state: RwLock<ServiceState>,
}

impl TelemetryService {
    pub fn new(
        extension_name: impl Into<String>,
        settings: Arc<dyn HostSettings>,
        cli: Arc<dyn CliConsent>,
        factory: Arc<dyn ReporterFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            extension_name: extension_name.into(),
            session_id: Uuid::new_v4().to_string(),
            settings,
            cli,
            factory,
            state: RwLock::new(ServiceState::default()),
        })
    }

    pub fn extension_name(&self) -> &str {
        &self.extension_name
    }

    /// Resolve consent and, when granted, build the reporter.
    ///
    /// Safe to call repeatedly: an existing reporter is kept while consent
    /// holds and disposed once it is withdrawn.
    pub async fn initialize_service(&self, context: &ExtensionContext, machine_id: &str) {
        let cli_enabled = self.check_cli_telemetry().await;
        let editor_enabled = self.settings.telemetry_enabled();
        let enabled = editor_enabled && cli_enabled;
        info!(editor_enabled, cli_enabled, enabled, "resolved telemetry consent");

        self.set_cli_telemetry_enabled(enabled);

        if !enabled {
            let stale = self.write_state().reporter.take();
            if let Some(reporter) = stale {
                reporter.dispose().await;
            }
            return;
        }

        if context.mode == ExtensionMode::Development || machine_id == DEV_MACHINE_ID {
            debug!("development host; telemetry reporter not constructed");
            return;
        }

        if self.read_state().reporter.is_some() {
            return;
        }

        let identity = ReporterIdentity {
            machine_id: machine_id.to_string(),
            session_id: self.session_id.clone(),
        };
        match self.factory.create(&identity) {
            Ok(reporter) => self.write_state().reporter = Some(reporter),
            Err(err) => warn!(error = %err, "failed to construct telemetry reporter"),
        }
    }

    /// Ask the CLI whether it allows telemetry. A failed check counts as "no".
    pub async fn check_cli_telemetry(&self) -> bool {
        match self.cli.is_telemetry_allowed().await {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(error = %err, "could not read CLI telemetry setting");
                false
            }
        }
    }

    /// Cache the effective consent flag. Turning it off also switches the
    /// CLI's telemetry off.
    pub fn set_cli_telemetry_enabled(&self, enabled: bool) {
        if !enabled {
            self.cli.disable_telemetry();
        }
        self.write_state().cli_telemetry_enabled = enabled;
    }

    pub fn is_telemetry_enabled(&self) -> bool {
        self.read_state().cli_telemetry_enabled
    }

    /// The reporter, if consent is granted and one has been built.
    pub fn reporter(&self) -> Option<Arc<dyn TelemetryReporter>> {
        let state = self.read_state();
        if state.cli_telemetry_enabled {
            state.reporter.clone()
        } else {
            None
        }
    }

    pub fn send_extension_activation_event(&self, start: Instant) {
        let Some(reporter) = self.gated_reporter(ACTIVATION_EVENT) else {
            return;
        };
        let measurements =
            Measurements::from([(STARTUP_TIME_KEY.to_string(), elapsed_millis(start))]);
        reporter.send_telemetry_event(
            TelemetryEvent::new(ACTIVATION_EVENT)
                .with_properties(self.base_properties())
                .with_measurements(measurements),
        );
    }

    pub fn send_extension_deactivation_event(&self) {
        let Some(reporter) = self.gated_reporter(DEACTIVATION_EVENT) else {
            return;
        };
        reporter.send_telemetry_event(
            TelemetryEvent::new(DEACTIVATION_EVENT).with_properties(self.base_properties()),
        );
    }

    /// Report a command run. `extensionName`, `commandName` and
    /// `executionTime` always win over same-named extra keys.
    pub fn send_command_event(
        &self,
        command_name: &str,
        start: Instant,
        properties: Option<Properties>,
        measurements: Option<Measurements>,
    ) {
        let Some(reporter) = self.gated_reporter(COMMAND_EVENT) else {
            return;
        };

        let mut props = properties.unwrap_or_default();
        props.extend(self.base_properties());
        props.insert(COMMAND_NAME_KEY.to_string(), command_name.to_string());

        let mut measures = measurements.unwrap_or_default();
        measures.insert(EXECUTION_TIME_KEY.to_string(), elapsed_millis(start));

        reporter.send_telemetry_event(
            TelemetryEvent::new(COMMAND_EVENT)
                .with_properties(props)
                .with_measurements(measures),
        );
    }

    /// Forward a custom event as given, with no implicit fields.
    pub fn send_event_data(
        &self,
        event_name: &str,
        properties: Option<Properties>,
        measurements: Option<Measurements>,
    ) {
        let Some(reporter) = self.gated_reporter(event_name) else {
            return;
        };
        reporter.send_telemetry_event(TelemetryEvent {
            name: event_name.to_string(),
            properties,
            measurements,
        });
    }

    /// Report an error on the exception channel.
    ///
    /// Not gated by the consent flag; it only needs a reporter, which exists
    /// only after consent was granted at initialization.
    pub fn send_exception(&self, error_name: &str, error_message: &str) {
        let reporter = self.read_state().reporter.clone();
        match reporter {
            Some(reporter) => {
                reporter.send_exception_event(ExceptionEvent::new(error_name, error_message))
            }
            None => debug!(error_name, "no telemetry reporter; exception dropped"),
        }
    }

    /// Flush and release the reporter on extension teardown.
    pub async fn dispose(&self) {
        let reporter = self.write_state().reporter.take();
        if let Some(reporter) = reporter {
            reporter.dispose().await;
        }
    }

    fn gated_reporter(&self, event_name: &str) -> Option<Arc<dyn TelemetryReporter>> {
        let reporter = self.reporter();
        if reporter.is_none() {
            debug!(event = event_name, "telemetry disabled; event suppressed");
        }
        reporter
    }

    fn base_properties(&self) -> Properties {
        Properties::from([(EXTENSION_NAME_KEY.to_string(), self.extension_name.clone())])
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ServiceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ServiceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
