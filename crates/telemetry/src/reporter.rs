//! Telemetry reporting: the reporter seam and an HTTP implementation that
//! posts events to a remote collector.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sfdx_telemetry_core::config::ReporterConfig;
use sfdx_telemetry_core::error::{Result, TelemetryError};

use crate::models::{ExceptionEvent, Measurements, Properties, TelemetryEvent};

/// Remote telemetry client.
///
/// Sends never fail from the caller's point of view; delivery problems stay
/// inside the implementation.
#[async_trait]
pub trait TelemetryReporter: Send + Sync {
    fn send_telemetry_event(&self, event: TelemetryEvent);

    fn send_exception_event(&self, event: ExceptionEvent);

    /// Flush pending events and release the client.
    async fn dispose(&self);
}

/// Per-install identity a reporter is keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterIdentity {
    pub machine_id: String,
    pub session_id: String,
}

/// Builds reporters once consent has been granted.
pub trait ReporterFactory: Send + Sync {
    fn create(&self, identity: &ReporterIdentity) -> Result<Arc<dyn TelemetryReporter>>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum EnvelopeKind {
    Event,
    Exception,
}

/// Events held for delivery before new ones are dropped.
const QUEUE_CAPACITY: usize = 256;

/// JSON body posted to the collector, one per event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    kind: EnvelopeKind,
    name: String,
    time: DateTime<Utc>,
    instrumentation_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    measurements: Option<Measurements>,
    common: BTreeMap<String, String>,
}

/// Sends telemetry envelopes to a collector endpoint over HTTP.
///
/// Events are queued and posted by a background task, so sends return
/// immediately. A full queue drops new events, and `dispose` waits at most
/// one request timeout for the queue to drain. Errors are logged but never
/// propagated to callers.
pub struct HttpReporter {
    extension_id: String,
    instrumentation_key: String,
    common: BTreeMap<String, String>,
    flush_timeout: Duration,
    queue: Mutex<Option<mpsc::Sender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpReporter {
    /// Start a reporter and its delivery task on the current tokio runtime.
    pub fn spawn(config: &ReporterConfig, identity: &ReporterIdentity) -> Result<Self> {
        Self::spawn_with_capacity(config, identity, QUEUE_CAPACITY)
    }

    fn spawn_with_capacity(
        config: &ReporterConfig,
        identity: &ReporterIdentity,
        capacity: usize,
    ) -> Result<Self> {
        if config.instrumentation_key.trim().is_empty() {
            return Err(TelemetryError::Reporter(
                "instrumentation key is not configured".into(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TelemetryError::Reporter(format!("no async runtime: {e}")))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = runtime.spawn(deliver(client, config.endpoint.clone(), rx));

        let common = BTreeMap::from([
            ("common.extname".to_string(), config.extension_id.clone()),
            ("common.extversion".to_string(), config.extension_version.clone()),
            ("common.os".to_string(), std::env::consts::OS.to_string()),
            ("common.vscodemachineid".to_string(), identity.machine_id.clone()),
            ("common.vscodesessionid".to_string(), identity.session_id.clone()),
        ]);

        Ok(Self {
            extension_id: config.extension_id.clone(),
            instrumentation_key: config.instrumentation_key.clone(),
            common,
            flush_timeout: timeout,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn envelope(&self, kind: EnvelopeKind, name: &str) -> Envelope {
        Envelope {
            kind,
            name: format!("{}/{}", self.extension_id, name),
            time: Utc::now(),
            instrumentation_key: self.instrumentation_key.clone(),
            message: None,
            properties: None,
            measurements: None,
            common: self.common.clone(),
        }
    }

    fn enqueue(&self, envelope: Envelope) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(tx) => match tx.try_send(envelope) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    warn!(name = %envelope.name, "telemetry queue full; event dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("telemetry delivery task has stopped; event dropped")
                }
            },
            None => debug!(name = %envelope.name, "reporter disposed; event dropped"),
        }
    }
}

#[async_trait]
impl TelemetryReporter for HttpReporter {
    fn send_telemetry_event(&self, event: TelemetryEvent) {
        let mut envelope = self.envelope(EnvelopeKind::Event, &event.name);
        envelope.properties = event.properties;
        envelope.measurements = event.measurements;
        self.enqueue(envelope);
    }

    fn send_exception_event(&self, event: ExceptionEvent) {
        let mut envelope = self.envelope(EnvelopeKind::Exception, &event.name);
        envelope.message = Some(event.message);
        self.enqueue(envelope);
    }

    async fn dispose(&self) {
        // Closing the queue lets the worker drain and exit.
        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut worker) = worker else {
            return;
        };
        match tokio::time::timeout(self.flush_timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "telemetry delivery task failed"),
            Err(_) => {
                warn!(
                    timeout_secs = self.flush_timeout.as_secs(),
                    "telemetry flush timed out; pending events dropped"
                );
                worker.abort();
            }
        }
    }
}

async fn deliver(
    client: reqwest::Client,
    endpoint: String,
    mut rx: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        match client.post(&endpoint).json(&envelope).send().await {
            Ok(response) => {
                if !response.status().is_success() {
                    warn!(
                        status = %response.status(),
                        name = %envelope.name,
                        "telemetry event rejected by collector"
                    );
                } else {
                    debug!(name = %envelope.name, "telemetry event delivered");
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    name = %envelope.name,
                    "failed to deliver telemetry event"
                );
            }
        }
    }
}

/// Builds [`HttpReporter`]s from the reporter configuration.
#[derive(Debug, Clone)]
pub struct HttpReporterFactory {
    config: ReporterConfig,
}

impl HttpReporterFactory {
    pub fn new(config: ReporterConfig) -> Self {
        Self { config }
    }
}

impl ReporterFactory for HttpReporterFactory {
    fn create(&self, identity: &ReporterIdentity) -> Result<Arc<dyn TelemetryReporter>> {
        Ok(Arc::new(HttpReporter::spawn(&self.config, identity)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(endpoint: String) -> ReporterConfig {
        ReporterConfig {
            extension_id: "salesforcedx-vscode-core".into(),
            extension_version: "48.1.0".into(),
            instrumentation_key: "test-key".into(),
            endpoint,
            timeout_secs: 5,
        }
    }

    fn identity() -> ReporterIdentity {
        ReporterIdentity {
            machine_id: "45678903".into(),
            session_id: "session-1".into(),
        }
    }

    async fn received_bodies(server: &MockServer) -> Vec<serde_json::Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("json body"))
            .collect()
    }

    #[tokio::test]
    async fn reporter_posts_event_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/track"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter =
            HttpReporter::spawn(&config_for(format!("{}/v2/track", server.uri())), &identity())
                .expect("reporter");
        reporter.send_telemetry_event(
            TelemetryEvent::new("activationEvent")
                .with_properties(Properties::from([(
                    "extensionName".to_string(),
                    "salesforcedx-vscode-core".to_string(),
                )]))
                .with_measurements(Measurements::from([("startupTime".to_string(), 42.0)])),
        );
        reporter.dispose().await;

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        let body = &bodies[0];
        assert_eq!(body["kind"], "event");
        assert_eq!(body["name"], "salesforcedx-vscode-core/activationEvent");
        assert_eq!(body["instrumentationKey"], "test-key");
        assert_eq!(body["properties"]["extensionName"], "salesforcedx-vscode-core");
        assert_eq!(body["measurements"]["startupTime"], 42.0);
        assert_eq!(body["common"]["common.vscodemachineid"], "45678903");
        assert_eq!(body["common"]["common.vscodesessionid"], "session-1");
        assert_eq!(body["common"]["common.extversion"], "48.1.0");
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn reporter_posts_exception_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/track"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter =
            HttpReporter::spawn(&config_for(format!("{}/v2/track", server.uri())), &identity())
                .expect("reporter");
        reporter.send_exception_event(ExceptionEvent::new(
            "error_name",
            "this is a test error message",
        ));
        reporter.dispose().await;

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies[0]["kind"], "exception");
        assert_eq!(bodies[0]["name"], "salesforcedx-vscode-core/error_name");
        assert_eq!(bodies[0]["message"], "this is a test error message");
        assert!(bodies[0].get("properties").is_none());
    }

    #[tokio::test]
    async fn dispose_flushes_queued_events_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let reporter =
            HttpReporter::spawn(&config_for(format!("{}/v2/track", server.uri())), &identity())
                .expect("reporter");
        for name in ["first", "second", "third"] {
            reporter.send_telemetry_event(TelemetryEvent::new(name));
        }
        reporter.dispose().await;

        let names: Vec<String> = received_bodies(&server)
            .await
            .iter()
            .map(|b| b["name"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "salesforcedx-vscode-core/first",
                "salesforcedx-vscode-core/second",
                "salesforcedx-vscode-core/third",
            ]
        );
    }

    #[tokio::test]
    async fn sends_after_dispose_are_dropped() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let reporter =
            HttpReporter::spawn(&config_for(format!("{}/v2/track", server.uri())), &identity())
                .expect("reporter");
        reporter.dispose().await;
        reporter.send_telemetry_event(TelemetryEvent::new("late"));
        reporter.dispose().await;
    }

    #[tokio::test]
    async fn reporter_handles_server_error_gracefully() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let reporter =
            HttpReporter::spawn(&config_for(format!("{}/v2/track", server.uri())), &identity())
                .expect("reporter");

        // Should not panic on server error
        reporter.send_telemetry_event(TelemetryEvent::new("deactivationEvent"));
        reporter.dispose().await;
    }

    #[tokio::test]
    async fn reporter_handles_connection_refused() {
        let reporter = HttpReporter::spawn(
            &config_for("http://127.0.0.1:1/v2/track".to_string()),
            &identity(),
        )
        .expect("reporter");

        reporter.send_telemetry_event(TelemetryEvent::new("deactivationEvent"));
        reporter.dispose().await;
    }

    #[tokio::test]
    async fn dispose_is_bounded_by_request_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let mut config = config_for(format!("{}/v2/track", server.uri()));
        config.timeout_secs = 1;
        let reporter = HttpReporter::spawn(&config, &identity()).expect("reporter");
        for _ in 0..6 {
            reporter.send_telemetry_event(TelemetryEvent::new("commandExecution"));
        }

        let start = std::time::Instant::now();
        reporter.dispose().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed < Duration::from_secs(3),
            "dispose should give up after the request timeout, but took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn full_queue_drops_new_events() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let mut config = config_for(format!("{}/v2/track", server.uri()));
        config.timeout_secs = 1;
        let reporter =
            HttpReporter::spawn_with_capacity(&config, &identity(), 1).expect("reporter");
        for _ in 0..10 {
            reporter.send_telemetry_event(TelemetryEvent::new("commandExecution"));
        }
        reporter.dispose().await;

        let received = server.received_requests().await.unwrap_or_default();
        assert!(
            received.len() <= 2,
            "expected overflow to be dropped, collector saw {} requests",
            received.len()
        );
    }

    #[tokio::test]
    async fn missing_instrumentation_key_is_rejected() {
        let mut config = config_for("http://127.0.0.1:1/v2/track".to_string());
        config.instrumentation_key = String::new();

        let err = HttpReporter::spawn(&config, &identity()).err().expect("error");
        assert!(matches!(err, TelemetryError::Reporter(_)));
    }

    #[test]
    fn spawn_outside_runtime_is_rejected() {
        let err = HttpReporter::spawn(
            &config_for("http://127.0.0.1:1/v2/track".to_string()),
            &identity(),
        )
        .err()
        .expect("error");
        assert!(err.to_string().contains("no async runtime"));
    }

    #[tokio::test]
    async fn factory_builds_reporter() {
        let factory =
            HttpReporterFactory::new(config_for("http://127.0.0.1:1/v2/track".to_string()));
        let reporter = factory.create(&identity()).expect("reporter");
        reporter.dispose().await;
    }
}
