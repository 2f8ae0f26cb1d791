//! The monitor loop: read, publish, evaluate, alert, sleep
//!
//! [`MonitorLoop`] owns the reading source and the alert engine. It shares the
//! session with its publisher and moves through `Idle -> Running -> Stopped`
//! exactly once.

use crate::alerts::{AlertEngine, AlertEvent, Severity, ThresholdKind, ThresholdSpec};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::protocol::{DeviceStatus, TopicBuilder};
use crate::publisher::{Publisher, PublisherMetrics};
use crate::sensors::{MetricKind, ReadingSource, Sample};
use crate::session::{ConnectionSession, SessionObserver};
use crate::tick_span;
use crate::transport::{Qos, TransportBuilder};
use serde::Serialize;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop at the first tick boundary after this much time
    pub duration: Option<Duration>,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
    /// Inject one synthetic warning alert on the first tick
    pub force_alert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub alerts: u64,
    /// Ticks that produced no valid reading at all
    pub empty_ticks: u64,
    pub connected: bool,
    pub metrics: PublisherMetrics,
}

/// Cloneable handle that ends a running loop at its next tick boundary
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Default)]
struct TickOutcome {
    readings: usize,
    alerts: u64,
}

pub struct MonitorLoop {
    session: Arc<ConnectionSession>,
    publisher: Publisher,
    engine: AlertEngine,
    source: Box<dyn ReadingSource>,
    interval: Duration,
    location: Option<String>,
    continue_when_disconnected: bool,
    lifecycle: Lifecycle,
    stop: StopHandle,
}

impl MonitorLoop {
    pub fn new(
        config: &MonitorConfig,
        thresholds: ThresholdSpec,
        builder: Arc<dyn TransportBuilder>,
        source: Box<dyn ReadingSource>,
    ) -> MonitorResult<Self> {
        let session = Arc::new(ConnectionSession::new(config.connection_config(), builder));
        Self::with_session(config, thresholds, session, source)
    }

    pub fn with_observer(
        config: &MonitorConfig,
        thresholds: ThresholdSpec,
        builder: Arc<dyn TransportBuilder>,
        observer: Arc<dyn SessionObserver>,
        source: Box<dyn ReadingSource>,
    ) -> MonitorResult<Self> {
        let session = Arc::new(ConnectionSession::with_observer(
            config.connection_config(),
            builder,
            observer,
        ));
        Self::with_session(config, thresholds, session, source)
    }

    fn with_session(
        config: &MonitorConfig,
        thresholds: ThresholdSpec,
        session: Arc<ConnectionSession>,
        source: Box<dyn ReadingSource>,
    ) -> MonitorResult<Self> {
        let qos = Qos::try_from(config.publishing.qos)?;
        let topics = TopicBuilder::new(&config.publishing.topic_prefix, &config.device.id);
        let publisher = Publisher::new(
            Arc::clone(&session),
            topics,
            config.device.location.clone(),
            qos,
            config.publishing.retain,
        );
        let (tx, _) = watch::channel(false);

        Ok(Self {
            session,
            publisher,
            engine: AlertEngine::new(thresholds),
            source,
            interval: config.publish_interval(),
            location: config.device.location.clone(),
            continue_when_disconnected: config.publishing.continue_when_disconnected,
            lifecycle: Lifecycle::Idle,
            stop: StopHandle { tx: Arc::new(tx) },
        })
    }

    /// Override the tick interval from the config
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run until stopped, the duration or tick bound is reached, or
    /// initialization fails
    ///
    /// Shutdown runs on every exit path once the loop has started.
    pub async fn run(&mut self, options: RunOptions) -> MonitorResult<RunSummary> {
        if self.lifecycle != Lifecycle::Idle {
            return Err(MonitorError::InvalidLifecycle {
                state: self.lifecycle.as_str(),
            });
        }
        self.lifecycle = Lifecycle::Running;

        let result = self.run_ticks(options).await;
        self.shutdown().await;
        self.lifecycle = Lifecycle::Stopped;

        let mut summary = result?;
        summary.metrics = self.publisher.get_metrics();
        info!(
            ticks = summary.ticks,
            alerts = summary.alerts,
            publish_count = summary.metrics.publish_count,
            error_count = summary.metrics.error_count,
            success_rate = summary.metrics.success_rate,
            "Monitor stopped"
        );
        Ok(summary)
    }

    async fn connect(&self) -> MonitorResult<bool> {
        match self.session.connect().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let degraded_ok =
                    self.continue_when_disconnected || self.session.transport_always_available();
                if !degraded_ok {
                    error!(error = %e, "Failed to connect to broker");
                    return Err(e.into());
                }
                warn!(error = %e, "Failed to connect to broker, continuing without a connection");
                Ok(false)
            }
        }
    }

    async fn run_ticks(&mut self, options: RunOptions) -> MonitorResult<RunSummary> {
        let started = Instant::now();
        let stop_rx = self.stop.tx.subscribe();

        let connected = self.connect().await?;
        self.publish_online().await;

        info!(interval_secs = self.interval.as_secs_f64(), "Starting monitoring loop");

        let mut summary = RunSummary {
            ticks: 0,
            alerts: 0,
            empty_ticks: 0,
            connected,
            metrics: self.publisher.get_metrics(),
        };

        loop {
            if *stop_rx.borrow() {
                info!("Stop requested");
                break;
            }
            if let Some(limit) = options.duration {
                if started.elapsed() >= limit {
                    info!(duration_secs = limit.as_secs_f64(), "Duration limit reached");
                    break;
                }
            }
            if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }

            summary.ticks += 1;
            let tick = summary.ticks;
            let force_alert = options.force_alert && tick == 1;
            let outcome = self
                .tick(force_alert)
                .instrument(tick_span!(tick))
                .await;

            summary.alerts += outcome.alerts;
            if outcome.readings == 0 {
                summary.empty_ticks += 1;
            }

            if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }

            let delay = match options.duration {
                Some(limit) => self.interval.min(limit.saturating_sub(started.elapsed())),
                None => self.interval,
            };
            if !interruptible_sleep(stop_rx.clone(), delay).await {
                info!("Stop requested during sleep");
                break;
            }
        }

        Ok(summary)
    }

    async fn publish_online(&self) {
        let mut details = Map::new();
        details.insert("sensors".to_string(), json!(self.source.sensor_names()));
        if let Some(location) = &self.location {
            details.insert("location".to_string(), json!(location));
        }
        let result = self
            .publisher
            .publish_status(DeviceStatus::Online, Some(details))
            .await;
        if !result.success {
            debug!(error = ?result.error, "online status not published");
        }
    }

    fn read_sample(&mut self) -> Sample {
        let mut sample = Sample::new();
        for metric in self.source.metrics() {
            let reading = self.source.read(metric);
            if let Err(rejected) = sample.insert(reading) {
                warn!(
                    metric = %metric,
                    error = rejected.error.as_deref().unwrap_or("invalid reading"),
                    "Omitting invalid reading"
                );
            }
        }
        sample
    }

    async fn tick(&mut self, force_alert: bool) -> TickOutcome {
        let sample = self.read_sample();
        if sample.is_empty() {
            warn!("No valid sensor data available");
            return TickOutcome::default();
        }

        info!(readings = ?sample.values(), "Sensor readings");
        let result = self.publisher.publish_telemetry(&sample).await;
        if result.success {
            debug!(topic = %result.topic, "Telemetry published");
        }

        let mut alerts = self.engine.evaluate_sample(&sample);
        if force_alert {
            alerts.push(test_alert(&sample));
        }

        for alert in &alerts {
            warn!(metric = %alert.metric, severity = %alert.severity, "ALERT: {}", alert.message);
            self.publisher.publish_alert_with_readings(alert, &sample).await;
        }

        TickOutcome {
            readings: sample.len(),
            alerts: alerts.len() as u64,
        }
    }

    async fn shutdown(&mut self) {
        if self.session.is_connected() {
            self.publisher
                .publish_status(DeviceStatus::Offline, None)
                .await;
        }
        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "Disconnect during shutdown failed");
        }
        self.source.close();

        let metrics = self.publisher.get_metrics();
        info!(
            publish_count = metrics.publish_count,
            error_count = metrics.error_count,
            success_rate = metrics.success_rate,
            "Publishing metrics"
        );
    }
}

/// Synthetic warning used to exercise the alert path end to end
fn test_alert(sample: &Sample) -> AlertEvent {
    AlertEvent {
        metric: MetricKind::Temperature,
        severity: Severity::Warning,
        value: sample.value(MetricKind::Temperature).unwrap_or(0.0),
        threshold_kind: ThresholdKind::Max,
        threshold_value: 0.0,
        message: "This is a test alert".to_string(),
    }
}

/// Sleep for `delay` unless stopped first. Returns false when stopped.
async fn interruptible_sleep(mut stop_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = stop_rx.changed() => changed.is_ok() && !*stop_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}
