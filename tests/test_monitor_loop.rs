//! End-to-end monitor runs
//!
//! Runs the full loop against the simulated transport and source, and against
//! the rumqttc transport pointed at a port where no broker listens.

use fieldmon::config::MonitorConfig;
use fieldmon::monitor::{Lifecycle, MonitorLoop, RunOptions};
use fieldmon::protocol::TopicBuilder;
use fieldmon::sensors::{MetricKind, SimulatedSource};
use fieldmon::testing::{MockTransportBuilder, ScriptedSource};
use fieldmon::transport::{MqttTransportBuilder, SimulatedTransportBuilder};
use fieldmon::MonitorError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn simulated_config() -> MonitorConfig {
    MonitorConfig::from_toml_str(
        r#"
[device]
id = "sim-01"
location = "test-bench"

[simulation]
enabled = true
temperature_range = [36.0, 40.0]

[alerts]
cooldown_secs = 300
consecutive_readings = 2

[thresholds.temperature]
warning = { max = 30.0 }
critical = { max = 35.0 }
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_simulated_run_confirms_then_rate_limits_alerts() {
    // Arrange: every simulated temperature is critical
    let config = simulated_config();
    let source = SimulatedSource::with_seed(
        &config.simulation,
        config.sensors.soil_moisture.calibration,
        7,
    );
    let mut monitor = MonitorLoop::new(
        &config,
        config.threshold_spec().unwrap(),
        Arc::new(SimulatedTransportBuilder),
        Box::new(source),
    )
    .unwrap()
    .with_interval(Duration::from_millis(5));

    // Act
    let summary = timeout(
        Duration::from_secs(10),
        monitor.run(RunOptions {
            max_ticks: Some(5),
            ..RunOptions::default()
        }),
    )
    .await
    .unwrap()
    .unwrap();

    // Assert: confirmed on tick 2, then held back by the cooldown
    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.alerts, 1);
    assert!(summary.connected);
    assert_eq!(summary.metrics.error_count, 0);
    // online + 5 telemetry + 1 alert + offline
    assert_eq!(summary.metrics.publish_count, 8);
    assert_eq!(summary.metrics.success_rate, 1.0);
    assert_eq!(monitor.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test]
async fn test_stop_handle_from_another_task() {
    let config = simulated_config();
    let builder = MockTransportBuilder::new();
    let mock = builder.transport();
    let source = ScriptedSource::new().with_values(MetricKind::Humidity, [50.0]);
    let mut monitor = MonitorLoop::new(
        &config,
        config.threshold_spec().unwrap(),
        Arc::new(builder),
        Box::new(source),
    )
    .unwrap()
    .with_interval(Duration::from_millis(20));

    let handle = monitor.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
    });

    let summary = timeout(Duration::from_secs(5), monitor.run(RunOptions::default()))
        .await
        .expect("loop should stop")
        .unwrap();

    assert!(summary.ticks >= 1);
    let status = mock.published_to("agriculture/sensors/sim-01/status");
    assert_eq!(status.last().unwrap().payload_json()["data"]["status"], "offline");
    assert!(!monitor.session().is_connected());
}

#[tokio::test]
async fn test_unreachable_broker_aborts_run() {
    // Arrange: plain MQTT to a loopback port that refuses connections
    let config = MonitorConfig::from_toml_str(
        r#"
[device]
id = "live-01"

[broker]
endpoint = "mqtt://127.0.0.1:1"
connect_timeout_secs = 5
"#,
    )
    .unwrap();
    let topics = TopicBuilder::new(&config.publishing.topic_prefix, &config.device.id);
    let source = ScriptedSource::new().with_values(MetricKind::Temperature, [20.0]);
    let mut monitor = MonitorLoop::new(
        &config,
        config.threshold_spec().unwrap(),
        Arc::new(MqttTransportBuilder::new(topics)),
        Box::new(source),
    )
    .unwrap();

    // Act
    let result = timeout(Duration::from_secs(10), monitor.run(RunOptions::default()))
        .await
        .expect("connect failure should end the run");

    // Assert
    assert!(matches!(result, Err(MonitorError::Connect(_))));
    assert_eq!(monitor.publisher().get_metrics().publish_count, 0);
}
