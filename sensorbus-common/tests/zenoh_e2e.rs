//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses a unique key
//! prefix to avoid interference.

use std::collections::HashSet;
use std::time::Duration;

use sensorbus_common::{
    Format, KeyExprBuilder, Protocol, Quality, TelemetryPoint, TelemetryValue, decode_auto, encode,
};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_pubsub_reading() {
    let prefix = unique_prefix();
    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let keys = KeyExprBuilder::with_prefix(&prefix, Protocol::Modbus);
    let subscriber = session
        .declare_subscriber(keys.protocol_wildcard())
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let point = TelemetryPoint::new(
        "tank1",
        Protocol::Modbus,
        "liquid_level",
        TelemetryValue::Gauge(1875.0),
    )
    .with_quality(Quality::Cached);
    let encoded = encode(&point, Format::Cbor).expect("Failed to encode");

    session
        .put(keys.build("tank1", "liquid_level"), encoded)
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    let payload = received.payload().to_bytes();
    let decoded: TelemetryPoint = decode_auto(&payload).expect("Failed to decode");

    assert_eq!(decoded.source, "tank1");
    assert_eq!(decoded.metric, "liquid_level");
    assert_eq!(decoded.quality, Quality::Cached);
    assert_eq!(decoded.value, TelemetryValue::Gauge(1875.0));

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_sensor_wildcard_filters_other_sensors() {
    let prefix = unique_prefix();
    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open session");

    let keys = KeyExprBuilder::with_prefix(&prefix, Protocol::Modbus);
    let subscriber = session
        .declare_subscriber(keys.sensor_wildcard("flow1"))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    for (sensor, metric) in [("ph1", "ph_value"), ("flow1", "flow_rate"), ("flow1", "velocity")] {
        let point = TelemetryPoint::new(sensor, Protocol::Modbus, metric, 1.0.into());
        let encoded = encode(&point, Format::Json).unwrap();
        session.put(keys.build(sensor, metric), encoded).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut metrics = HashSet::new();
    for _ in 0..2 {
        match tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async()).await {
            Ok(Ok(received)) => {
                let payload = received.payload().to_bytes();
                let decoded: TelemetryPoint = decode_auto(&payload).unwrap();
                assert_eq!(decoded.source, "flow1");
                metrics.insert(decoded.metric);
            }
            Ok(Err(e)) => panic!("Receive error: {}", e),
            Err(_) => break,
        }
    }

    assert_eq!(metrics.len(), 2, "Should receive both flow1 metrics");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
