//! Integration tests for the GpibApi public interface.
//!
//! These exercise the registry and session model end to end against a
//! temporary SQLite database with latency-free simulated instruments.

use gpib_core::{
    ConnectionState, GpibApi, GpibError, InstrumentPatch, MeasurementRange, MeasurementType,
    Resolution, SimulationOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a test API backed by a database in a temporary directory.
fn create_test_api() -> (TempDir, GpibApi) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", temp_dir.path().join("gpib.db").display());
    let api = GpibApi::builder()
        .database_url(url)
        .simulation(SimulationOptions::instant())
        .build()
        .expect("Failed to build API");
    (temp_dir, api)
}

fn patch(body: Value) -> InstrumentPatch {
    InstrumentPatch::from_json(&body).expect("payload should parse")
}

fn dmm1() -> Value {
    json!({
        "name": "DMM1",
        "type": "34401A",
        "gpibAddress": 22,
        "measurementType": "DC_VOLTAGE",
        "range": "AUTO",
        "resolution": 6.5
    })
}

#[tokio::test]
async fn test_create_then_get_round_trips_user_fields() {
    let (_temp, api) = create_test_api();

    let payloads = [
        dmm1(),
        json!({
            "name": "Scope-side DMM",
            "type": "34465A",
            "gpibAddress": 0,
            "description": "left rack",
            "autoConnect": true,
            "measurementType": "FREQUENCY",
            "range": 1000,
            "resolution": 7.5
        }),
        json!({
            "name": "Legacy",
            "type": "custom",
            "gpib_address": "30",
            "measurement_type": "resistance",
            "range": "0.1",
            "resolution": "4.5"
        }),
    ];

    for body in payloads {
        let created = api.create_instrument(patch(body)).await.unwrap();
        let fetched = api.get_instrument(created.id).await.unwrap();
        assert_eq!(fetched.config, created.config);
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    let legacy = api.list_instruments().await.unwrap().pop().unwrap();
    assert_eq!(legacy.config.gpib_address, 30);
    assert_eq!(legacy.config.measurement_type, MeasurementType::Resistance);
    assert_eq!(legacy.config.range, MeasurementRange::Fixed100m);
    assert_eq!(legacy.config.resolution, Resolution::Digits4_5);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (_temp, api) = create_test_api();
    let id = 404;

    assert!(matches!(api.get_instrument(id).await, Err(GpibError::NotFound { id: 404 })));
    assert!(matches!(
        api.update_instrument(id, patch(json!({"name": "x"}))).await,
        Err(GpibError::NotFound { id: 404 })
    ));
    assert!(matches!(api.delete_instrument(id).await, Err(GpibError::NotFound { id: 404 })));
    assert!(matches!(api.connect(id).await, Err(GpibError::NotFound { id: 404 })));
    assert!(matches!(api.measure(id).await, Err(GpibError::NotFound { id: 404 })));
    assert!(matches!(api.disconnect(id).await, Err(GpibError::NotFound { id: 404 })));
}

#[tokio::test]
async fn test_invalid_measurement_type_update_is_rejected() {
    let (_temp, api) = create_test_api();
    let created = api.create_instrument(patch(dmm1())).await.unwrap();

    let err = InstrumentPatch::from_json(&json!({"measurementType": "DC_POWER"})).unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(err.field_errors()[0].field, "measurementType");

    // A structurally valid patch that fails merged validation.
    let err = api
        .update_instrument(created.id, patch(json!({"gpibAddress": 64})))
        .await
        .unwrap_err();
    assert_eq!(err.field_errors()[0].field, "gpibAddress");

    assert_eq!(api.get_instrument(created.id).await.unwrap(), created);
}

#[tokio::test]
async fn test_delete_then_connect_is_not_found() {
    let (_temp, api) = create_test_api();
    let created = api.create_instrument(patch(dmm1())).await.unwrap();
    api.connect(created.id).await.unwrap();

    api.delete_instrument(created.id).await.unwrap();

    assert!(matches!(
        api.connect(created.id).await,
        Err(GpibError::NotFound { .. })
    ));
    let health = api.health().await;
    assert!(health.gpib_manager_status.instrument_ids.is_empty());
}

#[tokio::test]
async fn test_measure_requires_connect() {
    let (_temp, api) = create_test_api();
    let created = api
        .create_instrument(patch(json!({
            "name": "Ranged",
            "type": "34461A",
            "gpibAddress": 9,
            "range": 1,
            "resolution": 5.5
        })))
        .await
        .unwrap();

    assert!(matches!(
        api.measure(created.id).await,
        Err(GpibError::NotConnected { .. })
    ));

    api.connect(created.id).await.unwrap();
    for _ in 0..20 {
        let reading = api.measure(created.id).await.unwrap();
        assert_eq!(reading.effective_range, 1.0);
        assert!(reading.value.abs() <= 1.0);
        // 5.5 digits on the 1 range: five decimals.
        let scaled = reading.value * 1e5;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_connect_and_disconnect_idempotence() {
    let (_temp, api) = create_test_api();
    let created = api.create_instrument(patch(dmm1())).await.unwrap();

    let first = api.connect(created.id).await.unwrap();
    let second = api.connect(created.id).await.unwrap();
    assert_eq!(first.state, ConnectionState::Connected);
    assert_eq!(second.state, ConnectionState::Connected);

    let off = api.disconnect(created.id).await.unwrap();
    assert_eq!(off.state, ConnectionState::Disconnected);
    let again = api.disconnect(created.id).await.unwrap();
    assert_eq!(again.state, ConnectionState::Disconnected);
    assert!(!api.session_state(created.id).await.unwrap().connected);
}

#[tokio::test]
async fn test_dmm_scenario() {
    let (_temp, api) = create_test_api();
    let dmm = api.create_instrument(patch(dmm1())).await.unwrap();
    assert!(dmm.id > 0);

    let state = api.connect(dmm.id).await.unwrap();
    assert!(state.connected);

    let reading = api.measure(dmm.id).await.unwrap();
    assert_eq!(reading.unit, "V");
    assert_eq!(reading.unit_label, "V DC");
    assert!(reading.value.is_finite());
    assert_eq!(
        api.session_state(dmm.id).await.unwrap().last_value,
        Some(reading.value)
    );

    api.delete_instrument(dmm.id).await.unwrap();
    assert!(matches!(
        api.get_instrument(dmm.id).await,
        Err(GpibError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_update_while_connected_applies_to_next_reading() {
    let (_temp, api) = create_test_api();
    let dmm = api.create_instrument(patch(dmm1())).await.unwrap();
    api.connect(dmm.id).await.unwrap();

    api.update_instrument(
        dmm.id,
        patch(json!({"measurementType": "AC_CURRENT", "range": 0.1})),
    )
    .await
    .unwrap();

    let reading = api.measure(dmm.id).await.unwrap();
    assert_eq!(reading.unit, "A");
    assert_eq!(reading.range, MeasurementRange::Fixed100m);
    assert!(api.session_state(dmm.id).await.unwrap().connected);
}

#[tokio::test]
async fn test_connection_test_does_not_connect() {
    let (_temp, api) = create_test_api();
    let dmm = api.create_instrument(patch(dmm1())).await.unwrap();

    let report = api.test_connection(dmm.id).await.unwrap();
    assert!(report.success);
    assert!(!api.session_state(dmm.id).await.unwrap().connected);
    assert_eq!(api.get_instrument(dmm.id).await.unwrap(), dmm);
}

#[tokio::test]
async fn test_auto_connect_all() {
    let (_temp, api) = create_test_api();
    let mut auto = dmm1();
    auto["autoConnect"] = json!(true);
    let flagged = api.create_instrument(patch(auto)).await.unwrap();
    let manual = api.create_instrument(patch(dmm1())).await.unwrap();

    let connected = api.auto_connect_all().await.unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].instrument_id, flagged.id);
    assert!(!api.session_state(manual.id).await.unwrap().connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_delete_and_measure_stay_consistent() {
    let (_temp, api) = create_test_api();
    let api = Arc::new(api);
    let dmm = api.create_instrument(patch(dmm1())).await.unwrap();
    api.connect(dmm.id).await.unwrap();

    let measurer = {
        let api = Arc::clone(&api);
        tokio::spawn(async move {
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                outcomes.push(api.measure(dmm.id).await.map(|_| ()));
            }
            outcomes
        })
    };
    let deleter = {
        let api = Arc::clone(&api);
        tokio::spawn(async move { api.delete_instrument(dmm.id).await })
    };

    deleter.await.unwrap().unwrap();
    let outcomes = measurer.await.unwrap();

    // Every measure either completed before the delete or saw it fully applied.
    let first_failure = outcomes.iter().position(|o| o.is_err());
    if let Some(index) = first_failure {
        assert!(outcomes[index..]
            .iter()
            .all(|o| matches!(o, Err(GpibError::NotFound { .. }))));
    }
    assert!(api.health().await.gpib_manager_status.instrument_ids.is_empty());
}
