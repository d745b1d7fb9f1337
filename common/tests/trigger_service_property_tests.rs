// Property-based tests for the trigger service lifecycle and statistics
// Feature: trigger-orchestration

mod support;

use common::db::{ExecutionStore, TriggerStore};
use common::errors::TriggerError;
use common::models::{ExecutionStatus, TriggerDefinition, TriggerPatch, TriggerType};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use support::{service_with, StubGateway};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn webhook_definition(name: &str, enabled: bool) -> TriggerDefinition {
    TriggerDefinition {
        trigger_type: TriggerType::Webhook,
        name: name.to_string(),
        description: Some("property test".to_string()),
        config: json!({"method": "POST", "authType": "none"}),
        enabled,
    }
}

// Property 1: Disabled triggers never fire
// For any registered trigger with enabled=false, fire_trigger fails with
// Disabled and never creates an execution row.
#[test]
fn property_1_disabled_trigger_never_fires() {
    proptest!(ProptestConfig::with_cases(32), |(
        name in "[a-z]{3,16}",
        attempts in 1usize..5,
        value in any::<i64>(),
    )| {
        let rt = runtime();
        rt.block_on(async {
            let gateway = Arc::new(StubGateway::default());
            let (service, store, flow_id) = service_with(gateway.clone()).await;
            let trigger = service
                .register_trigger(flow_id, webhook_definition(&name, false))
                .await
                .unwrap();

            for _ in 0..attempts {
                let result = service.fire_trigger(trigger.id, json!({ "value": value })).await;
                assert!(matches!(result, Err(TriggerError::Disabled(id)) if id == trigger.id));
            }

            assert_eq!(store.execution_count(trigger.id).await, 0);
            assert_eq!(gateway.calls(), 0);
            assert_eq!(service.get_trigger(trigger.id).await.unwrap().fire_count, 0);
        });
    });
}

// Property 2: Successful firings
// For any successful fire_trigger call, exactly one execution moves
// running -> success, fire_count grows by exactly one and last_error is cleared.
#[test]
fn property_2_successful_fire_updates_statistics() {
    proptest!(ProptestConfig::with_cases(32), |(
        fires in 1usize..6,
        prior_error in "[a-z ]{1,30}",
    )| {
        let rt = runtime();
        rt.block_on(async {
            let (service, store, flow_id) = service_with(Arc::new(StubGateway::default())).await;
            let trigger = service
                .register_trigger(flow_id, webhook_definition("orders", true))
                .await
                .unwrap();
            store.set_last_error(trigger.id, Some(&prior_error)).await.unwrap();

            for n in 1..=fires {
                let execution_id = service.fire_trigger(trigger.id, json!({ "n": n })).await.unwrap();

                let current = service.get_trigger(trigger.id).await.unwrap();
                assert_eq!(current.fire_count, n as i64);
                assert!(current.last_error.is_none());
                assert_eq!(store.execution_count(trigger.id).await, n);

                let latest = store.recent_executions(trigger.id, 1).await.unwrap();
                assert_eq!(latest[0].id, execution_id);
                assert_eq!(latest[0].status, ExecutionStatus::Success);
                assert!(latest[0].completed_at.is_some());
                assert!(latest[0].duration_ms.is_some());
            }
        });
    });
}

// Property 3: Failed processing
// For any failing process call, the execution moves running -> failure with a
// non-empty error, error_count grows by exactly one and last_error holds that error.
#[test]
fn property_3_failed_fire_records_error() {
    proptest!(ProptestConfig::with_cases(32), |(
        reason in "[a-z]{1,12}( [a-z]{1,12}){0,3}",
        fires in 1usize..4,
    )| {
        let rt = runtime();
        rt.block_on(async {
            let (service, store, flow_id) = service_with(Arc::new(StubGateway::failing(&reason))).await;
            let trigger = service
                .register_trigger(flow_id, webhook_definition("orders", true))
                .await
                .unwrap();

            for n in 1..=fires {
                let err = service.fire_trigger(trigger.id, json!({})).await.unwrap_err();
                assert!(matches!(err, TriggerError::Execution(_)));

                let current = service.get_trigger(trigger.id).await.unwrap();
                assert_eq!(current.error_count, n as i64);
                assert_eq!(current.fire_count, 0);

                let latest = store.recent_executions(trigger.id, 1).await.unwrap();
                assert_eq!(latest[0].status, ExecutionStatus::Failure);
                let error = latest[0].error.clone().unwrap();
                assert!(!error.is_empty());
                assert!(error.contains(&reason));
                assert_eq!(current.last_error.as_deref(), Some(error.as_str()));
            }

            // Failing triggers stay enabled
            assert!(service.get_trigger(trigger.id).await.unwrap().enabled);
        });
    });
}

// Property 7: Unregister idempotence
// Unregistering the same id any number of times never raises.
#[test]
fn property_7_unregister_is_idempotent() {
    proptest!(ProptestConfig::with_cases(16), |(
        repeats in 2usize..5,
        enabled in any::<bool>(),
    )| {
        let rt = runtime();
        rt.block_on(async {
            let (service, store, flow_id) = service_with(Arc::new(StubGateway::default())).await;
            let trigger = service
                .register_trigger(flow_id, webhook_definition("orders", enabled))
                .await
                .unwrap();

            for _ in 0..repeats {
                service.unregister_trigger(trigger.id).await.unwrap();
            }

            assert!(store.get_trigger(trigger.id).await.unwrap().is_none());
            assert_eq!(service.armed_count().await, 0);
        });
    });
}

// Property 8: Disable/enable round trip
// update(enabled=false) then update(enabled=true) leaves the trigger armed
// with the same config and an unchanged fire count.
#[test]
fn property_8_disable_enable_round_trip() {
    proptest!(ProptestConfig::with_cases(16), |(
        prior_fires in 0usize..4,
        token in "[A-Za-z0-9]{8,24}",
    )| {
        let rt = runtime();
        rt.block_on(async {
            let (service, _, flow_id) = service_with(Arc::new(StubGateway::default())).await;
            let definition = TriggerDefinition {
                config: json!({"method": "POST", "authType": "token", "token": token}),
                ..webhook_definition("orders", true)
            };
            let original = service.register_trigger(flow_id, definition).await.unwrap();

            for _ in 0..prior_fires {
                service.fire_trigger(original.id, json!({})).await.unwrap();
            }

            service.update_trigger(original.id, TriggerPatch::enabled(false)).await.unwrap();
            let restored = service
                .update_trigger(original.id, TriggerPatch::enabled(true))
                .await
                .unwrap();

            assert!(service.is_armed(original.id).await);
            assert!(restored.enabled);
            assert_eq!(restored.config, original.config);
            assert_eq!(restored.trigger_type, original.trigger_type);
            assert_eq!(restored.webhook_path, original.webhook_path);
            assert_eq!(restored.fire_count, prior_fires as i64);

            // Still fires afterwards
            service.fire_trigger(original.id, json!({})).await.unwrap();
        });
    });
}
