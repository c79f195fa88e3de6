mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{card_request, crypto_request, native, orchestrator_with, FakeProvider};
use omarapay_backend::payments::error::PaymentError;
use omarapay_backend::payments::retry::RetryPolicy;
use omarapay_backend::payments::status::CanonicalStatus;
use omarapay_backend::services::payment_orchestrator::OrchestratorConfig;
use omarapay_backend::services::registry::UpdateSource;
use omarapay_backend::workers::charge_poller::{PollState, PollerConfig};
use tokio::time::Instant;

fn poller_config(interval_secs: u64, max_attempts: u32) -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(interval_secs),
        max_attempts,
        ..PollerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn create_retries_through_warm_up_errors() {
    let provider = Arc::new(FakeProvider::card().failing_creates("Activity doesn't exist yet", 3));
    let (orchestrator, _) = orchestrator_with(provider.clone(), OrchestratorConfig::default());

    let started = Instant::now();
    let record = orchestrator
        .create_charge(card_request(), Some("order-42".to_string()))
        .await
        .expect("create should succeed on the fourth call");

    assert_eq!(provider.creates(), 4);
    assert_eq!(record.charge_id, "fake_order-42");
    assert_eq!(record.status, CanonicalStatus::Created);
    // 350ms + 700ms + 1400ms
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2450), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2500), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn create_gives_up_after_the_attempt_budget() {
    let provider = Arc::new(FakeProvider::card().failing_creates("Activity does not exist", 10));
    let config = OrchestratorConfig {
        retry_policy: RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        },
        ..OrchestratorConfig::default()
    };
    let (orchestrator, registry) = orchestrator_with(provider.clone(), config);

    let err = orchestrator
        .create_charge(card_request(), Some("order-43".to_string()))
        .await
        .expect_err("create should fail once attempts run out");

    assert!(matches!(
        err,
        PaymentError::RetriesExhaustedError { attempts: 3, .. }
    ));
    assert_eq!(provider.creates(), 3);
    assert_eq!(registry.stats().await.total, 0);
}

#[tokio::test(start_paused = true)]
async fn permanent_create_errors_are_not_retried() {
    let provider = Arc::new(FakeProvider::card().failing_creates("card_declined", 1));
    let (orchestrator, _) = orchestrator_with(provider.clone(), OrchestratorConfig::default());

    let started = Instant::now();
    let err = orchestrator
        .create_charge(card_request(), None)
        .await
        .expect_err("a non-transient error surfaces immediately");

    assert!(matches!(err, PaymentError::ProviderError { .. }));
    assert_eq!(provider.creates(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn methods_outside_the_retry_set_call_the_provider_once() {
    let provider =
        Arc::new(FakeProvider::crypto().failing_creates("Activity doesn't exist yet", 1));
    let (orchestrator, _) = orchestrator_with(provider.clone(), OrchestratorConfig::default());

    let err = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .expect_err("crypto creates are not wrapped");

    assert!(matches!(err, PaymentError::ProviderError { .. }));
    assert_eq!(provider.creates(), 1);
}

#[tokio::test]
async fn same_idempotency_key_returns_the_same_charge() {
    let provider = Arc::new(FakeProvider::card());
    let (orchestrator, registry) = orchestrator_with(provider.clone(), OrchestratorConfig::default());

    let first = orchestrator
        .create_charge(card_request(), Some("till-7-0001".to_string()))
        .await
        .unwrap();
    let second = orchestrator
        .create_charge(card_request(), Some(" till-7-0001 ".to_string()))
        .await
        .unwrap();

    assert_eq!(first.charge_id, second.charge_id);
    assert_eq!(provider.creates(), 1);
    assert_eq!(registry.stats().await.total, 1);
}

#[tokio::test]
async fn concurrent_creates_with_one_key_reach_the_provider_once() {
    let provider = Arc::new(FakeProvider::card());
    let (orchestrator, _) = orchestrator_with(provider.clone(), OrchestratorConfig::default());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .create_charge(card_request(), Some("shared-key".to_string()))
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().charge_id);
    }
    ids.dedup();
    assert_eq!(ids, vec!["fake_shared-key".to_string()]);
    assert_eq!(provider.creates(), 1);
}

#[tokio::test]
async fn unconfigured_method_is_a_configuration_error() {
    let provider = Arc::new(FakeProvider::card());
    let (orchestrator, _) = orchestrator_with(provider, OrchestratorConfig::default());

    let err = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .expect_err("no crypto provider is configured");
    assert!(matches!(err, PaymentError::ConfigurationError { .. }));
}

#[tokio::test(start_paused = true)]
async fn polling_stops_at_the_attempt_bound_without_marking_failure() {
    let provider = Arc::new(FakeProvider::crypto());
    let config = OrchestratorConfig {
        poller: poller_config(5, 4),
        ..OrchestratorConfig::default()
    };
    let (orchestrator, registry) = orchestrator_with(provider.clone(), config);
    let record = orchestrator
        .create_charge(crypto_request(), Some("bound".to_string()))
        .await
        .unwrap();

    let started = Instant::now();
    let err = orchestrator
        .poll_until_terminal(&record.charge_id)
        .await
        .expect_err("charge never settles");

    assert!(matches!(err, PaymentError::TimedOutError { attempts: 4, .. }));
    assert_eq!(provider.fetches(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(15));

    let stored = registry.get(&record.charge_id).await.unwrap();
    assert_eq!(stored.status, CanonicalStatus::Pending);
    assert_eq!(stored.poll_attempts, 4);
}

#[tokio::test(start_paused = true)]
async fn polling_returns_the_terminal_record() {
    let provider = Arc::new(FakeProvider::crypto().with_fetches(vec![
        native("pending"),
        Err(PaymentError::NetworkError {
            message: "connection reset".to_string(),
        }),
        native("succeeded"),
    ]));
    let config = OrchestratorConfig {
        poller: poller_config(5, 10),
        ..OrchestratorConfig::default()
    };
    let (orchestrator, _) = orchestrator_with(provider.clone(), config);
    let record = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .unwrap();

    let settled = orchestrator
        .poll_until_terminal(&record.charge_id)
        .await
        .expect("charge settles on the third fetch");

    assert_eq!(settled.status, CanonicalStatus::Succeeded);
    assert_eq!(settled.last_update_source, UpdateSource::Poll);
    assert_eq!(provider.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_polling_cancels_a_tracked_poller() {
    let provider = Arc::new(FakeProvider::crypto());
    let config = OrchestratorConfig {
        poller: poller_config(5, 100),
        ..OrchestratorConfig::default()
    };
    let (orchestrator, registry) = orchestrator_with(provider, config);
    let record = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .unwrap();

    let state = orchestrator.start_polling(&record.charge_id).await.unwrap();
    assert!(!state.is_finished());
    assert_eq!(orchestrator.active_pollers().await, 1);

    // Starting again reuses the running poller.
    orchestrator.start_polling(&record.charge_id).await.unwrap();
    assert_eq!(orchestrator.active_pollers().await, 1);

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(orchestrator.stop_polling(&record.charge_id).await);
    assert!(!orchestrator.stop_polling(&record.charge_id).await);
    assert_eq!(orchestrator.active_pollers().await, 0);

    let stored = registry.get(&record.charge_id).await.unwrap();
    assert!(!stored.is_terminal());
    assert!(stored.poll_attempts >= 1);
}

#[tokio::test(start_paused = true)]
async fn spawned_poller_reports_cancellation() {
    let provider = Arc::new(FakeProvider::crypto());
    let config = OrchestratorConfig {
        poller: poller_config(5, 100),
        ..OrchestratorConfig::default()
    };
    let (orchestrator, _) = orchestrator_with(provider, config);
    let record = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .unwrap();

    let handle = orchestrator.spawn_poller(&record.charge_id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert!(matches!(
        outcome.into_result(),
        Err(PaymentError::CancelledError { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_poller() {
    let provider = Arc::new(FakeProvider::crypto());
    let config = OrchestratorConfig {
        poller: poller_config(5, 100),
        ..OrchestratorConfig::default()
    };
    let (orchestrator, _) = orchestrator_with(provider, config);

    for key in ["a", "b", "c"] {
        let record = orchestrator
            .create_charge(crypto_request(), Some(key.to_string()))
            .await
            .unwrap();
        orchestrator.start_polling(&record.charge_id).await.unwrap();
    }
    assert_eq!(orchestrator.active_pollers().await, 3);

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.active_pollers().await, 0);
}

#[tokio::test]
async fn cancel_applies_the_provider_answer_and_is_final() {
    let provider = Arc::new(FakeProvider::crypto());
    let (orchestrator, _) = orchestrator_with(provider.clone(), OrchestratorConfig::default());
    let record = orchestrator
        .create_charge(crypto_request(), None)
        .await
        .unwrap();

    let cancelled = orchestrator.cancel_charge(&record.charge_id).await.unwrap();
    assert_eq!(cancelled.status, CanonicalStatus::Canceled);
    assert_eq!(cancelled.last_update_source, UpdateSource::Operator);

    // A terminal charge is not sent to the provider again.
    let again = orchestrator.cancel_charge(&record.charge_id).await.unwrap();
    assert_eq!(again.status, CanonicalStatus::Canceled);
    assert_eq!(
        provider
            .cancel_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let refreshed = orchestrator.refresh_status(&record.charge_id).await.unwrap();
    assert_eq!(refreshed.status, CanonicalStatus::Canceled);
    assert_eq!(provider.fetches(), 0);

    let state = PollState::Terminal(CanonicalStatus::Canceled);
    assert!(state.is_finished());
}
