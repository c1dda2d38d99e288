//! Lifecycle state machine tests against the scripted driver.
//!
//! Backend call counts are asserted wherever an operation must (or must not)
//! reach the backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, drain_events, fast_settings, transitions};
use gantry_core::{
    DriverError, EnvironmentError, EnvironmentEvent, EnvironmentSettings, LifecycleState,
    TerminateSignal,
};
use tokio_test::{assert_err, assert_ok};

use LifecycleState::{Crashed, Offline, Running, Starting, Stopping};

// ── Create / Start ─────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_start_reaches_running() {
    let h = Harness::new(fast_settings());
    assert_eq!(h.env.state(), Offline);
    assert!(!assert_ok!(h.env.exists().await));

    assert_ok!(h.env.create().await);
    assert!(assert_ok!(h.env.exists().await));
    assert_ok!(h.env.start().await);

    assert_eq!(h.env.state(), Running);
    assert!(assert_ok!(h.env.is_running().await));
    assert_eq!(h.env.kind(), "scripted");
    assert_eq!(h.env.name(), "survival");
}

#[tokio::test]
async fn test_create_twice_is_a_noop() {
    let h = Harness::new(fast_settings());
    assert_ok!(h.env.create().await);
    assert_ok!(h.env.create().await);

    assert_eq!(h.driver.calls().create, 1);
    assert_eq!(h.driver.calls().exists, 2);
    assert_eq!(h.env.state(), Offline);
}

#[tokio::test]
async fn test_failed_create_rolls_back() {
    let h = Harness::new(fast_settings());
    h.driver.set_fail_create(true);

    let err = assert_err!(h.env.create().await);
    assert!(matches!(err, EnvironmentError::Provisioning(DriverError::Spawn(_))));
    assert_eq!(h.driver.calls().remove, 1);
    assert!(!h.driver.is_provisioned());
    assert_eq!(h.env.state(), Offline);
}

#[tokio::test]
async fn test_create_surfaces_backend_query_errors() {
    let h = Harness::new(fast_settings());
    h.driver.set_fail_queries(true);

    let err = assert_err!(h.env.create().await);
    assert!(matches!(err, EnvironmentError::Backend(DriverError::Query(_))));
    assert_eq!(h.driver.calls().create, 0);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let h = Harness::running(fast_settings()).await;

    let err = assert_err!(h.env.start().await);
    assert!(matches!(err, EnvironmentError::AlreadyActive(Running)));
    assert!(err.is_state_error());
    assert_eq!(h.driver.calls().start, 1);
    assert_eq!(h.env.state(), Running);
}

#[tokio::test]
async fn test_start_failure_marks_crashed() {
    let h = Harness::new(fast_settings());
    assert_ok!(h.env.create().await);
    h.driver.set_fail_start(true);
    let mut events = h.env.events();

    let err = assert_err!(h.env.start().await);
    assert!(matches!(err, EnvironmentError::Backend(DriverError::Spawn(_))));
    assert_eq!(h.env.state(), Crashed);
    assert_eq!(
        transitions(&drain_events(&mut events)),
        vec![(Offline, Starting), (Starting, Crashed)]
    );

    h.driver.set_fail_start(false);
    assert_ok!(h.env.start().await);
    assert_eq!(h.env.state(), Running);
}

#[tokio::test]
async fn test_start_without_provisioning_fails() {
    let h = Harness::new(fast_settings());
    let err = assert_err!(h.env.start().await);
    assert!(matches!(err, EnvironmentError::Backend(DriverError::NotProvisioned)));
    assert_eq!(h.env.state(), Crashed);
}

// ── Crash detection ────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_death_is_detected_and_restartable() {
    let h = Harness::running(fast_settings()).await;
    let mut events = h.env.events();

    h.driver.crash();
    assert!(!assert_ok!(h.env.is_running().await));
    assert_eq!(h.env.state(), Crashed);

    assert_ok!(h.env.start().await);
    assert_eq!(h.env.state(), Running);
    assert_eq!(
        transitions(&drain_events(&mut events)),
        vec![(Running, Crashed), (Crashed, Starting), (Starting, Running)]
    );
}

#[tokio::test]
async fn test_is_running_query_failure_leaves_state_alone() {
    let h = Harness::running(fast_settings()).await;
    h.driver.set_fail_queries(true);

    let err = assert_err!(h.env.is_running().await);
    assert!(matches!(err, EnvironmentError::Backend(DriverError::Query(_))));
    assert_eq!(h.env.state(), Running);
}

// ── Stop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_twice_is_idempotent() {
    let h = Harness::running(fast_settings()).await;

    assert_ok!(h.env.stop().await);
    assert_eq!(h.env.state(), Offline);
    assert_ok!(h.env.stop().await);

    assert_eq!(h.driver.calls().stop, 1);
    assert_eq!(h.env.state(), Offline);
}

#[tokio::test]
async fn test_stop_when_never_started_touches_nothing() {
    let h = Harness::new(fast_settings());
    assert_ok!(h.env.stop().await);
    assert_eq!(h.driver.calls().stop, 0);
    assert_eq!(h.driver.calls().is_running, 0);
}

#[tokio::test]
async fn test_full_cycle_state_order() {
    let h = Harness::new(fast_settings());
    let mut events = h.env.events();

    assert_ok!(h.env.create().await);
    assert_ok!(h.env.start().await);
    assert_ok!(h.env.stop().await);
    assert_ok!(h.env.start().await);

    assert_eq!(
        transitions(&drain_events(&mut events)),
        vec![
            (Offline, Starting),
            (Starting, Running),
            (Running, Stopping),
            (Stopping, Offline),
            (Offline, Starting),
            (Starting, Running),
        ]
    );
}

#[tokio::test]
async fn test_stop_timeout_then_terminate() {
    let h = Harness::running(fast_settings()).await;
    h.driver.set_ignore_stop(true);
    let mut events = h.env.events();

    let err = assert_err!(h.env.stop().await);
    assert!(err.is_timeout());
    assert!(matches!(err, EnvironmentError::Timeout { operation: "stop", .. }));
    assert_eq!(h.env.state(), Stopping);
    assert!(
        drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, EnvironmentEvent::StopTimedOut { grace_ms: 150 }))
    );

    let err = assert_err!(h.env.start().await);
    assert!(matches!(
        err,
        EnvironmentError::InvalidState {
            operation: "start",
            state: Stopping
        }
    ));

    assert_ok!(h.env.terminate(TerminateSignal::Kill).await);
    assert_eq!(h.env.state(), Offline);
    assert_eq!(h.driver.delivered_signals(), vec![TerminateSignal::Kill]);
}

#[tokio::test]
async fn test_exit_after_stop_timeout_is_finalized_offline() {
    let h = Harness::attached(fast_settings()).await;
    let mut console = assert_ok!(h.env.subscribe_console());
    assert_ok!(h.env.enable_resource_polling().await);
    h.driver.set_ignore_stop(true);

    assert!(assert_err!(h.env.stop().await).is_timeout());
    assert_eq!(h.env.state(), Stopping);

    // The server finishes shutting down after the caller gave up waiting.
    h.driver.crash();
    assert!(!assert_ok!(h.env.is_running().await));
    assert_eq!(h.env.state(), Offline);
    assert!(h.env.resources().is_zero());
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), console.recv())
            .await
            .unwrap(),
        None
    );

    assert_ok!(h.env.start().await);
    assert_eq!(h.env.state(), Running);
}

#[tokio::test]
async fn test_stop_timeout_escalates_when_enabled() {
    let settings = EnvironmentSettings {
        escalate_stop_timeout: Some(true),
        ..fast_settings()
    };
    let h = Harness::running(settings).await;
    h.driver.set_ignore_stop(true);

    assert_ok!(h.env.stop().await);
    assert_eq!(h.env.state(), Offline);
    assert_eq!(h.driver.delivered_signals(), vec![TerminateSignal::Kill]);
}

#[tokio::test]
async fn test_stop_retried_after_timeout_reissues_request() {
    let h = Harness::running(fast_settings()).await;
    h.driver.set_ignore_stop(true);
    assert_err!(h.env.stop().await);

    h.driver.set_ignore_stop(false);
    assert_ok!(h.env.stop().await);
    assert_eq!(h.driver.calls().stop, 2);
    assert_eq!(h.env.state(), Offline);
}

#[tokio::test]
async fn test_concurrent_stop_waits_for_the_first() {
    let settings = EnvironmentSettings {
        stop_grace_period_ms: Some(5_000),
        ..fast_settings()
    };
    let h = Harness::running(settings).await;
    h.driver.set_ignore_stop(true);
    let env = Arc::new(h.env);

    let first = tokio::spawn({
        let env = env.clone();
        async move { env.stop().await }
    });
    let mut state = env.subscribe_state();
    assert_ok!(state.wait_for(|s| *s == Stopping).await.map(|_| ()));

    let second = tokio::spawn({
        let env = env.clone();
        async move { env.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    // The instance finally exits on its own.
    h.driver.crash();
    assert_ok!(first.await.unwrap());
    assert_ok!(second.await.unwrap());

    assert_eq!(h.driver.calls().stop, 1);
    assert_eq!(env.state(), Offline);
}

#[tokio::test]
async fn test_terminate_during_stop_grace_period() {
    let settings = EnvironmentSettings {
        stop_grace_period_ms: Some(5_000),
        ..fast_settings()
    };
    let h = Harness::running(settings).await;
    h.driver.set_ignore_stop(true);
    let env = Arc::new(h.env);

    let stopping = tokio::spawn({
        let env = env.clone();
        async move { env.stop().await }
    });
    let mut state = env.subscribe_state();
    assert_ok!(state.wait_for(|s| *s == Stopping).await.map(|_| ()));

    assert_ok!(env.terminate(TerminateSignal::Kill).await);
    assert_ok!(stopping.await.unwrap());
    assert_eq!(env.state(), Offline);
}

// ── Terminate ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_terminate_when_not_running_is_a_noop() {
    let h = Harness::new(fast_settings());
    assert_ok!(h.env.create().await);

    assert_ok!(h.env.terminate(TerminateSignal::Terminate).await);
    assert_eq!(h.driver.calls().terminate, 0);
    assert_eq!(h.env.state(), Offline);
}

#[tokio::test]
async fn test_terminate_running_instance() {
    let h = Harness::running(fast_settings()).await;

    assert_ok!(h.env.terminate(TerminateSignal::Interrupt).await);
    assert_eq!(h.env.state(), Offline);
    assert_eq!(h.driver.delivered_signals(), vec![TerminateSignal::Interrupt]);
    assert!(!assert_ok!(h.env.is_running().await));
}

#[tokio::test]
async fn test_terminate_racing_instance_exit_succeeds() {
    let h = Harness::running(fast_settings()).await;
    h.driver.set_ignore_stop(true);
    assert_err!(h.env.stop().await);

    h.driver.set_exit_before_signal(true);
    assert_ok!(h.env.terminate(TerminateSignal::Terminate).await);
    assert_eq!(h.env.state(), Offline);
    assert_eq!(h.driver.calls().terminate, 1);
    assert!(h.driver.delivered_signals().is_empty());

    assert_ok!(h.env.start().await);
    assert_eq!(h.env.state(), Running);
}

#[tokio::test]
async fn test_unsupported_signal_is_an_error() {
    let h = Harness::running(fast_settings()).await;
    h.driver.mark_unsupported(TerminateSignal::User1);

    let err = assert_err!(h.env.terminate(TerminateSignal::User1).await);
    assert!(matches!(err, EnvironmentError::UnsupportedSignal(ref s) if s == "SIGUSR1"));
    assert_eq!(h.env.state(), Running);
    assert!(h.driver.delivered_signals().is_empty());
}

#[test]
fn test_unknown_signal_names_are_rejected() {
    assert!("SIGKILL".parse::<TerminateSignal>().is_ok());
    let err = assert_err!("SIGWINCH".parse::<TerminateSignal>());
    assert!(matches!(err, EnvironmentError::UnsupportedSignal(_)));
}
