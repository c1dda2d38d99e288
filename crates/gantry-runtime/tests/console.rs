//! Console channel behaviour through the environment.

mod common;

use std::time::Duration;

use common::{Harness, drain_events, fast_settings};
use futures_util::StreamExt;
use gantry_core::{EnvironmentError, EnvironmentEvent, LifecycleState};
use gantry_runtime::ConsoleSubscriber;
use tokio_test::{assert_err, assert_ok};

async fn next_line(subscriber: &mut ConsoleSubscriber) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
        .await
        .expect("timed out waiting for console output")
}

#[tokio::test]
async fn test_attach_requires_running_instance() {
    let h = Harness::new(fast_settings());
    assert_ok!(h.env.create().await);

    let err = assert_err!(h.env.attach().await);
    assert!(matches!(err, EnvironmentError::NotRunning));
    assert_eq!(h.driver.calls().attach, 0);
}

#[tokio::test]
async fn test_attach_twice_is_rejected() {
    let h = Harness::running(fast_settings()).await;
    assert_ok!(h.env.attach().await);

    let err = assert_err!(h.env.attach().await);
    assert!(matches!(err, EnvironmentError::AlreadyAttached));
    assert_eq!(h.driver.calls().attach, 1);
}

#[tokio::test]
async fn test_unattached_console_operations_fail() {
    let h = Harness::running(fast_settings()).await;

    assert!(matches!(
        h.env.follow_console_output().await,
        Err(EnvironmentError::NotAttached)
    ));
    assert!(matches!(
        h.env.subscribe_console(),
        Err(EnvironmentError::NotAttached)
    ));
    assert!(matches!(
        h.env.send_command("list").await,
        Err(EnvironmentError::NotAttached)
    ));
}

#[tokio::test]
async fn test_every_subscriber_sees_each_line_once_in_order() {
    let h = Harness::attached(fast_settings()).await;
    let mut first = assert_ok!(h.env.subscribe_console());
    let mut second = assert_ok!(h.env.subscribe_console());

    for line in ["[Server] Preparing spawn area", "[Server] Done (4.1s)!"] {
        assert!(h.driver.emit_line(line));
    }

    for subscriber in [&mut first, &mut second] {
        assert_eq!(
            next_line(subscriber).await.as_deref(),
            Some("[Server] Preparing spawn area")
        );
        assert_eq!(
            next_line(subscriber).await.as_deref(),
            Some("[Server] Done (4.1s)!")
        );
    }

    assert_ok!(h.env.stop().await);
    assert_eq!(next_line(&mut first).await, None);
    assert_eq!(next_line(&mut second).await, None);
    assert_eq!(first.missed(), 0);
}

#[tokio::test]
async fn test_late_subscriber_gets_no_history() {
    let h = Harness::attached(fast_settings()).await;
    let mut early = assert_ok!(h.env.subscribe_console());

    assert!(h.driver.emit_line("before"));
    assert_eq!(next_line(&mut early).await.as_deref(), Some("before"));

    let mut late = assert_ok!(h.env.subscribe_console());
    assert!(h.driver.emit_line("after"));
    assert_eq!(next_line(&mut late).await.as_deref(), Some("after"));
    assert_eq!(next_line(&mut early).await.as_deref(), Some("after"));
}

#[tokio::test]
async fn test_follow_twice_relays_once() {
    let h = Harness::attached(fast_settings()).await;
    assert_ok!(h.env.follow_console_output().await);
    assert_ok!(h.env.follow_console_output().await);

    let mut output = Box::pin(assert_ok!(h.env.subscribe_console()).into_stream());
    assert!(h.driver.emit_line("one"));
    assert!(h.driver.emit_line("two"));

    assert_eq!(output.next().await.as_deref(), Some("one"));
    assert_eq!(output.next().await.as_deref(), Some("two"));
    let extra = tokio::time::timeout(Duration::from_millis(50), output.next()).await;
    assert!(extra.is_err(), "unexpected duplicate output");
}

#[tokio::test]
async fn test_commands_are_written_in_order() {
    let h = Harness::attached(fast_settings()).await;

    for command in ["save-off", "save-all", "save-on"] {
        assert_ok!(h.env.send_command(command).await);
    }
    assert_eq!(h.driver.written_lines(), vec!["save-off", "save-all", "save-on"]);
}

#[tokio::test]
async fn test_send_command_requires_running_instance() {
    let h = Harness::attached(fast_settings()).await;
    assert_ok!(h.env.stop().await);

    let err = assert_err!(h.env.send_command("say hi").await);
    assert!(matches!(err, EnvironmentError::NotRunning));
    assert!(h.driver.written_lines().is_empty());
}

#[tokio::test]
async fn test_backend_death_closes_console() {
    let h = Harness::attached(fast_settings()).await;
    let mut subscriber = assert_ok!(h.env.subscribe_console());
    let mut events = h.env.events();

    h.driver.crash();
    assert_eq!(next_line(&mut subscriber).await, None);
    assert!(
        drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, EnvironmentEvent::ConsoleDetached))
    );

    assert!(!assert_ok!(h.env.is_running().await));
    assert_eq!(h.env.state(), LifecycleState::Crashed);
}

#[tokio::test]
async fn test_console_can_be_reattached_after_restart() {
    let h = Harness::attached(fast_settings()).await;
    assert_ok!(h.env.stop().await);
    assert_ok!(h.env.start().await);

    assert_ok!(h.env.attach().await);
    assert_ok!(h.env.follow_console_output().await);
    let mut subscriber = assert_ok!(h.env.subscribe_console());
    assert!(h.driver.emit_line("welcome back"));
    assert_eq!(
        next_line(&mut subscriber).await.as_deref(),
        Some("welcome back")
    );
}
