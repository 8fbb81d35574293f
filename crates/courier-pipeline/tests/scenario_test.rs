//! End-to-end pipeline scenarios over the in-memory broker.
//!
//! Each test walks the pipeline through an outage or recovery sequence and
//! checks state, outcomes, and metrics at every step.

mod common;

use std::time::Duration;

use anyhow::Result;
use common::Harness;
use courier_broker::{BrokerError, MemoryBroker};
use courier_core::{ConnectionState, ErrorClass, OutboundMessage, PublishOutcome};

fn message(key: &str) -> OutboundMessage {
    OutboundMessage::new(key, r#"{"kind":"scenario"}"#)
}

#[tokio::test]
async fn lost_connection_skips_then_recovers_on_next_tick() -> Result<()> {
    let h = Harness::new(MemoryBroker::new())?;
    h.start().await?;
    assert!(h.supervisor.wait_until_ready(common::WAIT).await);
    assert_eq!(h.metrics.connection_status(), 1);

    h.broker.fail_next_send(BrokerError::connection("broker transport failure"));
    let failed = h.publisher.publish(message("a")).await;
    assert_eq!(failed.error_class(), Some(ErrorClass::Connection));
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);

    let skipped = h.publisher.publish(message("b")).await;
    assert_eq!(skipped, PublishOutcome::not_ready());

    h.tick().await?;
    assert_eq!(h.supervisor.state(), ConnectionState::Ready);
    assert_eq!(h.supervisor.status().epoch, 2);
    assert_eq!(h.metrics.connection_status(), 1);

    let sent = h.publisher.publish(message("c")).await;
    assert!(sent.is_sent(), "got {sent:?}");

    assert_eq!(h.metrics.published_count("failure"), 1);
    assert_eq!(h.metrics.published_count("skipped"), 1);
    assert_eq!(h.metrics.published_count("success"), 1);

    h.shutdown_coordinator(Duration::from_secs(1)).shutdown().await;
    Ok(())
}

#[tokio::test]
async fn consumer_resumes_after_reconnect() -> Result<()> {
    let h = Harness::new(MemoryBroker::new())?;
    h.start().await?;
    assert!(h.supervisor.wait_until_ready(common::WAIT).await);

    h.broker.set_reachable(false);
    assert!(h.supervisor.wait_for_state(ConnectionState::Disconnected, common::WAIT).await);
    assert_eq!(h.broker.inject("events", None, "{}"), 0, "no subscriber during outage");

    h.broker.set_reachable(true);
    h.tick().await?;
    assert!(h.supervisor.is_ready());

    h.broker.inject("events", Some("after"), r#"{"ok":true}"#);
    let events = h.handler.wait_for(1).await?;
    assert_eq!(events[0].record.key.as_deref(), Some("after"));
    assert_eq!(h.broker.subscriber_count("events"), 1);

    h.shutdown_coordinator(Duration::from_secs(1)).shutdown().await;
    Ok(())
}

#[tokio::test]
async fn stale_loss_report_does_not_tear_down_new_connection() -> Result<()> {
    let h = Harness::new(MemoryBroker::new())?;
    h.connect().await?;
    let first = h.supervisor.status().epoch;

    let error = BrokerError::connection("reset");
    assert!(h.supervisor.report_connection_lost(first, &error));
    h.supervisor.attempt_connect().await;
    assert_eq!(h.supervisor.status().epoch, first + 1);

    assert!(!h.supervisor.report_connection_lost(first, &error));
    assert!(h.supervisor.is_ready());
    Ok(())
}

#[tokio::test]
async fn gauge_follows_every_transition() -> Result<()> {
    let h = Harness::new(MemoryBroker::unreachable())?;
    assert_eq!(h.metrics.connection_status(), 0);

    h.start().await?;
    assert_eq!(h.metrics.connection_status(), 0);

    h.broker.set_reachable(true);
    h.tick().await?;
    assert_eq!(h.metrics.connection_status(), 1);

    h.broker.set_reachable(false);
    assert!(h.supervisor.wait_for_state(ConnectionState::Disconnected, common::WAIT).await);
    assert_eq!(h.metrics.connection_status(), 0);

    h.shutdown_coordinator(Duration::from_secs(1)).shutdown().await;
    assert_eq!(h.metrics.connection_status(), 0);
    Ok(())
}
