mod common;

use common::*;
use pretty_assertions::assert_eq;
use sc_kafka::broker::MemoryBroker;
use sc_kafka::config::{TopicEntry, TopicRegistry};
use sc_kafka::events::{EventKind, NotificationRequested, PostCreated, SubscriptionCreated};
use sc_kafka::{EngineError, Orchestrator};
use std::time::Duration;

fn subscription_json(id: &str) -> Vec<u8> {
    serde_json::to_vec(&SubscriptionCreated {
        id: id.to_string(),
        subscriber_id: "u1".to_string(),
        creator_id: "u2".to_string(),
        ..Default::default()
    })
    .unwrap()
}

async fn wait_for_commit(broker: &MemoryBroker, topic: &str, group: &str, offset: i64) {
    tokio::time::timeout(PROMPTLY, async {
        while broker.committed_offset(topic, group) != Some(offset) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never reached offset {}", topic, offset));
}

#[tokio::test]
async fn test_one_loop_per_topic_and_clean_shutdown() {
    let broker = MemoryBroker::new();
    broker.append(POST_TOPIC, None, &post_json("p1"));
    broker.append(SUBSCRIPTION_TOPIC, None, &subscription_json("s1"));

    let handler = RecordingHandler::new();
    let orchestrator = Orchestrator::builder(broker.clone(), registry())
        .consume::<PostCreated, _>(handler.clone())
        .consume::<SubscriptionCreated, _>(handler.clone())
        .consume::<NotificationRequested, _>(handler.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(
        orchestrator.topics(),
        vec![POST_TOPIC, SUBSCRIPTION_TOPIC, NOTIFICATION_TOPIC]
    );

    wait_for_commit(&broker, POST_TOPIC, POST_GROUP, 1).await;
    wait_for_commit(&broker, SUBSCRIPTION_TOPIC, SUBSCRIPTION_GROUP, 1).await;

    let reports = tokio::time::timeout(PROMPTLY, orchestrator.shutdown())
        .await
        .expect("shutdown should join every loop");

    let kinds: Vec<EventKind> = reports.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::PostCreated,
            EventKind::SubscriptionCreated,
            EventKind::NotificationRequested
        ]
    );
    assert!(reports.iter().all(|r| r.result.is_ok()));

    let mut seen = handler.seen();
    seen.sort();
    assert_eq!(seen, vec!["p1".to_string(), "s1".to_string()]);
}

#[tokio::test]
async fn test_failing_loop_does_not_stop_siblings() {
    let broker = MemoryBroker::new();
    let handler = RecordingHandler::new();
    let orchestrator = Orchestrator::builder(broker.clone(), registry())
        .consume::<PostCreated, _>(handler.clone())
        .consume::<SubscriptionCreated, _>(handler.clone())
        .start()
        .await
        .unwrap();

    broker.fail_next_fetch(POST_TOPIC, "broker went away");
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The subscription loop keeps consuming after the post loop died
    broker.append(SUBSCRIPTION_TOPIC, None, &subscription_json("s1"));
    wait_for_commit(&broker, SUBSCRIPTION_TOPIC, SUBSCRIPTION_GROUP, 1).await;

    let reports = orchestrator.shutdown().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].topic, POST_TOPIC);
    assert_eq!(
        reports[0].result,
        Err(EngineError::FetchFailed("broker went away".to_string()))
    );
    assert_eq!(reports[1].topic, SUBSCRIPTION_TOPIC);
    assert_eq!(reports[1].result.as_ref().unwrap().committed, 1);
}

#[tokio::test]
async fn test_start_fails_before_spawning_when_a_reader_cannot_connect() {
    let broker = MemoryBroker::new();
    broker.set_unreachable(SUBSCRIPTION_TOPIC, true);
    broker.append(POST_TOPIC, None, &post_json("p1"));

    let handler = RecordingHandler::new();
    let result = Orchestrator::builder(broker.clone(), registry())
        .consume::<PostCreated, _>(handler.clone())
        .consume::<SubscriptionCreated, _>(handler.clone())
        .start()
        .await;

    assert!(matches!(result, Err(EngineError::Connection(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.seen().is_empty());
    assert_eq!(broker.committed_offset(POST_TOPIC, POST_GROUP), None);
}

#[tokio::test]
async fn test_handler_without_consumer_entry_is_skipped() {
    let registry = TopicRegistry::new()
        .with_entry(TopicEntry::new(EventKind::PostCreated, POST_TOPIC).with_group(POST_GROUP))
        .with_entry(TopicEntry::new(EventKind::SubscriptionCreated, SUBSCRIPTION_TOPIC));

    let orchestrator = Orchestrator::builder(MemoryBroker::new(), registry)
        .consume::<PostCreated, _>(RecordingHandler::new())
        .consume::<SubscriptionCreated, _>(RecordingHandler::new())
        .start()
        .await
        .unwrap();

    assert_eq!(orchestrator.topics(), vec![POST_TOPIC]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_external_cancellation_and_signal() {
    let broker = MemoryBroker::new();
    let orchestrator = Orchestrator::builder(broker, registry())
        .consume::<PostCreated, _>(RecordingHandler::new())
        .start()
        .await
        .unwrap();

    let token = orchestrator.cancel_token();
    let signal = async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let reports = tokio::time::timeout(PROMPTLY, orchestrator.run_until_shutdown(signal))
        .await
        .expect("signal should stop every loop");

    assert!(token.is_cancelled());
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_ok());
}

#[tokio::test]
async fn test_stats_are_live() {
    let broker = MemoryBroker::new();
    broker.append(POST_TOPIC, None, &post_json("p1"));
    broker.append(POST_TOPIC, None, b"nonsense");

    let orchestrator = Orchestrator::builder(broker.clone(), registry())
        .consume::<PostCreated, _>(RecordingHandler::new())
        .start()
        .await
        .unwrap();

    wait_for_commit(&broker, POST_TOPIC, POST_GROUP, 2).await;
    let stats = orchestrator.stats();
    assert_eq!(stats[0].0, POST_TOPIC);
    assert_eq!(stats[0].1.committed, 1);
    assert_eq!(stats[0].1.skipped, 1);

    orchestrator.shutdown().await;
}
