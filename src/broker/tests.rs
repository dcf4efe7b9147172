use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use super::Broker;
use super::dispatcher::{self, DispatcherState};
use super::events::{BrokerEvent, DropReason, EventReporter};
use super::message::Message;
use super::queue::PriorityQueue;
use super::subscription::{Delivery, Subscription, SubscriptionTable};
use super::topic::{NextMessage, Topic, TopicConfig};
use crate::config::BrokerSettings;
use crate::utils::error::{BrokerError, QueueError};

const WAIT: Duration = Duration::from_secs(2);

fn settings(delivery_buffer: usize, delivery_timeout_ms: u64) -> BrokerSettings {
    BrokerSettings {
        queue_capacity: 0,
        delivery_buffer,
        delivery_timeout_ms,
    }
}

fn message(priority: i64, sequence: u64) -> Message {
    Message::new("test_topic", format!("m{sequence}"), priority, sequence)
}

async fn recv(rx: &mut Delivery) -> Arc<Message> {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

async fn next_event(events: &mut UnboundedReceiver<BrokerEvent>) -> BrokerEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_dispatched(topic: &Topic, count: u64) {
    timeout(WAIT, async {
        while topic.stats().dispatched < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("dispatcher fell behind");
}

// Priority queue

#[test]
fn test_queue_pops_lowest_priority_first() {
    let mut queue = PriorityQueue::new();
    queue.push(message(5, 0)).unwrap();
    queue.push(message(1, 1)).unwrap();
    queue.push(message(-3, 2)).unwrap();
    queue.push(message(2, 3)).unwrap();

    let order: Vec<i64> = (0..4).map(|_| queue.pop().unwrap().priority).collect();
    assert_eq!(order, vec![-3, 1, 2, 5]);
}

#[test]
fn test_queue_ties_are_fifo() {
    let mut queue = PriorityQueue::new();
    for sequence in 0..10 {
        queue.push(message(7, sequence)).unwrap();
    }
    queue.push(message(0, 10)).unwrap();

    assert_eq!(queue.pop().unwrap().sequence, 10);
    for expected in 0..10 {
        assert_eq!(queue.pop().unwrap().sequence, expected);
    }
}

#[test]
fn test_queue_pop_empty() {
    let mut queue = PriorityQueue::new();
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), Err(QueueError::Empty));
    assert!(queue.peek().is_none());
}

#[test]
fn test_queue_capacity_rejects_push() {
    let mut queue = PriorityQueue::with_capacity(Some(2));
    queue.push(message(1, 0)).unwrap();
    queue.push(message(1, 1)).unwrap();
    assert_eq!(queue.push(message(0, 2)), Err(QueueError::Full(2)));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.capacity(), Some(2));

    queue.pop().unwrap();
    assert!(queue.push(message(0, 3)).is_ok());
}

#[test]
fn test_queue_peek_and_drain() {
    let mut queue = PriorityQueue::new();
    queue.push(message(3, 0)).unwrap();
    queue.push(message(1, 1)).unwrap();

    assert_eq!(queue.peek().map(|m| m.sequence), Some(1));
    assert_eq!(queue.len(), 2);

    let drained = queue.drain();
    assert_eq!(drained.len(), 2);
    assert!(queue.is_empty());
}

// Subscription table

#[tokio::test]
async fn test_table_add_replaces_existing_entry() {
    let mut table = SubscriptionTable::new();
    let (first, _rx1) = Subscription::new("client1".to_string(), "t", 4);
    let (second, _rx2) = Subscription::new("client1".to_string(), "t", 4);

    assert!(table.add(first.clone()).is_none());
    let replaced = table.add(second.clone()).expect("previous entry");
    assert!(replaced.is_same(&first));
    assert_eq!(table.len(), 1);

    // the stale handle must not remove its replacement
    assert!(!table.remove_if_same(&first));
    assert!(table.contains("client1"));
    assert!(table.remove_if_same(&second));
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_table_snapshot_is_independent() {
    let mut table = SubscriptionTable::new();
    let (a, _rx_a) = Subscription::new("a".to_string(), "t", 4);
    let (b, _rx_b) = Subscription::new("b".to_string(), "t", 4);
    table.add(a);
    table.add(b);

    let snapshot = table.snapshot();
    table.remove("a");

    assert_eq!(snapshot.len(), 2);
    assert_eq!(table.len(), 1);
    let ids: HashSet<_> = snapshot.iter().map(|s| s.client_id.as_str()).collect();
    assert!(ids.contains("a") && ids.contains("b"));
}

#[tokio::test]
async fn test_revoked_subscription_rejects_in_flight_send() {
    let (subscription, mut rx) = Subscription::new("client1".to_string(), "t", 4);
    let in_flight = subscription.clone();

    let permit = in_flight.sender().try_reserve().expect("free slot");
    subscription.revoke();

    assert!(!in_flight.is_live());
    assert!(!in_flight.send_if_live(permit, Arc::new(message(0, 0))));
    assert!(rx.try_recv().is_err());
}

// Topic without a running dispatcher

#[tokio::test]
async fn test_topic_waits_for_a_subscriber_then_pops_in_order() {
    let topic = Topic::new("t", TopicConfig::default(), EventReporter::new());
    let priorities = [4, 2, 9, 2, 0, 4];
    for (i, priority) in priorities.iter().enumerate() {
        topic.publish(format!("m{i}"), *priority).unwrap();
    }
    assert_eq!(topic.pending(), priorities.len());
    assert!(matches!(topic.next_message(), NextMessage::Idle));

    let _rx = topic.subscribe("client1").unwrap();
    let mut popped = Vec::new();
    while let NextMessage::Ready(message) = topic.next_message() {
        popped.push((message.priority, message.sequence));
    }

    let mut expected: Vec<(i64, u64)> = priorities
        .iter()
        .enumerate()
        .map(|(i, p)| (*p, i as u64))
        .collect();
    expected.sort();
    assert_eq!(popped, expected);
}

#[tokio::test]
async fn test_topic_publish_assigns_increasing_sequence() {
    let topic = Topic::new("t", TopicConfig::default(), EventReporter::new());
    let first = topic.publish("a", 1).unwrap();
    let second = topic.publish("b", 1).unwrap();

    assert_eq!(first.topic, "t");
    assert!(second.sequence > first.sequence);
    assert_ne!(first.id, second.id);
    assert_eq!(topic.stats().published, 2);
}

#[tokio::test]
async fn test_topic_queue_full_is_reported_to_publisher() {
    let config = TopicConfig {
        queue_capacity: Some(1),
        ..TopicConfig::default()
    };
    let topic = Topic::new("t", config, EventReporter::new());
    topic.publish("a", 1).unwrap();

    let err = topic.publish("b", 1).unwrap_err();
    assert_eq!(err, BrokerError::Queue(QueueError::Full(1)));

    // a rejected publish does not consume a sequence number
    let _rx = topic.subscribe("client1").unwrap();
    let NextMessage::Ready(first) = topic.next_message() else {
        panic!("expected a message");
    };
    let second = topic.publish("c", 1).unwrap();
    assert_eq!(second.sequence, first.sequence + 1);
}

#[tokio::test]
async fn test_topic_shutdown_discards_and_reports() {
    let (reporter, mut events) = EventReporter::channel();
    let topic = Topic::new("t", TopicConfig::default(), reporter);
    topic.publish("a", 1).unwrap();
    topic.publish("b", 2).unwrap();
    topic.publish("c", 3).unwrap();

    assert_eq!(topic.shutdown(), 3);
    assert_eq!(topic.shutdown(), 0);
    assert!(topic.is_stopped());
    assert_eq!(topic.pending(), 0);
    assert!(matches!(topic.next_message(), NextMessage::Stopped));

    assert_eq!(
        next_event(&mut events).await,
        BrokerEvent::MessagesDiscarded {
            topic: "t".to_string(),
            count: 3,
        }
    );
    assert_eq!(
        topic.publish("d", 1).unwrap_err(),
        BrokerError::TopicClosed("t".to_string())
    );
    assert!(matches!(
        topic.subscribe("client1"),
        Err(BrokerError::TopicClosed(_))
    ));
}

#[tokio::test]
async fn test_topic_holds_messages_while_every_channel_is_full() {
    let config = TopicConfig {
        delivery_buffer: 1,
        ..TopicConfig::default()
    };
    let topic = Topic::new("t", config, EventReporter::new());
    topic.publish("a", 1).unwrap();
    topic.publish("b", 2).unwrap();
    let mut rx = topic.subscribe("client1").unwrap();

    let NextMessage::Ready(first) = topic.next_message() else {
        panic!("expected a message");
    };
    dispatcher::fan_out(&topic, Arc::new(first)).await;
    assert!(matches!(topic.next_message(), NextMessage::Blocked));
    assert_eq!(topic.pending(), 1);

    assert_eq!(recv(&mut rx).await.content, "a");
    let NextMessage::Ready(second) = topic.next_message() else {
        panic!("expected a message once the channel drained");
    };
    assert_eq!(second.content, "b");
    assert_eq!(topic.stats().dropped, 0);
}

#[tokio::test]
async fn test_fan_out_closed_receiver_is_forgotten() {
    let (reporter, mut events) = EventReporter::channel();
    let topic = Topic::new("t", TopicConfig::default(), reporter);
    let rx = topic.subscribe("gone").unwrap();
    drop(rx);

    dispatcher::fan_out(&topic, Arc::new(message(0, 0))).await;

    assert!(!topic.is_subscribed("gone"));
    match next_event(&mut events).await {
        BrokerEvent::DeliveryDropped {
            topic: event_topic,
            client_id,
            reason,
            ..
        } => {
            assert_eq!(event_topic, "t");
            assert_eq!(client_id, "gone");
            assert_eq!(reason, DropReason::Closed);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(topic.stats().dropped, 1);
}

// Broker with live dispatchers

#[tokio::test]
async fn test_higher_priority_published_later_is_delivered_first() {
    let broker = Broker::default();
    broker.publish("t", "a", 5).unwrap();
    broker.publish("t", "b", 1).unwrap();

    let mut rx = broker.subscribe("t", "A").unwrap();
    assert_eq!(recv(&mut rx).await.content, "b");
    assert_eq!(recv(&mut rx).await.content, "a");
}

#[tokio::test]
async fn test_backlog_larger_than_delivery_buffer_is_not_dropped() {
    let broker = Broker::new(&settings(4, 0));
    for i in 0..20i64 {
        broker.publish("t", format!("m{i}"), 20 - i).unwrap();
    }

    let mut rx = broker.subscribe("t", "A").unwrap();
    let mut priorities = Vec::new();
    for _ in 0..20 {
        priorities.push(recv(&mut rx).await.priority);
    }

    assert_eq!(priorities, (1..=20).collect::<Vec<i64>>());
    let topic = broker.topic("t");
    wait_for_dispatched(&topic, 20).await;
    assert_eq!(topic.stats().dropped, 0);
}

#[tokio::test]
async fn test_late_subscriber_gets_no_backlog() {
    let broker = Broker::default();
    let mut early = broker.subscribe("t", "early").unwrap();

    broker.publish("t", "first", 1).unwrap();
    assert_eq!(recv(&mut early).await.content, "first");

    let mut late = broker.subscribe("t", "late").unwrap();
    broker.publish("t", "second", 1).unwrap();

    assert_eq!(recv(&mut late).await.content, "second");
    assert_eq!(recv(&mut early).await.content, "second");
    assert!(late.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let broker = Broker::default();
    let mut rx = broker.subscribe("t", "A").unwrap();

    broker.publish("t", "urgent", -10).unwrap();
    assert_eq!(recv(&mut rx).await.content, "urgent");

    assert!(broker.unsubscribe("t", "A"));
    broker.publish("t", "later", -10).unwrap();

    // the channel closes without ever carrying the second message
    let next = timeout(WAIT, rx.recv()).await.expect("channel should close");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_unsubscribe_unknown_topic_is_ignored() {
    let broker = Broker::default();
    assert!(!broker.unsubscribe("nope", "A"));
    assert!(broker.registry().get("nope").is_none());

    let _rx = broker.subscribe("t", "A").unwrap();
    assert!(!broker.unsubscribe("t", "B"));
}

#[tokio::test]
async fn test_resubscribe_replaces_channel() {
    let broker = Broker::default();
    let mut old = broker.subscribe("t", "A").unwrap();
    let mut new = broker.subscribe("t", "A").unwrap();
    assert_eq!(broker.topic("t").subscriber_count(), 1);

    broker.publish("t", "hello", 0).unwrap();
    assert_eq!(recv(&mut new).await.content, "hello");
    assert!(timeout(WAIT, old.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_full_subscriber_only_loses_in_flight_message() {
    let (broker, mut events) = Broker::with_events(&settings(1, 0));
    let mut slow = broker.subscribe("t", "slow").unwrap();
    let mut fast = broker.subscribe("t", "fast").unwrap();

    broker.publish("t", "m1", 0).unwrap();
    assert_eq!(recv(&mut fast).await.content, "m1");

    // slow still holds m1, so m2 is dropped for it alone
    broker.publish("t", "m2", 0).unwrap();
    assert_eq!(recv(&mut fast).await.content, "m2");
    match next_event(&mut events).await {
        BrokerEvent::DeliveryDropped {
            client_id, reason, ..
        } => {
            assert_eq!(client_id, "slow");
            assert_eq!(reason, DropReason::Full);
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert_eq!(recv(&mut slow).await.content, "m1");
    broker.publish("t", "m3", 0).unwrap();
    assert_eq!(recv(&mut slow).await.content, "m3");
    assert_eq!(recv(&mut fast).await.content, "m3");

    let topic = broker.topic("t");
    wait_for_dispatched(&topic, 3).await;
    let stats = topic.stats();
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.delivered, 5);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_blocked_subscriber_does_not_delay_others() {
    let (broker, mut events) = Broker::with_events(&settings(1, 500));
    let _blocked = broker.subscribe("t", "blocked").unwrap();
    let mut live = broker.subscribe("t", "live").unwrap();

    broker.publish("t", "fill", 0).unwrap();
    assert_eq!(recv(&mut live).await.content, "fill");

    let started = Instant::now();
    broker.publish("t", "next", 0).unwrap();
    assert_eq!(recv(&mut live).await.content, "next");
    assert!(started.elapsed() < Duration::from_millis(250));

    match next_event(&mut events).await {
        BrokerEvent::DeliveryDropped {
            client_id, reason, ..
        } => {
            assert_eq!(client_id, "blocked");
            assert_eq!(reason, DropReason::Timeout);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_cleanup_client_removes_all_subscriptions() {
    let broker = Broker::default();
    let _a = broker.subscribe("a", "client1").unwrap();
    let _b = broker.subscribe("b", "client1").unwrap();
    let _c = broker.subscribe("b", "client2").unwrap();

    assert_eq!(broker.cleanup_client("client1"), 2);
    assert!(!broker.topic("a").is_subscribed("client1"));
    assert!(!broker.topic("b").is_subscribed("client1"));
    assert!(broker.topic("b").is_subscribed("client2"));
    assert_eq!(broker.cleanup_client("client1"), 0);
}

#[tokio::test]
async fn test_dispatcher_state_transitions() {
    let broker = Broker::default();
    let topic = broker.topic("t");
    let mut state = topic.watch_state();
    assert_eq!(topic.state(), DispatcherState::Idle);

    let _rx = broker.subscribe("t", "A").unwrap();
    broker.publish("t", "x", 0).unwrap();

    broker.shutdown();
    timeout(WAIT, state.wait_for(|s| *s == DispatcherState::Stopped))
        .await
        .expect("dispatcher did not stop")
        .expect("state sender dropped");
    assert_eq!(topic.state(), DispatcherState::Stopped);
}

#[tokio::test]
async fn test_broker_shutdown_closes_delivery_channels() {
    let (broker, mut events) = Broker::with_events(&settings(4, 0));
    broker.publish("idle", "never delivered", 1).unwrap();
    let mut rx = broker.subscribe("other", "A").unwrap();

    assert_eq!(broker.shutdown(), 1);
    assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
    assert_eq!(
        next_event(&mut events).await,
        BrokerEvent::MessagesDiscarded {
            topic: "idle".to_string(),
            count: 1,
        }
    );
    assert!(broker.publish("other", "late", 0).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_creates_one_topic_under_contention() {
    let broker = Arc::new(Broker::default());
    let handles: Vec<_> = (0..32)
        .map(|_| {
            let broker = broker.clone();
            tokio::spawn(async move { broker.topic("contended") })
        })
        .collect();

    let mut topics = Vec::new();
    for handle in handles {
        topics.push(handle.await.unwrap());
    }

    assert_eq!(broker.registry().len(), 1);
    assert!(topics.iter().all(|t| Arc::ptr_eq(t, &topics[0])));
    assert_eq!(broker.registry().names(), vec!["contended".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_lose_nothing() {
    const PUBLISHERS: usize = 8;
    const PER_PUBLISHER: usize = 250;
    let total = PUBLISHERS * PER_PUBLISHER;

    let broker = Arc::new(Broker::new(&settings(total, 0)));
    let mut rx = broker.subscribe("busy", "reader").unwrap();

    let handles: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..PER_PUBLISHER {
                    broker
                        .publish("busy", format!("{p}-{i}"), (i % 5) as i64)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..total {
        let message = recv(&mut rx).await;
        assert!(seen.insert(message.id), "duplicate delivery");
    }
    assert!(rx.try_recv().is_err());

    let topic = broker.topic("busy");
    wait_for_dispatched(&topic, total as u64).await;
    let stats = topic.stats();
    assert_eq!(stats.published, total as u64);
    assert_eq!(stats.dispatched, total as u64);
    assert_eq!(stats.dropped, 0);
}
