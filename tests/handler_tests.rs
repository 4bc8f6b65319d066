//! Integration tests for the command dispatch and delivery engine, driven
//! directly against `MessageHandler` with in-memory session channels.

use bytes::Bytes;
use memq::protocol::codec::{decode_record, Record};
use memq::protocol::{Command, Delivery};
use memq::registry::SessionId;
use memq::MessageHandler;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn command(record: &str) -> Command {
    match decode_record(record.as_bytes()) {
        Ok(Record::Command(command)) => command,
        other => panic!("expected {record:?} to decode as a command, got {other:?}"),
    }
}

fn connect(handler: &MessageHandler) -> (SessionId, UnboundedReceiver<Bytes>) {
    let (outbound, frames) = mpsc::unbounded_channel();
    (handler.register_session(outbound), frames)
}

fn next_frame(frames: &mut UnboundedReceiver<Bytes>) -> Value {
    let frame = frames.try_recv().expect("expected a queued frame");
    serde_json::from_slice(&frame).unwrap()
}

fn assert_no_frames(frames: &mut UnboundedReceiver<Bytes>) {
    assert!(frames.try_recv().is_err(), "expected no queued frames");
}

fn subscribe(handler: &MessageHandler, session: SessionId, topic: &str) {
    handler.handle_command(
        session,
        command(&json!({"command": "subscribe", "topic": topic}).to_string()),
    );
}

fn publish(handler: &MessageHandler, session: SessionId, topic: &str, msg: &str, delivery: &str) {
    handler.handle_command(
        session,
        command(
            &json!({"command": "send", "topic": topic, "msg": msg, "delivery": delivery})
                .to_string(),
        ),
    );
}

#[test]
fn test_basic_fanout() {
    let handler = MessageHandler::new(100);
    let (a, mut a_frames) = connect(&handler);
    let (b, mut b_frames) = connect(&handler);

    subscribe(&handler, a, "t");
    assert_eq!(next_frame(&mut a_frames), json!({"success": true}));

    publish(&handler, b, "t", "hi", "all");
    assert_eq!(next_frame(&mut b_frames), json!({"success": true}));
    assert_eq!(
        next_frame(&mut a_frames),
        json!({"command": "send", "topic": "t", "msg": "hi", "delivery": "all", "index": 0})
    );
}

#[test]
fn test_publisher_acked_without_subscribers() {
    let handler = MessageHandler::new(100);
    let (publisher, mut frames) = connect(&handler);

    publish(&handler, publisher, "empty", "hello", "all");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(handler.next_index("empty"), 1);
}

#[test]
fn test_replay_with_last_seen() {
    let handler = MessageHandler::new(100);
    let (publisher, mut publisher_frames) = connect(&handler);
    for i in 0..3 {
        publish(&handler, publisher, "t", &format!("m{i}"), "all");
        assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
    }

    let (late, mut late_frames) = connect(&handler);
    handler.handle_command(
        late,
        command(r#"{"command":"subscribe","topic":"t","last_seen":0}"#),
    );

    assert_eq!(next_frame(&mut late_frames), json!({"success": true}));
    assert_eq!(
        next_frame(&mut late_frames),
        json!({"command": "send", "topic": "t", "msg": "m1", "delivery": "all", "index": 1})
    );
    assert_eq!(
        next_frame(&mut late_frames),
        json!({"command": "send", "topic": "t", "msg": "m2", "delivery": "all", "index": 2})
    );
    assert_no_frames(&mut late_frames);
}

#[test]
fn test_no_cache_subscribe_skips_replay() {
    let handler = MessageHandler::new(100);
    let (publisher, mut publisher_frames) = connect(&handler);
    for i in 0..3 {
        publish(&handler, publisher, "t", &format!("m{i}"), "all");
        assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
    }

    let (late, mut late_frames) = connect(&handler);
    handler.handle_command(
        late,
        command(r#"{"command":"subscribe","topic":"t","cache":false}"#),
    );

    assert_eq!(next_frame(&mut late_frames), json!({"success": true}));
    assert_no_frames(&mut late_frames);
}

#[test]
fn test_random_one_delivery_reaches_exactly_one_subscriber() {
    let handler = MessageHandler::new(100);
    let mut subscribers = Vec::new();
    for _ in 0..3 {
        let (session, mut frames) = connect(&handler);
        subscribe(&handler, session, "t");
        assert_eq!(next_frame(&mut frames), json!({"success": true}));
        subscribers.push(frames);
    }

    let (publisher, mut publisher_frames) = connect(&handler);
    publish(&handler, publisher, "t", "x", "one");
    assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));

    let expected = json!({"command": "send", "topic": "t", "msg": "x", "delivery": "one", "index": 0});
    let mut received = 0;
    for frames in &mut subscribers {
        if let Ok(frame) = frames.try_recv() {
            assert_eq!(serde_json::from_slice::<Value>(&frame).unwrap(), expected);
            received += 1;
        }
    }
    assert_eq!(received, 1, "exactly one subscriber receives the message");

    // One-delivery messages are never cached, so a late subscriber sees
    // nothing via replay.
    let (late, mut late_frames) = connect(&handler);
    subscribe(&handler, late, "t");
    assert_eq!(next_frame(&mut late_frames), json!({"success": true}));
    assert_no_frames(&mut late_frames);
    assert!(handler.cached_messages("t").is_empty());
}

#[test]
fn test_one_delivery_without_subscribers_consumes_index() {
    let handler = MessageHandler::new(100);
    let (publisher, mut frames) = connect(&handler);

    publish(&handler, publisher, "t", "dropped", "one");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(handler.next_index("t"), 1);
    assert!(handler.cached_messages("t").is_empty());

    // The dropped message's index is never reassigned.
    publish(&handler, publisher, "t", "kept", "all");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));

    let (late, mut late_frames) = connect(&handler);
    subscribe(&handler, late, "t");
    assert_eq!(next_frame(&mut late_frames), json!({"success": true}));
    assert_eq!(
        next_frame(&mut late_frames),
        json!({"command": "send", "topic": "t", "msg": "kept", "delivery": "all", "index": 1})
    );
    assert_no_frames(&mut late_frames);
}

#[test]
fn test_self_subscribed_publisher_gets_delivery_before_ack() {
    let handler = MessageHandler::new(100);
    let (session, mut frames) = connect(&handler);

    subscribe(&handler, session, "t");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));

    publish(&handler, session, "t", "loop", "all");
    assert_eq!(
        next_frame(&mut frames),
        json!({"command": "send", "topic": "t", "msg": "loop", "delivery": "all", "index": 0})
    );
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
}

#[test]
fn test_subscribe_idempotent_and_replays_again() {
    let handler = MessageHandler::new(100);
    let (publisher, mut publisher_frames) = connect(&handler);
    publish(&handler, publisher, "t", "m", "all");
    assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));

    let (session, mut frames) = connect(&handler);
    let expected = json!({"command": "send", "topic": "t", "msg": "m", "delivery": "all", "index": 0});

    subscribe(&handler, session, "t");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(next_frame(&mut frames), expected);

    subscribe(&handler, session, "t");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(next_frame(&mut frames), expected);

    assert_eq!(handler.subscriber_count("t"), 1);
}

#[test]
fn test_unsubscribe_idempotent() {
    let handler = MessageHandler::new(100);
    let (session, mut frames) = connect(&handler);

    handler.handle_command(session, command(r#"{"command":"unsubscribe","topic":"t"}"#));
    assert_eq!(next_frame(&mut frames), json!({"success": true}));

    subscribe(&handler, session, "t");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    handler.handle_command(session, command(r#"{"command":"unsubscribe","topic":"t"}"#));
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(handler.subscriber_count("t"), 0);
}

#[test]
fn test_purge_removes_session_from_every_topic() {
    let handler = MessageHandler::new(100);
    let (session, mut frames) = connect(&handler);
    subscribe(&handler, session, "t1");
    subscribe(&handler, session, "t2");
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert_eq!(next_frame(&mut frames), json!({"success": true}));

    handler.purge_session(session);
    assert_eq!(handler.subscriber_count("t1"), 0);
    assert_eq!(handler.subscriber_count("t2"), 0);

    // Publishing after the purge reaches nobody but is still acknowledged.
    let (publisher, mut publisher_frames) = connect(&handler);
    publish(&handler, publisher, "t1", "m", "all");
    assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
    assert_no_frames(&mut frames);
}

#[test]
fn test_indices_are_per_topic() {
    let handler = MessageHandler::new(100);
    let (publisher, mut frames) = connect(&handler);

    publish(&handler, publisher, "t1", "a", "all");
    publish(&handler, publisher, "t2", "b", "all");
    publish(&handler, publisher, "t1", "c", "all");
    for _ in 0..3 {
        assert_eq!(next_frame(&mut frames), json!({"success": true}));
    }

    assert_eq!(handler.next_index("t1"), 2);
    assert_eq!(handler.next_index("t2"), 1);

    let cached: Vec<_> = handler
        .cached_messages("t1")
        .iter()
        .map(|m| m.index)
        .collect();
    assert_eq!(cached, vec![0, 1]);
}

#[test]
fn test_cache_capacity_bounds_replay() {
    let handler = MessageHandler::new(2);
    let (publisher, mut publisher_frames) = connect(&handler);
    for i in 0..5 {
        publish(&handler, publisher, "t", &format!("hello{i}"), "all");
        assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
    }

    let (late, mut late_frames) = connect(&handler);
    subscribe(&handler, late, "t");
    assert_eq!(next_frame(&mut late_frames), json!({"success": true}));
    assert_eq!(
        next_frame(&mut late_frames),
        json!({"command": "send", "topic": "t", "msg": "hello3", "delivery": "all", "index": 3})
    );
    assert_eq!(
        next_frame(&mut late_frames),
        json!({"command": "send", "topic": "t", "msg": "hello4", "delivery": "all", "index": 4})
    );
    assert_no_frames(&mut late_frames);
}

#[test]
fn test_cache_invariants_hold_across_mixed_deliveries() {
    let handler = MessageHandler::new(100);
    let (subscriber, mut subscriber_frames) = connect(&handler);
    subscribe(&handler, subscriber, "t");
    assert_eq!(next_frame(&mut subscriber_frames), json!({"success": true}));

    let (publisher, mut publisher_frames) = connect(&handler);
    publish(&handler, publisher, "t", "a", "all");
    publish(&handler, publisher, "t", "b", "one");
    publish(&handler, publisher, "t", "c", "all");
    for _ in 0..3 {
        assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
    }

    let cached = handler.cached_messages("t");
    assert!(cached.iter().all(|m| m.delivery == Delivery::All));
    let indices: Vec<_> = cached.iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(handler.next_index("t"), 3);
}

#[test]
fn test_send_cache_false_skips_the_cache() {
    let handler = MessageHandler::new(100);
    let (publisher, mut frames) = connect(&handler);
    handler.handle_command(
        publisher,
        command(r#"{"command":"send","topic":"t","msg":"m","delivery":"all","cache":false}"#),
    );
    assert_eq!(next_frame(&mut frames), json!({"success": true}));
    assert!(handler.cached_messages("t").is_empty());
    assert_eq!(handler.next_index("t"), 1);
}

#[test]
fn test_delivery_to_dead_session_is_ignored() {
    let handler = MessageHandler::new(100);
    let (gone, mut gone_frames) = connect(&handler);
    subscribe(&handler, gone, "t");
    assert_eq!(next_frame(&mut gone_frames), json!({"success": true}));
    drop(gone_frames);

    let (publisher, mut publisher_frames) = connect(&handler);
    publish(&handler, publisher, "t", "m", "all");
    assert_eq!(next_frame(&mut publisher_frames), json!({"success": true}));
}
