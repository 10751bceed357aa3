//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "tests"
//! bmq_type: "source"
//! bmq_scope: "test"
//! bmq_description: "End-to-end session lifecycle, delivery and post flows over the mock session."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bmq_bridge::codes::{PropertyType, ResultCode, SessionEventType};
use bmq_bridge::properties::{MessageProperties, WireValue};
use bmq_bridge::{
    BridgeMetrics, CorrelationId, HostCallbacks, HostHealthMonitor, HostValue, MessageGuid,
    PropertySet, QueueOptions, Session, SessionError, SessionNotification,
};
use bmq_bridge_common::SessionConfig;
use bmq_bridge_mock::{MockCall, MockHarness, ScriptedAck, ScriptedCorrelation, ScriptedPush};
use bytes::Bytes;

const QUEUE: &str = "bmq://bmq.test.mem.priority/flow";

fn guid(last: u8) -> MessageGuid {
    let mut bytes = [0u8; MessageGuid::SIZE];
    bytes[MessageGuid::SIZE - 1] = last;
    MessageGuid::from_bytes(bytes)
}

fn started(harness: &MockHarness) -> Session {
    let session = harness.connect().expect("connect");
    session.start(None).expect("start");
    session
}

#[test]
fn lifecycle_rejects_operations_after_stop() {
    let harness = MockHarness::new();
    let session = started(&harness);
    session
        .open_queue(QUEUE, true, true, QueueOptions::default(), None)
        .expect("open");
    session.close_queue(QUEUE, None).expect("close");
    session.stop(false).expect("stop");
    session.stop(false).expect("second stop is a no-op");

    let err = session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect_err("stopped");
    assert!(matches!(err, SessionError::SessionStopped));

    let names: Vec<_> = harness.expected.history().iter().map(MockCall::name).collect();
    assert_eq!(names, ["start", "openQueueSync", "closeQueueSync", "stop"]);
    assert_eq!(
        harness.expected.history()[0],
        MockCall::Start {
            timeout: Duration::from_secs(60)
        }
    );
}

#[test]
fn scripted_push_arrives_before_open_returns() {
    let harness = MockHarness::new();
    harness
        .hooks
        .enqueue_push(vec![ScriptedPush::new(&b"hello"[..], guid(1), QUEUE)]);
    let session = started(&harness);

    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");

    let batches = harness.host.message_batches();
    assert_eq!(batches.len(), 1);
    let message = &batches[0][0];
    assert_eq!(message.payload, Bytes::from_static(b"hello"));
    assert_eq!(message.guid, guid(1));
    assert_eq!(message.queue_uri, QUEUE);
    assert!(message.properties.is_empty());
    assert_eq!(harness.hooks.pending_push(), 0);
    session.stop(false).expect("stop");
}

#[test]
fn posted_correlation_comes_back_in_the_ack() {
    let harness = MockHarness::new();
    harness
        .hooks
        .enqueue_ack(vec![ScriptedAck::new(0, guid(7), QUEUE)]);
    let session = started(&harness);
    session
        .open_queue(QUEUE, false, true, QueueOptions::default(), None)
        .expect("open");

    let handle = CorrelationId::new("H");
    session
        .post(QUEUE, &b"payload"[..], None, Some(handle.clone()))
        .expect("post");

    let acks = harness.host.take_acks();
    assert_eq!(acks.len(), 1);
    let ack = &acks[0][0];
    assert_eq!(ack.status, 0);
    assert_eq!(ack.status_name, "SUCCESS");
    assert_eq!(ack.guid, Some(guid(7)));
    assert!(ack.correlation.as_ref().expect("correlated").ptr_eq(&handle));
    assert_eq!(handle.holders(), 2);

    drop(acks);
    assert_eq!(handle.holders(), 1);
    session.stop(false).expect("stop");
}

#[test]
fn rejected_post_hands_the_correlation_back() {
    let harness = MockHarness::new();
    harness.hooks.update_codes(|codes| codes.post = -6);
    harness
        .hooks
        .enqueue_ack(vec![ScriptedAck::new(-6, guid(2), QUEUE)]);
    let session = started(&harness);
    session
        .open_queue(QUEUE, false, true, QueueOptions::default(), None)
        .expect("open");

    let handle = CorrelationId::new(42_u32);
    let failure = session
        .post(QUEUE, &b"payload"[..], None, Some(handle.clone()))
        .expect_err("refused");
    assert_eq!(
        failure.error.to_string(),
        format!("Failed to post message to {QUEUE} queue: REFUSED (-6)")
    );
    assert!(failure.returned.expect("returned").ptr_eq(&handle));
    assert!(harness.host.take_acks().is_empty());
    assert_eq!(handle.holders(), 1);
    session.stop(false).expect("stop");
}

#[test]
fn uncorrelated_nacks_are_not_delivered() {
    let harness = MockHarness::new();
    harness.hooks.enqueue_ack(vec![
        ScriptedAck::new(-101, guid(3), QUEUE).with_correlation(ScriptedCorrelation::Unset),
        ScriptedAck::new(-100, guid(4), QUEUE),
    ]);
    let session = started(&harness);
    session
        .open_queue(QUEUE, false, true, QueueOptions::default(), None)
        .expect("open");

    let handle = CorrelationId::new("kept");
    session
        .post(QUEUE, &b"x"[..], None, Some(handle.clone()))
        .expect("post");

    let acks = harness.host.take_acks();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].len(), 1);
    assert_eq!(acks[0][0].status_name, "LIMIT_MESSAGES");
    assert_eq!(acks[0][0].guid, None);
    session.stop(false).expect("stop");
}

#[test]
fn posted_properties_reach_the_native_side_intact() {
    let harness = MockHarness::new();
    let session = started(&harness);
    session
        .open_queue(QUEUE, false, true, QueueOptions::default(), None)
        .expect("open");

    let properties = PropertySet::new()
        .with("count", 7_i64, PropertyType::Short)
        .with("label", "blue", PropertyType::String)
        .with("flag", true, PropertyType::Bool)
        .with("raw", vec![0xde, 0xad], PropertyType::Binary);
    session
        .post(QUEUE, &b"body"[..], Some(&properties), None)
        .expect("post");

    let post = harness
        .hooks
        .calls()
        .into_iter()
        .find(|call| matches!(call, MockCall::Post { .. }))
        .expect("post recorded");
    match post {
        MockCall::Post {
            queue_uri,
            payload,
            properties: seen,
            ..
        } => {
            assert_eq!(queue_uri, QUEUE);
            assert_eq!(payload, Bytes::from_static(b"body"));
            assert_eq!(seen, properties);
        }
        other => panic!("unexpected call {other:?}"),
    }
    session.stop(false).expect("stop");
}

#[test]
fn unknown_wire_tag_is_reported_and_skipped() {
    let harness = MockHarness::new();
    let mut wire = MessageProperties::new();
    wire.set_as_int32(b"ok", 5);
    wire.set_raw(b"future", WireValue::Unrecognized { type_code: 9 });
    harness.hooks.enqueue_push(vec![
        ScriptedPush::new(&b"m"[..], guid(1), QUEUE).with_wire_properties(wire)
    ]);
    let session = started(&harness);
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");

    assert_eq!(
        harness.host.diagnostics(),
        vec!["'future' property type is unrecognized, type 9 received.\n".to_owned()]
    );
    let batches = harness.host.message_batches();
    let properties = &batches[0][0].properties;
    assert_eq!(properties.len(), 1);
    assert_eq!(
        properties.get(b"ok"),
        Some(&(HostValue::Int(5), PropertyType::Int32.into()))
    );
    session.stop(false).expect("stop");
}

#[test]
fn confirm_on_a_closing_queue_fails() {
    let harness = MockHarness::new();
    let session = started(&harness);
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");
    harness.hooks.set_close_on_get(true);

    let err = session
        .confirm(QUEUE, guid(1).as_bytes())
        .expect_err("closing");
    assert!(matches!(err, SessionError::QueueClosing { ref uri } if uri == QUEUE));
    assert!(err.to_string().ends_with(&format!("closing the queue<{QUEUE}>")));
    assert!(harness
        .expected
        .history()
        .contains(&MockCall::CloseOnGet { uri: QUEUE.into() }));

    harness.hooks.set_close_on_get(false);
    let err = session
        .confirm(QUEUE, guid(1).as_bytes())
        .expect_err("gone");
    assert!(matches!(err, SessionError::QueueNotOpened { .. }));
    session.stop(false).expect("stop");
}

#[test]
fn failed_open_forgets_the_queue() {
    let harness = MockHarness::new();
    harness.hooks.update_codes(|codes| codes.open_queue = -102);
    harness
        .hooks
        .enqueue_push(vec![ScriptedPush::new(&b"later"[..], guid(1), QUEUE)]);
    let session = started(&harness);

    let err = session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect_err("invalid uri");
    assert!(err
        .to_string()
        .starts_with(&format!("Failed to open {QUEUE} queue: INVALID_URI (-102)")));
    assert_eq!(err.result_code(), Some(-102));
    assert_eq!(harness.hooks.pending_push(), 1);

    harness.hooks.update_codes(|codes| codes.open_queue = 0);
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("reopen");
    assert_eq!(harness.host.message_batches().len(), 1);
    session.stop(false).expect("stop");
}

#[test]
fn native_timeouts_are_classified() {
    let harness = MockHarness::new();
    harness.hooks.update_codes(|codes| codes.configure_queue = -2);
    let session = started(&harness);
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");

    let err = session
        .configure_queue(
            QUEUE,
            QueueOptions::default().with_consumer_priority(5),
            Some(Duration::from_secs(1)),
        )
        .expect_err("timeout");
    assert!(err.is_timeout());
    assert_eq!(
        session.get_queue_options(QUEUE).expect("options"),
        QueueOptions::default()
    );
    session.stop(false).expect("stop");
}

#[test]
fn escalated_warning_surfaces_from_stop() {
    let harness = MockHarness::new();
    let config = SessionConfig {
        warnings_as_errors: true,
        ..SessionConfig::default()
    };
    let session = harness
        .connect_with(harness.builder(config))
        .expect("connect");
    session.start(None).expect("start");

    let err = session.stop(true).expect_err("escalated");
    assert!(matches!(err, SessionError::Warning(_)));
    assert!(err
        .to_string()
        .contains("stop() not invoked before destruction of Session<"));
    assert!(!session.is_started());
}

#[test]
fn session_options_reach_the_native_factory() {
    let harness = MockHarness::new();
    let config: SessionConfig = r#"
        broker_uri = "tcp://broker:30114"
        process_name_override = "replayer"
        [timeouts]
        connect = 3.0
    "#
    .parse()
    .expect("config");
    let session = harness
        .connect_with(harness.builder(config))
        .expect("connect");

    let options = harness.hooks.recorded_options().expect("recorded");
    assert_eq!(options.broker_uri, "tcp://broker:30114");
    assert_eq!(options.process_name, "replayer");

    session.start(None).expect("start");
    assert_eq!(
        harness.hooks.calls()[0],
        MockCall::Start {
            timeout: Duration::from_secs(3)
        }
    );
    session.stop(false).expect("stop");
}

#[test]
fn dispatch_metrics_count_deliveries() {
    let harness = MockHarness::new();
    harness.hooks.enqueue_push(vec![
        ScriptedPush::new(&b"a"[..], guid(1), QUEUE),
        ScriptedPush::new(&b"b"[..], guid(2), QUEUE),
    ]);
    let registry = prometheus::Registry::new();
    let metrics = BridgeMetrics::register(&registry).expect("register");
    let session = harness
        .connect_with(harness.builder(SessionConfig::default()).metrics(metrics))
        .expect("connect");
    session.start(None).expect("start");
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");

    let pushed = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "bmq_bridge_messages_pushed_total")
        .expect("pushed counter");
    assert_eq!(pushed.get_metric()[0].get_counter().get_value(), 2.0);
    session.stop(false).expect("stop");
}

#[test]
fn callbacks_may_confirm_while_the_open_is_in_flight() {
    let harness = MockHarness::new();
    harness
        .hooks
        .enqueue_push(vec![ScriptedPush::new(&b"m"[..], guid(9), QUEUE)]);

    let slot: Arc<OnceLock<Weak<Session>>> = Arc::new(OnceLock::new());
    let confirming = Arc::clone(&slot);
    let callbacks = HostCallbacks::new(
        |_| Ok(()),
        move |batch| {
            let session = confirming
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| anyhow::anyhow!("session gone"))?;
            for message in batch {
                session.confirm(&message.queue_uri, message.guid.as_bytes())?;
            }
            Ok(())
        },
        |_| Ok(()),
    );
    let session = Arc::new(
        harness
            .builder(SessionConfig::default())
            .connect(&harness.connector(), callbacks)
            .expect("connect"),
    );
    slot.set(Arc::downgrade(&session)).expect("slot");

    session.start(None).expect("start");
    session
        .open_queue(QUEUE, true, false, QueueOptions::default(), None)
        .expect("open");

    assert!(harness.hooks.calls().contains(&MockCall::ConfirmMessage {
        queue_uri: QUEUE.into(),
        guid: guid(9)
    }));
    session.stop(false).expect("stop");
}

#[test]
fn session_events_are_forwarded_with_queue_uri() {
    use bmq_bridge::client::{QueueFlags, QueueId, SessionEvent, SessionEventHandler};
    use bmq_bridge::{EventDispatcher, HostRuntime, SessionNotification, TracingDiagnostics};

    let harness = MockHarness::new();
    let dispatcher = EventDispatcher::new(
        HostRuntime::new(),
        harness.host.callbacks(),
        Arc::new(TracingDiagnostics::default()),
        None,
    );
    dispatcher.on_session_event(&SessionEvent {
        event_type: SessionEventType::QueueResumed.code(),
        status_code: 0,
        description: String::new(),
        queue: Some(QueueId::new(QUEUE, QueueFlags::READ, QueueOptions::default())),
    });

    match &harness.host.notifications()[0] {
        SessionNotification::Event(record) => {
            assert_eq!(record.event_name, "QUEUE_RESUMED");
            assert_eq!(record.queue_uri, QUEUE);
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

fn event_names(harness: &MockHarness) -> Vec<(&'static str, String)> {
    harness
        .host
        .notifications()
        .into_iter()
        .filter_map(|notification| match notification {
            SessionNotification::Event(record) => Some((record.event_name, record.queue_uri)),
            _ => None,
        })
        .collect()
}

#[test]
fn host_health_suspends_sensitive_queues() {
    const PLAIN: &str = "bmq://bmq.test.mem.priority/plain";
    let harness = MockHarness::new();
    let monitor = HostHealthMonitor::new();
    let session = harness
        .connect_with(
            harness
                .builder(SessionConfig::default())
                .host_health_monitor(monitor.clone()),
        )
        .expect("connect");
    let options = harness.hooks.recorded_options().expect("recorded");
    assert!(options.monitor_host_health);
    assert_eq!(options.host_health_monitor.as_ref(), Some(&monitor));

    session.start(None).expect("start");
    let sensitive = QueueOptions::default().with_suspends_on_bad_host_health(true);
    session
        .open_queue(QUEUE, false, true, sensitive, None)
        .expect("open sensitive");
    session
        .open_queue(PLAIN, false, true, QueueOptions::default(), None)
        .expect("open plain");

    monitor.set_unhealthy();
    let handle = CorrelationId::new("held");
    let failure = session
        .post(QUEUE, &b"payload"[..], None, Some(handle.clone()))
        .expect_err("suspended");
    assert_eq!(
        failure.error.to_string(),
        "Failed to construct message: QUEUE_SUSPENDED (-108)"
    );
    assert!(failure.returned.expect("returned").ptr_eq(&handle));
    session
        .post(PLAIN, &b"payload"[..], None, None)
        .expect("plain queue keeps posting");

    monitor.set_healthy();
    session
        .post(QUEUE, &b"payload"[..], None, None)
        .expect("resumed");

    assert_eq!(
        event_names(&harness),
        [
            ("HOST_UNHEALTHY", String::new()),
            ("QUEUE_SUSPENDED", QUEUE.to_owned()),
            ("QUEUE_RESUMED", QUEUE.to_owned()),
            ("HOST_HEALTH_RESTORED", String::new()),
        ]
    );
    let posts = harness
        .hooks
        .calls()
        .iter()
        .filter(|call| call.name() == "post")
        .count();
    assert_eq!(posts, 2);
    session.stop(false).expect("stop");

    monitor.set_unhealthy();
    assert_eq!(event_names(&harness).len(), 4);
}

#[test]
fn host_already_unhealthy_is_reported_on_start() {
    let harness = MockHarness::new();
    let monitor = HostHealthMonitor::new();
    monitor.set_unhealthy();
    let session = harness
        .connect_with(
            harness
                .builder(SessionConfig::default())
                .host_health_monitor(monitor.clone()),
        )
        .expect("connect");
    assert!(event_names(&harness).is_empty());

    session.start(None).expect("start");
    assert_eq!(event_names(&harness), [("HOST_UNHEALTHY", String::new())]);
    session.stop(false).expect("stop");
}
