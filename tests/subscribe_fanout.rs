use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use pubsub_ws::testing::{MockServer, MockTransport, frame_json};
use pubsub_ws::{ConnectParams, PubSubClient, PubSubConfig, PubSubError};
use sonic_rs::{JsonContainerTrait, JsonValueTrait};

fn params() -> ConnectParams {
    ConnectParams::new("ws://mock.invalid/connect", "test-app", "token-123", "Bearer")
}

fn test_config() -> PubSubConfig {
    PubSubConfig {
        reconnect_base_delay: Duration::from_millis(20),
        reconnect_max_delay: Duration::from_millis(100),
        max_reconnect_attempts: 3,
        stale_threshold: None,
        ..Default::default()
    }
}

fn counting() -> (
    Arc<AtomicUsize>,
    impl Fn(&pubsub_ws::InboundFrame) + Send + Sync + 'static,
) {
    let counter = Arc::new(AtomicUsize::new(0));
    let cb_counter = counter.clone();
    (counter, move |_: &pubsub_ws::InboundFrame| {
        cb_counter.fetch_add(1, Ordering::SeqCst);
    })
}

async fn wait_for_count(counter: &AtomicUsize, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while counter.load(Ordering::SeqCst) < expected {
        if Instant::now() > deadline {
            panic!(
                "timed out waiting for {expected} deliveries (got {})",
                counter.load(Ordering::SeqCst)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn expect_frame(server: &mut MockServer, op: u64, topic: &str) {
    let frame = server
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("outbound frame");
    let json = frame_json(&frame).expect("json payload");
    assert_eq!(json.get("type").as_u64(), Some(op));
    assert_eq!(json.get("topic").as_str(), Some(topic));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_wire_subscribe_fans_out_to_every_listener() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());
    client.connect(params()).await.expect("connect");

    let (hits_a, cb_a) = counting();
    let sub_a = client.subscribe(&["notes/1"], cb_a).await.expect("sub a");
    expect_frame(&mut server, 2, "notes/1").await;

    // A second listener on the same topic reuses the wire subscription.
    let (hits_b, cb_b) = counting();
    let sub_b = client.subscribe(&["notes/1"], cb_b).await.expect("sub b");
    assert!(
        server
            .recv_outbound_timeout(Duration::from_millis(100))
            .await
            .is_none(),
        "no duplicate wire subscribe expected"
    );

    server
        .send_publish("notes/1", r#"{"subject":"updated"}"#)
        .expect("inbound publish");
    wait_for_count(&hits_a, 1).await;
    wait_for_count(&hits_b, 1).await;

    drop(sub_a);
    drop(sub_b);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_removes_only_its_own_callback() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());
    client.connect(params()).await.expect("connect");

    let (hits_a, cb_a) = counting();
    let sub_a = client.subscribe(&["notes/1"], cb_a).await.expect("sub a");
    expect_frame(&mut server, 2, "notes/1").await;
    let (hits_b, cb_b) = counting();
    let sub_b = client.subscribe(&["notes/1"], cb_b).await.expect("sub b");

    // Dropping one of two listeners must not unsubscribe on the wire.
    drop(sub_a);
    assert!(
        server
            .recv_outbound_timeout(Duration::from_millis(100))
            .await
            .is_none()
    );

    server.send_publish("notes/1", "1").expect("inbound publish");
    wait_for_count(&hits_b, 1).await;
    assert_eq!(hits_a.load(Ordering::SeqCst), 0);

    // The last listener leaving tears the topic down on the wire.
    sub_b.unsubscribe().await.expect("unsubscribe");
    expect_frame(&mut server, 3, "notes/1").await;

    server.send_publish("notes/1", "2").expect("inbound publish");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_callback_does_not_break_fanout() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());
    client.connect(params()).await.expect("connect");

    let _bad = client
        .subscribe(&["notes/1"], |_| panic!("listener bug"))
        .await
        .expect("panicking sub");
    expect_frame(&mut server, 2, "notes/1").await;
    let (hits, cb) = counting();
    let _good = client.subscribe(&["notes/1"], cb).await.expect("good sub");

    server.send_publish("notes/1", "1").expect("first publish");
    wait_for_count(&hits, 1).await;

    // The dispatcher survives the panic and keeps delivering.
    server.send_publish("notes/1", "2").expect("second publish");
    wait_for_count(&hits, 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_validates_topic_and_payload() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());
    client.connect(params()).await.expect("connect");

    assert!(matches!(
        client.publish("", "data").await,
        Err(PubSubError::InvalidPublish { .. })
    ));
    assert!(matches!(
        client.publish("notes/1", "").await,
        Err(PubSubError::InvalidPublish { .. })
    ));

    client.publish("notes/1", "hello").await.expect("publish");
    let frame = server
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("publish frame");
    let json = frame_json(&frame).expect("json payload");
    assert_eq!(json.get("type").as_u64(), Some(1));
    assert_eq!(json.get("topic").as_str(), Some("notes/1"));
    assert_eq!(json.get("data").as_str(), Some("hello"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeats_and_protocol_frames_are_never_dispatched() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());
    client.connect(params()).await.expect("connect");

    let (hits, cb) = counting();
    let _sub = client.subscribe(&["notes/1"], cb).await.expect("subscribe");
    expect_frame(&mut server, 2, "notes/1").await;

    server.send_heartbeat().expect("heartbeat");
    server
        .send_text(r#"{"topic":"notes/1","type":2,"data":""}"#)
        .expect("protocol frame");
    server
        .send_text(r#"{"topic":"notes/other","type":1,"data":"x"}"#)
        .expect("unrelated topic");
    server.send_publish("notes/1", "\"real\"").expect("publish");

    wait_for_count(&hits, 1).await;
    // Nothing else trickles in afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishes_while_offline_flush_on_connect() {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    client.publish("notes/1", "queued").await.expect("queue");
    assert!(
        server
            .recv_outbound_timeout(Duration::from_millis(100))
            .await
            .is_none()
    );

    client.connect(params()).await.expect("connect");
    let frame = server
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("flushed publish");
    let json = frame_json(&frame).expect("json payload");
    assert_eq!(json.get("type").as_u64(), Some(1));
    assert_eq!(json.get("data").as_str(), Some("queued"));
}
