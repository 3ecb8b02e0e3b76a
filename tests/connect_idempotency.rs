use std::time::Duration;

use pubsub_ws::testing::MockTransport;
use pubsub_ws::{
    ConnectParams, ConnectionStatus, PubSubClient, PubSubConfig, PubSubError, SessionState,
};

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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_connect_reuses_the_live_connection() {
    let (transport, server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    assert_eq!(
        client.connection_status().await,
        ConnectionStatus::Disconnected
    );

    client.connect(params()).await.expect("first connect");
    assert!(client.is_connected().await);
    assert_eq!(server.connect_count(), 1);

    client.connect(params()).await.expect("second connect");
    client.connect(params()).await.expect("third connect");
    assert_eq!(server.connect_count(), 1);
    assert_eq!(
        client.session_state().await.unwrap(),
        SessionState::Connected
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_connects_share_one_socket() {
    let (transport, server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    let racing = (0..4)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect(params()).await })
        })
        .collect::<Vec<_>>();
    for task in racing {
        task.await.expect("join").expect("connect");
    }

    assert_eq!(server.connect_count(), 1);
    assert!(client.is_connected().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initial_connect_failure_rejects_without_automatic_retry() {
    let (transport, server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    server.fail_next_connects(1);
    let err = client.connect(params()).await.expect_err("refused connect");
    assert!(matches!(err, PubSubError::ConnectionFailed(_)));
    assert_eq!(
        client.session_state().await.unwrap(),
        SessionState::Idle
    );

    // Longer than the full retry schedule (20 + 40 + 80 ms); nothing fires.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(server.connect_count(), 0);

    // Recovery is caller-driven.
    client.connect(params()).await.expect("explicit retry");
    assert!(client.is_connected().await);
    assert_eq!(server.connect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_reads_stay_responsive_during_a_hanging_connect() {
    let (transport, server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    server.stall_next_connects(1);
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect(params()).await }
    });
    // Let the connect reach the actor before probing the mailbox.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The handshake runs off the mailbox, so reads answer immediately.
    let status = tokio::time::timeout(Duration::from_millis(200), client.connection_status())
        .await
        .expect("status read must not wait on the handshake");
    assert_eq!(status, ConnectionStatus::Connecting);

    // Disconnect settles the hanging connect instead of queueing behind it.
    tokio::time::timeout(Duration::from_millis(200), client.disconnect())
        .await
        .expect("disconnect must not wait on the handshake")
        .expect("disconnect");
    let err = pending.await.expect("join").expect_err("cancelled connect");
    assert!(matches!(err, PubSubError::InvalidState(_)));
    assert_eq!(
        client.connection_status().await,
        ConnectionStatus::Disconnected
    );
    assert_eq!(server.connect_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hung_handshake_times_out_and_leaves_the_session_idle() {
    let (transport, server) = MockTransport::channel_pair();
    let config = PubSubConfig {
        connect_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let client = PubSubClient::with_transport(transport, config);

    server.stall_next_connects(1);
    let err = client.connect(params()).await.expect_err("dial hangs");
    assert!(matches!(err, PubSubError::ConnectionFailed(_)));
    assert_eq!(client.session_state().await.unwrap(), SessionState::Idle);

    // The next attempt dials normally.
    client.connect(params()).await.expect("retry");
    assert!(client.is_connected().await);
    assert_eq!(server.connect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribe_requires_a_prior_connect() {
    let (transport, _server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    let err = client
        .subscribe(&["notes/1"], |_| {})
        .await
        .expect_err("no session");
    assert!(matches!(err, PubSubError::NotConnected));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_is_idempotent() {
    let (transport, server) = MockTransport::channel_pair();
    let client = PubSubClient::with_transport(transport, test_config());

    client.connect(params()).await.expect("connect");
    client.disconnect().await.expect("disconnect");
    client.disconnect().await.expect("repeat disconnect");

    assert_eq!(
        client.connection_status().await,
        ConnectionStatus::Disconnected
    );
    assert_eq!(server.connect_count(), 1);
}
