//! Client lifecycle tests
//!
//! No relay is reachable in these tests; they exercise the reconnect path
//! and shutdown against a closed port.

use habridge_cloud::{BackoffConfig, CloudClient, CloudConfig, ConnectionState};
use habridge_test_utils::{find_available_port, wait_for, DEFAULT_CHECK_INTERVAL};
use std::time::Duration;

async fn unreachable_config(max_attempts: Option<u32>) -> CloudConfig {
    let port = find_available_port().await;
    let mut config = CloudConfig::new("test-uuid", "test-secret");
    config.base_url = format!("http://127.0.0.1:{}/", port);
    config.backoff = BackoffConfig {
        min_ms: 20,
        max_ms: 50,
        factor: 2.0,
        jitter: 0.0,
    };
    config.max_reconnect_attempts = max_attempts;
    config
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (client, _commands) = CloudClient::new(unreachable_config(Some(2)).await).unwrap();
    client.start().unwrap();

    let failed = wait_for(
        || async { client.state() == ConnectionState::Failed },
        DEFAULT_CHECK_INTERVAL,
        Duration::from_secs(10),
    )
    .await;
    assert!(failed, "client should give up, state is {}", client.state());
    assert!(
        wait_for(
            || async { !client.reconnect_pending() },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(2)
        )
        .await
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_reconnecting() {
    let (client, _commands) = CloudClient::new(unreachable_config(None).await).unwrap();
    client.start().unwrap();

    let retrying = wait_for(
        || async { client.state() == ConnectionState::Reconnecting },
        DEFAULT_CHECK_INTERVAL,
        Duration::from_secs(10),
    )
    .await;
    assert!(retrying);

    client.shutdown().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.reconnect_pending());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_events_while_disconnected_are_dropped() {
    let (client, _commands) = CloudClient::new(unreachable_config(Some(0)).await).unwrap();
    client.start().unwrap();
    client.send_item_update("Kitchen_Light", "ON").unwrap();
    assert!(!client.is_connected());
    client.shutdown().await;
}
