//! Connector resilience: losing the hub session and resuming identity.

mod common;

use std::sync::Arc;
use std::time::Duration;

use backhaul::connector::LifecycleState;
use backhaul::ingress::Interceptors;

use common::*;

#[tokio::test]
async fn reconnect_preserves_the_connection_id() {
    let relay = start_relay(
        &[("t1", fast_tenant_config())],
        Default::default(),
        Interceptors::new(),
    )
    .await;
    let addr = relay.addr;

    let events = Arc::new(EventLog::default());
    let connector = {
        use backhaul::connector::{ConnectorConnection, ConnectorOptions, HttpOutbound};
        let options = ConnectorOptions {
            server_url: relay.base_url.clone(),
            tenant: "t1".to_string(),
            connector_name: "test-connector".to_string(),
            binary_size_limit: None,
        };
        let outbound = Arc::new(HttpOutbound::new(relay.base_url.clone()));
        let connection = ConnectorConnection::new(options, Arc::new(EchoTarget), outbound)
            .with_events(Arc::clone(&events) as Arc<dyn backhaul::connector::ConnectionEvents>);
        connection.start().await.unwrap();
        connection
    };

    let original_id = connector.connection_id().expect("connected");

    // Kill the server abruptly; the session drops without a close frame.
    relay.stop().await;
    assert!(
        wait_until(Duration::from_secs(5), || connector.state()
            == LifecycleState::Reconnecting)
        .await,
        "connector should enter the reconnect loop"
    );

    // Bring a server back on the same address.
    let relay = start_relay_at(
        Some(addr),
        &[("t1", fast_tenant_config())],
        Default::default(),
        Interceptors::new(),
    )
    .await;

    assert!(
        wait_until(Duration::from_secs(5), || connector.state()
            == LifecycleState::Connected)
        .await,
        "connector should reconnect"
    );
    assert_eq!(
        connector.connection_id().expect("reconnected"),
        original_id,
        "the hub honours the resumed connection id"
    );

    let snapshot = events.snapshot();
    assert!(snapshot.iter().any(|e| e.starts_with("reconnecting:")));
    assert!(snapshot
        .iter()
        .any(|e| *e == format!("reconnected:{original_id}")));

    // A request after the reconnect completes normally.
    let response = reqwest::get(format!("http://{addr}/t1/ping")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "pong");

    connector.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn stop_while_disconnected_is_clean() {
    // Nothing is listening; start() retries until stop() interrupts it.
    let relay = start_relay(
        &[("t1", fast_tenant_config())],
        Default::default(),
        Interceptors::new(),
    )
    .await;
    let base_url = relay.base_url.clone();
    relay.stop().await;

    use backhaul::connector::{ConnectorConnection, ConnectorOptions, HttpOutbound};
    let options = ConnectorOptions {
        server_url: base_url.clone(),
        tenant: "t1".to_string(),
        connector_name: "test-connector".to_string(),
        binary_size_limit: None,
    };
    let outbound = Arc::new(HttpOutbound::new(base_url));
    let connection = Arc::new(ConnectorConnection::new(
        options,
        Arc::new(EchoTarget),
        outbound,
    ));

    let starter = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.start().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    connection.stop().await;

    starter.await.unwrap().unwrap();
    assert_eq!(connection.state(), LifecycleState::Disconnected);
    assert!(connection.connection_id().is_none());
}
