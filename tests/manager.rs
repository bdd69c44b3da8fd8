mod common;

use std::time::Duration;

use common::{manager, rig_config, MockTransport};
use rigctl::rig::{
    ClusterConfig, ConnectionState, NodeFailureCause, NodeRole, NodeSessionState, RigError,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_connect_opens_one_session_per_node() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    assert_eq!(m.connect_with(rig_config("10.0.0.1")).await, Ok(true));

    assert!(m.connected());
    assert_eq!(m.state(), ConnectionState::Connected);
    assert_eq!(m.open_session_count().await, 3);
    assert_eq!(
        transport.live_hosts(),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );

    let topology = m.topology().unwrap();
    assert_eq!(topology[0].role, NodeRole::Primary);
    assert!(topology[1..].iter().all(|n| n.role == NodeRole::Secondary));
}

#[tokio::test(start_paused = true)]
async fn test_connect_then_disconnect() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    m.connect_with(rig_config("10.0.0.1")).await.unwrap();
    m.disconnect().await;

    assert!(!m.connected());
    assert_eq!(m.state(), ConnectionState::Disconnected);
    assert_eq!(m.open_session_count().await, 0);
    assert_eq!(transport.close_count(), 3);
    assert!(transport.live_hosts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    assert_eq!(m.connect_with(rig_config("10.0.0.1")).await, Ok(true));
    assert_eq!(m.connect().await, Ok(true));
    assert_eq!(m.connect_with(rig_config("10.0.0.1")).await, Ok(true));

    assert_eq!(transport.open_count(), 3);
    assert_eq!(transport.close_count(), 0);
    assert_eq!(m.open_session_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_never_connected_is_noop() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    m.disconnect().await;
    m.disconnect().await;

    assert!(!m.connected());
    assert_eq!(transport.open_count(), 0);
    assert_eq!(transport.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_without_config() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    assert!(matches!(
        m.connect().await,
        Err(RigError::InvalidConfiguration(_))
    ));
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_configure_rejects_invalid_without_io() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    let err = m
        .configure(ClusterConfig::new("lg", "lg", "10.0.0.1", 22, 0))
        .unwrap_err();
    assert!(matches!(err, RigError::InvalidConfiguration(_)));

    let err = m
        .configure(ClusterConfig::new("  ", "lg", "10.0.0.1", 22, 3))
        .unwrap_err();
    assert!(matches!(err, RigError::InvalidConfiguration(_)));

    assert!(m.config().is_none());
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_on_one_node_fails_closed() {
    let transport = MockTransport::new();
    transport.reject_auth("10.0.0.3");
    let m = manager(&transport);

    let err = m.connect_with(rig_config("10.0.0.1")).await.unwrap_err();

    match &err {
        RigError::PartialClusterUnreachable { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 2);
            assert!(matches!(
                failures[0].cause,
                NodeFailureCause::Authentication { .. }
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.failed_nodes(), vec![2]);

    assert!(!m.connected());
    assert_eq!(m.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 2);
    assert_eq!(transport.close_count(), 2);
    assert!(transport.live_hosts().is_empty());
    assert!(!m.connect_flag().await);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_node_times_out() {
    let transport = MockTransport::new();
    transport.hang("10.0.0.2");
    let m = manager(&transport);

    let start = Instant::now();
    let err = m.connect_with(rig_config("10.0.0.1")).await.unwrap_err();

    assert!(start.elapsed() >= Duration::from_secs(10));
    match err {
        RigError::PartialClusterUnreachable { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert_eq!(failures[0].cause, NodeFailureCause::Timeout);
            assert_eq!(
                failures[0].to_error(),
                RigError::ConnectionTimeout { node: 1 }
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(transport.live_hosts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rapid_connects_keep_only_latest() {
    let transport = MockTransport::new();
    transport.set_open_delay(Duration::from_millis(50));
    let m = manager(&transport);

    let (a, b, c) = tokio::join!(
        m.connect_with(rig_config("10.0.1.1")),
        m.connect_with(rig_config("10.0.2.1")),
        m.connect_with(rig_config("10.0.3.1")),
    );

    assert_eq!(a, Err(RigError::Superseded));
    assert_eq!(b, Err(RigError::Superseded));
    assert_eq!(c, Ok(true));

    assert!(m.connected());
    assert_eq!(m.config().unwrap().host, "10.0.3.1");
    assert_eq!(
        transport.live_hosts(),
        vec!["10.0.3.1", "10.0.3.2", "10.0.3.3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_wins_over_inflight_connect() {
    let transport = MockTransport::new();
    transport.set_open_delay(Duration::from_secs(2));
    let m = manager(&transport);
    m.configure(rig_config("10.0.0.1")).unwrap();

    let (result, _) = tokio::join!(m.connect(), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        m.disconnect().await;
    });

    assert_eq!(result, Err(RigError::Superseded));
    assert!(!m.connected());
    assert!(transport.live_hosts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_drain_settles_disconnected() {
    let transport = MockTransport::new();
    transport.set_close_delay(Duration::from_millis(500));
    let m = manager(&transport);

    m.connect_with(rig_config("10.0.0.1")).await.unwrap();
    m.configure(rig_config("10.0.1.1")).unwrap();

    // The disconnect lands while connect is still closing the old set
    let (result, _) = tokio::join!(m.connect(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        m.disconnect().await;
    });
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(result, Err(RigError::Superseded));
    assert_eq!(m.state(), ConnectionState::Disconnected);
    assert!(!m.connected());
    assert!(transport.live_hosts().is_empty());
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_drains_old_sessions() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    m.connect_with(rig_config("10.0.0.1")).await.unwrap();
    m.configure(rig_config("10.0.9.1")).unwrap();

    // Connected is retracted at once, the old set is closed by the next connect
    assert!(!m.connected());

    assert_eq!(m.connect().await, Ok(true));
    assert_eq!(transport.close_count(), 3);
    assert_eq!(
        transport.live_hosts(),
        vec!["10.0.9.1", "10.0.9.2", "10.0.9.3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_configure_keeps_connection() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    m.connect_with(rig_config("10.0.0.1")).await.unwrap();
    m.configure(rig_config(" 10.0.0.1 ")).unwrap();

    assert!(m.connected());
    assert_eq!(transport.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dead_session_forces_disconnect() {
    let transport = MockTransport::new();
    let m = manager(&transport);
    let mut states = m.subscribe();

    m.connect_with(rig_config("10.0.0.1")).await.unwrap();
    states.borrow_and_update();

    transport.kill("10.0.0.2");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!m.connected());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    assert_eq!(m.open_session_count().await, 0);
    assert!(transport.live_hosts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_network_loss_blocks_connect() {
    let transport = MockTransport::new();
    let m = manager(&transport);
    m.connect_with(rig_config("10.0.0.1")).await.unwrap();

    m.on_network_lost().await;
    assert!(!m.connected());
    assert!(!m.is_network_online());
    assert!(transport.live_hosts().is_empty());

    assert_eq!(m.connect().await, Err(RigError::NetworkUnavailable));
    assert_eq!(transport.open_count(), 3);

    assert_eq!(m.on_network_available().await, Some(Ok(true)));
    assert!(m.connected());
    assert_eq!(m.on_network_available().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_network_available_without_config() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    assert_eq!(m.on_network_available().await, None);
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_connect_debounces() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    let first = m.schedule_connect(rig_config("10.0.1.1")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = m.schedule_connect(rig_config("10.0.2.1")).unwrap();

    assert_eq!(first.await.unwrap(), Err(RigError::Superseded));
    assert_eq!(second.await.unwrap(), Ok(true));

    assert_eq!(transport.open_count(), 3);
    assert_eq!(
        transport.live_hosts(),
        vec!["10.0.2.1", "10.0.2.2", "10.0.2.3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_schedule_connect_validates_synchronously() {
    let transport = MockTransport::new();
    let m = manager(&transport);

    let result = m.schedule_connect(ClusterConfig::new("lg", "", "10.0.0.1", 22, 3));
    assert!(matches!(result, Err(RigError::InvalidConfiguration(_))));
}

#[tokio::test(start_paused = true)]
async fn test_node_states() {
    let transport = MockTransport::new();
    let m = manager(&transport);
    m.configure(rig_config("10.0.0.1")).unwrap();

    let states = m.node_states().await;
    assert_eq!(states.len(), 3);
    assert!(states.iter().all(|(_, s)| *s == NodeSessionState::Unopened));

    m.connect().await.unwrap();
    let states = m.node_states().await;
    assert!(states.iter().all(|(_, s)| *s == NodeSessionState::Open));

    assert_eq!(m.node_index_of("10.0.0.3", 22), Some(2));
    assert_eq!(m.node_index_of("10.0.0.9", 22), None);
}
