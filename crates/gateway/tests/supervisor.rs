mod common;

use std::time::Duration;

use common::{device, harness, wait_status};
use pr_device::{DeviceClient, DeviceEvent};
use pr_domain::config::Config;
use pr_gateway::supervisor::ConnectionState;

#[tokio::test(start_paused = true)]
async fn unreachable_candidate_gets_three_attempts_before_rediscovery() {
    let h = harness(Config::default());
    h.discovery.set_devices(vec![device("10.0.0.7", "Mars", false)]);

    h.state.supervisor.start_auto_connect();
    tokio::time::sleep(Duration::from_secs(25)).await;

    let entries = h.log.entries();
    assert_eq!(
        &entries[..5],
        &[
            "discover",
            "connect:10.0.0.7",
            "connect:10.0.0.7",
            "connect:10.0.0.7",
            "discover",
        ]
    );
    assert_eq!(h.state.supervisor.state(), ConnectionState::Disconnected);
    assert!(!h.state.status.snapshot().connected);
}

#[tokio::test(start_paused = true)]
async fn failover_moves_to_the_next_candidate_and_skips_proxies() {
    let h = harness(Config::default());
    h.discovery.set_devices(vec![
        device("10.0.0.1", "Proxy", true),
        device("10.0.0.2", "Down", false),
        device("10.0.0.3", "Saturn", false),
    ]);
    h.connector.set_reachable("10.0.0.3");

    h.state.supervisor.start_auto_connect();
    wait_status(&h.state, |s| s.connected).await;

    assert_eq!(h.log.count("connect:10.0.0.1"), 0);
    assert_eq!(h.log.count("connect:10.0.0.2"), 3);
    assert_eq!(h.log.count("connect:10.0.0.3"), 1);
    assert_eq!(h.state.status.snapshot().device_name, "Saturn");
    assert_eq!(h.state.supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_supersedes_auto_connect() {
    let h = harness(Config::default());
    h.discovery.set_devices(vec![device("10.0.0.7", "Mars", false)]);
    h.connector.set_reachable("10.0.0.9");

    h.state.supervisor.start_auto_connect();
    // First attempt fails; the loop is now sleeping before its retry.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.log.count("connect:10.0.0.7"), 1);

    h.state.supervisor.connect("10.0.0.9").await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.log.count("connect:10.0.0.7"), 1);
    assert_eq!(h.log.count("discover"), 1);
    assert!(!h.state.supervisor.is_auto_mode());
    let status = h.state.status.snapshot();
    assert!(status.connected);
    assert_eq!(status.device_name, "10.0.0.9");
}

#[tokio::test]
async fn failed_explicit_connect_resets_status() {
    let h = harness(Config::default());
    let err = h.state.supervisor.connect("10.0.0.8").await.unwrap_err();
    assert!(err.to_string().contains("connection refused"), "{err}");

    let status = h.state.status.snapshot();
    assert!(!status.connected);
    assert_eq!(status.device_name, "");
    assert_eq!(h.state.supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_negotiates_camera_and_reports_rejection() {
    let h = harness(Config::default());
    h.connector.set_reachable("10.0.0.9");

    h.state.supervisor.connect("10.0.0.9").await.unwrap();

    let client = h.connector.last_client();
    assert_eq!(client.camera_requests(), 1);
    let status = h.state.status.snapshot();
    assert!(status.connected);
    assert!(!status.camera_available);
    assert_eq!(
        status.camera_error.as_deref(),
        Some("camera not supported by this printer")
    );
}

#[tokio::test]
async fn drop_and_reconnect_reruns_post_connect_setup() {
    let h = harness(Config::default());
    h.connector.set_reachable("10.0.0.9");
    h.state.supervisor.connect("10.0.0.9").await.unwrap();
    let client = h.connector.last_client();

    let mut sub = h.state.subscribers.attach();

    client.emit(DeviceEvent::Disconnected {
        reason: "socket closed".into(),
    });
    wait_status(&h.state, |s| !s.connected).await;
    assert_eq!(h.state.supervisor.state(), ConnectionState::Reconnecting);

    // Subscribers hear about it within one broadcast interval.
    let heard = tokio::time::timeout(Duration::from_millis(1500), async {
        while let Some(msg) = sub.rx.recv().await {
            if msg.contains("\"connected\":false") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(heard, "no disconnected broadcast");

    client.emit(DeviceEvent::Reconnected);
    wait_status(&h.state, |s| s.connected).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.camera_requests() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("setup did not run again");
    assert_eq!(h.state.supervisor.state(), ConnectionState::Connected);
    // The client was never replaced.
    assert_eq!(h.connector.created(), 1);
}

#[tokio::test]
async fn reconnect_during_setup_does_not_start_a_second_setup() {
    let h = harness(Config::default());
    h.connector.set_reachable("10.0.0.9");
    let camera = h.connector.hold_camera();

    let supervisor = h.state.supervisor.clone();
    let connecting = tokio::spawn(async move { supervisor.connect("10.0.0.9").await });

    // Setup is now parked inside camera negotiation.
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.connector.created() == 0 || h.connector.last_client().camera_requests() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("setup never reached the camera");
    let client = h.connector.last_client();

    client.emit(DeviceEvent::Disconnected {
        reason: "socket closed".into(),
    });
    wait_status(&h.state, |s| !s.connected).await;
    client.emit(DeviceEvent::Reconnected);
    wait_status(&h.state, |s| s.connected).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.camera_requests(), 1);

    camera.add_permits(1);
    connecting.await.unwrap().unwrap();
    assert_eq!(client.camera_requests(), 1);

    // The guard is released again once the first run finishes.
    camera.add_permits(1);
    client.emit(DeviceEvent::Disconnected {
        reason: "socket closed".into(),
    });
    wait_status(&h.state, |s| !s.connected).await;
    client.emit(DeviceEvent::Reconnected);
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.camera_requests() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("setup did not run after the first one finished");
    assert_eq!(client.camera_requests(), 2);
}

#[tokio::test]
async fn status_pushes_reach_the_canonical_status() {
    let h = harness(Config::default());
    h.connector.set_reachable("10.0.0.9");
    h.state.supervisor.connect("10.0.0.9").await.unwrap();

    let raw: pr_protocol::PrinterStatus = serde_json::from_value(serde_json::json!({
        "CurrentStatus": [1],
        "PrintInfo": { "Status": 13, "CurrentLayer": 10, "TotalLayer": 100, "Progress": 10 }
    }))
    .unwrap();
    h.connector.last_client().emit(DeviceEvent::Status(raw));

    wait_status(&h.state, |s| s.layers.current == 10).await;
    let status = h.state.status.snapshot();
    assert_eq!(status.layers.total, 100);
    assert!((status.progress - 10.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn auto_mode_fails_over_after_grace_period() {
    let h = harness(Config::default());
    h.discovery.set_devices(vec![device("10.0.0.7", "Mars", false)]);
    h.connector.set_reachable("10.0.0.7");

    h.state.supervisor.start_auto_connect();
    wait_status(&h.state, |s| s.connected).await;
    let first = h.connector.last_client();

    first.emit(DeviceEvent::Disconnected {
        reason: "socket closed".into(),
    });
    wait_status(&h.state, |s| !s.connected).await;

    // Still inside the grace period: nothing new.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.connector.created(), 1);

    tokio::time::sleep(Duration::from_secs(15)).await;
    wait_status(&h.state, |s| s.connected).await;
    assert_eq!(h.connector.created(), 2);
    assert_eq!(h.log.count("connect:10.0.0.7"), 2);
    assert!(!first.is_connected());
}

#[tokio::test(start_paused = true)]
async fn recovery_inside_grace_period_keeps_the_client() {
    let h = harness(Config::default());
    h.discovery.set_devices(vec![device("10.0.0.7", "Mars", false)]);
    h.connector.set_reachable("10.0.0.7");

    h.state.supervisor.start_auto_connect();
    wait_status(&h.state, |s| s.connected).await;
    let client = h.connector.last_client();

    client.emit(DeviceEvent::Disconnected {
        reason: "socket closed".into(),
    });
    wait_status(&h.state, |s| !s.connected).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    client.emit(DeviceEvent::Reconnected);
    wait_status(&h.state, |s| s.connected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.created(), 1);
    assert_eq!(h.state.supervisor.state(), ConnectionState::Connected);
}
