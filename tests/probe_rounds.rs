//! Probing pipeline tests - full rounds through the monitor over loopback.
//!
//! A scripted provider grants `lo` for both path kinds, so probes bound to
//! the granted interface really reach loopback servers. This exercises the
//! whole chain: acquisition, status cells, per-round probing, statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use pathwatch::path::{PathProvider, PathUpdate, ReleaseSignal};
use pathwatch::probe::ProbeEvent;
use pathwatch::types::{ConnectionStatus, Endpoint, PathKind, PathRequest};
use pathwatch::{Config, Monitor};

// ============================================================================
// Scripted Providers
// ============================================================================

/// Grants every request on the loopback interface and holds until released.
struct LoopbackProvider;

#[async_trait]
impl PathProvider for LoopbackProvider {
    async fn acquire(
        &self,
        _request: PathRequest,
        updates: mpsc::Sender<PathUpdate>,
        mut released: ReleaseSignal,
    ) -> pathwatch::Result<()> {
        let _ = updates
            .send(PathUpdate::Granted {
                interface: "lo".into(),
            })
            .await;
        released.released().await;
        Ok(())
    }
}

/// Denies every request.
struct NoPathsProvider;

#[async_trait]
impl PathProvider for NoPathsProvider {
    async fn acquire(
        &self,
        _request: PathRequest,
        updates: mpsc::Sender<PathUpdate>,
        _released: ReleaseSignal,
    ) -> pathwatch::Result<()> {
        let _ = updates
            .send(PathUpdate::Denied {
                reason: "nothing here".into(),
            })
            .await;
        Ok(())
    }
}

// ============================================================================
// Loopback Servers
// ============================================================================

/// HTTP server answering every request with `status_line` after `delay`.
async fn spawn_http_server(status_line: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            if let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        }
    });

    addr
}

async fn spawn_tcp_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });
    addr
}

/// Bind-then-drop guarantees the port is closed.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn test_config(controller: SocketAddr, device_a: SocketAddr, device_b: SocketAddr) -> Config {
    let mut config = Config::default();
    config.local_link.ssid = "lab".into();
    config.controller.url = format!("http://{controller}/");
    config.devices.a.host = "127.0.0.1".into();
    config.devices.a.port = device_a.port();
    config.devices.b.host = "127.0.0.1".into();
    config.devices.b.port = device_b.port();
    config.probing.interval = Duration::from_millis(200);
    config.probing.http_timeout = Duration::from_secs(2);
    config.probing.tcp_timeout = Duration::from_secs(2);
    config
}

// ============================================================================
// Helpers
// ============================================================================

/// Wait until the endpoint's cell satisfies the predicate, five second cap.
async fn wait_status(
    monitor: &Monitor,
    endpoint: Endpoint,
    what: &str,
    mut predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut stream = monitor.status_stream(endpoint);
    let status = match tokio::time::timeout(Duration::from_secs(5), stream.wait_for(|s| predicate(s)))
        .await
    {
        Ok(Ok(status)) => status.clone(),
        Ok(Err(_)) => panic!("status cell closed waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}"),
    };
    status
}

/// Poll until both path kinds are held.
async fn wait_for_paths_held(monitor: &Monitor) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let paths = monitor.paths();
        if paths.get(PathKind::LocalLink).is_some() && paths.get(PathKind::WideArea).is_some() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "paths not granted in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn assert_down_with(status: &ConnectionStatus, expected: &str) {
    match status {
        ConnectionStatus::Disconnected {
            reason: Some(reason),
        } => assert_eq!(reason, expected),
        other => panic!("expected down with {expected:?}, got {other:?}"),
    }
}

// ============================================================================
// Full Rounds
// ============================================================================

#[tokio::test]
async fn test_full_round_reports_all_endpoints_up() {
    let controller = spawn_http_server("204 No Content", Duration::ZERO).await;
    let device_a = spawn_tcp_listener().await;
    let device_b = spawn_tcp_listener().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(LoopbackProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();
    wait_for_paths_held(&monitor).await;

    // The local-link cell is driven by acquisition, before any probe runs.
    let status = wait_status(&monitor, Endpoint::LocalLink, "local link up", |s| {
        s.is_connected()
    })
    .await;
    assert_eq!(status, ConnectionStatus::Connected { latency_ms: None });

    monitor.start_probing();

    wait_status(&monitor, Endpoint::Controller, "controller up", |s| {
        s.is_connected()
    })
    .await;
    wait_status(&monitor, Endpoint::DeviceA, "device a up", |s| {
        s.is_connected()
    })
    .await;
    wait_status(&monitor, Endpoint::DeviceB, "device b up", |s| {
        s.is_connected()
    })
    .await;

    let stats = monitor.stats();
    for endpoint in [Endpoint::Controller, Endpoint::DeviceA, Endpoint::DeviceB] {
        let (_, entry) = stats
            .iter()
            .find(|(e, _)| *e == endpoint)
            .unwrap_or_else(|| panic!("stats recorded for {endpoint}"));
        assert!(entry.ok >= 1, "{endpoint} has at least one success");
        assert_eq!(entry.consecutive_failures, 0);
    }

    monitor.shutdown();
}

#[tokio::test]
async fn test_missing_paths_reported_per_endpoint() {
    let controller = closed_port().await;
    let device_a = closed_port().await;
    let device_b = closed_port().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(NoPathsProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();

    // The denial reason lands on the local-link cell.
    let status = wait_status(&monitor, Endpoint::LocalLink, "local link denied", |s| {
        s.is_settled()
    })
    .await;
    assert_down_with(&status, "nothing here");

    monitor.start_probing_every(Duration::from_millis(100));

    let status = wait_status(&monitor, Endpoint::Controller, "controller down", |s| {
        s.is_settled()
    })
    .await;
    assert_down_with(&status, "no cellular");

    for endpoint in [Endpoint::DeviceA, Endpoint::DeviceB] {
        let status = wait_status(&monitor, endpoint, "device down", |s| s.is_settled()).await;
        assert_down_with(&status, "no local link");
    }
}

#[tokio::test]
async fn test_report_carries_status_and_probe_aggregates() {
    // Device B probes fail, so the report must show both the failing cell
    // and the per-endpoint aggregates behind it.
    let controller = spawn_http_server("204 No Content", Duration::ZERO).await;
    let device_a = spawn_tcp_listener().await;
    let device_b = closed_port().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(LoopbackProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();
    wait_for_paths_held(&monitor).await;
    monitor.start_probing_every(Duration::from_millis(100));

    wait_status(&monitor, Endpoint::DeviceA, "device a up", |s| {
        s.is_connected()
    })
    .await;
    wait_status(&monitor, Endpoint::DeviceB, "device b down", |s| s.is_settled()).await;

    let json = serde_json::to_value(monitor.report()).unwrap();
    assert_eq!(json["status"]["device_a"]["state"], "connected");
    assert_eq!(json["status"]["device_b"]["state"], "disconnected");

    let probes = json["probes"].as_array().expect("probes array");
    let entry = |name: &str| {
        probes
            .iter()
            .find(|p| p["endpoint"] == name)
            .unwrap_or_else(|| panic!("no aggregates for {name}"))
    };

    let device_a = entry("device-a");
    assert!(device_a["ok"].as_u64().unwrap() >= 1);
    assert_eq!(device_a["consecutive_failures"], 0);

    let device_b = entry("device-b");
    assert!(device_b["failed"].as_u64().unwrap() >= 1);
    assert!(device_b["availability_pct"].as_f64().unwrap() < 100.0);

    monitor.shutdown();
}

// ============================================================================
// Round Discipline
// ============================================================================

#[tokio::test]
async fn test_rounds_never_overlap() {
    // The controller answers slower than the probe interval, so a naive
    // scheduler would start round N+1 while round N is still in flight.
    let controller = spawn_http_server("204 No Content", Duration::from_millis(250)).await;
    let device_a = closed_port().await;
    let device_b = closed_port().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(LoopbackProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();
    wait_for_paths_held(&monitor).await;

    let mut events = monitor.probe_events();
    monitor.start_probing_every(Duration::from_millis(100));

    let mut collected = Vec::new();
    let stop_at = tokio::time::Instant::now() + Duration::from_millis(1200);
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = tokio::time::sleep_until(stop_at) => break,
        };
        match event {
            Ok(event) => collected.push(event),
            Err(broadcast::error::RecvError::Lagged(_)) => panic!("event bus lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    monitor.stop_probing();

    let mut in_round: Option<u64> = None;
    let mut last_completed = 0u64;
    let mut completed_rounds = 0usize;
    for event in collected {
        match event {
            ProbeEvent::TickStarted { seq } => {
                assert!(
                    in_round.is_none(),
                    "round {seq} started while {} was in flight",
                    in_round.unwrap()
                );
                assert_eq!(seq, last_completed + 1, "rounds are sequential");
                in_round = Some(seq);
            }
            ProbeEvent::TickCompleted { seq, .. } => {
                assert_eq!(in_round, Some(seq), "completion matches the open round");
                in_round = None;
                last_completed = seq;
                completed_rounds += 1;
            }
            ProbeEvent::ProbeCompleted { .. } => {
                assert!(in_round.is_some(), "probe results land inside a round");
            }
        }
    }
    assert!(
        completed_rounds >= 2,
        "expected at least two full rounds, saw {completed_rounds}"
    );
}

#[tokio::test]
async fn test_stop_halts_rounds_and_restart_resumes() {
    let controller = spawn_http_server("204 No Content", Duration::ZERO).await;
    let device_a = spawn_tcp_listener().await;
    let device_b = spawn_tcp_listener().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(LoopbackProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();
    wait_for_paths_held(&monitor).await;

    let mut events = monitor.probe_events();
    monitor.start_probing_every(Duration::from_millis(100));
    assert!(monitor.probing());

    // At least one round completes, then stop.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::select! {
            event = events.recv() => event.expect("probe events"),
            () = tokio::time::sleep_until(deadline) => panic!("no round completed"),
        };
        if matches!(event, ProbeEvent::TickCompleted { .. }) {
            break;
        }
    }
    monitor.stop_probing();
    assert!(!monitor.probing());

    // Drain whatever the stopped round left behind, then verify silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while events.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(
        events.try_recv().is_err(),
        "no rounds run while stopped"
    );

    // Restart picks probing back up.
    monitor.start_probing_every(Duration::from_millis(100));
    assert!(monitor.probing());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::select! {
            event = events.recv() => event.expect("probe events after restart"),
            () = tokio::time::sleep_until(deadline) => panic!("no round after restart"),
        };
        if matches!(event, ProbeEvent::TickCompleted { .. }) {
            break;
        }
    }
}

// ============================================================================
// Cell Ownership
// ============================================================================

#[tokio::test]
async fn test_local_link_cell_tracks_acquisition_not_probes() {
    // Every probed endpoint is down, but the local link itself is held, so
    // its cell must stay connected.
    let controller = closed_port().await;
    let device_a = closed_port().await;
    let device_b = closed_port().await;

    let config = test_config(controller, device_a, device_b);
    let monitor = Monitor::with_provider(config, Arc::new(LoopbackProvider));

    monitor.connect_local_link();
    monitor.request_wide_area();
    wait_for_paths_held(&monitor).await;
    monitor.start_probing_every(Duration::from_millis(100));

    let status = wait_status(&monitor, Endpoint::DeviceA, "device a down", |s| {
        s.is_settled()
    })
    .await;
    assert_down_with(&status, "connection refused");

    assert!(
        monitor.status().local_link.is_connected(),
        "failing probes do not touch the local-link cell"
    );

    // Releasing the link flips its cell without a failure reason, and the
    // next round loses its device probes with it.
    monitor.disconnect_local_link();
    let status = wait_status(&monitor, Endpoint::LocalLink, "local link released", |s| {
        !s.is_connected() && s.is_settled()
    })
    .await;
    match status {
        ConnectionStatus::Disconnected { reason } => {
            assert!(reason.is_none(), "release is not a failure: {reason:?}");
        }
        other => panic!("expected released cell, got {other:?}"),
    }

    let status = wait_status(&monitor, Endpoint::DeviceA, "device a unprobeable", |s| {
        matches!(s, ConnectionStatus::Disconnected { reason: Some(r) } if r == "no local link")
    })
    .await;
    assert_down_with(&status, "no local link");
}
