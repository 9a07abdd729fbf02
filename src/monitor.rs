//! Top-level facade tying paths, probing, and status together.
//!
//! A [`Monitor`] owns the path manager, the status board, and the prober.
//! Acquisitions are fire-and-forget: callers watch status cells rather than
//! awaiting results. The local-link cell is driven here, from path events in
//! bus order, so supersession sequences land in the order they happened.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::path::{
    PathEvent, PathEvents, PathManager, PathProvider, PathSnapshot, SystemPathProvider,
};
use crate::probe::{EndpointStats, ProbeCollector, ProbeEvent, ProbeTargets, Prober};
use crate::status::{StatusBoard, StatusEvent, StatusSnapshot};
use crate::transport::BoundTransport;
use crate::types::{ConnectionStatus, Endpoint, PathKind, PathRequest};

/// Status cells plus probe aggregates, one payload for reporting surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: StatusSnapshot,
    pub probes: Vec<EndpointReport>,
}

/// One probed endpoint's aggregates inside a [`StatusReport`].
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub stats: EndpointStats,
    pub availability_pct: f64,
}

/// Path monitor: two managed paths, four status cells, one probe loop.
pub struct Monitor {
    config: Config,
    manager: Arc<PathManager>,
    board: Arc<StatusBoard>,
    collector: Arc<ProbeCollector>,
    prober: Arc<Prober>,
    /// Held acquisition streams; dropping one releases its reservation.
    link_stream: Mutex<Option<PathEvents>>,
    wide_stream: Mutex<Option<PathEvents>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Build a monitor over the host network stack. Must be called within a
    /// tokio runtime.
    pub fn new(config: Config) -> Self {
        Self::with_provider(config, Arc::new(SystemPathProvider::new()))
    }

    /// Build a monitor over a custom path provider.
    pub fn with_provider(config: Config, provider: Arc<dyn PathProvider>) -> Self {
        let manager = Arc::new(PathManager::new(provider));
        let board = Arc::new(StatusBoard::new());
        let collector = Arc::new(ProbeCollector::new());
        let prober = Arc::new(Prober::new(
            ProbeTargets::from_config(&config),
            config.probing.clone(),
            Arc::clone(&manager),
            Arc::clone(&board),
            Arc::clone(&collector),
        ));

        // Subscribe before any acquisition can happen so the cell driver sees
        // every event from the first request on.
        let driver = tokio::spawn(drive_local_link_cell(
            manager.subscribe(),
            Arc::clone(&board),
        ));

        Self {
            config,
            manager,
            board,
            collector,
            prober,
            link_stream: Mutex::new(None),
            wide_stream: Mutex::new(None),
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request the configured local link, superseding any previous local-link
    /// acquisition. Progress lands on the local-link status cell.
    pub fn connect_local_link(&self) {
        let link = &self.config.local_link;
        let mut request = PathRequest::local_link(link.ssid.clone(), link.passphrase.clone());
        if let Some(interface) = &link.interface {
            request = request.with_interface(interface.clone());
        }

        let events = self.manager.acquire(request);
        *self.link_stream.lock() = Some(events);
    }

    /// Drop the local link, if held.
    pub fn disconnect_local_link(&self) {
        self.manager.release(PathKind::LocalLink);
        *self.link_stream.lock() = None;
    }

    /// Request an internet-capable path, superseding any previous one. The
    /// result shows up indirectly: controller probes run once it is granted.
    pub fn request_wide_area(&self) {
        let mut request = PathRequest::wide_area();
        if let Some(interface) = &self.config.wide_area.interface {
            request = request.with_interface(interface.clone());
        }

        let events = self.manager.acquire(request);
        *self.wide_stream.lock() = Some(events);
    }

    /// Drop the wide-area path, if held.
    pub fn release_wide_area(&self) {
        self.manager.release(PathKind::WideArea);
        *self.wide_stream.lock() = None;
    }

    /// Start the probe loop at the configured interval. No-op when already
    /// running.
    pub fn start_probing(&self) {
        self.start_probing_every(self.config.probing.interval);
    }

    /// Start the probe loop at an explicit interval.
    pub fn start_probing_every(&self, interval: Duration) {
        self.prober.start(interval);
    }

    /// Stop the probe loop, cancelling a round in flight. Cells keep their
    /// last value.
    pub fn stop_probing(&self) {
        self.prober.stop();
    }

    pub fn probing(&self) -> bool {
        self.prober.is_running()
    }

    /// Watch one status cell.
    pub fn status_stream(&self, endpoint: Endpoint) -> watch::Receiver<ConnectionStatus> {
        self.board.subscribe(endpoint)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.board.snapshot()
    }

    pub fn paths(&self) -> PathSnapshot {
        self.manager.snapshot()
    }

    /// Per-endpoint probe aggregates, in display order.
    pub fn stats(&self) -> Vec<(Endpoint, EndpointStats)> {
        self.collector.all()
    }

    /// Status cells and probe aggregates in one serializable payload.
    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.board.snapshot(),
            probes: self
                .collector
                .all()
                .into_iter()
                .map(|(endpoint, stats)| EndpointReport {
                    endpoint,
                    availability_pct: stats.availability_pct(),
                    stats,
                })
                .collect(),
        }
    }

    pub fn path_events(&self) -> broadcast::Receiver<PathEvent> {
        self.manager.subscribe()
    }

    pub fn probe_events(&self) -> broadcast::Receiver<ProbeEvent> {
        self.prober.subscribe()
    }

    /// Transport bound to the currently held path of `kind`.
    pub fn bound_transport(&self, kind: PathKind) -> Result<BoundTransport> {
        self.manager
            .snapshot()
            .get(kind)
            .cloned()
            .map(BoundTransport::new)
            .ok_or(Error::PathNotHeld(kind))
    }

    /// Stop probing, release both paths, and halt the cell driver.
    pub fn shutdown(&self) {
        debug!("monitor shutting down");
        self.prober.stop();
        self.manager.close();
        *self.link_stream.lock() = None;
        *self.wide_stream.lock() = None;
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Apply local-link path events to the local-link cell, in bus order.
///
/// The controller cell is probe-driven and never touched here; a wide-area
/// grant shows up as controller probes starting to answer.
async fn drive_local_link_cell(
    mut bus: broadcast::Receiver<PathEvent>,
    board: Arc<StatusBoard>,
) {
    loop {
        match bus.recv().await {
            Ok(event) => {
                if event.kind() != PathKind::LocalLink {
                    continue;
                }
                let status_event = match event {
                    PathEvent::Requesting { .. } => StatusEvent::PathRequesting,
                    PathEvent::Granted { .. } => StatusEvent::PathGranted,
                    PathEvent::Denied { reason, .. } | PathEvent::Lost { reason, .. } => {
                        StatusEvent::PathLost {
                            reason: Some(reason),
                        }
                    }
                    PathEvent::Released { .. } => StatusEvent::PathLost { reason: None },
                };
                board.apply(Endpoint::LocalLink, status_event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "status driver lagged behind path events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{PathUpdate, ReleaseSignal};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Grants every request on a fixed interface and holds it until release.
    struct GrantAll;

    #[async_trait]
    impl PathProvider for GrantAll {
        async fn acquire(
            &self,
            request: PathRequest,
            updates: mpsc::Sender<PathUpdate>,
            mut released: ReleaseSignal,
        ) -> Result<()> {
            let interface = match request.kind() {
                PathKind::LocalLink => "wlan-test",
                PathKind::WideArea => "wwan-test",
            };
            if updates
                .send(PathUpdate::Granted {
                    interface: interface.into(),
                })
                .await
                .is_err()
            {
                return Ok(());
            }
            released.released().await;
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.local_link.ssid = "lab".into();
        config
    }

    async fn wait_status(
        monitor: &Monitor,
        endpoint: Endpoint,
        predicate: impl FnMut(&ConnectionStatus) -> bool,
    ) -> ConnectionStatus {
        let mut rx = monitor.status_stream(endpoint);
        let status = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(predicate))
            .await
            .expect("status change timed out")
            .expect("status cell closed")
            .clone();
        status
    }

    #[tokio::test]
    async fn test_local_link_cell_follows_acquisition() {
        let monitor = Monitor::with_provider(test_config(), Arc::new(GrantAll));

        monitor.connect_local_link();
        let status = wait_status(&monitor, Endpoint::LocalLink, |s| s.is_connected()).await;
        assert_eq!(status, ConnectionStatus::Connected { latency_ms: None });

        monitor.disconnect_local_link();
        let status = wait_status(&monitor, Endpoint::LocalLink, |s| !s.is_connected()).await;
        assert_eq!(status, ConnectionStatus::Disconnected { reason: None });
    }

    #[tokio::test]
    async fn test_bound_transport_requires_held_path() {
        let monitor = Monitor::with_provider(test_config(), Arc::new(GrantAll));

        let err = monitor.bound_transport(PathKind::WideArea).unwrap_err();
        assert!(matches!(err, Error::PathNotHeld(PathKind::WideArea)));

        monitor.request_wide_area();
        // Wait until the grant lands in the snapshot.
        let mut events = monitor.path_events();
        while monitor.paths().get(PathKind::WideArea).is_none() {
            let _ = events.recv().await;
        }

        let transport = monitor.bound_transport(PathKind::WideArea).unwrap();
        assert_eq!(transport.interface(), "wwan-test");
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let monitor = Monitor::with_provider(test_config(), Arc::new(GrantAll));
        monitor.connect_local_link();
        monitor.request_wide_area();
        monitor.start_probing();

        monitor.shutdown();
        assert!(!monitor.probing());
        assert_eq!(monitor.paths(), PathSnapshot::default());
    }
}
