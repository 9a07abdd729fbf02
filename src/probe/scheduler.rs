//! Periodic probe rounds.
//!
//! One loop drives all probing. A round probes the controller over the
//! wide-area path and both devices over the local link, concurrently within
//! the round, then applies results to the status board in a fixed order.
//! Rounds never overlap: the next tick cannot fire while a round is still
//! running, and a round that outlives the interval delays the schedule
//! instead of stacking up.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::Config;
use crate::path::{PathManager, PathSnapshot};
use crate::probe::{probe_http, probe_tcp, ProbeCollector, ProbingConfig};
use crate::status::{StatusBoard, StatusEvent};
use crate::transport::BoundTransport;
use crate::types::{Endpoint, PathKind, ProbeResult};

/// Capacity of the probe event bus.
const EVENT_CHANNEL_SIZE: usize = 256;

/// One TCP probe target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub port: u16,
    pub label: String,
}

/// Everything a probe round needs to know about the far ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargets {
    /// URL answered by the controller, probed with HEAD.
    pub controller_url: String,
    pub device_a: TargetSpec,
    pub device_b: TargetSpec,
}

impl ProbeTargets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            controller_url: config.controller.url.clone(),
            device_a: TargetSpec {
                host: config.devices.a.host.clone(),
                port: config.devices.a.port,
                label: config.devices.a.display_label(),
            },
            device_b: TargetSpec {
                host: config.devices.b.host.clone(),
                port: config.devices.b.port,
                label: config.devices.b.display_label(),
            },
        }
    }

    fn device(&self, endpoint: Endpoint) -> Option<&TargetSpec> {
        match endpoint {
            Endpoint::DeviceA => Some(&self.device_a),
            Endpoint::DeviceB => Some(&self.device_b),
            Endpoint::Controller | Endpoint::LocalLink => None,
        }
    }
}

/// Events emitted around probe rounds.
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    /// A round began.
    TickStarted { seq: u64 },
    /// One endpoint's probe finished and was applied.
    ProbeCompleted {
        endpoint: Endpoint,
        result: ProbeResult,
    },
    /// The whole round finished.
    TickCompleted { seq: u64, elapsed: Duration },
}

/// Periodic prober over the currently held paths.
pub struct Prober {
    targets: ProbeTargets,
    config: ProbingConfig,
    manager: Arc<PathManager>,
    board: Arc<StatusBoard>,
    collector: Arc<ProbeCollector>,
    event_tx: broadcast::Sender<ProbeEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Prober {
    pub fn new(
        targets: ProbeTargets,
        config: ProbingConfig,
        manager: Arc<PathManager>,
        board: Arc<StatusBoard>,
        collector: Arc<ProbeCollector>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            targets,
            config,
            manager,
            board,
            collector,
            event_tx,
            task: Mutex::new(None),
        }
    }

    /// Subscribe to round events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProbeEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the probe loop. The first round runs immediately, then every
    /// `interval`. Calling this while a loop is already running is a no-op.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("probe loop already running");
            return;
        }

        info!(interval_ms = interval.as_millis() as u64, "starting probe loop");
        // The loop holds only a weak handle between rounds; when the last
        // strong handle goes away, `Drop` aborts the task and a tick that
        // slips past the abort finds the upgrade failing and exits.
        let prober: Weak<Self> = Arc::downgrade(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;

            loop {
                ticker.tick().await;
                let Some(prober) = prober.upgrade() else { break };
                seq += 1;
                let _ = prober.event_tx.send(ProbeEvent::TickStarted { seq });

                let started = Instant::now();
                prober.run_round().await;
                let elapsed = started.elapsed();

                debug!(seq, elapsed_ms = elapsed.as_millis() as u64, "probe round done");
                let _ = prober
                    .event_tx
                    .send(ProbeEvent::TickCompleted { seq, elapsed });
            }
        }));
    }

    /// Stop the probe loop, cancelling any round in flight. Statuses keep
    /// their last value. Safe to call when not running; `start` works again
    /// afterwards.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            info!("stopping probe loop");
            handle.abort();
        }
    }

    /// One full probe round against the paths held right now.
    async fn run_round(&self) {
        let snapshot = self.manager.snapshot();

        let (controller, device_a, device_b) = tokio::join!(
            self.probe_controller(&snapshot),
            self.probe_device(&snapshot, Endpoint::DeviceA),
            self.probe_device(&snapshot, Endpoint::DeviceB),
        );

        // Fixed application order, independent of completion order.
        self.apply(Endpoint::Controller, controller);
        self.apply(Endpoint::DeviceA, device_a);
        self.apply(Endpoint::DeviceB, device_b);
    }

    async fn probe_controller(&self, snapshot: &PathSnapshot) -> ProbeResult {
        let Some(handle) = snapshot.get(PathKind::WideArea) else {
            return ProbeResult::down("no cellular");
        };

        let transport = BoundTransport::new(handle.clone());
        tokio::select! {
            result = probe_http(&transport, &self.targets.controller_url, self.config.http_timeout) => result,
            () = self.manager.invalidated(handle) => ProbeResult::down("path lost"),
        }
    }

    async fn probe_device(&self, snapshot: &PathSnapshot, endpoint: Endpoint) -> ProbeResult {
        let Some(target) = self.targets.device(endpoint) else {
            return ProbeResult::down("not a device endpoint");
        };
        let Some(handle) = snapshot.get(PathKind::LocalLink) else {
            return ProbeResult::down("no local link");
        };

        let transport = BoundTransport::new(handle.clone());
        tokio::select! {
            result = probe_tcp(&transport, &target.host, target.port, self.config.tcp_timeout) => result,
            () = self.manager.invalidated(handle) => ProbeResult::down("path lost"),
        }
    }

    fn apply(&self, endpoint: Endpoint, result: ProbeResult) {
        self.collector.record(endpoint, &result);
        self.board
            .apply(endpoint, StatusEvent::Probe(result.clone()));
        let _ = self
            .event_tx
            .send(ProbeEvent::ProbeCompleted { endpoint, result });
    }
}

impl Drop for Prober {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::path::{PathProvider, PathUpdate, ReleaseSignal};
    use crate::types::PathRequest;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NoPaths;

    #[async_trait]
    impl PathProvider for NoPaths {
        async fn acquire(
            &self,
            _request: PathRequest,
            updates: mpsc::Sender<PathUpdate>,
            _released: ReleaseSignal,
        ) -> Result<()> {
            let _ = updates
                .send(PathUpdate::Denied {
                    reason: "nothing here".into(),
                })
                .await;
            Ok(())
        }
    }

    fn test_prober() -> Arc<Prober> {
        let targets = ProbeTargets {
            controller_url: "https://127.0.0.1:1/".into(),
            device_a: TargetSpec {
                host: "127.0.0.1".into(),
                port: 1,
                label: "a".into(),
            },
            device_b: TargetSpec {
                host: "127.0.0.1".into(),
                port: 1,
                label: "b".into(),
            },
        };
        Arc::new(Prober::new(
            targets,
            ProbingConfig::default(),
            Arc::new(PathManager::new(Arc::new(NoPaths))),
            Arc::new(StatusBoard::new()),
            Arc::new(ProbeCollector::new()),
        ))
    }

    #[tokio::test]
    async fn test_round_without_paths_reports_both_reasons() {
        let prober = test_prober();
        prober.run_round().await;

        let snapshot = prober.board.snapshot();
        assert_eq!(
            snapshot.controller,
            crate::types::ConnectionStatus::disconnected("no cellular")
        );
        assert_eq!(
            snapshot.device_a,
            crate::types::ConnectionStatus::disconnected("no local link")
        );
        assert_eq!(
            snapshot.device_b,
            crate::types::ConnectionStatus::disconnected("no local link")
        );
        // The local-link cell is not the prober's to touch.
        assert_eq!(
            snapshot.local_link,
            crate::types::ConnectionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let prober = test_prober();
        prober.start(Duration::from_secs(60));
        assert!(prober.is_running());

        // Second start leaves the first loop in place.
        prober.start(Duration::from_secs(60));
        assert!(prober.is_running());

        prober.stop();
        assert!(!prober.is_running());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_ends_the_loop() {
        let prober = test_prober();
        let mut events = prober.subscribe();
        prober.start(Duration::from_millis(20));

        // Observe at least one full round before letting go.
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

        drop(prober);

        // The bus closes once the prober and its loop are gone.
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Err(broadcast::error::RecvError::Closed) => break,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "probe loop outlived its last handle");
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let prober = test_prober();
        prober.start(Duration::from_secs(60));
        prober.stop();
        assert!(!prober.is_running());

        prober.start(Duration::from_secs(60));
        assert!(prober.is_running());
        prober.stop();
    }
}
