//! Network path manager: acquisition, supersession, release.
//!
//! The manager owns the platform reservations. Everything else sees only
//! epoch-tagged [`PathHandle`] tokens and events, so no other component can
//! extend or leak a reservation. One slot exists per path kind; acquiring
//! while a slot is occupied releases the occupant first (supersession), and
//! updates from a superseded acquisition are ignored by generation check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::path::provider::{PathProvider, PathUpdate, ReleaseSignal};
use crate::types::{Generation, PathHandle, PathKind, PathRequest};

/// Capacity of the path event bus.
const EVENT_CHANNEL_SIZE: usize = 256;
/// Capacity of the per-acquisition provider update channel.
const UPDATE_CHANNEL_SIZE: usize = 16;

/// Events emitted by the path manager.
#[derive(Debug, Clone)]
pub enum PathEvent {
    /// An acquisition was issued.
    Requesting {
        kind: PathKind,
        generation: Generation,
    },
    /// The platform granted a handle.
    Granted { handle: PathHandle },
    /// The request cannot be satisfied. Terminal for this acquisition.
    Denied {
        kind: PathKind,
        generation: Generation,
        reason: String,
    },
    /// A granted handle is gone.
    Lost { handle: PathHandle, reason: String },
    /// The acquisition was released, explicitly or by supersession.
    Released {
        kind: PathKind,
        generation: Generation,
    },
}

impl PathEvent {
    pub fn kind(&self) -> PathKind {
        match self {
            Self::Requesting { kind, .. }
            | Self::Denied { kind, .. }
            | Self::Released { kind, .. } => *kind,
            Self::Granted { handle } | Self::Lost { handle, .. } => handle.kind,
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            Self::Requesting { generation, .. }
            | Self::Denied { generation, .. }
            | Self::Released { generation, .. } => *generation,
            Self::Granted { handle } | Self::Lost { handle, .. } => handle.generation,
        }
    }
}

/// Non-blocking view of the currently held handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSnapshot {
    pub local: Option<PathHandle>,
    pub wide: Option<PathHandle>,
}

impl PathSnapshot {
    pub fn get(&self, kind: PathKind) -> Option<&PathHandle> {
        match kind {
            PathKind::LocalLink => self.local.as_ref(),
            PathKind::WideArea => self.wide.as_ref(),
        }
    }
}

/// Handle-availability stream for one acquisition.
///
/// Yields `Some(handle)` when the platform grants the path and `None` when the
/// acquisition ends (denied, lost, superseded, released). Dropping the stream
/// is consumer cancellation: the manager releases the reservation.
#[derive(Debug)]
pub struct PathEvents {
    rx: watch::Receiver<Option<PathHandle>>,
}

impl PathEvents {
    /// Next availability change; `None` when the acquisition is over and the
    /// stream is finished.
    pub async fn next(&mut self) -> Option<Option<PathHandle>> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Currently visible handle without waiting.
    pub fn current(&self) -> Option<PathHandle> {
        self.rx.borrow().clone()
    }

    /// Wait for the acquisition to settle: the first grant, or `None` if it
    /// terminates first.
    pub async fn settled(&mut self) -> Option<PathHandle> {
        loop {
            match self.next().await {
                Some(Some(handle)) => return Some(handle),
                Some(None) | None => return None,
            }
        }
    }
}

/// One held or in-flight acquisition.
struct Slot {
    generation: Generation,
    state: SlotState,
    /// Fires the provider-side teardown. Idempotent.
    release_tx: watch::Sender<bool>,
}

enum SlotState {
    Requesting,
    Granted(PathHandle),
}

impl Slot {
    fn granted_handle(&self) -> Option<PathHandle> {
        match &self.state {
            SlotState::Granted(handle) => Some(handle.clone()),
            SlotState::Requesting => None,
        }
    }
}

#[derive(Default)]
struct PathTable {
    local: Option<Slot>,
    wide: Option<Slot>,
}

impl PathTable {
    fn slot_mut(&mut self, kind: PathKind) -> &mut Option<Slot> {
        match kind {
            PathKind::LocalLink => &mut self.local,
            PathKind::WideArea => &mut self.wide,
        }
    }

    fn slot(&self, kind: PathKind) -> Option<&Slot> {
        match kind {
            PathKind::LocalLink => self.local.as_ref(),
            PathKind::WideArea => self.wide.as_ref(),
        }
    }
}

/// Requests, holds, and releases the two path handles.
pub struct PathManager {
    provider: Arc<dyn PathProvider>,
    table: Arc<RwLock<PathTable>>,
    next_generation: AtomicU64,
    event_tx: broadcast::Sender<PathEvent>,
}

impl PathManager {
    /// Create a manager over the given platform provider.
    pub fn new(provider: Arc<dyn PathProvider>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            provider,
            table: Arc::new(RwLock::new(PathTable::default())),
            next_generation: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to path lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PathEvent> {
        self.event_tx.subscribe()
    }

    /// Start an acquisition for the request's kind, superseding whatever that
    /// kind currently holds. Must be called within a tokio runtime.
    pub fn acquire(&self, request: PathRequest) -> PathEvents {
        let kind = request.kind();
        let generation = Generation::new(self.next_generation.fetch_add(1, Ordering::Relaxed) + 1);

        let (handle_tx, handle_rx) = watch::channel(None);
        let (release_tx, release_rx) = watch::channel(false);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_SIZE);

        // Supersession: the new slot replaces the old under one write lock,
        // so a racing acquire of the same kind cannot slip in between the
        // release of the occupant and the insert of its successor.
        let prior = {
            let mut table = self.table.write();
            table.slot_mut(kind).replace(Slot {
                generation,
                state: SlotState::Requesting,
                release_tx,
            })
        };
        if let Some(prior) = prior {
            let _ = prior.release_tx.send(true);
            info!(%kind, generation = %prior.generation, superseded = true, "released path");
            let _ = self.event_tx.send(PathEvent::Released {
                kind,
                generation: prior.generation,
            });
        }

        info!(%kind, %generation, request = %request, "requesting path");
        let _ = self.event_tx.send(PathEvent::Requesting { kind, generation });

        // The provider future owns the platform reservation for this
        // acquisition; it must end exactly once, releasing on the way out.
        let provider = Arc::clone(&self.provider);
        let released = ReleaseSignal::new(release_rx);
        tokio::spawn(async move {
            if let Err(e) = provider.acquire(request, update_tx, released).await {
                warn!(%kind, %generation, error = %e, "path provider failed");
            }
        });

        let table = Arc::clone(&self.table);
        let event_tx = self.event_tx.clone();
        tokio::spawn(pump_updates(
            kind, generation, update_rx, handle_tx, table, event_tx,
        ));

        PathEvents { rx: handle_rx }
    }

    /// Explicit release. Always safe; releasing an empty slot is a no-op.
    pub fn release(&self, kind: PathKind) {
        if !self.release_slot(kind) {
            debug!(%kind, "release: nothing held");
        }
    }

    /// Non-blocking read of the currently granted handles.
    pub fn snapshot(&self) -> PathSnapshot {
        let table = self.table.read();
        PathSnapshot {
            local: table.slot(PathKind::LocalLink).and_then(Slot::granted_handle),
            wide: table.slot(PathKind::WideArea).and_then(Slot::granted_handle),
        }
    }

    /// Completes once `handle` no longer identifies the live path of its
    /// kind, whether by loss, release, or supersession.
    pub async fn invalidated(&self, handle: &PathHandle) {
        // Subscribe first so no event can slip between check and wait.
        let mut events = self.event_tx.subscribe();
        loop {
            let current = self
                .snapshot()
                .get(handle.kind)
                .map(|held| held.generation);
            if current != Some(handle.generation) {
                return;
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Release both kinds.
    pub fn close(&self) {
        for kind in PathKind::ALL {
            self.release_slot(kind);
        }
    }

    /// Take and tear down the slot for `kind`. Returns whether anything was
    /// held. The slot leaves the table before any signal fires, so a second
    /// caller finds nothing and the release stays exactly-once.
    fn release_slot(&self, kind: PathKind) -> bool {
        let slot = self.table.write().slot_mut(kind).take();
        match slot {
            Some(slot) => {
                let _ = slot.release_tx.send(true);
                info!(%kind, generation = %slot.generation, "released path");
                let _ = self.event_tx.send(PathEvent::Released {
                    kind,
                    generation: slot.generation,
                });
                true
            }
            None => false,
        }
    }
}

// Intentionally abbreviated Debug output - the provider and channels carry no
// useful state to print.
#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for PathManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("PathManager")
            .field("local", &snapshot.local)
            .field("wide", &snapshot.wide)
            .finish()
    }
}

/// Apply provider updates for one acquisition to the shared table, ignoring
/// anything that arrives after this generation stopped being current.
async fn pump_updates(
    kind: PathKind,
    generation: Generation,
    mut updates: mpsc::Receiver<PathUpdate>,
    handle_tx: watch::Sender<Option<PathHandle>>,
    table: Arc<RwLock<PathTable>>,
    event_tx: broadcast::Sender<PathEvent>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(PathUpdate::Granted { interface }) => {
                    let handle = PathHandle::new(kind, generation, interface);
                    let applied = {
                        let mut table = table.write();
                        match table.slot_mut(kind) {
                            Some(slot) if slot.generation == generation => {
                                slot.state = SlotState::Granted(handle.clone());
                                true
                            }
                            _ => false,
                        }
                    };
                    if applied {
                        info!(%handle, "path granted");
                        let _ = handle_tx.send(Some(handle.clone()));
                        let _ = event_tx.send(PathEvent::Granted { handle });
                    } else {
                        debug!(%kind, %generation, "ignoring stale grant");
                    }
                }
                Some(PathUpdate::Lost { reason }) => {
                    if let Some(slot) = take_if_current(&table, kind, generation) {
                        // The platform already dropped the path; the signal
                        // just lets the provider finish. Idempotent.
                        let _ = slot.release_tx.send(true);
                        match slot.state {
                            SlotState::Granted(handle) => {
                                warn!(%handle, %reason, "path lost");
                                let _ = event_tx.send(PathEvent::Lost { handle, reason });
                            }
                            SlotState::Requesting => {
                                let _ = event_tx.send(PathEvent::Denied { kind, generation, reason });
                            }
                        }
                    } else {
                        debug!(%kind, %generation, "ignoring stale loss");
                    }
                    let _ = handle_tx.send(None);
                    break;
                }
                Some(PathUpdate::Denied { reason }) => {
                    if take_if_current(&table, kind, generation).is_some() {
                        warn!(%kind, %generation, %reason, "path denied");
                        let _ = event_tx.send(PathEvent::Denied { kind, generation, reason });
                    }
                    let _ = handle_tx.send(None);
                    break;
                }
                None => {
                    // Provider future ended without a terminal update. Normal
                    // after supersession or release; a fault while current.
                    if let Some(slot) = take_if_current(&table, kind, generation) {
                        let reason = "provider terminated".to_string();
                        match slot.state {
                            SlotState::Granted(handle) => {
                                warn!(%handle, "provider terminated while granted");
                                let _ = event_tx.send(PathEvent::Lost { handle, reason });
                            }
                            SlotState::Requesting => {
                                let _ = event_tx.send(PathEvent::Denied { kind, generation, reason });
                            }
                        }
                    }
                    let _ = handle_tx.send(None);
                    break;
                }
            },
            () = handle_tx.closed() => {
                // Consumer cancellation: the acquisition stream is gone.
                if let Some(slot) = take_if_current(&table, kind, generation) {
                    debug!(%kind, %generation, "acquisition stream dropped, releasing");
                    let _ = slot.release_tx.send(true);
                    let _ = event_tx.send(PathEvent::Released { kind, generation });
                }
                break;
            }
        }
    }
}

fn take_if_current(
    table: &RwLock<PathTable>,
    kind: PathKind,
    generation: Generation,
) -> Option<Slot> {
    let mut table = table.write();
    let slot = table.slot_mut(kind);
    if slot.as_ref().is_some_and(|s| s.generation == generation) {
        slot.take()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    /// Provider that denies everything.
    struct DenyAll;

    #[async_trait]
    impl PathProvider for DenyAll {
        async fn acquire(
            &self,
            _request: PathRequest,
            updates: mpsc::Sender<PathUpdate>,
            _released: ReleaseSignal,
        ) -> Result<()> {
            let _ = updates
                .send(PathUpdate::Denied {
                    reason: "denied by test".into(),
                })
                .await;
            Ok(())
        }
    }

    #[test]
    fn test_snapshot_starts_empty() {
        let manager = PathManager::new(Arc::new(DenyAll));
        assert_eq!(manager.snapshot(), PathSnapshot::default());
    }

    #[test]
    fn test_release_without_acquisition_is_noop() {
        let manager = PathManager::new(Arc::new(DenyAll));
        manager.release(PathKind::LocalLink);
        manager.release(PathKind::LocalLink);
        assert_eq!(manager.snapshot(), PathSnapshot::default());
    }

    #[tokio::test]
    async fn test_denied_acquisition_terminates_stream() {
        let manager = PathManager::new(Arc::new(DenyAll));
        let mut events = manager.acquire(PathRequest::wide_area());

        assert_eq!(events.settled().await, None);
        assert_eq!(manager.snapshot().wide, None);
    }

    #[tokio::test]
    async fn test_denial_emits_event_with_reason() {
        let manager = PathManager::new(Arc::new(DenyAll));
        let mut bus = manager.subscribe();
        let mut events = manager.acquire(PathRequest::wide_area());
        events.settled().await;

        let requesting = bus.recv().await.expect("requesting event");
        assert!(matches!(requesting, PathEvent::Requesting { .. }));
        let denied = bus.recv().await.expect("denied event");
        match denied {
            PathEvent::Denied { reason, .. } => assert_eq!(reason, "denied by test"),
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
