//! Connection status cells.
//!
//! One conflated cell per [`Endpoint`]: writes that do not change the value
//! wake nobody, so a subscriber sees state changes, not probe traffic. The
//! local-link cell is driven by acquisition events; the other three by probe
//! results.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::types::{ConnectionStatus, Endpoint, ProbeResult};

/// Everything that can move a status cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A probe round answered for this endpoint.
    Probe(ProbeResult),
    /// An acquisition for the underlying path started.
    PathRequesting,
    /// The underlying path was granted.
    PathGranted,
    /// The underlying path ended; denial or loss carries a reason, a plain
    /// release does not.
    PathLost { reason: Option<String> },
}

impl StatusEvent {
    /// Status a cell takes after this event. Total and context-free, so the
    /// same event stream always produces the same cell history.
    pub fn into_status(self) -> ConnectionStatus {
        match self {
            Self::Probe(ProbeResult::Up { latency_ms }) => ConnectionStatus::Connected {
                latency_ms: Some(latency_ms),
            },
            Self::Probe(ProbeResult::Down { reason }) => ConnectionStatus::Disconnected {
                reason: Some(reason),
            },
            Self::PathRequesting => ConnectionStatus::Connecting,
            Self::PathGranted => ConnectionStatus::Connected { latency_ms: None },
            Self::PathLost { reason } => ConnectionStatus::Disconnected { reason },
        }
    }
}

/// Point-in-time copy of all four cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub controller: ConnectionStatus,
    pub local_link: ConnectionStatus,
    pub device_a: ConnectionStatus,
    pub device_b: ConnectionStatus,
}

impl StatusSnapshot {
    pub fn get(&self, endpoint: Endpoint) -> &ConnectionStatus {
        match endpoint {
            Endpoint::Controller => &self.controller,
            Endpoint::LocalLink => &self.local_link,
            Endpoint::DeviceA => &self.device_a,
            Endpoint::DeviceB => &self.device_b,
        }
    }

    pub fn cells(&self) -> [(Endpoint, &ConnectionStatus); 4] {
        [
            (Endpoint::Controller, &self.controller),
            (Endpoint::LocalLink, &self.local_link),
            (Endpoint::DeviceA, &self.device_a),
            (Endpoint::DeviceB, &self.device_b),
        ]
    }

    pub fn all_connected(&self) -> bool {
        self.cells().iter().all(|(_, status)| status.is_connected())
    }

    pub fn all_settled(&self) -> bool {
        self.cells().iter().all(|(_, status)| status.is_settled())
    }
}

/// The four conflated status cells.
#[derive(Debug)]
pub struct StatusBoard {
    controller: watch::Sender<ConnectionStatus>,
    local_link: watch::Sender<ConnectionStatus>,
    device_a: watch::Sender<ConnectionStatus>,
    device_b: watch::Sender<ConnectionStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            controller: watch::Sender::new(ConnectionStatus::Unknown),
            local_link: watch::Sender::new(ConnectionStatus::Unknown),
            device_a: watch::Sender::new(ConnectionStatus::Unknown),
            device_b: watch::Sender::new(ConnectionStatus::Unknown),
        }
    }

    fn cell(&self, endpoint: Endpoint) -> &watch::Sender<ConnectionStatus> {
        match endpoint {
            Endpoint::Controller => &self.controller,
            Endpoint::LocalLink => &self.local_link,
            Endpoint::DeviceA => &self.device_a,
            Endpoint::DeviceB => &self.device_b,
        }
    }

    /// Apply an event to one cell. Equal statuses are conflated: the write is
    /// dropped and no subscriber wakes.
    pub fn apply(&self, endpoint: Endpoint, event: StatusEvent) {
        let next = event.into_status();
        let changed = self.cell(endpoint).send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            debug!(%endpoint, status = %next, "status changed");
        }
    }

    /// Watch one cell. The receiver sees the current value immediately and
    /// every change after.
    pub fn subscribe(&self, endpoint: Endpoint) -> watch::Receiver<ConnectionStatus> {
        self.cell(endpoint).subscribe()
    }

    pub fn get(&self, endpoint: Endpoint) -> ConnectionStatus {
        self.cell(endpoint).borrow().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            controller: self.get(Endpoint::Controller),
            local_link: self.get(Endpoint::LocalLink),
            device_a: self.get(Endpoint::DeviceA),
            device_b: self.get(Endpoint::DeviceB),
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
