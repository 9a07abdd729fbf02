//! Platform seam for path acquisition.
//!
//! A [`PathProvider`] is the only place that talks to the operating system
//! about network paths. The manager runs one provider lifecycle per
//! acquisition; the provider reports what the platform does through a channel
//! and must tear its reservation down exactly once, on the first of: release
//! signal, consumer disappearance (update channel closed), or platform loss.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::types::PathRequest;

/// Update sent by a provider while an acquisition is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathUpdate {
    /// The platform granted the path on the given interface.
    Granted { interface: String },
    /// A previously granted path is gone. Terminal.
    Lost { reason: String },
    /// The request cannot be satisfied. Terminal.
    Denied { reason: String },
}

/// Release notification for one acquisition.
///
/// Completes when the manager wants the reservation gone; also completes if
/// the managing side disappears entirely, so a provider waiting on it can
/// never be leaked.
#[derive(Debug)]
pub struct ReleaseSignal {
    rx: watch::Receiver<bool>,
}

impl ReleaseSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Wait until release is requested.
    pub async fn released(&mut self) {
        // Err means the sender is gone, which is release too.
        let _ = self.rx.wait_for(|released| *released).await;
    }

    /// Non-blocking check, for providers that poll.
    pub fn is_released(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

/// One acquisition lifecycle against the platform.
#[async_trait]
pub trait PathProvider: Send + Sync + 'static {
    /// Drive a single acquisition from request to teardown.
    ///
    /// Implementations resolve the request, send [`PathUpdate::Granted`] or
    /// [`PathUpdate::Denied`] on `updates`, then watch the grant until it is
    /// lost (send [`PathUpdate::Lost`]) or until `released` fires or `updates`
    /// closes. Whatever platform reservation the implementation holds must be
    /// dropped on every exit path of this future.
    ///
    /// Resolution failures are reported in-band as `Denied`; an `Err` return
    /// is for faults in the provider itself and is treated by the manager the
    /// same as the update channel closing.
    async fn acquire(
        &self,
        request: PathRequest,
        updates: mpsc::Sender<PathUpdate>,
        released: ReleaseSignal,
    ) -> Result<()>;
}
