//! Network path acquisition and lifecycle management.
//!
//! This module implements the path layer:
//! - Platform-neutral provider seam for requesting paths
//! - Slot-per-kind manager with supersession
//! - Epoch-tagged handles and availability streams
//! - Linux system provider (sysfs, `iw`, default route)

mod manager;
mod provider;
mod system;

pub use manager::{PathEvent, PathEvents, PathManager, PathSnapshot};
pub use provider::{PathProvider, PathUpdate, ReleaseSignal};
pub use system::SystemPathProvider;

use std::time::Duration;

/// How often the system provider re-checks a granted path.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period between a request and the first platform answer.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
