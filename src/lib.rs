//! # Pathwatch
//!
//! Network path manager and probing engine for dual-homed installations.
//!
//! Pathwatch holds two network paths at once - a local Wi-Fi link identified
//! by SSID and an internet-capable wide-area path - and continuously probes
//! the far ends of both, keeping one conflated status cell per endpoint.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CLI / Embedding                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                          Monitor                            │
//! │  ┌──────────────┐  ┌───────────────┐  ┌─────────────────┐   │
//! │  │ Path Manager │  │    Prober     │  │  Status Board   │   │
//! │  │ (two slots)  │  │  (one loop)   │  │  (four cells)   │   │
//! │  └──────────────┘  └───────────────┘  └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────────┤
//! │            Bound Transport (per-path sockets)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │       System Provider (sysfs / iw / routing table)          │
//! └─────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Latency fits in the cast targets
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::cast_sign_loss)]            // EWMA values are always positive
#![allow(clippy::suboptimal_flops)]          // Clarity over micro-optimization
#![allow(clippy::similar_names)]             // state/stats are intentionally named
#![allow(clippy::significant_drop_tightening)] // Lock ordering is intentional
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::cognitive_complexity)]      // Event pumps branch a lot
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use
#![allow(clippy::ignored_unit_patterns)]     // Ok(_) vs Ok(()) is stylistic

pub mod config;
pub mod error;
pub mod monitor;
pub mod path;
pub mod probe;
pub mod status;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use monitor::Monitor;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with controller probes.
pub const USER_AGENT: &str = concat!("pathwatch/", env!("CARGO_PKG_VERSION"));

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::monitor::Monitor;
    pub use crate::path::{PathEvent, PathManager, PathProvider, SystemPathProvider};
    pub use crate::probe::{ProbeEvent, Prober, ProbingConfig};
    pub use crate::status::{StatusBoard, StatusSnapshot};
    pub use crate::transport::BoundTransport;
    pub use crate::types::*;
}
