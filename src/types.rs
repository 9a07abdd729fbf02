//! Core types used throughout Pathwatch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two kinds of network path the manager can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathKind {
    /// Local-area link (e.g. an access-point Wi-Fi network); no internet
    /// reachability is implied.
    LocalLink,
    /// Wide-area, internet-capable link (e.g. cellular).
    WideArea,
}

impl PathKind {
    pub const ALL: [Self; 2] = [Self::LocalLink, Self::WideArea];

    pub fn is_local(self) -> bool {
        matches!(self, Self::LocalLink)
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalLink => write!(f, "local-link"),
            Self::WideArea => write!(f, "wide-area"),
        }
    }
}

/// Monotonically increasing acquisition epoch.
///
/// Every acquisition gets a fresh generation; grant/loss updates carrying a
/// stale generation are ignored, which is what makes supersession race-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request for one path kind, carrying its kind-specific selector.
///
/// At most one request per kind is outstanding at any time; issuing a new one
/// supersedes (releases) the previous request or handle of that kind.
#[derive(Clone, PartialEq, Eq)]
pub enum PathRequest {
    /// Request the local-area link identified by an SSID.
    LocalLink {
        ssid: String,
        /// Carried for selector identity; joining the network is the OS's job.
        passphrase: Option<String>,
        /// Explicit interface override; skips SSID resolution when set.
        interface: Option<String>,
    },
    /// Request an internet-capable link.
    WideArea {
        /// Explicit interface override; otherwise the default-route interface.
        interface: Option<String>,
    },
}

impl PathRequest {
    pub fn local_link(ssid: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::LocalLink {
            ssid: ssid.into(),
            passphrase,
            interface: None,
        }
    }

    pub fn wide_area() -> Self {
        Self::WideArea { interface: None }
    }

    /// Pin the request to a specific interface instead of letting the
    /// provider pick one.
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            Self::LocalLink { interface, .. } | Self::WideArea { interface } => {
                *interface = Some(name.into());
            }
        }
        self
    }

    pub fn kind(&self) -> PathKind {
        match self {
            Self::LocalLink { .. } => PathKind::LocalLink,
            Self::WideArea { .. } => PathKind::WideArea,
        }
    }
}

// Intentionally abbreviated Debug output - never prints the passphrase.
#[allow(clippy::missing_fields_in_debug)]
impl fmt::Debug for PathRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalLink {
                ssid,
                passphrase,
                interface,
            } => f
                .debug_struct("LocalLink")
                .field("ssid", ssid)
                .field("passphrase", &passphrase.as_ref().map(|_| "<set>"))
                .field("interface", interface)
                .finish(),
            Self::WideArea { interface } => f
                .debug_struct("WideArea")
                .field("interface", interface)
                .finish(),
        }
    }
}

impl fmt::Display for PathRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalLink { ssid, .. } => write!(f, "local-link ssid={ssid}"),
            Self::WideArea {
                interface: Some(name),
            } => write!(f, "wide-area if={name}"),
            Self::WideArea { interface: None } => write!(f, "wide-area"),
        }
    }
}

/// Identity token for a live, granted network path.
///
/// The token is what circulates: the path manager hands it to the binder and
/// the scheduler, and it is all that is needed to build a bound transport. The
/// platform reservation behind it stays owned by the manager; a copied token
/// can neither extend the reservation's life nor release it, and a stale copy
/// is detectable by its generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathHandle {
    pub kind: PathKind,
    pub generation: Generation,
    /// Network interface this path is bound through.
    pub interface: String,
}

impl PathHandle {
    pub fn new(kind: PathKind, generation: Generation, interface: impl Into<String>) -> Self {
        Self {
            kind,
            generation,
            interface: interface.into(),
        }
    }
}

impl fmt::Display for PathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} via {}", self.kind, self.generation, self.interface)
    }
}

/// The four logical endpoints whose liveness is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    /// The controller, probed over the wide-area path.
    Controller,
    /// The local link itself; driven by acquisition events, not probes.
    LocalLink,
    /// First device, probed over the local link.
    DeviceA,
    /// Second device, probed over the local link.
    DeviceB,
}

impl Endpoint {
    pub const ALL: [Self; 4] = [Self::Controller, Self::LocalLink, Self::DeviceA, Self::DeviceB];

    /// Endpoints reached over the local-area link.
    pub fn is_device(self) -> bool {
        matches!(self, Self::DeviceA | Self::DeviceB)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => write!(f, "controller"),
            Self::LocalLink => write!(f, "local-link"),
            Self::DeviceA => write!(f, "device-a"),
            Self::DeviceB => write!(f, "device-b"),
        }
    }
}

/// Outcome of a single probe invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ProbeResult {
    /// Endpoint responded; wall-clock latency of the exchange.
    Up { latency_ms: u64 },
    /// Endpoint did not respond usefully; short human-readable cause.
    Down { reason: String },
}

impl ProbeResult {
    pub fn up(latency_ms: u64) -> Self {
        Self::Up { latency_ms }
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self::Down {
            reason: reason.into(),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            Self::Up { latency_ms } => Some(*latency_ms),
            Self::Down { .. } => None,
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up { latency_ms } => write!(f, "up {latency_ms}ms"),
            Self::Down { reason } => write!(f, "down: {reason}"),
        }
    }
}

/// Liveness state of one endpoint as shown to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No information yet (before the first probe or acquisition event).
    #[default]
    Unknown,
    /// An acquisition for the underlying path is in flight.
    Connecting,
    /// Endpoint is reachable; latency of the most recent probe if one ran.
    Connected { latency_ms: Option<u64> },
    /// Endpoint is not reachable; short human-readable cause if known.
    Disconnected { reason: Option<String> },
}

impl ConnectionStatus {
    pub fn connected(latency_ms: Option<u64>) -> Self {
        Self::Connected { latency_ms }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: Some(reason.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Connecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected {
                latency_ms: Some(ms),
            } => write!(f, "connected ({ms} ms)"),
            Self::Connected { latency_ms: None } => write!(f, "connected"),
            Self::Disconnected {
                reason: Some(reason),
            } => write!(f, "disconnected: {reason}"),
            Self::Disconnected { reason: None } => write!(f, "disconnected"),
        }
    }
}

/// Network interface type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Wired Ethernet connection
    Ethernet,
    /// WiFi connection
    Wifi,
    /// Cellular data (4G/5G/LTE)
    Cellular,
    /// VPN or tunnel interface
    Tunnel,
    /// Loopback interface
    Loopback,
    /// Unknown interface type
    #[default]
    Unknown,
}

impl InterfaceType {
    /// Whether an interface of this type can carry the local-area link.
    pub fn is_wireless(self) -> bool {
        matches!(self, Self::Wifi)
    }

    /// Whether an interface of this type plausibly reaches the internet.
    pub fn is_wide_area_candidate(self) -> bool {
        matches!(self, Self::Ethernet | Self::Wifi | Self::Cellular | Self::Unknown)
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cellular"),
            Self::Tunnel => write!(f, "tunnel"),
            Self::Loopback => write!(f, "loopback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
