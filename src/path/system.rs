//! System-backed path provider.
//!
//! Resolves path requests against the host's live network state: sysfs and
//! `iw` for the local link, the kernel routing table for the wide-area path.
//! Association is owned by the OS; this provider only locates interfaces the
//! OS has already brought up, so a passphrase in a request is carried for the
//! record but never used here.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AcquireError, Result};
use crate::path::provider::{PathProvider, PathUpdate, ReleaseSignal};
use crate::path::DEFAULT_WATCH_INTERVAL;
use crate::types::PathRequest;
use crate::util::{find_interface, get_network_interfaces};

/// Path provider backed by the host network stack.
#[derive(Debug, Clone)]
pub struct SystemPathProvider {
    watch_interval: Duration,
}

impl SystemPathProvider {
    pub fn new() -> Self {
        Self {
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }

    /// Override how often a granted path is re-verified.
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }
}

impl Default for SystemPathProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PathProvider for SystemPathProvider {
    async fn acquire(
        &self,
        request: PathRequest,
        updates: mpsc::Sender<PathUpdate>,
        mut released: ReleaseSignal,
    ) -> Result<()> {
        let interface = match resolve(&request) {
            Ok(name) => name,
            Err(denial) => {
                debug!(%request, %denial, "path request denied");
                let _ = updates
                    .send(PathUpdate::Denied {
                        reason: denial.to_string(),
                    })
                    .await;
                return Ok(());
            }
        };

        if updates
            .send(PathUpdate::Granted {
                interface: interface.clone(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        // Hold the grant until release, then stop watching. A path that stops
        // resolving to the granted interface is reported lost.
        let mut ticker = tokio::time::interval(self.watch_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(reason) = verify(&request, &interface) {
                        warn!(%request, interface, %reason, "path no longer valid");
                        let _ = updates.send(PathUpdate::Lost { reason }).await;
                        return Ok(());
                    }
                }
                () = released.released() => {
                    debug!(%request, interface, "path released");
                    return Ok(());
                }
                () = updates.closed() => {
                    return Ok(());
                }
            }
        }
    }
}

/// Pick the interface satisfying `request`, or say why none does.
fn resolve(request: &PathRequest) -> std::result::Result<String, AcquireError> {
    match request {
        PathRequest::LocalLink {
            ssid, interface, ..
        } => resolve_local_link(ssid, interface.as_deref()),
        PathRequest::WideArea { interface } => resolve_wide_area(interface.as_deref()),
    }
}

/// Confirm a previously granted interface still satisfies its request.
fn verify(request: &PathRequest, interface: &str) -> std::result::Result<(), String> {
    match resolve(request) {
        Ok(current) if current == interface => Ok(()),
        Ok(current) => Err(format!("path moved to {current}")),
        Err(denial) => Err(denial.to_string()),
    }
}

fn resolve_local_link(
    ssid: &str,
    interface: Option<&str>,
) -> std::result::Result<String, AcquireError> {
    if ssid.is_empty() {
        return Err(AcquireError::NoSsidConfigured);
    }

    if let Some(name) = interface {
        let iface = find_interface(name)
            .ok_or_else(|| AcquireError::NoSuchInterface(name.to_string()))?;
        if !iface.is_up || !iface.is_running {
            return Err(AcquireError::InterfaceDown(name.to_string()));
        }
        return match current_ssid(name) {
            Some(current) if current == ssid => Ok(name.to_string()),
            _ => Err(AcquireError::SsidNotAssociated(ssid.to_string())),
        };
    }

    let mut seen_wireless = false;
    for iface in get_network_interfaces() {
        if !iface.is_wireless || !iface.is_usable() {
            continue;
        }
        seen_wireless = true;
        if current_ssid(&iface.name).as_deref() == Some(ssid) {
            return Ok(iface.name);
        }
    }

    if seen_wireless {
        Err(AcquireError::SsidNotAssociated(ssid.to_string()))
    } else {
        Err(AcquireError::Unsupported(
            "no wireless interfaces".to_string(),
        ))
    }
}

fn resolve_wide_area(interface: Option<&str>) -> std::result::Result<String, AcquireError> {
    if let Some(name) = interface {
        let iface = find_interface(name)
            .ok_or_else(|| AcquireError::NoSuchInterface(name.to_string()))?;
        if !iface.is_up || !iface.is_running {
            return Err(AcquireError::InterfaceDown(name.to_string()));
        }
        return Ok(name.to_string());
    }

    default_route_interface().ok_or(AcquireError::NoDefaultRoute)
}

/// SSID the interface is currently associated with, if any.
#[cfg(target_os = "linux")]
fn current_ssid(interface: &str) -> Option<String> {
    let output = std::process::Command::new("iw")
        .args(["dev", interface, "link"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(ssid) = line.trim().strip_prefix("SSID: ") {
            return Some(ssid.trim().to_string());
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn current_ssid(_interface: &str) -> Option<String> {
    None
}

/// Interface carrying the kernel default route.
#[cfg(target_os = "linux")]
fn default_route_interface() -> Option<String> {
    const RTF_UP: u64 = 0x0001;

    let table = std::fs::read_to_string("/proc/net/route").ok()?;
    for line in table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        let _gateway = fields.next()?;
        let flags = fields.next()?;

        let flags = u64::from_str_radix(flags, 16).unwrap_or(0);
        if destination == "00000000" && flags & RTF_UP != 0 {
            return Some(iface.to_string());
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn default_route_interface() -> Option<String> {
    get_network_interfaces()
        .into_iter()
        .find(|i| i.is_usable() && i.interface_type.is_wide_area_candidate())
        .map(|i| i.name)
}
