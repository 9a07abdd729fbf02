//! Utility functions and helpers.

use std::net::IpAddr;

use crate::types::InterfaceType;

mod interface;

pub use interface::*;

/// Network interface information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub index: u32,
    pub address: IpAddr,
    pub is_up: bool,
    pub is_running: bool,
    pub is_loopback: bool,
    /// Reported by the kernel (/sys wireless node) where available,
    /// name-guessed otherwise.
    pub is_wireless: bool,
    pub interface_type: InterfaceType,
}

impl NetworkInterface {
    /// Usable for path binding: up, not loopback, with a routable address.
    pub fn is_usable(&self) -> bool {
        self.is_up
            && !self.is_loopback
            && match self.address {
                IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
                IpAddr::V6(v6) => !v6.is_loopback() && v6.segments()[0] != 0xfe80,
            }
    }
}

/// Guess interface type from name.
pub fn guess_interface_type(name: &str) -> InterfaceType {
    let name = name.to_lowercase();

    if name.starts_with("lo") {
        InterfaceType::Loopback
    } else if name.starts_with("eth")
        || name.starts_with("enp")
        || name.starts_with("eno")
        || name.starts_with("bond")
        || name.starts_with("br")
    {
        InterfaceType::Ethernet
    } else if name.starts_with("wlan") || name.starts_with("wl") || name.starts_with("en") {
        // macOS: en0 is usually WiFi on laptops
        InterfaceType::Wifi
    } else if name.starts_with("wwan")
        || name.starts_with("rmnet")
        || name.starts_with("cell")
        || name.starts_with("usb")
    {
        InterfaceType::Cellular
    } else if name.starts_with("tun")
        || name.starts_with("tap")
        || name.starts_with("utun")
        || name.starts_with("wg")
        || name.starts_with("veth")
    {
        InterfaceType::Tunnel
    } else {
        InterfaceType::Unknown
    }
}

/// Format duration as human-readable.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let ms = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}.{ms:03}s")
    } else {
        format!("{ms}ms")
    }
}

/// Get interface index by name.
#[cfg(unix)]
pub fn if_nametoindex(name: &str) -> Option<u32> {
    use std::ffi::CString;
    let cname = CString::new(name).ok()?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        None
    } else {
        Some(idx)
    }
}

#[cfg(not(unix))]
pub fn if_nametoindex(_name: &str) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_guess_interface_type() {
        assert_eq!(guess_interface_type("lo"), InterfaceType::Loopback);
        assert_eq!(guess_interface_type("eth0"), InterfaceType::Ethernet);
        assert_eq!(guess_interface_type("enp3s0"), InterfaceType::Ethernet);
        assert_eq!(guess_interface_type("wlan0"), InterfaceType::Wifi);
        assert_eq!(guess_interface_type("wlp2s0"), InterfaceType::Wifi);
        assert_eq!(guess_interface_type("wwan0"), InterfaceType::Cellular);
        assert_eq!(guess_interface_type("wg0"), InterfaceType::Tunnel);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.000s");
        assert_eq!(format_duration(Duration::from_secs(95)), "1m 35s");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h 0m");
    }
}
