//! Network interface discovery.
//!
//! Platform-specific enumeration; the Linux path reads /sys and /proc so it
//! also works without elevated privileges.

use std::net::IpAddr;

use super::{guess_interface_type, NetworkInterface};

/// Get all network interfaces with their addresses.
#[cfg(target_os = "linux")]
pub fn get_network_interfaces() -> Vec<NetworkInterface> {
    get_linux_interfaces()
}

#[cfg(not(target_os = "linux"))]
pub fn get_network_interfaces() -> Vec<NetworkInterface> {
    get_interfaces_via_getifaddrs()
}

/// Get all usable interfaces (up, not loopback, routable address).
pub fn get_usable_interfaces() -> Vec<NetworkInterface> {
    get_network_interfaces()
        .into_iter()
        .filter(NetworkInterface::is_usable)
        .collect()
}

/// Get primary address for an interface, preferring IPv4.
pub fn get_interface_primary_address(name: &str) -> Option<IpAddr> {
    let mut ipv4 = None;
    let mut ipv6 = None;

    for iface in get_network_interfaces() {
        if iface.name == name && iface.is_usable() {
            match iface.address {
                IpAddr::V4(v4) => ipv4 = Some(IpAddr::V4(v4)),
                IpAddr::V6(v6) => ipv6 = Some(IpAddr::V6(v6)),
            }
        }
    }

    ipv4.or(ipv6)
}

/// Look up a single interface by name.
pub fn find_interface(name: &str) -> Option<NetworkInterface> {
    get_network_interfaces().into_iter().find(|i| i.name == name)
}

// ============================================================================
// Linux implementation using /sys and /proc
// ============================================================================

#[cfg(target_os = "linux")]
fn get_linux_interfaces() -> Vec<NetworkInterface> {
    use std::fs;
    use std::path::Path;

    let mut interfaces = Vec::new();

    let net_path = Path::new("/sys/class/net");
    let entries = match fs::read_dir(net_path) {
        Ok(e) => e,
        Err(_) => return get_interfaces_via_getifaddrs(),
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let iface_path = entry.path();

        let index = fs::read_to_string(iface_path.join("ifindex"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);

        let flags = fs::read_to_string(iface_path.join("flags"))
            .ok()
            .and_then(|s| {
                let s = s.trim().trim_start_matches("0x");
                u32::from_str_radix(s, 16).ok()
            })
            .unwrap_or(0);

        let is_up = (flags & libc::IFF_UP as u32) != 0;
        let is_running = (flags & libc::IFF_RUNNING as u32) != 0;
        let is_loopback = (flags & libc::IFF_LOOPBACK as u32) != 0;
        // The kernel exposes a wireless/ node for mac80211 devices.
        let is_wireless = iface_path.join("wireless").exists();

        for addr in get_interface_addresses_linux(&name) {
            interfaces.push(NetworkInterface {
                name: name.clone(),
                index,
                address: addr,
                is_up,
                is_running,
                is_loopback,
                is_wireless,
                interface_type: if is_wireless {
                    crate::types::InterfaceType::Wifi
                } else {
                    guess_interface_type(&name)
                },
            });
        }
    }

    interfaces
}

#[cfg(target_os = "linux")]
fn get_interface_addresses_linux(name: &str) -> Vec<IpAddr> {
    let mut addresses = Vec::new();

    if let Some(v4) = get_ipv4_address_ioctl(name) {
        addresses.push(v4);
    }
    addresses.extend(get_ipv6_addresses_proc(name));

    addresses
}

#[cfg(target_os = "linux")]
fn get_ipv4_address_ioctl(name: &str) -> Option<IpAddr> {
    use std::mem::MaybeUninit;
    use std::os::fd::AsRawFd;

    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    let fd = socket.as_raw_fd();

    let mut ifr: libc::ifreq = unsafe { MaybeUninit::zeroed().assume_init() };
    let name_bytes = name.as_bytes();
    let copy_len = name_bytes.len().min(libc::IFNAMSIZ - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr().cast::<u8>(),
            copy_len,
        );
    }

    let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFADDR, &mut ifr) };
    if ret != 0 {
        return None;
    }

    let addr = unsafe {
        let sockaddr = std::ptr::addr_of!(ifr.ifr_ifru.ifru_addr).cast::<libc::sockaddr_in>();
        std::net::Ipv4Addr::from(u32::from_be((*sockaddr).sin_addr.s_addr))
    };

    Some(IpAddr::V4(addr))
}

#[cfg(target_os = "linux")]
fn get_ipv6_addresses_proc(name: &str) -> Vec<IpAddr> {
    use std::fs;

    let Ok(content) = fs::read_to_string("/proc/net/if_inet6") else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 6 && parts[5] == name {
            let hex_addr = parts[0];
            if hex_addr.len() == 32 {
                let mut bytes = [0u8; 16];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    if let Ok(b) = u8::from_str_radix(&hex_addr[i * 2..i * 2 + 2], 16) {
                        *byte = b;
                    }
                }
                addresses.push(IpAddr::V6(std::net::Ipv6Addr::from(bytes)));
            }
        }
    }

    addresses
}

// ============================================================================
// Common getifaddrs implementation
// ============================================================================

#[cfg(unix)]
fn get_interfaces_via_getifaddrs() -> Vec<NetworkInterface> {
    use std::ffi::CStr;

    let mut interfaces = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            return interfaces;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;

            if !ifa.ifa_name.is_null() && !ifa.ifa_addr.is_null() {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                let family = i32::from((*ifa.ifa_addr).sa_family);

                #[allow(clippy::cast_ptr_alignment)]
                let addr = match family {
                    libc::AF_INET => {
                        let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                        Some(IpAddr::V4(std::net::Ipv4Addr::from(u32::from_be(
                            (*sockaddr).sin_addr.s_addr,
                        ))))
                    }
                    libc::AF_INET6 => {
                        let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in6>();
                        Some(IpAddr::V6(std::net::Ipv6Addr::from(
                            (*sockaddr).sin6_addr.s6_addr,
                        )))
                    }
                    _ => None,
                };

                if let Some(address) = addr {
                    let is_up = (ifa.ifa_flags as i32 & libc::IFF_UP) != 0;
                    let is_running = (ifa.ifa_flags as i32 & libc::IFF_RUNNING) != 0;
                    let is_loopback = (ifa.ifa_flags as i32 & libc::IFF_LOOPBACK) != 0;
                    let interface_type = guess_interface_type(&name);

                    interfaces.push(NetworkInterface {
                        name: name.clone(),
                        index: super::if_nametoindex(&name).unwrap_or(0),
                        address,
                        is_up,
                        is_running,
                        is_loopback,
                        is_wireless: interface_type.is_wireless(),
                        interface_type,
                    });
                }
            }

            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    interfaces
}

#[cfg(not(unix))]
fn get_interfaces_via_getifaddrs() -> Vec<NetworkInterface> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_network_interfaces() {
        let interfaces = get_network_interfaces();
        assert!(!interfaces.is_empty() || cfg!(not(unix)));

        #[cfg(unix)]
        {
            let has_loopback = interfaces.iter().any(|i| i.is_loopback);
            assert!(has_loopback, "Should have loopback interface");
        }
    }

    #[test]
    fn test_loopback_primary_address() {
        #[cfg(target_os = "linux")]
        {
            // lo is filtered by usability, so primary lookup returns nothing
            assert_eq!(get_interface_primary_address("lo"), None);
            assert!(find_interface("lo").is_some());
        }
    }
}
