//! Low-level socket creation with interface binding.
//!
//! Supports interface-level binding on Linux (SO_BINDTODEVICE) and macOS
//! (IP_BOUND_IF). Elsewhere the socket binds to the interface's primary
//! address, which steers routing without device-level enforcement.

use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{BindError, Result};

/// Create a non-blocking TCP socket pinned to `interface`, ready to connect
/// to `remote`.
pub fn bound_tcp_socket(remote: SocketAddr, interface: &str) -> Result<Socket> {
    let domain = if remote.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| BindError::SocketSetup(e.to_string()))?;

    socket
        .set_nodelay(true)
        .map_err(|e| BindError::SocketSetup(format!("set nodelay: {e}")))?;

    bind_to_interface(&socket, interface, remote.is_ipv6())?;

    socket
        .set_nonblocking(true)
        .map_err(|e| BindError::SocketSetup(format!("set nonblocking: {e}")))?;

    Ok(socket)
}

/// Bind a socket to a specific interface.
///
/// A failure here is a hard error. Proceeding unbound would silently probe
/// over whatever path the routing table prefers, which is exactly the
/// ambiguity path-pinned probing exists to rule out.
#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &Socket, interface: &str, _is_ipv6: bool) -> Result<()> {
    use std::ffi::CString;

    let cname = CString::new(interface)
        .map_err(|_| BindError::SocketSetup("invalid interface name".to_string()))?;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            cname.as_ptr().cast::<libc::c_void>(),
            (interface.len() + 1) as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = std::io::Error::last_os_error();
        // EPERM means we lack CAP_NET_RAW (kernels before 5.7).
        if err.raw_os_error() == Some(libc::EPERM) {
            return Err(BindError::Permission {
                interface: interface.to_string(),
            }
            .into());
        }
        return Err(BindError::InterfaceBind {
            interface: interface.to_string(),
            reason: err.to_string(),
        }
        .into());
    }

    debug!(interface, "bound socket via SO_BINDTODEVICE");
    Ok(())
}

#[cfg(target_os = "macos")]
fn bind_to_interface(socket: &Socket, interface: &str, is_ipv6: bool) -> Result<()> {
    let idx = crate::util::if_nametoindex(interface).ok_or_else(|| BindError::InterfaceBind {
        interface: interface.to_string(),
        reason: "interface not found".to_string(),
    })?;

    let (level, option) = if is_ipv6 {
        (libc::IPPROTO_IPV6, libc::IPV6_BOUND_IF)
    } else {
        (libc::IPPROTO_IP, libc::IP_BOUND_IF)
    };

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            std::ptr::addr_of!(idx).cast::<libc::c_void>(),
            std::mem::size_of::<u32>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(BindError::InterfaceBind {
            interface: interface.to_string(),
            reason: err.to_string(),
        }
        .into());
    }

    debug!(interface, idx, "bound socket via IP_BOUND_IF");
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn bind_to_interface(socket: &Socket, interface: &str, is_ipv6: bool) -> Result<()> {
    let address = crate::util::get_interface_primary_address(interface)
        .filter(|a| a.is_ipv6() == is_ipv6)
        .ok_or_else(|| BindError::NoAddress {
            interface: interface.to_string(),
        })?;

    let local = SocketAddr::new(address, 0);
    socket
        .bind(&local.into())
        .map_err(|e| BindError::InterfaceBind {
            interface: interface.to_string(),
            reason: e.to_string(),
        })?;

    debug!(interface, %address, "bound socket to interface address");
    Ok(())
}
