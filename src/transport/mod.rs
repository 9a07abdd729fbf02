//! Path-bound transport.
//!
//! Every connection and HTTP client made here is pinned to the interface of
//! one granted path handle, so a probe can only succeed over the path it is
//! meant to measure.

mod socket;

pub use socket::bound_tcp_socket;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::debug;

use crate::error::{BindError, Error, Result};
use crate::types::PathHandle;

/// Transport factory tied to one granted path.
///
/// Holds a copy of the handle it was built from; if the path is superseded or
/// lost, sockets created afterwards still bind to the old interface and fail
/// on their own, so callers should rebuild from the current handle.
#[derive(Debug, Clone)]
pub struct BoundTransport {
    handle: PathHandle,
}

impl BoundTransport {
    pub fn new(handle: PathHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &PathHandle {
        &self.handle
    }

    pub fn interface(&self) -> &str {
        &self.handle.interface
    }

    /// Open a TCP connection to `host:port` over this path.
    ///
    /// Name resolution goes through the system resolver and is not pinned;
    /// only the connection itself is.
    pub async fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<TcpStream> {
        let remote = resolve_one(host, port).await?;
        let socket = bound_tcp_socket(remote, self.interface())?;

        let socket = TcpSocket::from_std_stream(socket.into());
        let stream = tokio::time::timeout(timeout, socket.connect(remote))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {remote} timed out"),
                ))
            })??;

        debug!(%remote, interface = self.interface(), "tcp connected");
        Ok(stream)
    }

    /// Build an HTTP client whose connections ride this path.
    pub fn http_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(crate::USER_AGENT);

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        let builder = builder.interface(self.interface());

        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        let builder = {
            let address = crate::util::get_interface_primary_address(self.interface())
                .ok_or_else(|| BindError::NoAddress {
                    interface: self.interface().to_string(),
                })?;
            builder.local_address(address)
        };

        builder
            .build()
            .map_err(|e| BindError::HttpClient(e.to_string()).into())
    }
}

/// Resolve `host:port` to the first usable socket address.
async fn resolve_one(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port)).await?;
    addrs.next().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses for {host}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Generation, PathKind};

    fn loopback_handle() -> PathHandle {
        PathHandle::new(PathKind::WideArea, Generation::new(1), "lo")
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addr = resolve_one("127.0.0.1", 80).await.unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn test_connect_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = BoundTransport::new(loopback_handle());
        let stream = transport
            .connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop to find a port nothing listens on.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = BoundTransport::new(loopback_handle());
        let result = transport
            .connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
