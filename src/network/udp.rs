//! UDP socket creation

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::config::ProtocolConfig;
use crate::error::NetworkError;

/// Kernel buffer size requested for every media socket
const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;

fn bind_error(addr: SocketAddr, e: std::io::Error) -> NetworkError {
    NetworkError::BindFailed {
        addr: addr.to_string(),
        reason: e.to_string(),
    }
}

/// Bind a non-blocking UDP socket for use on the tokio runtime.
///
/// Address reuse is left off: a port already held by another process is a
/// bind failure, not a silently shared socket. Must be called from within a
/// runtime.
pub fn bind_udp(addr: SocketAddr, config: &ProtocolConfig) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| bind_error(addr, e))?;

    let buffer_size = SOCKET_BUFFER_SIZE.max(config.recv_buffer_size);
    if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
        tracing::debug!("Could not set receive buffer on {}: {}", addr, e);
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_size) {
        tracing::debug!("Could not set send buffer on {}: {}", addr, e);
    }

    socket.set_nonblocking(true).map_err(|e| bind_error(addr, e))?;
    socket.bind(&addr.into()).map_err(|e| bind_error(addr, e))?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket).map_err(|e| bind_error(addr, e))?;

    tracing::info!("Bound UDP socket on {}", socket.local_addr().unwrap_or(addr));
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), &ProtocolConfig::default()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_port_in_use_fails() {
        let config = ProtocolConfig::default();
        let first = bind_udp("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let taken = first.local_addr().unwrap();

        let result = bind_udp(taken, &config);
        assert!(matches!(result, Err(NetworkError::BindFailed { .. })));
    }
}
