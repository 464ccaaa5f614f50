//! Low-level UDP socket handling
//!
//! The server binds exactly the configured port. The client starts at the
//! configured port plus an offset and walks upwards so that a client and a
//! server can share one host.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::router::RouterRole;

/// Create a configured, non-blocking UDP socket bound to `port`
pub fn create_socket(config: &NetworkConfig, port: u16) -> Result<StdUdpSocket, NetworkError> {
    let ip: IpAddr = config
        .bind_address
        .parse()
        .map_err(|e: std::net::AddrParseError| NetworkError::InvalidAddress(e.to_string()))?;
    let addr = SocketAddr::new(ip, port);

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| bind_failed(port, e))?;

    configure_socket(&socket, config, port)?;

    socket.bind(&addr.into()).map_err(|e| bind_failed(port, e))?;

    let std_socket: StdUdpSocket = socket.into();
    std_socket.set_nonblocking(true).map_err(|e| bind_failed(port, e))?;

    Ok(std_socket)
}

/// Bind according to the role's port policy
pub fn bind_for_role(config: &NetworkConfig, role: RouterRole) -> Result<StdUdpSocket, NetworkError> {
    match role {
        RouterRole::Server => create_socket(config, config.port),
        RouterRole::Client => {
            let mut last_error = None;
            for attempt in 0..config.client_port_retries {
                let port = match config
                    .port
                    .checked_add(config.client_port_offset)
                    .and_then(|p| p.checked_add(attempt))
                {
                    Some(port) => port,
                    None => break,
                };

                match create_socket(config, port) {
                    Ok(socket) => return Ok(socket),
                    Err(e) => {
                        tracing::debug!("Client port {} unavailable: {}", port, e);
                        last_error = Some(e);
                    }
                }
            }

            Err(last_error.unwrap_or(NetworkError::BindFailed {
                port: config.port,
                reason: "no client port left to try".to_string(),
            }))
        }
    }
}

/// Configure socket options for low-latency audio
fn configure_socket(socket: &Socket, config: &NetworkConfig, port: u16) -> Result<(), NetworkError> {
    // No SO_REUSEADDR: a second instance on the same port must fail to bind

    socket
        .set_send_buffer_size(config.send_buffer_size)
        .map_err(|e| NetworkError::BindFailed {
            port,
            reason: format!("Failed to set send buffer: {}", e),
        })?;

    socket
        .set_recv_buffer_size(config.recv_buffer_size)
        .map_err(|e| NetworkError::BindFailed {
            port,
            reason: format!("Failed to set recv buffer: {}", e),
        })?;

    Ok(())
}

fn bind_failed(port: u16, e: std::io::Error) -> NetworkError {
    NetworkError::BindFailed {
        port,
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(port: u16) -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_socket_creation() {
        let socket = create_socket(&loopback_config(0), 0);
        assert!(socket.is_ok());
    }

    #[test]
    fn test_server_port_is_exclusive() {
        let first = create_socket(&loopback_config(0), 0).unwrap();
        let port = first.local_addr().unwrap().port();

        let result = bind_for_role(&loopback_config(port), RouterRole::Server);
        assert!(matches!(result, Err(NetworkError::BindFailed { port: p, .. }) if p == port));
    }

    #[test]
    fn test_client_skips_busy_port() {
        let blocker = create_socket(&loopback_config(0), 0).unwrap();
        let busy = blocker.local_addr().unwrap().port();
        if busy < 2 * crate::constants::CLIENT_PORT_OFFSET || busy > u16::MAX - 100 {
            return;
        }

        let config = loopback_config(busy - crate::constants::CLIENT_PORT_OFFSET);
        let socket = bind_for_role(&config, RouterRole::Client).unwrap();
        let port = socket.local_addr().unwrap().port();

        assert!(port > busy);
        assert!(port < busy + config.client_port_retries);
    }

    #[test]
    fn test_client_gives_up_after_retries() {
        let blocker = create_socket(&loopback_config(0), 0).unwrap();
        let busy = blocker.local_addr().unwrap().port();
        if busy < crate::constants::CLIENT_PORT_OFFSET {
            return;
        }

        let config = NetworkConfig {
            client_port_retries: 1,
            ..loopback_config(busy - crate::constants::CLIENT_PORT_OFFSET)
        };
        assert!(bind_for_role(&config, RouterRole::Client).is_err());
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = NetworkConfig {
            bind_address: "not-an-ip".to_string(),
            ..Default::default()
        };
        assert!(matches!(create_socket(&config, 0), Err(NetworkError::InvalidAddress(_))));
    }
}
