use crate::config::SmaEmConfig;
use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

/* The meter sends about 600 bytes, more is never read */
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("no datagram received within {0:?}")]
    ReceiveTimeout(Duration),
}

fn parse_ipv4(addr: &str) -> Result<Ipv4Addr, ReceiverError> {
    addr.parse().map_err(|_| ReceiverError::InvalidAddress(addr.to_string()))
}

/// Member of the multicast group the meters broadcast to.
pub struct SmaEmReceiver {
    socket: UdpSocket,
}

impl SmaEmReceiver {
    pub fn open(config: &SmaEmConfig) -> Result<Self, ReceiverError> {
        let group = parse_ipv4(&config.multicast_group)?;
        let interface = parse_ipv4(&config.interface)?;
        if !group.is_multicast() {
            return Err(ReceiverError::InvalidAddress(config.multicast_group.clone()));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port).into())?;
        socket.join_multicast_v4(&group, &interface)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        info!("Joined multicast group {group}:{} on {interface}", config.port);
        Ok(SmaEmReceiver { socket })
    }

    /// Waits for the next datagram, at most `timeout`.
    pub async fn receive(&self, timeout: Duration) -> Result<(Vec<u8>, SocketAddr), ReceiverError> {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        let (len, from) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| ReceiverError::ReceiveTimeout(timeout))??;

        debug!("Received {len} bytes from {from}");
        Ok((buf[..len].to_vec(), from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_group() {
        let config = SmaEmConfig { multicast_group: "not-an-ip".to_string(), ..SmaEmConfig::default() };
        assert!(matches!(SmaEmReceiver::open(&config), Err(ReceiverError::InvalidAddress(a)) if a == "not-an-ip"));
    }

    #[test]
    fn test_unicast_group_rejected() {
        let config = SmaEmConfig { multicast_group: "10.0.0.1".to_string(), ..SmaEmConfig::default() };
        assert!(matches!(SmaEmReceiver::open(&config), Err(ReceiverError::InvalidAddress(_))));
    }

    #[test]
    fn test_invalid_interface() {
        let config = SmaEmConfig { interface: "eth0".to_string(), ..SmaEmConfig::default() };
        assert!(matches!(SmaEmReceiver::open(&config), Err(ReceiverError::InvalidAddress(a)) if a == "eth0"));
    }

    #[test]
    fn test_error_messages() {
        let e = ReceiverError::ReceiveTimeout(Duration::from_secs(10));
        assert_eq!(e.to_string(), "no datagram received within 10s");
    }
}
