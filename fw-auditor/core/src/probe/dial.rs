use super::{error_chain, Outcome};
use crate::port::{self, Protocol};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{lookup_host, TcpStream, UdpSocket},
    time,
};
use tracing::trace;

/// Dials a destination directly from this node.
#[derive(Clone, Debug)]
pub struct DirectDial {
    timeout: Duration,
}

impl DirectDial {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Makes a single connection attempt to `address` on the port described
    /// by the raw specifier `port`.
    pub async fn probe(&self, address: &str, port: &str) -> Outcome {
        let port = match port::parse_port(port) {
            Ok(port) => port,
            Err(error) => return Outcome::Error(error.to_string()),
        };
        let target = port::join_host_port(port::strip_scheme(address), port.number);
        trace!(%target, protocol = %port.protocol, "Dialing");

        let dial = async {
            match port.protocol {
                Protocol::Tcp => TcpStream::connect(&target).await.map(drop),
                Protocol::Udp => connect_udp(&target).await,
            }
        };

        match time::timeout(self.timeout, dial).await {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(error)) => {
                Outcome::Error(format!("dial {} {target}: {}", port.protocol, error_chain(&error)))
            }
            Err(_) => Outcome::Error(format!(
                "dial {} {target}: i/o timeout after {:?}",
                port.protocol, self.timeout
            )),
        }
    }
}

/// UDP is connectionless, so "connecting" only resolves the target and binds
/// a local route to it.
async fn connect_udp(target: &str) -> io::Result<()> {
    let addr = lookup_host(target).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
    })?;
    let local = match addr {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn dial() -> DirectDial {
        DirectDial::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn reaches_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = dial().probe("127.0.0.1", &port.to_string()).await;
        assert_eq!(outcome, Outcome::Success);

        // Schemes are ignored when dialing.
        let outcome = dial()
            .probe("http://127.0.0.1", &format!("tcp/{port}"))
            .await;
        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn records_refused_connections() {
        // Bind and release a port so that nothing is listening on it.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        match dial().probe("127.0.0.1", &port.to_string()).await {
            Outcome::Error(message) => {
                assert!(
                    message.starts_with(&format!("dial tcp 127.0.0.1:{port}: ")),
                    "{message}"
                );
            }
            Outcome::Success => panic!("nothing listens on port {port}"),
        }
    }

    #[tokio::test]
    async fn records_malformed_ports() {
        let outcome = dial().probe("127.0.0.1", "ftp/21").await;
        assert_eq!(
            outcome,
            Outcome::Error("port \"ftp/21\" doesn't match any protocol pattern".to_string())
        );
    }

    #[tokio::test]
    async fn connects_udp() {
        assert_eq!(dial().probe("127.0.0.1", "udp/53").await, Outcome::Success);
    }

    #[tokio::test]
    async fn times_out() {
        // 192.0.2.0/24 is reserved for documentation and is never routed.
        let dial = DirectDial::new(Duration::from_millis(50));
        match dial.probe("192.0.2.1", "3306").await {
            Outcome::Error(message) => assert!(
                message.starts_with("dial tcp 192.0.2.1:3306: "),
                "{message}"
            ),
            Outcome::Success => panic!("192.0.2.1 must not be reachable"),
        }
    }
}
