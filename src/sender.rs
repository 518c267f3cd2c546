use anyhow::{anyhow, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::packet::Packet;

/// Port of the Generic TCP (Server) SCADA import
pub const DEFAULT_PORT: u16 = 15000;

/// Upper bound on how long close waits for unsent data.
///
/// SO_LINGER has whole-second granularity, and zero would turn close into a reset.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Target server as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Parse `host[:port]` or `[v6-addr][:port]`.
    ///
    /// Never fails: a missing or malformed port falls back to [`DEFAULT_PORT`].
    pub fn parse(value: &str) -> Self {
        let (host, port) = match value.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
            Some((host, rest)) => (host, rest.strip_prefix(':')),
            None => {
                let mut segments = value.split(':');
                (segments.next().unwrap_or(""), segments.next())
            }
        };

        let port = match port.map(str::parse::<u16>) {
            Some(Ok(port)) => port,
            Some(Err(_)) => {
                warn!("Invalid port in {:?}, using {}", value, DEFAULT_PORT);
                DEFAULT_PORT
            }
            None => DEFAULT_PORT,
        };

        Self {
            host: host.to_string(),
            port,
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}", self))?
            .collect();

        if addrs.is_empty() {
            return Err(anyhow!("No addresses found for {}", self));
        }
        Ok(addrs)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Open one connection, write the packet and close. No retries, nothing is read back.
pub fn send_packet(server: &ServerAddress, packet: &Packet) -> Result<()> {
    let mut stream = connect(server)?;

    let bytes = packet.encode();
    let result = stream
        .write_all(&bytes)
        .and_then(|_| stream.flush())
        .with_context(|| format!("Failed to write packet to {}", server));

    if result.is_ok() {
        info!("Wrote {} bytes to {}", bytes.len(), server);
    }

    close(stream);
    result
}

fn connect(server: &ServerAddress) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in server.resolve()? {
        debug!("Connecting to {}", addr);
        match connect_addr(addr) {
            Ok(stream) => {
                info!("Connected to {} ({})", server, addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    let error = last_error.map_or_else(|| anyhow!("no address to connect to"), anyhow::Error::from);
    Err(error.context(format!("Failed to connect to {}", server)))
}

fn connect_addr(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect(&addr.into())?;

    if let Err(e) = socket.set_linger(Some(CLOSE_LINGER)) {
        warn!("Failed to set linger on {}: {}", addr, e);
    }

    Ok(socket.into())
}

/// Release the connection. Errors here are never reported to the caller.
fn close(stream: TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Write) {
        debug!("Ignoring shutdown error: {}", e);
    }
    drop(stream);
}
