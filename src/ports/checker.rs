use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, trace};

use super::connections::ConnectionTable;
use super::PortNumber;

/// Answers whether a TCP port is free on all local interfaces.
///
/// The answer is advisory: another process can take the port right after a check
/// reports it free.
pub struct PortChecker<T> {
    table: T,
}

impl<T: ConnectionTable> PortChecker<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// A port is available when no connection-table entry uses it and a
    /// wildcard listener can be opened on it
    pub fn is_available(&self, port: PortNumber) -> bool {
        match self.table.local_tcp_ports() {
            Ok(ports) if ports.contains(&port.get()) => {
                trace!("Port {} present in TCP connection table", port);
                return false;
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read TCP connection table: {}", e),
        }

        can_listen(port)
    }
}

/// Check that a listening socket can be opened on 0.0.0.0:port
fn can_listen(port: PortNumber) -> bool {
    let socket = match Socket::new(Domain::IPV4, Type::STREAM, None) {
        Ok(s) => s,
        Err(e) => {
            debug!("Could not create test socket: {}", e);
            return false;
        }
    };

    // No SO_REUSEADDR: it would report ports held in TIME_WAIT as free.
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port.get());
    match socket.bind(&addr.into()).and_then(|_| socket.listen(1)) {
        Ok(()) => true,
        Err(e) => {
            trace!("Port {} failed bind test: {}", port, e);
            false
        }
    }
}
