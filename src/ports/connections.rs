//! Enumeration of the operating system's TCP connection table.
//!
//! A bind test alone misses ports the kernel still holds for sockets in
//! TIME_WAIT or ESTABLISHED, so the checker also asks the OS for every local
//! TCP endpoint it knows about, in any state.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, trace};

/// Source of the local ports currently present in the TCP connection table
pub trait ConnectionTable {
    /// Local port of every TCP table entry, regardless of connection state
    fn local_tcp_ports(&self) -> io::Result<HashSet<u16>>;
}

impl<T: ConnectionTable + ?Sized> ConnectionTable for Box<T> {
    fn local_tcp_ports(&self) -> io::Result<HashSet<u16>> {
        (**self).local_tcp_ports()
    }
}

/// Connection table for the current platform
pub fn system_table() -> Box<dyn ConnectionTable> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcNetTcp::default())
    }

    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NetstatTable::default())
    }
}

/// Reads `/proc/net/tcp` and `/proc/net/tcp6`
#[derive(Debug, Clone)]
pub struct ProcNetTcp {
    proc_root: PathBuf,
}

impl Default for ProcNetTcp {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcNetTcp {
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl ConnectionTable for ProcNetTcp {
    fn local_tcp_ports(&self) -> io::Result<HashSet<u16>> {
        let mut ports = HashSet::new();
        let mut read_any = false;

        // tcp6 is scanned for its port numbers only: a dual-stack listener on
        // [::]:p still blocks an IPv4 bind on p.
        for table in ["tcp", "tcp6"] {
            let path = self.proc_root.join("net").join(table);
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    read_any = true;
                    ports.extend(parse_proc_net_tcp(&content));
                }
                Err(e) => trace!("Could not read {}: {}", path.display(), e),
            }
        }

        if !read_any {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no TCP table under {}", self.proc_root.display()),
            ));
        }

        Ok(ports)
    }
}

/// Parse the local ports out of /proc/net/tcp or /proc/net/tcp6 content.
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue ...
///    0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 ...
/// ```
///
/// The port is the big-endian hex after the last colon of `local_address`.
fn parse_proc_net_tcp(content: &str) -> HashSet<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let local = line.split_whitespace().nth(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            match u16::from_str_radix(port_hex, 16) {
                Ok(port) => Some(port),
                Err(_) => {
                    trace!("Skipping malformed TCP table row: {}", line.trim());
                    None
                }
            }
        })
        .collect()
}

/// Column layout of `netstat -an` output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetstatStyle {
    /// macOS / BSD: `tcp4  0  0  127.0.0.1.5000  *.*  LISTEN`
    Bsd,
    /// Windows: `TCP    0.0.0.0:135    0.0.0.0:0    LISTENING`
    Windows,
}

impl NetstatStyle {
    fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Bsd
        }
    }
}

/// Runs `netstat -an` on platforms without procfs
#[cfg_attr(target_os = "linux", allow(dead_code))]
#[derive(Debug, Clone)]
pub struct NetstatTable {
    style: NetstatStyle,
}

impl Default for NetstatTable {
    fn default() -> Self {
        Self {
            style: NetstatStyle::current(),
        }
    }
}

impl ConnectionTable for NetstatTable {
    fn local_tcp_ports(&self) -> io::Result<HashSet<u16>> {
        let netstat = which::which("netstat")
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string()))?;

        let protocol = match self.style {
            NetstatStyle::Bsd => "tcp",
            NetstatStyle::Windows => "TCP",
        };

        let output = Command::new(netstat)
            .args(["-an", "-p", protocol])
            .output()?;

        if !output.status.success() {
            return Err(io::Error::other(format!(
                "netstat exited with status: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ports = parse_netstat(&stdout, self.style);
        debug!("netstat reported {} local TCP ports", ports.len());
        Ok(ports)
    }
}

/// Parse the local ports out of `netstat -an` output
fn parse_netstat(output: &str, style: NetstatStyle) -> HashSet<u16> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let proto = parts.first()?.to_ascii_lowercase();
            if !proto.starts_with("tcp") {
                return None;
            }

            let (local, separator) = match style {
                NetstatStyle::Bsd => (parts.get(3)?, '.'),
                NetstatStyle::Windows => (parts.get(1)?, ':'),
            };

            let (_, port) = local.rsplit_once(separator)?;
            port.parse().ok()
        })
        .collect()
}
