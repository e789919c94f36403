use tracing::debug;

use super::checker::PortChecker;
use super::connections::ConnectionTable;
use super::PortNumber;

/// Find the smallest available port at or above `start`.
///
/// Returns None once the scan runs past 65535.
pub fn find_available<T: ConnectionTable>(
    checker: &PortChecker<T>,
    start: PortNumber,
) -> Option<PortNumber> {
    let mut candidate = Some(start);

    while let Some(port) = candidate {
        if checker.is_available(port) {
            if port != start {
                debug!("Port {} is taken, using {}", start, port);
            }
            return Some(port);
        }
        candidate = port.next();
    }

    debug!("No available port between {} and {}", start, super::MAX_PORT);
    None
}
