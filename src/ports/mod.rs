pub mod allocator;
pub mod checker;
pub mod connections;

use std::fmt;

pub use allocator::find_available;
pub use checker::PortChecker;
pub use connections::{system_table, ConnectionTable};

pub const MIN_PORT: u16 = 1;
pub const MAX_PORT: u16 = u16::MAX;

/// A TCP port in the range 1-65535
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNumber(u16);

impl PortNumber {
    /// Returns None for port 0
    pub fn new(port: u16) -> Option<Self> {
        (port >= MIN_PORT).then_some(Self(port))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// The next port up, or None past 65535
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl TryFrom<i64> for PortNumber {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(value)
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
