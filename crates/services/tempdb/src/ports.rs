//! Port allocation for servers started side by side

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out the ports of an inclusive range in ascending order, each at most once.
#[derive(Debug)]
pub struct PortRange {
    next: AtomicU32,
    last: u16,
}

impl PortRange {
    /// Creates a range covering `first..=last`.
    pub fn new(first: u16, last: u16) -> Self {
        Self {
            next: AtomicU32::new(u32::from(first)),
            last,
        }
    }

    /// Returns the next unused port.
    pub fn next_port(&self) -> Result<u16, PortsExhausted> {
        let port = self.next.fetch_add(1, Ordering::Relaxed);
        match u16::try_from(port) {
            Ok(port) if port <= self.last => Ok(port),
            _ => Err(PortsExhausted { last: self.last }),
        }
    }
}

/// Every port of a [`PortRange`] has been handed out.
#[derive(Debug, thiserror::Error)]
#[error("all ports up to {last} are in use")]
pub struct PortsExhausted {
    pub last: u16,
}
