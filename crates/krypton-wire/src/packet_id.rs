//! Packet id allocation.
//!
//! Ids increase from [`FIRST_CALL_ID`] to `u16::MAX` and then wrap back to
//! [`FIRST_CALL_ID`]. Collisions with still-pending ids after a full wrap are
//! not detected.

use std::sync::atomic::{AtomicU16, Ordering};

/// Reserved for the `kr_connected` handshake request and its response.
pub const HANDSHAKE_ID: u16 = 1;

/// Start value of the allocator. Never handed out.
pub const SENTINEL_ID: u16 = 2;

/// First id handed out for ordinary calls.
pub const FIRST_CALL_ID: u16 = 3;

/// Issues call ids for one connection.
#[derive(Debug)]
pub struct PacketIdAllocator {
    last: AtomicU16,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            last: AtomicU16::new(SENTINEL_ID),
        }
    }

    /// Next call id. Never returns [`HANDSHAKE_ID`] or [`SENTINEL_ID`].
    pub fn next(&self) -> u16 {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
            .unwrap_or_else(|last| last);
        advance(previous)
    }

    #[cfg(test)]
    fn starting_after(last: u16) -> Self {
        Self {
            last: AtomicU16::new(last),
        }
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(last: u16) -> u16 {
    if (SENTINEL_ID..u16::MAX).contains(&last) {
        last + 1
    } else {
        FIRST_CALL_ID
    }
}
