//! Codec for the 5-byte header exchanged at the start of every transfer.
//!
//! The host clocks out a fixed template announcing whether it wants to read
//! or write, and simultaneously clocks in the coprocessor's answer:
//!
//! | byte | read attempt          | write attempt            |
//! |------|-----------------------|--------------------------|
//! | 0    | ready code            | ready code               |
//! | 1-2  | reserved              | bytes it can accept (LE) |
//! | 3-4  | bytes it has (LE)     | reserved                 |
//!
//! A count of 0, or a ready code other than [`READY_CODE`], means the
//! coprocessor can't service that direction yet.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::{
    HEADER_LEN, READ_COUNT_OFFSET, READ_HEADER, READY_CODE, WRITE_COUNT_OFFSET, WRITE_HEADER,
};
use crate::types::Direction;

/// The template the host sends for a header exchange in this direction.
pub const fn template(direction: Direction) -> &'static [u8; HEADER_LEN] {
    match direction {
        Direction::Transmit => &WRITE_HEADER,
        Direction::Receive => &READ_HEADER,
    }
}

/// A header as received from the coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    bytes: [u8; HEADER_LEN],
}

/// What a received header says about one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderStatus {
    /// Byte 0 carried the ready code.
    pub ready: bool,

    /// Bytes offered (read) or accepted (write) by the coprocessor.
    pub count: u16,
}

impl HeaderStatus {
    /// Whether a payload burst can follow this header.
    pub fn serviceable(&self) -> bool {
        self.ready && self.count > 0
    }
}

impl Header {
    pub const fn new(bytes: [u8; HEADER_LEN]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; HEADER_LEN] {
        &self.bytes
    }

    /// Decode the header for the direction it was exchanged in.  The count
    /// lives at a different offset for reads and writes.
    pub fn decode(&self, direction: Direction) -> HeaderStatus {
        let offset = match direction {
            Direction::Transmit => WRITE_COUNT_OFFSET,
            Direction::Receive => READ_COUNT_OFFSET,
        };
        HeaderStatus {
            ready: self.bytes[0] == READY_CODE,
            count: u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]]),
        }
    }

    /// Build the header a coprocessor would return.  Used by simulated
    /// backends.
    pub fn encode(direction: Direction, ready_code: u8, count: u16) -> Self {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = ready_code;
        let offset = match direction {
            Direction::Transmit => WRITE_COUNT_OFFSET,
            Direction::Receive => READ_COUNT_OFFSET,
        };
        bytes[offset..offset + 2].copy_from_slice(&count.to_le_bytes());
        Self { bytes }
    }
}
