//! This module contains general types used by the radio SPI link.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Direction of a sequence on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to coprocessor.
    Transmit,

    /// Coprocessor to host.
    Receive,
}

// Implement Format so Direction can be formatted by defmt.
#[cfg(feature = "defmt")]
impl defmt::Format for Direction {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Direction::Transmit => defmt::write!(f, "Transmit"),
            Direction::Receive => defmt::write!(f, "Receive"),
        }
    }
}

/// Whether a chip-select session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// No sequence is running.  Chip-select is released and no DMA channel
    /// is armed.
    Available,

    /// Exactly one sequence (transmit or receive) owns the bus.
    Busy,
}

/// What the next completed burst means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// A read header is on the wire.
    CheckHeaderForReceive,

    /// A write header is on the wire.
    CheckHeaderForTransmit,

    /// A payload burst is on the wire, and more of the same message follows
    /// it.
    ContinuePayload,

    /// The last payload burst of the message is on the wire.
    EndOfTransfer,
}

impl Stage {
    /// The header stage for a sequence in this direction.
    pub const fn header_for(direction: Direction) -> Self {
        match direction {
            Direction::Transmit => Stage::CheckHeaderForTransmit,
            Direction::Receive => Stage::CheckHeaderForReceive,
        }
    }

    /// Whether a header exchange is in flight.
    pub const fn is_header(self) -> bool {
        matches!(
            self,
            Stage::CheckHeaderForReceive | Stage::CheckHeaderForTransmit
        )
    }
}

/// How much `init` resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitMode {
    /// Start of day.  All buffers held by the link are handed back and the
    /// ready-line interrupt stays off until a receive buffer is supplied.
    Cold,

    /// Recovery, typically after a sequence timeout.  Transmit buffers are
    /// handed back, but an armed receive buffer is kept and reception is
    /// re-enabled.
    Warm,
}
