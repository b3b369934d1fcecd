//! Low-power mode gate.
//!
//! Any client can vote to keep the MCU awake.  The low-power policy (which
//! is not part of this crate) only lets the MCU enter a sleep mode which
//! stops peripherals when nobody holds a vote.  The link holds its vote while
//! chip-select is asserted, so DMA is never starved mid-transfer.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use portable_atomic::{AtomicU32, Ordering};

use crate::hal::SleepGate;

bitflags! {
    /// Clients of the sleep gate.  Each owns one bit of the vote register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SleepClients: u32 {
        /// The radio SPI link.
        const RADIO_LINK = 1 << 0;

        /// The application, e.g. while it is assembling a command.
        const APPLICATION = 1 << 1;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SleepClients {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "SleepClients({=u32:#x})", self.bits())
    }
}

/// Vote register.  Lock-free, so it can be used from any interrupt.
pub struct SleepVotes {
    votes: AtomicU32,
}

impl SleepVotes {
    pub const fn new() -> Self {
        Self {
            votes: AtomicU32::new(0),
        }
    }

    /// Clients currently holding a "no sleep" vote.
    pub fn holders(&self) -> SleepClients {
        SleepClients::from_bits_truncate(self.votes.load(Ordering::Acquire))
    }

    /// Whether the low-power policy may put the MCU to sleep.
    pub fn may_sleep(&self) -> bool {
        self.votes.load(Ordering::Acquire) == 0
    }
}

impl Default for SleepVotes {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepGate for SleepVotes {
    fn request_no_sleep(&self, client: SleepClients) {
        self.votes.fetch_or(client.bits(), Ordering::AcqRel);
    }

    fn allow_sleep(&self, client: SleepClients) {
        self.votes.fetch_and(!client.bits(), Ordering::AcqRel);
    }
}

// The vote register is normally a static shared by several drivers.
impl SleepGate for &SleepVotes {
    fn request_no_sleep(&self, client: SleepClients) {
        (**self).request_no_sleep(client)
    }

    fn allow_sleep(&self, client: SleepClients) {
        (**self).allow_sleep(client)
    }
}
