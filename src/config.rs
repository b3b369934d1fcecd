//! Link configuration.
//!
//! The timings here are part of the hardware contract with the coprocessor
//! and come from its datasheet.  The defaults in `constants` suit the parts
//! this was brought up on, and are not universal.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;

use crate::constants::{
    DEFAULT_CS_PULSE_NS, DEFAULT_DUMMY_BYTE, DEFAULT_RX_NOTIFY_DELAY_US, DEFAULT_SEQUENCE_TIMEOUT,
};
use crate::power::SleepClients;

/// Configuration for a `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Minimum time chip-select stays deasserted during a bounce.
    pub cs_pulse_ns: u32,

    /// Busy-wait between the end of a receive and notifying the
    /// application.  Zero skips it.
    pub rx_notify_delay_us: u32,

    /// Timeout for a whole sequence, from chip-select assert to end of
    /// transfer.
    pub sequence_timeout: Duration,

    /// Byte clocked out while receiving a payload.
    pub dummy_byte: u8,

    /// Which vote the link holds in the sleep gate.
    pub sleep_client: SleepClients,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            cs_pulse_ns: DEFAULT_CS_PULSE_NS,
            rx_notify_delay_us: DEFAULT_RX_NOTIFY_DELAY_US,
            sequence_timeout: DEFAULT_SEQUENCE_TIMEOUT,
            dummy_byte: DEFAULT_DUMMY_BYTE,
            sleep_client: SleepClients::RADIO_LINK,
        }
    }
}

impl LinkConfig {
    pub fn with_cs_pulse_ns(mut self, ns: u32) -> Self {
        self.cs_pulse_ns = ns;
        self
    }

    pub fn with_rx_notify_delay_us(mut self, us: u32) -> Self {
        self.rx_notify_delay_us = us;
        self
    }

    pub fn with_sequence_timeout(mut self, timeout: Duration) -> Self {
        self.sequence_timeout = timeout;
        self
    }

    pub fn with_dummy_byte(mut self, byte: u8) -> Self {
        self.dummy_byte = byte;
        self
    }
}
