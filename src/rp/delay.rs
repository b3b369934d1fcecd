//! Busy-wait delays, for the chip-select pulse and the receive notify wait.
//!
//! embassy-time can't get below the 1us tick of the RP2040's time driver,
//! and the chip-select pulse is around a microsecond.  So we count clock
//! cycles instead.  This won't be precise, as each cycle is 8ns, but it
//! never waits less than asked.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;

use crate::constants::CLOCK_FREQ_MHZ;

const NS_PER_CYCLE: u32 = 1000 / CLOCK_FREQ_MHZ;

/// Cycle counting delay.
pub struct CycleDelay;

impl DelayNs for CycleDelay {
    #[inline(always)]
    fn delay_ns(&mut self, ns: u32) {
        cortex_m::asm::delay(ns.div_ceil(NS_PER_CYCLE));
    }

    fn delay_us(&mut self, us: u32) {
        cortex_m::asm::delay(us.saturating_mul(CLOCK_FREQ_MHZ));
    }
}
