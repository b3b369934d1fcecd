//! The hardware the link needs, beyond the chip-select pin.
//!
//! Each platform provides these.  The RP2040 implementations live in `rp`,
//! and the integration tests drive a simulated coprocessor through them.
//!
//! All methods may be called from interrupt context, and none may block.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;

use crate::power::SleepClients;

/// How one DMA channel walks memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Memory increment on - the channel moves through a buffer.
    Increment,

    /// Memory increment off - every byte comes from (or lands on) the same
    /// address.  Used for the dummy byte and for discarding.
    Fixed,
}

/// Program for the transmit channel: memory to the SPI data register.
#[derive(Debug, Clone, Copy)]
pub struct TxProgram {
    pub source: *const u8,
    pub addressing: Addressing,
}

/// Program for the receive channel: SPI data register to memory.
#[derive(Debug, Clone, Copy)]
pub struct RxProgram {
    pub dest: *mut u8,
    pub addressing: Addressing,
}

/// The pair of DMA channels serving the SPI bus, one per direction.
///
/// When a burst finishes the platform calls the transport's
/// `tx_dma_complete_interrupt()` and `rx_dma_complete_interrupt()`.
pub trait DmaLink {
    /// Disable both channels, clear their completion flags, drain any byte
    /// left in the SPI receive FIFO, and wait for the shifter to go idle.
    /// After this no completion from an earlier burst will be reported.
    fn flush(&mut self);

    /// Program both channels for `len` bytes and start them together.
    ///
    /// # Safety
    ///
    /// `tx.source` must be readable and `rx.dest` writable for `len` bytes
    /// (one byte for `Addressing::Fixed`) until this burst's completion has
    /// been reported or `flush()` has been called.
    unsafe fn start(&mut self, tx: TxProgram, rx: RxProgram, len: usize);
}

/// The coprocessor's ready line and its edge interrupt.
pub trait ReadyLine {
    /// Current level of the line - true when the coprocessor is asserting
    /// it.
    fn is_asserted(&mut self) -> bool;

    fn enable_interrupt(&mut self);

    fn disable_interrupt(&mut self);

    /// Clear a latched edge, so it doesn't fire again once re-enabled.
    fn clear_interrupt(&mut self);
}

/// A one-shot software timer.  When it expires the platform calls the
/// transport's `timeout_expired()`.
pub trait OneShot {
    /// (Re)start the timer.
    fn start(&mut self, after: Duration);

    /// Stop the timer if it is running.
    fn stop(&mut self);
}

/// The low-power mode gate.  A client holding a "no sleep" vote keeps the
/// MCU out of any mode that would stop the SPI clock or DMA.
pub trait SleepGate {
    fn request_no_sleep(&self, client: SleepClients);

    fn allow_sleep(&self, client: SleepClients);
}
