//! Transfer manager.
//!
//! Turns header and payload requests into programs for the two DMA
//! channels.  The SPI bus is full duplex, so every burst runs both channels
//! for the same length, started together:
//!
//! | burst       | TX channel             | RX channel              |
//! |-------------|------------------------|-------------------------|
//! | header      | template, increment    | header buffer, incr.    |
//! | TX payload  | caller buffer, incr.   | discard byte, fixed     |
//! | RX payload  | dummy byte, fixed      | caller buffer, incr.    |

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::HEADER_LEN;
use crate::hal::{Addressing, DmaLink, RxProgram, TxProgram};
use crate::header::{self, Header};
use crate::types::Direction;

pub struct TransferManager<D> {
    dma: D,

    /// Where the coprocessor's header lands.
    rx_header: [u8; HEADER_LEN],

    /// Clocked out while receiving a payload.
    dummy: u8,

    /// Sink for bytes clocked in while transmitting a payload.
    discard: u8,
}

impl<D: DmaLink> TransferManager<D> {
    pub fn new(dma: D, dummy: u8) -> Self {
        Self {
            dma,
            rx_header: [0; HEADER_LEN],
            dummy,
            discard: 0,
        }
    }

    /// The last header received.
    pub fn header(&self) -> Header {
        Header::new(self.rx_header)
    }

    /// Stop both channels and throw away anything stale.
    pub fn flush(&mut self) {
        self.dma.flush();
    }

    /// Exchange a header.  The header buffer is cleared first, so a burst
    /// which never completes can't leave an old "ready" behind.
    pub fn start_header(&mut self, direction: Direction) {
        self.dma.flush();
        self.rx_header = [0; HEADER_LEN];
        let tx = TxProgram {
            source: header::template(direction).as_ptr(),
            addressing: Addressing::Increment,
        };
        let rx = RxProgram {
            dest: self.rx_header.as_mut_ptr(),
            addressing: Addressing::Increment,
        };
        // SAFETY: The template is a static.  The header buffer is part of
        // self, which the transport doesn't move while the link is in use.
        unsafe { self.dma.start(tx, rx, HEADER_LEN) };
    }

    /// Transmit `len` bytes from `source`.
    ///
    /// # Safety
    ///
    /// `source` must stay valid for `len` bytes until the burst completes or
    /// the channels are flushed.
    pub unsafe fn start_tx_payload(&mut self, source: *const u8, len: usize) {
        self.dma.flush();
        let tx = TxProgram {
            source,
            addressing: Addressing::Increment,
        };
        let rx = RxProgram {
            dest: &mut self.discard,
            addressing: Addressing::Fixed,
        };
        // SAFETY: The caller guarantees the source; the discard byte is part
        // of self.
        unsafe { self.dma.start(tx, rx, len) };
    }

    /// Receive `len` bytes into `dest`.
    ///
    /// # Safety
    ///
    /// `dest` must stay valid, and not be otherwise accessed, for `len`
    /// bytes until the burst completes or the channels are flushed.
    pub unsafe fn start_rx_payload(&mut self, dest: *mut u8, len: usize) {
        self.dma.flush();
        let tx = TxProgram {
            source: &self.dummy,
            addressing: Addressing::Fixed,
        };
        let rx = RxProgram {
            dest,
            addressing: Addressing::Increment,
        };
        // SAFETY: The caller guarantees the destination; the dummy byte is
        // part of self.
        unsafe { self.dma.start(tx, rx, len) };
    }
}
