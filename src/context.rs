//! Per-direction transfer bookkeeping.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Tracks one logical message (or one receive buffer) while the link owns
/// it.
///
/// The buffer is `'static` because DMA keeps writing to or reading from it
/// after the call which programmed it has returned.  The caller gets it back
/// in the matching `LinkEvent`.
#[derive(Debug)]
pub struct TransferContext {
    /// The caller's buffer.
    buf: &'static mut [u8],

    /// Bytes to send, or space available to receive into.  Never more than
    /// `buf.len()`.
    len: usize,

    /// Bytes moved by completed bursts.
    moved: usize,

    /// Bytes in the burst currently on the wire.
    burst: usize,

    /// More bursts follow the current one for the same logical message.
    continuation: bool,
}

impl TransferContext {
    /// Create a context for the first `len` bytes of `buf`.  The caller has
    /// checked `0 < len <= buf.len()`.
    pub fn new(buf: &'static mut [u8], len: usize) -> Self {
        debug_assert!(len > 0 && len <= buf.len());
        Self {
            buf,
            len,
            moved: 0,
            burst: 0,
            continuation: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn moved(&self) -> usize {
        self.moved
    }

    pub fn continuation(&self) -> bool {
        self.continuation
    }

    /// Bytes still to be moved.
    pub fn remaining(&self) -> usize {
        self.len - self.moved
    }

    /// Size the next transmit burst from the window the coprocessor offered.
    /// Returns the burst length.
    pub fn plan_transmit(&mut self, window: usize) -> usize {
        self.burst = window.min(self.remaining());
        self.continuation = self.remaining() > self.burst;
        self.burst
    }

    /// Size the next receive burst from the bytes the coprocessor has
    /// waiting.  Returns the burst length; anything beyond it has to go into
    /// the next buffer.
    pub fn plan_receive(&mut self, offered: usize) -> usize {
        self.burst = offered.min(self.remaining());
        self.continuation = offered > self.burst;
        self.burst
    }

    /// Account for the burst on the wire having completed.
    pub fn complete_burst(&mut self) {
        self.moved += self.burst;
        self.burst = 0;
    }

    /// Start address of the next burst's data, for a transmit.
    pub fn source_ptr(&self) -> *const u8 {
        self.buf[self.moved..].as_ptr()
    }

    /// Start address of the next burst's data, for a receive.
    pub fn sink_ptr(&mut self) -> *mut u8 {
        self.buf[self.moved..].as_mut_ptr()
    }

    /// Hand the buffer back.
    pub fn into_buf(self) -> &'static mut [u8] {
        self.buf
    }
}

/// The single slot for a transmit request made while the bus was busy.
#[derive(Debug, Default)]
pub struct PendingRequest {
    slot: Option<TransferContext>,
}

impl PendingRequest {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Park a request.  If the slot is already taken the new request is
    /// handed back untouched.
    pub fn park(&mut self, ctx: TransferContext) -> Result<(), TransferContext> {
        if self.slot.is_some() {
            return Err(ctx);
        }
        self.slot = Some(ctx);
        Ok(())
    }

    pub fn take(&mut self) -> Option<TransferContext> {
        self.slot.take()
    }
}
