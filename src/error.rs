//! Errors returned to callers of the link.
//!
//! Failures which happen after the originating call has returned (i.e. the
//! sequence timeout) are reported as a `LinkEvent` instead.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Why a buffer was refused.  The buffer is handed back in the error, as the
/// link never took ownership of it.
#[derive(Debug)]
pub enum LinkError {
    /// The length was 0.
    EmptyRequest(&'static mut [u8]),

    /// The length was larger than the buffer.
    LengthExceedsBuffer(&'static mut [u8]),

    /// `send` was called while another request was already waiting for the
    /// bus.  Only one may wait.
    PendingSlotFull(&'static mut [u8]),

    /// `event_request` was called while the link already held a receive
    /// buffer.
    ReceiveAlreadyArmed(&'static mut [u8]),

    /// The application hasn't taken enough events off the link event
    /// channel for this buffer's event to be guaranteed a slot.  Drain the
    /// channel and try again.
    EventQueueFull(&'static mut [u8]),
}

impl LinkError {
    /// Recover the rejected buffer.
    pub fn into_buf(self) -> &'static mut [u8] {
        match self {
            LinkError::EmptyRequest(buf)
            | LinkError::LengthExceedsBuffer(buf)
            | LinkError::PendingSlotFull(buf)
            | LinkError::ReceiveAlreadyArmed(buf)
            | LinkError::EventQueueFull(buf) => buf,
        }
    }

    /// The variant without its buffer, for logging and matching.
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            LinkError::EmptyRequest(_) => LinkErrorKind::EmptyRequest,
            LinkError::LengthExceedsBuffer(_) => LinkErrorKind::LengthExceedsBuffer,
            LinkError::PendingSlotFull(_) => LinkErrorKind::PendingSlotFull,
            LinkError::ReceiveAlreadyArmed(_) => LinkErrorKind::ReceiveAlreadyArmed,
            LinkError::EventQueueFull(_) => LinkErrorKind::EventQueueFull,
        }
    }
}

/// `LinkError` without the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkErrorKind {
    EmptyRequest,
    LengthExceedsBuffer,
    PendingSlotFull,
    ReceiveAlreadyArmed,
    EventQueueFull,
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.kind())
    }
}
