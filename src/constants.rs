//! This module contains constants for the radio SPI link.
//!
//! Protocol constants are fixed by the coprocessor's SPI link definition.
//! Timing constants are defaults only - the values the coprocessor actually
//! needs come from its datasheet and are applied through `LinkConfig`.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

//
// Header protocol constants
//

/// Every transfer starts with a header of this many bytes, in both
/// directions at once.
pub const HEADER_LEN: usize = 5;

/// The value of header byte 0 when the coprocessor is ready to service the
/// requested direction.
pub const READY_CODE: u8 = 0x02;

/// Control byte the host sends in byte 0 to announce it wants to write.
pub const WRITE_CONTROL: u8 = 0x0A;

/// Control byte the host sends in byte 0 to announce it wants to read.
pub const READ_CONTROL: u8 = 0x0B;

/// Header the host clocks out for a write attempt.
pub const WRITE_HEADER: [u8; HEADER_LEN] = [WRITE_CONTROL, 0x00, 0x00, 0x00, 0x00];

/// Header the host clocks out for a read attempt.
pub const READ_HEADER: [u8; HEADER_LEN] = [READ_CONTROL, 0x00, 0x00, 0x00, 0x00];

/// Offset of the little-endian count of bytes the coprocessor can accept,
/// in a write attempt's returned header.
pub const WRITE_COUNT_OFFSET: usize = 1;

/// Offset of the little-endian count of bytes the coprocessor has to send,
/// in a read attempt's returned header.
pub const READ_COUNT_OFFSET: usize = 3;

const_assert!(WRITE_COUNT_OFFSET + 2 <= HEADER_LEN);
const_assert!(READ_COUNT_OFFSET + 2 <= HEADER_LEN);

/// Byte clocked out on MOSI while receiving a payload.
pub const DEFAULT_DUMMY_BYTE: u8 = 0x00;

//
// Timing defaults
//

/// Minimum time chip-select must stay deasserted during a bounce, so the
/// coprocessor notices the edge and re-evaluates its readiness.
pub const DEFAULT_CS_PULSE_NS: u32 = 1_000;

/// How long to wait after a receive completes before telling the
/// application.  Some coprocessor revisions present a stale header if the
/// host re-arms and reads again too quickly.  Zero disables the wait.
pub const DEFAULT_RX_NOTIFY_DELAY_US: u32 = 0;

/// How long a whole header/payload sequence may take before the timeout is
/// reported to the application.
pub const DEFAULT_SEQUENCE_TIMEOUT: Duration = Duration::from_millis(100);

//
// Sizes
//

/// Number of link events which may be waiting for the application.  The
/// transport refuses new buffers unless the event for every buffer it holds
/// or has handed back is guaranteed a slot, so events are never dropped.
pub const LINK_EVENT_QUEUE_SIZE: usize = 8;

/// One slot of the event channel is kept for a timeout.
pub const TIMEOUT_EVENT_SLOTS: usize = 1;

/// Buffers which may be held by the link or waiting in the event channel at
/// once.
pub const MAX_BUFFERS_IN_FLIGHT: usize = LINK_EVENT_QUEUE_SIZE - TIMEOUT_EVENT_SLOTS;

// A transmit, a pending transmit and a receive buffer, plus a receive
// continuation waiting to be collected.
const_assert!(MAX_BUFFERS_IN_FLIGHT >= 4);

/// Most hardware effects a single state machine transition can produce.
/// The longest is the end of a transmit sequence immediately followed by the
/// start of the pending one.
pub const MAX_EFFECTS: usize = 16;
const_assert!(MAX_EFFECTS >= 12);

/// Hardware work which may be queued at once.  Work is queued by whichever
/// context steps the state machine, and performed by the context which owns
/// the hardware, so this covers that context plus two nested interrupt
/// levels.
pub const WORK_QUEUE_SIZE: usize = 3 * MAX_EFFECTS;

//
// RP2040 firmware constants
//

#[cfg(feature = "rp2040")]
pub use self::rp2040::*;

#[cfg(feature = "rp2040")]
mod rp2040 {
    use embassy_time::Duration;
    use static_assertions::const_assert;

    use super::HEADER_LEN;

    /// SPI clock.  The coprocessor accepts up to 8MHz, but the ready line
    /// and chip-select run over flying leads on the bring-up board.
    pub const SPI_FREQUENCY_HZ: u32 = 1_000_000;

    /// System clock, used to turn nanoseconds into busy-wait cycles.
    pub const CLOCK_FREQ_MHZ: u32 = 125;

    /// GPIO number of the ready line, used to read its level directly.
    pub const READY_PIN: u8 = 20;

    /// Largest event the application expects from the coprocessor in one
    /// buffer.  Larger events arrive in several buffers.
    pub const RX_FRAME_SIZE: usize = 264;

    /// Largest command the application sends.
    pub const TX_FRAME_SIZE: usize = 258;
    const_assert!(RX_FRAME_SIZE != TX_FRAME_SIZE);
    const_assert!(TX_FRAME_SIZE > HEADER_LEN);

    /// How often the application task sends its version query, and the main
    /// loop logs to prove it is still alive.
    pub const LOOP_LOG_INTERVAL: Duration = Duration::from_secs(5);

    /// How long the ready line task backs off after the link ignored an edge,
    /// so a line held high while the bus is busy doesn't spin.
    pub const READY_LINE_BACKOFF: Duration = Duration::from_micros(50);
}
