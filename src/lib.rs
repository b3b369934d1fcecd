//! radio-spi-link
//!
//! This implements the host side of the SPI link to a BLE radio coprocessor.
//!
//! The coprocessor is the SPI slave, but decides when transfers may happen.
//! Every transfer starts with a 5 byte header exchanged in both directions,
//! from which the host learns whether the coprocessor is ready and how many
//! bytes it can accept or has to send.  The coprocessor raises a ready line
//! when it has an event for the host.
//!
//! The link is driven by a state machine ([`machine`]), stepped from the
//! application's calls and from the ready line, DMA and timer interrupts, and
//! wrapped up for use by [`transport::Transport`].  The hardware is reached
//! through the traits in [`hal`] plus embedded-hal's `OutputPin` and
//! `DelayNs`, so the link runs anywhere those can be provided.  An RP2040
//! backend and firmware is included behind the `rp2040` feature.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Must come first, so the logging macros are visible to the other modules.
#[macro_use]
mod fmt;

// Declare all of this library's modules.
pub mod chip_select;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod hal;
pub mod header;
pub mod machine;
pub mod power;
pub mod transfer;
pub mod transport;
pub mod types;

#[cfg(feature = "rp2040")]
pub mod rp;

pub use config::LinkConfig;
pub use error::{LinkError, LinkErrorKind};
pub use machine::LinkEvent;
pub use power::{SleepClients, SleepVotes};
pub use transport::{LinkEventChannel, LinkParts, Transport};
pub use types::{BusState, Direction, InitMode};

// A note about buffers and statics
//
// The link hands buffers to DMA, and the DMA engine keeps writing into them
// long after the call that supplied them has returned.  So every buffer the
// application passes in is a &'static mut [u8].  The link owns it from then
// on, and gives it back inside a LinkEvent - Received, Sent or Reclaimed.
// Nothing is ever copied, and the borrow checker stops the application
// touching a buffer while it is on loan.
//
// - Use ConstStaticCell for buffers, as they can be initialized at compile
//   time.  take() hands out the &'static mut.
//
// - Use StaticCell for the Transport itself.  It can't be built at compile
//   time, as it takes ownership of the hardware, and it must not move once
//   in use, as the header exchange DMAs into a buffer inside it.
//
// - The Transport's state machine is behind a blocking Mutex using
//   CriticalSectionRawMutex, as it is changed from interrupt context as
//   well as from tasks.  A RefCell provides the interior mutability.  The
//   hardware uses NoopRawMutex, as only one context owns it at a time, and
//   busy-waits there must not run with interrupts disabled.
