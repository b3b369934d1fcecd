//! The coprocessor's ready line.
//!
//! The edge "interrupt" is `ready_line_task` waiting on the GPIO.  Enabling
//! and disabling only flips a flag the task checks, so it is safe from any
//! context.  The level is read straight from SIO, as the `Input` belongs to
//! the task.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::gpio::Input;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use portable_atomic::{AtomicBool, Ordering};

use super::RpTransport;
use crate::constants::{READY_LINE_BACKOFF, READY_PIN};
use crate::hal::ReadyLine;
use crate::types::BusState;

static ENABLED: AtomicBool = AtomicBool::new(false);

// Wakes the task when the interrupt is enabled.
static ARMED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub struct RpReadyLine {
    mask: u32,
}

impl RpReadyLine {
    pub(crate) fn new() -> Self {
        Self {
            mask: 1 << READY_PIN,
        }
    }
}

impl ReadyLine for RpReadyLine {
    fn is_asserted(&mut self) -> bool {
        embassy_rp::pac::SIO.gpio_in(0).read() & self.mask != 0
    }

    fn enable_interrupt(&mut self) {
        ENABLED.store(true, Ordering::Release);
        ARMED.signal(());
    }

    fn disable_interrupt(&mut self) {
        ENABLED.store(false, Ordering::Release);
    }

    fn clear_interrupt(&mut self) {
        ARMED.reset();
    }
}

/// Delivers ready line edges to the link while its interrupt is enabled.
#[embassy_executor::task]
pub async fn ready_line_task(link: &'static RpTransport, mut pin: Input<'static>) -> ! {
    info!("Ready line task started");
    loop {
        if !ENABLED.load(Ordering::Acquire) {
            ARMED.wait().await;
            continue;
        }

        pin.wait_for_rising_edge().await;
        if !ENABLED.load(Ordering::Acquire) {
            trace!("Ready line edge while disabled");
            continue;
        }

        link.ready_line_interrupt();
        if link.bus_state() == BusState::Available {
            // Not taken up - most likely no buffer armed yet.
            Timer::after(READY_LINE_BACKOFF).await;
        }
    }
}
