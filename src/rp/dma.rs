//! SPI bursts.
//!
//! `RpDma` hands each burst to `spi_task`, which runs it using embassy-rp's
//! DMA-driven SPI and then reports both completions to the transport.
//!
//! A burst can be flushed while `spi_task` is still running it - the link
//! does this when it re-initializes.  Each burst carries the generation it
//! was started in, and `flush()` moves the generation on, so completions
//! from a flushed burst are never reported.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Async, Error as SpiError, Spi};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU32, Ordering};

use super::RpTransport;
use crate::hal::{Addressing, DmaLink, RxProgram, TxProgram};

#[derive(Clone, Copy)]
struct Burst {
    tx: TxProgram,
    rx: RxProgram,
    len: usize,
    generation: u32,
}

// SAFETY: The pointers are only dereferenced by spi_task, and the DmaLink
// contract keeps them valid until the burst's completion is reported or the
// generation moves on.
unsafe impl Send for Burst {}

static BURST: Signal<CriticalSectionRawMutex, Burst> = Signal::new();
static GENERATION: AtomicU32 = AtomicU32::new(0);

/// The DMA channels, as seen by the link.
pub struct RpDma {
    _private: (),
}

impl RpDma {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

impl DmaLink for RpDma {
    fn flush(&mut self) {
        GENERATION.fetch_add(1, Ordering::AcqRel);
        BURST.reset();
    }

    unsafe fn start(&mut self, tx: TxProgram, rx: RxProgram, len: usize) {
        BURST.signal(Burst {
            tx,
            rx,
            len,
            generation: GENERATION.load(Ordering::Acquire),
        });
    }
}

fn current(burst: &Burst) -> bool {
    burst.generation == GENERATION.load(Ordering::Acquire)
}

// Runs one burst on the bus.
async fn run_burst(spi: &mut Spi<'static, SPI0, Async>, burst: &Burst) -> Result<(), SpiError> {
    let len = burst.len;

    // SAFETY: For all of the slices below, the DmaLink contract guarantees
    // the memory for len bytes (1 for Fixed) until the burst completes.
    // Nothing else touches it meanwhile, as the link holds the buffers.
    match (burst.tx.addressing, burst.rx.addressing) {
        (Addressing::Increment, Addressing::Increment) => {
            let tx = unsafe { core::slice::from_raw_parts(burst.tx.source, len) };
            let rx = unsafe { core::slice::from_raw_parts_mut(burst.rx.dest, len) };
            spi.transfer(rx, tx).await
        }
        (Addressing::Increment, Addressing::Fixed) => {
            // The incoming bytes are discarded.
            let tx = unsafe { core::slice::from_raw_parts(burst.tx.source, len) };
            spi.write(tx).await
        }
        (Addressing::Fixed, Addressing::Increment) => {
            let dummy = unsafe { *burst.tx.source };
            let rx = unsafe { core::slice::from_raw_parts_mut(burst.rx.dest, len) };
            rx.fill(dummy);
            spi.transfer_in_place(rx).await
        }
        (Addressing::Fixed, Addressing::Fixed) => {
            warn!("Ignoring burst with neither channel incrementing");
            Ok(())
        }
    }
}

/// Runs the bursts the link programs.
#[embassy_executor::task]
pub async fn spi_task(link: &'static RpTransport, mut spi: Spi<'static, SPI0, Async>) -> ! {
    info!("SPI task started");
    loop {
        let burst = BURST.wait().await;
        if !current(&burst) {
            continue;
        }

        trace!("Running {} byte burst", burst.len);
        if let Err(e) = run_burst(&mut spi, &burst).await {
            error!("SPI burst failed: {:?}", e);
        }

        // The transmit channel finishes first, as the receive channel still
        // has the last byte to collect.  Handling the transmit completion
        // may flush, in which case the receive completion must be dropped.
        if !current(&burst) {
            debug!("Burst flushed while running");
            continue;
        }
        link.tx_dma_complete_interrupt();
        if current(&burst) {
            link.rx_dma_complete_interrupt();
        }
    }
}
