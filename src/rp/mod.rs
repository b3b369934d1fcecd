//! RP2040 backend.
//!
//! SPI0 is driven by embassy-rp's async SPI, which uses a pair of DMA
//! channels under the covers.  Rather than taking the DMA interrupts
//! ourselves, a task runs each burst the link programs and reports the
//! completions back to the transport, in the order the hardware would.
//!
//! Pins:
//!
//! | GPIO | Function          |
//! |------|-------------------|
//! | 16   | SPI0 MISO         |
//! | 17   | Chip-select       |
//! | 18   | SPI0 SCK          |
//! | 19   | SPI0 MOSI         |
//! | 20   | Ready line        |

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod built;
pub mod delay;
pub mod dma;
pub mod ready;
pub mod task;
pub mod timer;

use embassy_rp::gpio::Output;
use static_cell::StaticCell;

use crate::config::LinkConfig;
use crate::power::SleepVotes;
use crate::transport::{LinkParts, Transport};
use delay::CycleDelay;
use dma::RpDma;
use ready::RpReadyLine;
use timer::RpTimer;

/// The transport, as built for the RP2040.
pub type RpTransport =
    Transport<Output<'static>, CycleDelay, RpDma, RpReadyLine, RpTimer, &'static SleepVotes>;

/// Sleep votes for the whole firmware.  The link votes as
/// `SleepClients::RADIO_LINK`.
pub static SLEEP_VOTES: SleepVotes = SleepVotes::new();

// The transport must not move once in use, and the tasks need a 'static
// reference to it.
static LINK: StaticCell<RpTransport> = StaticCell::new();

// Extra binary information that picotool can read.
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"radio-link by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(
        c"Host side of the SPI link to a BLE radio coprocessor."
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

/// Build the transport from the chip-select output and store it.  Can only
/// be called once - a second call panics.
pub fn create_link(cs: Output<'static>, config: LinkConfig) -> &'static RpTransport {
    let parts = LinkParts {
        cs,
        delay: CycleDelay,
        dma: RpDma::new(),
        ready: RpReadyLine::new(),
        timer: RpTimer,
        sleep: &SLEEP_VOTES,
    };
    LINK.init(Transport::new(parts, config))
}
