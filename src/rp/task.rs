//! Firmware start-up and the application task.
//!
//! The application here is deliberately thin.  It keeps a receive buffer
//! armed, logs every event the coprocessor sends, and periodically sends a
//! version query to prove the transmit path.  A real application would
//! replace `link_app_task` with its BLE stack.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::spi::{self, Spi};
use embassy_time::Timer;
use static_cell::ConstStaticCell;

use super::built::log_fw_info;
use super::dma::spi_task;
use super::ready::ready_line_task;
use super::timer::timer_task;
use super::{create_link, RpTransport, SLEEP_VOTES};
use crate::config::LinkConfig;
use crate::constants::{LOOP_LOG_INTERVAL, RX_FRAME_SIZE, SPI_FREQUENCY_HZ, TX_FRAME_SIZE};
use crate::machine::LinkEvent;
use crate::types::InitMode;

// HCI Read Local Version Information.  Harmless, and always answered.
const VERSION_QUERY: [u8; 4] = [0x01, 0x01, 0x10, 0x00];

static RX_BUF: ConstStaticCell<[u8; RX_FRAME_SIZE]> = ConstStaticCell::new([0; RX_FRAME_SIZE]);
static TX_BUF: ConstStaticCell<[u8; TX_FRAME_SIZE]> = ConstStaticCell::new([0; TX_FRAME_SIZE]);

/// Method to spawn tasks.
///
/// Spawning can fail if too many instances of the task are already running.
/// Tasks are only spawned at start of day, so that's a bug, and we reboot.
pub fn spawn_or_reboot<T, E: defmt::Format>(spawn_result: Result<T, E>, task_name: &str) {
    match spawn_result {
        Ok(_) => debug!("Spawned task {}", task_name),
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            cortex_m::peripheral::SCB::sys_reset();
        }
    }
}

/// Firmware entry point, called from the binary's main().
pub async fn common_main(spawner: Spawner, bin_name: &str) -> ! {
    let p = embassy_rp::init(Default::default());
    log_fw_info(bin_name);

    let mut spi_config = spi::Config::default();
    spi_config.frequency = SPI_FREQUENCY_HZ;
    let spi = Spi::new(
        p.SPI0, p.PIN_18, p.PIN_19, p.PIN_16, p.DMA_CH0, p.DMA_CH1, spi_config,
    );
    let cs = Output::new(p.PIN_17, Level::High);
    let ready = Input::new(p.PIN_20, Pull::Down);

    let link = create_link(cs, LinkConfig::default());
    link.init(InitMode::Cold);

    spawn_or_reboot(spawner.spawn(spi_task(link, spi)), "SPI");
    spawn_or_reboot(spawner.spawn(ready_line_task(link, ready)), "Ready line");
    spawn_or_reboot(spawner.spawn(timer_task(link)), "Timer");
    spawn_or_reboot(spawner.spawn(link_app_task(link)), "Link application");

    loop {
        Timer::after(LOOP_LOG_INTERVAL).await;
        info!(
            "Link {:?}, sleep votes {:?}",
            link.bus_state(),
            SLEEP_VOTES.holders()
        );
    }
}

fn arm_receive(link: &RpTransport, buf: &'static mut [u8]) {
    let len = buf.len();
    if let Err(e) = link.event_request(buf, len) {
        error!("Failed to arm receive: {:?}", e.kind());
    }
}

#[embassy_executor::task]
async fn link_app_task(link: &'static RpTransport) -> ! {
    arm_receive(link, RX_BUF.take());
    let mut tx: Option<&'static mut [u8]> = Some(TX_BUF.take());

    loop {
        match select(link.next_event(), Timer::after(LOOP_LOG_INTERVAL)).await {
            Either::First(event) => match event {
                LinkEvent::Received { buf, len, more } => {
                    info!("Received {} bytes, more {}", len, more);
                    debug!("Event: {:x}", &buf[..len]);
                    arm_receive(link, buf);
                }
                LinkEvent::Sent { buf, len } => {
                    debug!("Sent {} bytes", len);
                    tx = Some(buf);
                }
                LinkEvent::Timeout { direction } => {
                    warn!("Link timed out during {:?} - re-initializing", direction);
                    link.init(InitMode::Warm);
                }
                LinkEvent::Reclaimed { buf } => {
                    if buf.len() == TX_FRAME_SIZE {
                        tx = Some(buf);
                    } else {
                        arm_receive(link, buf);
                    }
                }
            },
            Either::Second(()) => {
                let Some(buf) = tx.take() else {
                    debug!("Version query still in flight");
                    continue;
                };
                buf[..VERSION_QUERY.len()].copy_from_slice(&VERSION_QUERY);
                if let Err(e) = link.send(buf, VERSION_QUERY.len()) {
                    warn!("Failed to send version query: {:?}", e.kind());
                    tx = Some(e.into_buf());
                }
            }
        }
    }
}
