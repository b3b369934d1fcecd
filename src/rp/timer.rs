//! The sequence timeout, as an embassy-time timer run by `timer_task`.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use super::RpTransport;
use crate::hal::OneShot;

#[derive(Clone, Copy)]
enum TimerCommand {
    Start(Duration),
    Stop,
}

// Only the latest command matters, so a Signal is enough.
static COMMAND: Signal<CriticalSectionRawMutex, TimerCommand> = Signal::new();

pub struct RpTimer;

impl OneShot for RpTimer {
    fn start(&mut self, after: Duration) {
        COMMAND.signal(TimerCommand::Start(after));
    }

    fn stop(&mut self) {
        COMMAND.signal(TimerCommand::Stop);
    }
}

/// Runs the one-shot timer.
#[embassy_executor::task]
pub async fn timer_task(link: &'static RpTransport) -> ! {
    info!("Timer task started");
    let mut command = COMMAND.wait().await;
    loop {
        command = match command {
            TimerCommand::Stop => COMMAND.wait().await,
            TimerCommand::Start(after) => match select(Timer::after(after), COMMAND.wait()).await {
                Either::First(()) => {
                    link.timeout_expired();
                    COMMAND.wait().await
                }
                Either::Second(next) => next,
            },
        }
    }
}
