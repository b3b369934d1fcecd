//! The SPI transport - the link's public face.
//!
//! `Transport` owns the state machine and the hardware, and exposes the
//! entry points the application and the interrupt handlers call.  Every
//! entry point runs the same way:
//!
//! 1. Step the state machine inside a critical section.  This is the only
//!    work done with interrupts disabled - a read-modify-write of the bus
//!    state, the pending slot and the transfer contexts, plus queueing the
//!    resulting effects.
//! 2. Take ownership of the hardware and perform the queued effects, with
//!    interrupts enabled.  If another context already owns the hardware,
//!    for example a task interrupted part way through its effects, return
//!    straight away - the owner performs the new work in order once it is
//!    done with its own.
//! 3. Post any events for the application on the link event channel.
//!
//! Nothing blocks.  Waiting for the coprocessor or for DMA is done by
//! returning, and being called again from the next interrupt.
//!
//! The channel is never allowed to overflow.  Every buffer the link accepts
//! comes back in exactly one event, so `send()` and `event_request()` refuse
//! a buffer with `LinkError::EventQueueFull` while the buffers already held
//! or owed to the application would fill it.  One further slot is kept for
//! `LinkEvent::Timeout`, which is only posted if one isn't already waiting.
//!
//! The transport holds the header buffer the DMA writes into, so it must not
//! be moved while in use.  Put it in a static.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TrySendError};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::Deque;
use portable_atomic::{AtomicBool, Ordering};

use crate::chip_select::ChipSelect;
use crate::config::LinkConfig;
use crate::constants::{LINK_EVENT_QUEUE_SIZE, MAX_BUFFERS_IN_FLIGHT, WORK_QUEUE_SIZE};
use crate::error::LinkError;
use crate::hal::{DmaLink, OneShot, ReadyLine, SleepGate};
use crate::machine::{Effect, Effects, Event, LinkEvent, Machine};
use crate::transfer::TransferManager;
use crate::types::{BusState, InitMode};

/// Channel used to hand link events to the application.  A
/// `CriticalSectionRawMutex` is used as events are posted from interrupt
/// context.
pub type LinkEventChannel = Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_SIZE>;

/// The hardware a `Transport` is built from.
pub struct LinkParts<CS, DL, DMA, RDY, TMR, PWR> {
    /// Chip-select output.  Active low.
    pub cs: CS,

    /// Busy-wait delay for the chip-select pulse and receive notify wait.
    pub delay: DL,

    pub dma: DMA,
    pub ready: RDY,
    pub timer: TMR,
    pub sleep: PWR,
}

// The hardware, as owned by the transport.
struct Hardware<CS, DL, DMA, RDY, TMR, PWR> {
    cs: ChipSelect<CS>,
    delay: DL,
    transfer: TransferManager<DMA>,
    ready: RDY,
    timer: TMR,
    sleep: PWR,
}

impl<CS, DL, DMA, RDY, TMR, PWR> Hardware<CS, DL, DMA, RDY, TMR, PWR>
where
    CS: OutputPin,
    DL: DelayNs,
    DMA: DmaLink,
    RDY: ReadyLine,
    TMR: OneShot,
    PWR: SleepGate,
{
    fn execute(&mut self, effect: Effect, config: &LinkConfig) {
        match effect {
            Effect::AssertCs => self.cs.assert(&mut self.delay),
            Effect::ReleaseCs => self.cs.release(),
            Effect::BounceCs => self.cs.bounce(&mut self.delay),
            Effect::EnableReadyIrq => self.ready.enable_interrupt(),
            Effect::DisableReadyIrq => self.ready.disable_interrupt(),
            Effect::ClearReadyIrq => self.ready.clear_interrupt(),
            Effect::StartTimeout => self.timer.start(config.sequence_timeout),
            Effect::StopTimeout => self.timer.stop(),
            Effect::HoldAwake => self.sleep.request_no_sleep(config.sleep_client),
            Effect::AllowSleep => self.sleep.allow_sleep(config.sleep_client),
            Effect::FlushDma => self.transfer.flush(),
            Effect::StartHeader(direction) => self.transfer.start_header(direction),
            Effect::StartTxPayload { source, len } => {
                // SAFETY: The pointer is into a buffer held by the state
                // machine's transmit context, which keeps it until the
                // burst's completion has been handled.
                unsafe { self.transfer.start_tx_payload(source, len) }
            }
            Effect::StartRxPayload { dest, len } => {
                // SAFETY: As above, for the receive context.
                unsafe { self.transfer.start_rx_payload(dest, len) }
            }
            Effect::NotifyDelay => {
                if config.rx_notify_delay_us > 0 {
                    self.delay.delay_us(config.rx_notify_delay_us);
                }
            }
            // Handled by the transport.
            Effect::ResampleReadyLine | Effect::Notify(_) => {}
        }
    }
}

// Work waiting for whoever owns the hardware.
#[derive(Debug)]
enum Work {
    Effect(Effect),

    // The receive channel finished.  The header and ready line are sampled
    // when this reaches the front of the queue, after the effects before it.
    RxComplete,
}

// SAFETY: The only non-Send contents are the DMA effects' raw pointers.
// They point into buffers the state machine keeps until the burst has
// completed, whichever context ends up programming the DMA.
unsafe impl Send for Work {}

// Everything guarded by the critical section.
struct Core {
    machine: Machine,
    work: Deque<Work, WORK_QUEUE_SIZE>,

    // Buffer-carrying events queued as work or sitting in the channel.
    events_owed: usize,

    // Whether a timeout event is queued as work or sitting in the channel.
    timeout_owed: bool,
}

impl Core {
    fn new() -> Self {
        Self {
            machine: Machine::new(),
            work: Deque::new(),
            events_owed: 0,
            timeout_owed: false,
        }
    }

    fn step(&mut self, event: Event) -> Result<(), LinkError> {
        let event = self.admit(event)?;
        let mut fx = Effects::new();
        let result = self.machine.handle(event, &mut fx);
        for effect in fx {
            match &effect {
                Effect::Notify(LinkEvent::Timeout { .. }) if self.timeout_owed => {
                    debug!("Timeout already reported");
                    continue;
                }
                Effect::Notify(LinkEvent::Timeout { .. }) => self.timeout_owed = true,
                Effect::Notify(_) => self.events_owed += 1,
                _ => {}
            }
            self.queue(Work::Effect(effect));
        }
        result
    }

    // Refuse a new buffer if its event might not fit in the channel.
    fn admit(&self, event: Event) -> Result<Event, LinkError> {
        let full = self.machine.buffers_held() + self.events_owed >= MAX_BUFFERS_IN_FLIGHT;
        match event {
            Event::Send { buf, .. } | Event::EventRequest { buf, .. } if full => {
                warn!(
                    "Link refused buffer: {} held, {} events unread",
                    self.machine.buffers_held(),
                    self.events_owed
                );
                Err(LinkError::EventQueueFull(buf))
            }
            event => Ok(event),
        }
    }

    fn queue(&mut self, work: Work) {
        if self.work.push_back(work).is_err() {
            error!("Link work queue full - hardware out of step");
        }
    }

    // The application has taken `event` from the channel.
    fn settle(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Timeout { .. } => self.timeout_owed = false,
            _ => self.events_owed = self.events_owed.saturating_sub(1),
        }
    }
}

/// The SPI transport.
pub struct Transport<CS, DL, DMA, RDY, TMR, PWR> {
    core: Mutex<CriticalSectionRawMutex, RefCell<Core>>,

    // Only touched by the context which set `hw_owned`.
    hw: Mutex<NoopRawMutex, RefCell<Hardware<CS, DL, DMA, RDY, TMR, PWR>>>,
    hw_owned: AtomicBool,

    events: LinkEventChannel,
    config: LinkConfig,
}

// SAFETY: The core is behind a critical section.  The hardware is only
// reached by the context which swapped `hw_owned` from false to true, so is
// never accessed from two contexts at once, and its parts are Send.
unsafe impl<CS, DL, DMA, RDY, TMR, PWR> Sync for Transport<CS, DL, DMA, RDY, TMR, PWR>
where
    CS: Send,
    DL: Send,
    DMA: Send,
    RDY: Send,
    TMR: Send,
    PWR: Send,
{
}

impl<CS, DL, DMA, RDY, TMR, PWR> Transport<CS, DL, DMA, RDY, TMR, PWR>
where
    CS: OutputPin,
    DL: DelayNs,
    DMA: DmaLink,
    RDY: ReadyLine,
    TMR: OneShot,
    PWR: SleepGate,
{
    /// Create the transport.  Chip-select is released straight away, but
    /// nothing else touches the hardware until `init()`.
    pub fn new(parts: LinkParts<CS, DL, DMA, RDY, TMR, PWR>, config: LinkConfig) -> Self {
        let hw = Hardware {
            cs: ChipSelect::new(parts.cs, config.cs_pulse_ns),
            delay: parts.delay,
            transfer: TransferManager::new(parts.dma, config.dummy_byte),
            ready: parts.ready,
            timer: parts.timer,
            sleep: parts.sleep,
        };
        Self {
            core: Mutex::new(RefCell::new(Core::new())),
            hw: Mutex::new(RefCell::new(hw)),
            hw_owned: AtomicBool::new(false),
            events: Channel::new(),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Reset the link to Available with nothing pending.  Any buffers
    /// released are reported as `LinkEvent::Reclaimed`.
    pub fn init(&self, mode: InitMode) {
        // Init can't fail.
        let _ = self.dispatch(Event::Init(mode));
    }

    /// Send `buf[..len]` to the coprocessor.
    ///
    /// Starts immediately if the bus is free, otherwise waits for the
    /// current sequence to finish.  The buffer comes back in
    /// `LinkEvent::Sent`.
    pub fn send(&self, buf: &'static mut [u8], len: usize) -> Result<(), LinkError> {
        self.dispatch(Event::Send { buf, len })
    }

    /// Supply a buffer for the next event from the coprocessor, with `len`
    /// bytes of space.  The buffer comes back in `LinkEvent::Received`.
    pub fn event_request(&self, buf: &'static mut [u8], len: usize) -> Result<(), LinkError> {
        self.dispatch(Event::EventRequest { buf, len })
    }

    /// Call from the ready line's edge interrupt.
    pub fn ready_line_interrupt(&self) {
        let _ = self.dispatch(Event::ReadyLine);
    }

    /// Call when the transmit DMA channel completes.
    pub fn tx_dma_complete_interrupt(&self) {
        let _ = self.dispatch(Event::TxDmaComplete);
    }

    /// Call when the receive DMA channel completes.
    pub fn rx_dma_complete_interrupt(&self) {
        self.core.lock(|c| c.borrow_mut().queue(Work::RxComplete));
        self.run();
    }

    /// Call when the one-shot timer expires.
    pub fn timeout_expired(&self) {
        let _ = self.dispatch(Event::Timeout);
    }

    pub fn bus_state(&self) -> BusState {
        self.core.lock(|c| c.borrow().machine.bus_state())
    }

    /// Whether a send is waiting for the bus.
    pub fn has_pending(&self) -> bool {
        self.core.lock(|c| c.borrow().machine.has_pending())
    }

    /// Wait for the next link event.
    pub async fn next_event(&self) -> LinkEvent {
        let event = self.events.receive().await;
        self.core.lock(|c| c.borrow_mut().settle(&event));
        event
    }

    pub fn try_next_event(&self) -> Option<LinkEvent> {
        let event = self.events.try_receive().ok()?;
        self.core.lock(|c| c.borrow_mut().settle(&event));
        Some(event)
    }

    fn dispatch(&self, event: Event) -> Result<(), LinkError> {
        let result = self.step(event);
        self.run();
        result
    }

    fn step(&self, event: Event) -> Result<(), LinkError> {
        self.core.lock(|c| c.borrow_mut().step(event))
    }

    // Perform queued work until there is none, unless another context owns
    // the hardware, in which case it will.
    fn run(&self) {
        loop {
            if self.hw_owned.swap(true, Ordering::Acquire) {
                return;
            }
            while let Some(work) = self.core.lock(|c| c.borrow_mut().work.pop_front()) {
                self.perform(work);
            }
            self.hw_owned.store(false, Ordering::Release);

            // Work queued after the last pop but before the release has no
            // owner yet.
            if self.core.lock(|c| c.borrow().work.is_empty()) {
                return;
            }
        }
    }

    fn perform(&self, work: Work) {
        match work {
            Work::RxComplete => {
                let (header, ready_asserted) =
                    self.hardware(|hw| (hw.transfer.header(), hw.ready.is_asserted()));
                let _ = self.step(Event::RxDmaComplete {
                    header,
                    ready_asserted,
                });
            }
            Work::Effect(Effect::Notify(event)) => self.post(event),
            Work::Effect(Effect::ResampleReadyLine) => {
                // The ready line may have been asserted while we were busy,
                // or before its interrupt was enabled.  The edge is gone, so
                // go by the level.
                if self.hardware(|hw| hw.ready.is_asserted()) {
                    debug!("Ready line already asserted");
                    let _ = self.step(Event::ReadyLine);
                }
            }
            Work::Effect(effect) => self.hardware(|hw| hw.execute(effect, &self.config)),
        }
    }

    fn hardware<R>(&self, f: impl FnOnce(&mut Hardware<CS, DL, DMA, RDY, TMR, PWR>) -> R) -> R {
        self.hw.lock(|hw| f(&mut hw.borrow_mut()))
    }

    fn post(&self, event: LinkEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            // Admission keeps this from happening.  If it does, the buffer
            // inside is lost to the application.
            error!("Link event queue full - dropped {:?}", event);
            self.core.lock(|c| c.borrow_mut().settle(&event));
        }
    }
}
