//! A simulated coprocessor, wired to a `Transport` through the link's
//! hardware traits.
//!
//! DMA bursts complete immediately.  The coprocessor's answer is written
//! into the receive buffer when the burst starts, and the two completions
//! are queued for `Sim::pump()` to deliver, transmit first.
//!
//! Every chip-select edge and busy-wait is logged in order, and each wait
//! checks whether interrupts are masked by trying to enter a critical
//! section from another thread.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration as StdDuration;

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use radio_spi_link::constants::{HEADER_LEN, READ_CONTROL, READY_CODE, WRITE_CONTROL};
use radio_spi_link::hal::{Addressing, DmaLink, OneShot, ReadyLine, RxProgram, TxProgram};
use radio_spi_link::header::Header;
use radio_spi_link::{Direction, LinkConfig, LinkEvent, LinkParts, SleepVotes, Transport};

/// Gives up on a pump which never goes idle.
const MAX_PUMP_STEPS: usize = 10_000;

/// How long another thread may take to enter a critical section before
/// interrupts are considered masked.
const MASK_CHECK_TIMEOUT: StdDuration = StdDuration::from_millis(200);

/// Chip-select edges and busy-waits, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsTrace {
    /// Asserted.
    Low,
    /// Released.
    High,
    /// A nanosecond busy-wait.
    Wait(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Tx,
    Rx,
}

/// The coprocessor's side of the link.
#[derive(Debug)]
pub struct Coprocessor {
    /// Write windows offered, one per write header.  When empty,
    /// `default_window` is offered.
    pub write_windows: VecDeque<u16>,
    pub default_window: u16,

    /// Number of upcoming write headers answered "not ready".
    pub not_ready_writes: usize,

    /// Bytes of the event waiting to go to the host.
    pub outbound: VecDeque<u8>,

    /// Bytes the host wrote.
    pub received: Vec<u8>,

    /// Length of each transmit payload burst.
    pub tx_bursts: Vec<usize>,

    /// Every header the host clocked out.
    pub headers: Vec<[u8; HEADER_LEN]>,
}

impl Default for Coprocessor {
    fn default() -> Self {
        Self {
            write_windows: VecDeque::new(),
            default_window: 128,
            not_ready_writes: 0,
            outbound: VecDeque::new(),
            received: Vec::new(),
            tx_bursts: Vec::new(),
            headers: Vec::new(),
        }
    }
}

/// Everything the hardware mocks share.
#[derive(Debug, Default)]
pub struct Wire {
    pub cs_asserted: bool,

    pub cs_trace: Vec<CsTrace>,

    /// Busy-waits which ran inside a critical section.
    pub masked_waits: usize,

    pub ready_level: bool,
    pub ready_irq_enabled: bool,

    /// The running timeout, if any.
    pub timer: Option<Duration>,

    /// Receive notify waits, in microseconds.
    pub notify_waits: Vec<u32>,

    pub completions: VecDeque<Completion>,
    pub flushes: usize,

    /// The byte clocked out for each receive payload burst.
    pub dummy_bytes: Vec<u8>,

    pub coprocessor: Coprocessor,
}

pub type SharedWire = Rc<RefCell<Wire>>;

pub struct SimCs {
    wire: SharedWire,
}

impl ErrorType for SimCs {
    type Error = Infallible;
}

impl OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut wire = self.wire.borrow_mut();
        wire.cs_asserted = true;
        wire.cs_trace.push(CsTrace::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut wire = self.wire.borrow_mut();
        wire.cs_asserted = false;
        wire.cs_trace.push(CsTrace::High);
        Ok(())
    }
}

pub struct SimDelay {
    wire: SharedWire,
}

impl SimDelay {
    fn check_masking(&self) {
        if interrupts_masked() {
            self.wire.borrow_mut().masked_waits += 1;
        }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.check_masking();
        self.wire.borrow_mut().cs_trace.push(CsTrace::Wait(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.check_masking();
        self.wire.borrow_mut().notify_waits.push(us);
    }
}

// Whether this thread is inside a critical section, which on the target
// means interrupts are disabled.
fn interrupts_masked() -> bool {
    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        critical_section::with(|_| ());
        let _ = done.send(());
    });
    finished.recv_timeout(MASK_CHECK_TIMEOUT).is_err()
}

pub struct SimDma {
    wire: SharedWire,
}

impl DmaLink for SimDma {
    fn flush(&mut self) {
        let mut wire = self.wire.borrow_mut();
        wire.completions.clear();
        wire.flushes += 1;
    }

    unsafe fn start(&mut self, tx: TxProgram, rx: RxProgram, len: usize) {
        let mut wire = self.wire.borrow_mut();
        assert!(wire.cs_asserted, "burst started with chip-select released");
        assert!(wire.completions.is_empty(), "burst started without a flush");

        match (tx.addressing, rx.addressing) {
            (Addressing::Increment, Addressing::Increment) => {
                assert_eq!(len, HEADER_LEN);
                let mut sent = [0u8; HEADER_LEN];
                // SAFETY: DmaLink contract.
                sent.copy_from_slice(unsafe { std::slice::from_raw_parts(tx.source, len) });
                let reply = wire.answer_header(&sent);
                let dest = unsafe { std::slice::from_raw_parts_mut(rx.dest, len) };
                dest.copy_from_slice(reply.bytes());
            }
            (Addressing::Increment, Addressing::Fixed) => {
                let data = unsafe { std::slice::from_raw_parts(tx.source, len) };
                wire.coprocessor.received.extend_from_slice(data);
                wire.coprocessor.tx_bursts.push(len);
            }
            (Addressing::Fixed, Addressing::Increment) => {
                // SAFETY: DmaLink contract.
                wire.dummy_bytes.push(unsafe { *tx.source });
                let dest = unsafe { std::slice::from_raw_parts_mut(rx.dest, len) };
                for byte in dest.iter_mut() {
                    *byte = wire
                        .coprocessor
                        .outbound
                        .pop_front()
                        .expect("host read more than was offered");
                }
                if wire.coprocessor.outbound.is_empty() {
                    wire.ready_level = false;
                }
            }
            (Addressing::Fixed, Addressing::Fixed) => panic!("neither channel increments"),
        }

        wire.completions.push_back(Completion::Tx);
        wire.completions.push_back(Completion::Rx);
    }
}

impl Wire {
    fn answer_header(&mut self, sent: &[u8; HEADER_LEN]) -> Header {
        self.coprocessor.headers.push(*sent);
        let cop = &mut self.coprocessor;
        match sent[0] {
            WRITE_CONTROL => {
                if cop.not_ready_writes > 0 {
                    cop.not_ready_writes -= 1;
                    return Header::new([0; HEADER_LEN]);
                }
                let window = cop.write_windows.pop_front().unwrap_or(cop.default_window);
                Header::encode(Direction::Transmit, READY_CODE, window)
            }
            READ_CONTROL => {
                let count = cop.outbound.len();
                if count == 0 {
                    // Nothing to send, so the line goes down.
                    self.ready_level = false;
                }
                Header::encode(Direction::Receive, READY_CODE, count as u16)
            }
            other => panic!("unexpected control byte {other:#04x}"),
        }
    }
}

pub struct SimReady {
    wire: SharedWire,
}

impl ReadyLine for SimReady {
    fn is_asserted(&mut self) -> bool {
        self.wire.borrow().ready_level
    }

    fn enable_interrupt(&mut self) {
        self.wire.borrow_mut().ready_irq_enabled = true;
    }

    fn disable_interrupt(&mut self) {
        self.wire.borrow_mut().ready_irq_enabled = false;
    }

    fn clear_interrupt(&mut self) {}
}

pub struct SimTimer {
    wire: SharedWire,
}

impl OneShot for SimTimer {
    fn start(&mut self, after: Duration) {
        self.wire.borrow_mut().timer = Some(after);
    }

    fn stop(&mut self) {
        self.wire.borrow_mut().timer = None;
    }
}

pub type SimTransport = Transport<SimCs, SimDelay, SimDma, SimReady, SimTimer, &'static SleepVotes>;

/// A transport wired to the simulated coprocessor.
pub struct Sim {
    pub wire: SharedWire,
    pub votes: &'static SleepVotes,
    pub link: SimTransport,
}

impl Sim {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(config: LinkConfig) -> Self {
        let wire = SharedWire::default();
        let votes: &'static SleepVotes = Box::leak(Box::new(SleepVotes::new()));
        let parts = LinkParts {
            cs: SimCs { wire: wire.clone() },
            delay: SimDelay { wire: wire.clone() },
            dma: SimDma { wire: wire.clone() },
            ready: SimReady { wire: wire.clone() },
            timer: SimTimer { wire: wire.clone() },
            sleep: votes,
        };
        Self {
            link: Transport::new(parts, config),
            wire,
            votes,
        }
    }

    pub fn coprocessor<R>(&self, f: impl FnOnce(&mut Coprocessor) -> R) -> R {
        f(&mut self.wire.borrow_mut().coprocessor)
    }

    /// Deliver DMA completions until none are left.
    pub fn pump(&self) {
        for _ in 0..MAX_PUMP_STEPS {
            // The borrow must end before the transport touches the wire.
            let next = self.wire.borrow_mut().completions.pop_front();
            match next {
                Some(Completion::Tx) => self.link.tx_dma_complete_interrupt(),
                Some(Completion::Rx) => self.link.rx_dma_complete_interrupt(),
                None => return,
            }
        }
        panic!("link never went idle");
    }

    /// The coprocessor raises its ready line, firing the edge interrupt if
    /// it is enabled.
    pub fn raise_ready(&self) {
        let fire = {
            let mut wire = self.wire.borrow_mut();
            let rising = !wire.ready_level;
            wire.ready_level = true;
            rising && wire.ready_irq_enabled
        };
        if fire {
            self.link.ready_line_interrupt();
        }
    }

    /// The coprocessor gets an event for the host.
    pub fn queue_event(&self, bytes: &[u8]) {
        self.coprocessor(|c| c.outbound.extend(bytes.iter().copied()));
        self.raise_ready();
    }

    /// Fire the timeout if it is running.
    pub fn expire_timer(&self) -> bool {
        let running = self.wire.borrow().timer.is_some();
        if running {
            self.link.timeout_expired();
        }
        running
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        std::iter::from_fn(|| self.link.try_next_event()).collect()
    }

    pub fn cs_asserted(&self) -> bool {
        self.wire.borrow().cs_asserted
    }

    /// Every busy-wait in nanoseconds, in order.
    pub fn cs_waits(&self) -> Vec<u32> {
        self.wire
            .borrow()
            .cs_trace
            .iter()
            .filter_map(|t| match t {
                CsTrace::Wait(ns) => Some(*ns),
                _ => None,
            })
            .collect()
    }

    /// For each assertion of chip-select, the time it had been released
    /// for.  The line starts released, having been held high forever.
    pub fn cs_gaps(&self) -> Vec<u32> {
        let mut gaps = Vec::new();
        let mut high_for = Some(u32::MAX);
        for t in &self.wire.borrow().cs_trace {
            match t {
                CsTrace::High => high_for = high_for.or(Some(0)),
                CsTrace::Wait(ns) => high_for = high_for.map(|h| h.saturating_add(*ns)),
                CsTrace::Low => gaps.push(high_for.take().unwrap_or(0)),
            }
        }
        gaps
    }

    pub fn masked_waits(&self) -> usize {
        self.wire.borrow().masked_waits
    }
}

/// A zeroed buffer for the link to own.
pub fn buffer(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

/// A buffer holding `bytes`.
pub fn frame(bytes: &[u8]) -> &'static mut [u8] {
    Box::leak(bytes.to_vec().into_boxed_slice())
}
