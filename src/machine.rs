//! The link's state machine.
//!
//! This is the single authority over the bus.  It arbitrates between
//! foreground `send`/`event_request` calls and the interrupt-driven receive
//! path, and walks each sequence through header, payload and completion.
//!
//! It does no I/O.  Each call to [`Machine::handle`] takes one [`Event`],
//! updates the state, and appends the [`Effect`]s the hardware must perform,
//! in order.  The `Transport` runs the machine inside a short critical
//! section and performs the effects afterwards.
//!
//! A sequence looks like this:
//!
//! ```text
//!   Send / ready line
//!         |
//!         v
//!   assert CS --> header --(not ready)--> bounce CS --> header ...
//!                   |
//!                (ready, count > 0)
//!                   v
//!              payload burst --(continuation)--> bounce CS --> header (TX)
//!                   |                      \--> next buffer   (RX)
//!                   v
//!            end of transfer --> release CS --> pending send / re-arm
//! ```

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use crate::constants::MAX_EFFECTS;
use crate::context::{PendingRequest, TransferContext};
use crate::error::LinkError;
use crate::header::Header;
use crate::types::{BusState, Direction, InitMode, Stage};

/// Something the link reports to the application.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes from the coprocessor landed in `buf[..len]`.  If `more` is set
    /// the coprocessor has more of the same event, which will be delivered
    /// into the next buffer passed to `event_request`.
    Received {
        buf: &'static mut [u8],
        len: usize,
        more: bool,
    },

    /// A send completed, and the buffer is the caller's again.
    Sent { buf: &'static mut [u8], len: usize },

    /// A sequence didn't complete in time.  The bus is left as it was -
    /// recover with `init`.
    Timeout { direction: Option<Direction> },

    /// `init` handed back a buffer the link was holding.
    Reclaimed { buf: &'static mut [u8] },
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkEvent {
    fn format(&self, f: defmt::Formatter) {
        match self {
            LinkEvent::Received { len, more, .. } => {
                defmt::write!(f, "Received({=usize}, more: {=bool})", len, more)
            }
            LinkEvent::Sent { len, .. } => defmt::write!(f, "Sent({=usize})", len),
            LinkEvent::Timeout { direction } => defmt::write!(f, "Timeout({})", direction),
            LinkEvent::Reclaimed { buf } => defmt::write!(f, "Reclaimed({=usize})", buf.len()),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum Event {
    Init(InitMode),
    Send { buf: &'static mut [u8], len: usize },
    EventRequest { buf: &'static mut [u8], len: usize },
    ReadyLine,
    TxDmaComplete,

    /// The receive channel finished.  Carries whatever is in the header
    /// buffer and the ready line level sampled at completion time.
    RxDmaComplete { header: Header, ready_asserted: bool },

    Timeout,
}

/// Outputs of the state machine, performed in order by the `Transport`.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    AssertCs,
    ReleaseCs,

    /// Deassert chip-select for the configured minimum pulse, then reassert.
    BounceCs,

    EnableReadyIrq,
    DisableReadyIrq,
    ClearReadyIrq,

    /// Check the ready line level once the effects are done, and start a
    /// receive if it is already asserted.
    ResampleReadyLine,

    StartTimeout,
    StopTimeout,

    /// Take the link's "no sleep" vote.
    HoldAwake,

    /// Drop the link's "no sleep" vote.
    AllowSleep,

    FlushDma,

    StartHeader(Direction),
    StartTxPayload { source: *const u8, len: usize },
    StartRxPayload { dest: *mut u8, len: usize },

    /// The configured wait before a receive is reported.
    NotifyDelay,

    Notify(LinkEvent),
}

/// The effects of one transition.
#[derive(Debug, Default)]
pub struct Effects {
    list: Vec<Effect, MAX_EFFECTS>,
}

impl Effects {
    pub const fn new() -> Self {
        Self { list: Vec::new() }
    }

    fn push(&mut self, effect: Effect) {
        if self.list.push(effect).is_err() {
            // MAX_EFFECTS covers the longest transition, so this is a bug.
            error!("Effect list overflow");
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.list.iter()
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = <Vec<Effect, MAX_EFFECTS> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.list.into_iter()
    }
}

/// The state machine.
#[derive(Debug)]
pub struct Machine {
    bus: BusState,

    /// Which sequence owns the bus.  `Some` exactly when `bus` is Busy.
    active: Option<Direction>,

    /// Meaning of the next completed burst.  Only relevant while Busy.
    stage: Stage,

    tx: Option<TransferContext>,

    /// The receive buffer - armed and waiting for the ready line, or being
    /// filled by the active receive sequence.
    rx: Option<TransferContext>,

    pending: PendingRequest,

    /// Bytes of the current event the coprocessor still has to deliver once
    /// the next receive buffer arrives.
    rx_backlog: usize,

    /// A receive continuation is waiting for `event_request`.
    awaiting_buffer: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub const fn new() -> Self {
        Self {
            bus: BusState::Available,
            active: None,
            stage: Stage::EndOfTransfer,
            tx: None,
            rx: None,
            pending: PendingRequest::new(),
            rx_backlog: 0,
            awaiting_buffer: false,
        }
    }

    pub fn bus_state(&self) -> BusState {
        self.bus
    }

    pub fn active(&self) -> Option<Direction> {
        self.active
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_pending()
    }

    /// Caller buffers the machine is holding - transmitting, pending or
    /// armed for receive.  Each comes back in exactly one `LinkEvent`.
    pub fn buffers_held(&self) -> usize {
        usize::from(self.tx.is_some())
            + usize::from(self.pending.is_pending())
            + usize::from(self.rx.is_some())
    }

    /// Whether a receive buffer is waiting for the ready line.
    pub fn receive_armed(&self) -> bool {
        self.rx.is_some() && self.active != Some(Direction::Receive)
    }

    /// Apply one event.  Effects are appended to `fx`.  Only `Send` and
    /// `EventRequest` can fail, and they hand the buffer back when they do.
    pub fn handle(&mut self, event: Event, fx: &mut Effects) -> Result<(), LinkError> {
        match event {
            Event::Init(mode) => {
                self.init(mode, fx);
                Ok(())
            }
            Event::Send { buf, len } => self.send(buf, len, fx),
            Event::EventRequest { buf, len } => self.event_request(buf, len, fx),
            Event::ReadyLine => {
                self.ready_line(fx);
                Ok(())
            }
            Event::TxDmaComplete => {
                self.tx_complete(fx);
                Ok(())
            }
            Event::RxDmaComplete {
                header,
                ready_asserted,
            } => {
                self.rx_complete(header, ready_asserted, fx);
                Ok(())
            }
            Event::Timeout => {
                self.timeout(fx);
                Ok(())
            }
        }
    }

    fn validate(buf: &'static mut [u8], len: usize) -> Result<TransferContext, LinkError> {
        if len == 0 {
            return Err(LinkError::EmptyRequest(buf));
        }
        if len > buf.len() {
            return Err(LinkError::LengthExceedsBuffer(buf));
        }
        Ok(TransferContext::new(buf, len))
    }

    fn init(&mut self, mode: InitMode, fx: &mut Effects) {
        info!("Link init: {:?}", mode);

        fx.push(Effect::StopTimeout);
        fx.push(Effect::DisableReadyIrq);
        fx.push(Effect::FlushDma);
        fx.push(Effect::ReleaseCs);
        fx.push(Effect::AllowSleep);

        if let Some(ctx) = self.tx.take() {
            fx.push(Effect::Notify(LinkEvent::Reclaimed { buf: ctx.into_buf() }));
        }
        if let Some(ctx) = self.pending.take() {
            fx.push(Effect::Notify(LinkEvent::Reclaimed { buf: ctx.into_buf() }));
        }

        // A receive buffer survives a warm init, unless it was part way
        // through being filled.
        let keep_rx = mode == InitMode::Warm && self.receive_armed();
        if !keep_rx {
            if let Some(ctx) = self.rx.take() {
                fx.push(Effect::Notify(LinkEvent::Reclaimed { buf: ctx.into_buf() }));
            }
        }

        self.bus = BusState::Available;
        self.active = None;
        self.stage = Stage::EndOfTransfer;
        self.rx_backlog = 0;
        self.awaiting_buffer = false;

        if self.rx.is_some() {
            fx.push(Effect::EnableReadyIrq);
            fx.push(Effect::ResampleReadyLine);
        }
    }

    fn send(
        &mut self,
        buf: &'static mut [u8],
        len: usize,
        fx: &mut Effects,
    ) -> Result<(), LinkError> {
        let ctx = Self::validate(buf, len)?;

        match self.bus {
            BusState::Available => {
                self.begin_transmit(ctx, fx);
                Ok(())
            }
            BusState::Busy => {
                debug!("Bus busy - send of {} bytes pending", len);
                self.pending.park(ctx).map_err(|ctx| {
                    warn!("Send rejected - a send is already pending");
                    LinkError::PendingSlotFull(ctx.into_buf())
                })
            }
        }
    }

    fn begin_transmit(&mut self, ctx: TransferContext, fx: &mut Effects) {
        trace!("Begin transmit of {} bytes", ctx.len());
        self.bus = BusState::Busy;
        self.active = Some(Direction::Transmit);
        self.stage = Stage::header_for(Direction::Transmit);
        self.tx = Some(ctx);

        fx.push(Effect::DisableReadyIrq);
        fx.push(Effect::AssertCs);
        fx.push(Effect::StartTimeout);
        fx.push(Effect::HoldAwake);
        fx.push(Effect::StartHeader(Direction::Transmit));
    }

    fn event_request(
        &mut self,
        buf: &'static mut [u8],
        len: usize,
        fx: &mut Effects,
    ) -> Result<(), LinkError> {
        let mut ctx = Self::validate(buf, len)?;

        // The coprocessor is part way through an event which didn't fit in
        // the last buffer.  Chip-select is still asserted, so carry on.
        if self.awaiting_buffer {
            let len = ctx.plan_receive(self.rx_backlog);
            self.rx_backlog -= len;
            self.stage = if ctx.continuation() {
                Stage::ContinuePayload
            } else {
                Stage::EndOfTransfer
            };
            self.awaiting_buffer = false;
            trace!("Continue receive: {} bytes, {} to follow", len, self.rx_backlog);
            fx.push(Effect::StartRxPayload {
                dest: ctx.sink_ptr(),
                len,
            });
            self.rx = Some(ctx);
            return Ok(());
        }

        if self.rx.is_some() {
            warn!("Receive buffer supplied while one is already held");
            return Err(LinkError::ReceiveAlreadyArmed(ctx.into_buf()));
        }
        self.rx = Some(ctx);

        // If a transmit owns the bus, the ready interrupt is re-enabled when
        // it finishes.
        if self.bus == BusState::Available {
            fx.push(Effect::EnableReadyIrq);
            fx.push(Effect::ResampleReadyLine);
        }
        Ok(())
    }

    fn ready_line(&mut self, fx: &mut Effects) {
        if self.bus == BusState::Busy {
            // The line stays asserted, and is resampled when the bus frees.
            trace!("Ready line while busy - ignored");
            return;
        }
        if self.rx.is_none() {
            trace!("Ready line with no receive buffer - ignored");
            return;
        }

        trace!("Ready line - begin receive");
        self.bus = BusState::Busy;
        self.active = Some(Direction::Receive);
        self.stage = Stage::header_for(Direction::Receive);

        fx.push(Effect::DisableReadyIrq);
        fx.push(Effect::ClearReadyIrq);
        fx.push(Effect::AssertCs);
        fx.push(Effect::HoldAwake);
        fx.push(Effect::StartTimeout);
        fx.push(Effect::StartHeader(Direction::Receive));
    }

    fn rx_complete(&mut self, header: Header, ready_asserted: bool, fx: &mut Effects) {
        let Some(direction) = self.active else {
            trace!("RX complete while idle - ignored");
            return;
        };

        if self.stage.is_header() {
            self.header_complete(direction, header, ready_asserted, fx);
        } else if direction == Direction::Receive && !self.awaiting_buffer {
            self.receive_payload_complete(fx);
        } else {
            // The receive side of a transmit payload, which only discards.
            trace!("RX complete for transmit payload - ignored");
        }
    }

    fn header_complete(
        &mut self,
        direction: Direction,
        header: Header,
        ready_asserted: bool,
        fx: &mut Effects,
    ) {
        let status = header.decode(direction);

        // Nothing to read, and the coprocessor has already dropped the ready
        // line.  Retrying now could assert chip-select against a line level
        // the coprocessor doesn't expect, so just close the sequence.
        if direction == Direction::Receive && status.count == 0 && !ready_asserted {
            debug!("Spurious ready - closing receive");
            self.end_sequence(fx);
            self.bus_idle(fx);
            return;
        }

        if !status.serviceable() {
            trace!(
                "Coprocessor not ready ({:?}, {}) - bounce and retry",
                direction,
                status.count
            );
            fx.push(Effect::BounceCs);
            fx.push(Effect::StartHeader(direction));
            return;
        }

        let offered = usize::from(status.count);
        match direction {
            Direction::Transmit => {
                let Some(ctx) = self.tx.as_mut() else {
                    error!("Write header with no transmit context");
                    return;
                };
                let len = ctx.plan_transmit(offered);
                self.stage = if ctx.continuation() {
                    Stage::ContinuePayload
                } else {
                    Stage::EndOfTransfer
                };
                trace!("Transmit burst of {} bytes (window {})", len, offered);
                fx.push(Effect::StartTxPayload {
                    source: ctx.source_ptr(),
                    len,
                });
            }
            Direction::Receive => {
                let Some(ctx) = self.rx.as_mut() else {
                    error!("Read header with no receive context");
                    return;
                };
                let len = ctx.plan_receive(offered);
                self.rx_backlog = offered - len;
                self.stage = if ctx.continuation() {
                    Stage::ContinuePayload
                } else {
                    Stage::EndOfTransfer
                };
                trace!("Receive burst of {} bytes (offered {})", len, offered);
                fx.push(Effect::StartRxPayload {
                    dest: ctx.sink_ptr(),
                    len,
                });
            }
        }
    }

    fn tx_complete(&mut self, fx: &mut Effects) {
        if self.active != Some(Direction::Transmit) || self.stage.is_header() {
            // The transmit side of a header or of a receive payload.
            trace!("TX complete - ignored");
            return;
        }
        let Some(ctx) = self.tx.as_mut() else {
            error!("TX complete with no transmit context");
            return;
        };
        ctx.complete_burst();

        match self.stage {
            Stage::ContinuePayload => {
                trace!("Transmit continues - {} bytes left", ctx.remaining());
                self.stage = Stage::header_for(Direction::Transmit);
                fx.push(Effect::BounceCs);
                fx.push(Effect::StartHeader(Direction::Transmit));
            }
            _ => {
                if let Some(ctx) = self.tx.take() {
                    let len = ctx.moved();
                    debug!("Transmit of {} bytes complete", len);
                    self.end_sequence(fx);
                    fx.push(Effect::Notify(LinkEvent::Sent {
                        buf: ctx.into_buf(),
                        len,
                    }));
                }
                self.bus_idle(fx);
            }
        }
    }

    fn receive_payload_complete(&mut self, fx: &mut Effects) {
        let Some(mut ctx) = self.rx.take() else {
            error!("RX complete with no receive context");
            return;
        };
        ctx.complete_burst();
        let len = ctx.moved();

        match self.stage {
            Stage::ContinuePayload => {
                // The buffer is full but the event isn't.  Hold the bus and
                // wait for the next buffer.
                debug!("Receive buffer full - {} bytes to follow", self.rx_backlog);
                self.awaiting_buffer = true;
                fx.push(Effect::Notify(LinkEvent::Received {
                    buf: ctx.into_buf(),
                    len,
                    more: true,
                }));
            }
            _ => {
                debug!("Receive of {} bytes complete", len);
                self.rx_backlog = 0;
                self.end_sequence(fx);
                fx.push(Effect::NotifyDelay);
                fx.push(Effect::Notify(LinkEvent::Received {
                    buf: ctx.into_buf(),
                    len,
                    more: false,
                }));
                self.bus_idle(fx);
            }
        }
    }

    fn timeout(&mut self, fx: &mut Effects) {
        if self.bus == BusState::Available {
            trace!("Timeout while idle - ignored");
            return;
        }
        warn!("Sequence timeout: {:?} {:?}", self.active, self.stage);
        fx.push(Effect::Notify(LinkEvent::Timeout {
            direction: self.active,
        }));
    }

    // Close the chip-select session and free the bus.
    fn end_sequence(&mut self, fx: &mut Effects) {
        fx.push(Effect::ReleaseCs);
        fx.push(Effect::AllowSleep);
        fx.push(Effect::StopTimeout);
        self.bus = BusState::Available;
        self.active = None;
        self.stage = Stage::EndOfTransfer;
    }

    // The bus just became available.  A pending send goes first, otherwise
    // listen for the coprocessor again if there's somewhere to put its data.
    fn bus_idle(&mut self, fx: &mut Effects) {
        if let Some(ctx) = self.pending.take() {
            debug!("Starting pending send");
            self.begin_transmit(ctx, fx);
        } else if self.rx.is_some() {
            fx.push(Effect::EnableReadyIrq);
            fx.push(Effect::ResampleReadyLine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::READY_CODE;

    fn leak(bytes: &[u8]) -> &'static mut [u8] {
        Box::leak(bytes.to_vec().into_boxed_slice())
    }

    fn step(m: &mut Machine, event: Event) -> std::vec::Vec<Effect> {
        let mut fx = Effects::new();
        m.handle(event, &mut fx).expect("event rejected");
        fx.into_iter().collect()
    }

    fn write_header(window: u16) -> Event {
        Event::RxDmaComplete {
            header: Header::encode(Direction::Transmit, READY_CODE, window),
            ready_asserted: false,
        }
    }

    fn read_header(count: u16, ready_asserted: bool) -> Event {
        Event::RxDmaComplete {
            header: Header::encode(Direction::Receive, READY_CODE, count),
            ready_asserted,
        }
    }

    fn sent_len(fx: &[Effect]) -> Option<usize> {
        fx.iter().find_map(|e| match e {
            Effect::Notify(LinkEvent::Sent { len, .. }) => Some(*len),
            _ => None,
        })
    }

    #[test]
    fn send_when_idle_starts_write_header() {
        let mut m = Machine::new();
        let fx = step(
            &mut m,
            Event::Send {
                buf: leak(&[1, 2, 3]),
                len: 3,
            },
        );
        assert_eq!(
            fx,
            [
                Effect::DisableReadyIrq,
                Effect::AssertCs,
                Effect::StartTimeout,
                Effect::HoldAwake,
                Effect::StartHeader(Direction::Transmit),
            ]
        );
        assert_eq!(m.bus_state(), BusState::Busy);
        assert_eq!(m.stage(), Stage::CheckHeaderForTransmit);
    }

    #[test]
    fn single_burst_send_completes() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::Send {
                buf: leak(&[1, 2, 3]),
                len: 3,
            },
        );

        let fx = step(&mut m, write_header(64));
        assert!(matches!(fx[..], [Effect::StartTxPayload { len: 3, .. }]));
        assert_eq!(m.stage(), Stage::EndOfTransfer);

        // The discarded receive side of the payload means nothing.
        assert!(step(&mut m, read_header(0, false)).is_empty());

        let fx = step(&mut m, Event::TxDmaComplete);
        assert_eq!(fx[..3], [Effect::ReleaseCs, Effect::AllowSleep, Effect::StopTimeout]);
        assert_eq!(sent_len(&fx), Some(3));
        assert_eq!(m.bus_state(), BusState::Available);
    }

    #[test]
    fn not_ready_header_bounces_and_retries() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::Send {
                buf: leak(&[9; 4]),
                len: 4,
            },
        );
        for _ in 0..10 {
            let fx = step(
                &mut m,
                Event::RxDmaComplete {
                    header: Header::new([0xff, 0, 0, 0, 0]),
                    ready_asserted: true,
                },
            );
            assert_eq!(
                fx,
                [Effect::BounceCs, Effect::StartHeader(Direction::Transmit)]
            );
            assert_eq!(m.bus_state(), BusState::Busy);
        }
        // Ready, but no room yet.
        let fx = step(&mut m, write_header(0));
        assert_eq!(fx[0], Effect::BounceCs);
    }

    #[test]
    fn small_window_splits_into_bursts() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::Send {
                buf: leak(&[0; 300]),
                len: 300,
            },
        );
        let mut bounces = 0;
        let mut total = 0;
        loop {
            let fx = step(&mut m, write_header(100));
            let Effect::StartTxPayload { len, .. } = fx[0] else {
                panic!("expected payload, got {:?}", fx);
            };
            total += len;
            let fx = step(&mut m, Event::TxDmaComplete);
            if fx[0] == Effect::BounceCs {
                bounces += 1;
                assert_eq!(m.stage(), Stage::CheckHeaderForTransmit);
            } else {
                assert_eq!(sent_len(&fx), Some(300));
                break;
            }
        }
        assert_eq!(total, 300);
        assert_eq!(bounces, 2);
    }

    #[test]
    fn send_while_busy_waits_for_end_of_transfer() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::Send {
                buf: leak(&[1]),
                len: 1,
            },
        );
        assert!(step(
            &mut m,
            Event::Send {
                buf: leak(&[2, 2]),
                len: 2,
            }
        )
        .is_empty());
        assert!(m.has_pending());

        // A third is refused, with the buffer handed back.
        let mut fx = Effects::new();
        let err = m
            .handle(
                Event::Send {
                    buf: leak(&[3, 3, 3]),
                    len: 3,
                },
                &mut fx,
            )
            .unwrap_err();
        assert_eq!(err.into_buf(), &[3, 3, 3]);

        step(&mut m, write_header(10));
        let fx = step(&mut m, Event::TxDmaComplete);
        assert_eq!(sent_len(&fx), Some(1));
        // The pending send starts straight away with a new session.
        let tail: std::vec::Vec<_> = fx.iter().skip_while(|e| **e != Effect::AssertCs).collect();
        assert_eq!(tail[0], &Effect::AssertCs);
        assert_eq!(m.bus_state(), BusState::Busy);
        assert!(!m.has_pending());

        step(&mut m, write_header(10));
        let fx = step(&mut m, Event::TxDmaComplete);
        assert_eq!(sent_len(&fx), Some(2));
        assert_eq!(m.bus_state(), BusState::Available);
    }

    #[test]
    fn ready_line_needs_receive_buffer() {
        let mut m = Machine::new();
        assert!(step(&mut m, Event::ReadyLine).is_empty());

        let fx = step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 32]),
                len: 32,
            },
        );
        assert_eq!(fx, [Effect::EnableReadyIrq, Effect::ResampleReadyLine]);

        let fx = step(&mut m, Event::ReadyLine);
        assert_eq!(fx.last(), Some(&Effect::StartHeader(Direction::Receive)));
        assert!(fx.contains(&Effect::HoldAwake));

        // Busy now, so another edge is ignored.
        assert!(step(&mut m, Event::ReadyLine).is_empty());
    }

    #[test]
    fn spurious_ready_closes_without_notify() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 32]),
                len: 32,
            },
        );
        step(&mut m, Event::ReadyLine);

        let fx = step(&mut m, read_header(0, false));
        assert_eq!(fx[0], Effect::ReleaseCs);
        assert!(!fx.contains(&Effect::BounceCs));
        assert!(!fx.iter().any(|e| matches!(e, Effect::Notify(_))));
        assert_eq!(m.bus_state(), BusState::Available);
        assert!(m.receive_armed());
    }

    #[test]
    fn zero_count_with_line_high_retries() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 32]),
                len: 32,
            },
        );
        step(&mut m, Event::ReadyLine);
        let fx = step(&mut m, read_header(0, true));
        assert_eq!(
            fx,
            [Effect::BounceCs, Effect::StartHeader(Direction::Receive)]
        );
    }

    #[test]
    fn receive_continues_into_next_buffer() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 8]),
                len: 8,
            },
        );
        step(&mut m, Event::ReadyLine);
        let fx = step(&mut m, read_header(20, true));
        assert!(matches!(fx[..], [Effect::StartRxPayload { len: 8, .. }]));
        assert_eq!(m.stage(), Stage::ContinuePayload);

        let fx = step(&mut m, read_header(0, true));
        assert!(matches!(
            fx[..],
            [Effect::Notify(LinkEvent::Received {
                len: 8,
                more: true,
                ..
            })]
        ));
        // Chip-select stays asserted and the bus stays ours.
        assert_eq!(m.bus_state(), BusState::Busy);

        let fx = step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 8]),
                len: 8,
            },
        );
        assert!(matches!(fx[..], [Effect::StartRxPayload { len: 8, .. }]));
        step(&mut m, read_header(0, true));

        let fx = step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 8]),
                len: 8,
            },
        );
        assert!(matches!(fx[..], [Effect::StartRxPayload { len: 4, .. }]));
        assert_eq!(m.stage(), Stage::EndOfTransfer);

        let fx = step(&mut m, read_header(0, false));
        assert!(fx.contains(&Effect::ReleaseCs));
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::Notify(LinkEvent::Received {
                len: 4,
                more: false,
                ..
            })
        )));
        assert_eq!(m.bus_state(), BusState::Available);
        assert!(!m.receive_armed());
    }

    #[test]
    fn timeout_is_reported_not_handled() {
        let mut m = Machine::new();
        assert!(step(&mut m, Event::Timeout).is_empty());

        step(
            &mut m,
            Event::Send {
                buf: leak(&[1]),
                len: 1,
            },
        );
        let fx = step(&mut m, Event::Timeout);
        assert_eq!(
            fx,
            [Effect::Notify(LinkEvent::Timeout {
                direction: Some(Direction::Transmit)
            })]
        );
        assert_eq!(m.bus_state(), BusState::Busy);
    }

    #[test]
    fn warm_init_keeps_armed_receive_buffer() {
        let mut m = Machine::new();
        step(
            &mut m,
            Event::EventRequest {
                buf: leak(&[0; 4]),
                len: 4,
            },
        );
        step(
            &mut m,
            Event::Send {
                buf: leak(&[1]),
                len: 1,
            },
        );

        assert_eq!(m.buffers_held(), 2);

        let fx = step(&mut m, Event::Init(InitMode::Warm));
        assert_eq!(m.buffers_held(), 1);
        let reclaimed = fx
            .iter()
            .filter(|e| matches!(e, Effect::Notify(LinkEvent::Reclaimed { .. })))
            .count();
        assert_eq!(reclaimed, 1);
        assert!(fx.contains(&Effect::EnableReadyIrq));
        assert!(m.receive_armed());

        let fx = step(&mut m, Event::Init(InitMode::Cold));
        assert!(fx
            .iter()
            .any(|e| matches!(e, Effect::Notify(LinkEvent::Reclaimed { buf }) if buf.len() == 4)));
        assert!(!m.receive_armed());
        assert_eq!(m.buffers_held(), 0);
    }

    #[test]
    fn bad_lengths_are_refused() {
        let mut m = Machine::new();
        let mut fx = Effects::new();
        let err = m
            .handle(
                Event::Send {
                    buf: leak(&[1, 2]),
                    len: 0,
                },
                &mut fx,
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::EmptyRequest(_)));
        let err = m
            .handle(
                Event::EventRequest {
                    buf: leak(&[1, 2]),
                    len: 3,
                },
                &mut fx,
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::LengthExceedsBuffer(_)));
        assert!(fx.is_empty());
        assert_eq!(m.bus_state(), BusState::Available);
    }
}
