//! Chip-select line driver.
//!
//! Chip-select is active low.  Besides assert and release, the coprocessor
//! needs a "bounce" - a deassert, a minimum high pulse, and a reassert - to
//! re-evaluate whether it is ready after returning a not-ready header.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Drives the chip-select pin.
///
/// The coprocessor needs the line high for at least `pulse_ns` between a
/// release and the next assert, whether that is a bounce or the start of the
/// next session.  `assert()` always honours it.
pub struct ChipSelect<P> {
    pin: P,
    asserted: bool,
    pulse_ns: u32,
}

impl<P: OutputPin> ChipSelect<P> {
    /// Takes the pin and releases the line.
    pub fn new(pin: P, pulse_ns: u32) -> Self {
        let mut cs = Self {
            pin,
            asserted: true,
            pulse_ns,
        };
        cs.release();
        cs
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    /// Assert the line, after the minimum high time.  Busy-waits, so the
    /// pulse is expected to be in the order of a microsecond.
    pub fn assert<D: DelayNs>(&mut self, delay: &mut D) {
        if self.asserted {
            return;
        }
        delay.delay_ns(self.pulse_ns);
        if self.pin.set_low().is_err() {
            error!("Failed to assert chip-select");
        }
        self.asserted = true;
    }

    pub fn release(&mut self) {
        if self.pin.set_high().is_err() {
            error!("Failed to release chip-select");
        }
        self.asserted = false;
    }

    /// Deassert for at least the minimum pulse, then reassert.
    pub fn bounce<D: DelayNs>(&mut self, delay: &mut D) {
        self.release();
        self.assert(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::vec::Vec;

    // Records every level the pin is driven to - true is high.
    #[derive(Default)]
    struct Pin {
        levels: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.levels.push(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Delay {
        waited_ns: u32,
    }

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.waited_ns += ns;
        }
    }

    #[test]
    fn new_releases_line() {
        let cs = ChipSelect::new(Pin::default(), 1_000);
        assert!(!cs.is_asserted());
        assert_eq!(cs.pin.levels, [true]);
    }

    #[test]
    fn assert_waits_minimum_high_time() {
        let mut cs = ChipSelect::new(Pin::default(), 800);
        let mut delay = Delay::default();
        cs.assert(&mut delay);
        assert_eq!(delay.waited_ns, 800);

        // Already asserted - no edge and no wait.
        cs.assert(&mut delay);
        assert_eq!(delay.waited_ns, 800);
        assert_eq!(cs.pin.levels, [true, false]);
    }

    #[test]
    fn bounce_pulses_high_for_minimum_width() {
        let mut cs = ChipSelect::new(Pin::default(), 1_500);
        let mut delay = Delay::default();
        cs.assert(&mut delay);
        cs.bounce(&mut delay);
        assert!(cs.is_asserted());
        assert_eq!(cs.pin.levels, [true, false, true, false]);
        assert_eq!(delay.waited_ns, 3_000);
    }
}
