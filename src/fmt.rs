//! Logging macros used throughout the crate.
//!
//! On the Pico everything is logged with defmt over RTT.  The library is also
//! exercised on the host, where there is no defmt global logger, so these
//! macros forward to `defmt` (feature `defmt`), `log` (feature `log`) or to
//! nothing at all.
//!
//! Format strings must therefore be valid for both defmt and core::fmt - use
//! `{}` for integers and `{:?}` for this crate's types.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(unused_macros)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("Features 'defmt' and 'log' cannot be enabled simultaneously");

macro_rules! log_at {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        log_at!(trace, $s $(, $x)*)
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        log_at!(debug, $s $(, $x)*)
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        log_at!(info, $s $(, $x)*)
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        log_at!(warn, $s $(, $x)*)
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        log_at!(error, $s $(, $x)*)
    };
}
