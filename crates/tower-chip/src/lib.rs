//! Board and protocol model for the K70 Tower directional overcurrent relay.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the target: Tower serial protocol command bytes, the flash
//! data phrase, ADC/DAC scaling, PIT and UART clock arithmetic, and the IDMT
//! lookup tables the relay trips against.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`protocol`] | Command bytes, ACK bit, packet geometry, firmware version |
//! | [`flash`] | Data phrase address and size, erased value |
//! | [`analog`] | Channel counts, window size, counts ↔ volts ↔ amps scaling |
//! | [`relay`] | Pickup current, frequency band, phase count |
//! | [`idmt`] | Inverse / very inverse / extremely inverse trip-time tables |
//! | [`clock`] | Bus clock, baud rate and PIT load arithmetic |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analog;
pub mod clock;
pub mod flash;
pub mod idmt;
pub mod protocol;
pub mod relay;
