//! Host-side emulation of the K70 Tower directional overcurrent relay.
//!
//! The firmware's peripherals are modelled on the host so the relay runs
//! unchanged on a workstation and in CI:
//!
//! ```text
//! UART2   → Uart (Rx/Tx FIFOs, baud divisor) bridged to any byte stream
//! PIT0/1  → Pit (sampling semaphores) + Clock (millisecond time base)
//! Flash   → Flash (one 8-byte phrase, optional backing file)
//! ADC/DAC → AnalogBackend (SimulatedAnalog synthesises three-phase currents)
//! ```
//!
//! On top sit the relay itself ([`RelayState`], [`Relay`]) and the Tower
//! protocol command set ([`CommandHandler`]).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tower_driver::{Clock, Relay, RelayConfig, SimulatedAnalog};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Clock::monotonic();
//! let analog = Arc::new(SimulatedAnalog::balanced(clock.clone(), 0.5));
//! let relay = Relay::start(&RelayConfig::default(), analog.clone(), clock)?;
//!
//! analog.set_current(0, 8.0)?; // phase A fault
//! std::thread::sleep(std::time::Duration::from_secs(4));
//! println!("trips: {}", relay.state().times_tripped());
//! relay.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Trip timing
//!
//! | Curve | k | a | 2 A | 10 A | 20 A |
//! |-------|---|---|-----|------|------|
//! | Inverse | 0.14 | 0.02 | 10.03 s | 2.97 s | 2.27 s |
//! | Very inverse | 13.5 | 1 | 13.5 s | 1.5 s | 0.71 s |
//! | Extremely inverse | 80 | 2 | 26.7 s | 0.81 s | 0.20 s |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod analog;
pub mod command;
mod config;
pub mod dsp;
mod error;
pub mod fifo;
pub mod flash;
pub mod idmt;
pub mod packet;
pub mod pit;
pub mod relay;
pub mod sync;
pub mod uart;

pub use analog::{AnalogBackend, AnalogInput, SimulatedAnalog, Waveform};
pub use command::CommandHandler;
pub use config::{RelayConfig, SimulationConfig};
pub use error::{CommandError, DriverError, PacketError, Result};
pub use fifo::Fifo;
pub use flash::{Flash, FlashVar};
pub use idmt::{
    formula_trip_time_ms, table_trip_time_ms, trip_time_ms, Characteristic, TimerEvent,
    TimerState, TripTimer,
};
pub use packet::{Packet, PacketFramer};
pub use pit::{Clock, Pit};
pub use relay::{PhaseReading, Relay, RelayState};
pub use sync::Semaphore;
pub use uart::{BaudDivisor, PacketPort, SerialLink, Uart};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AnalogBackend, Characteristic, Clock, CommandHandler, DriverError, Packet, PacketPort,
        Relay, RelayConfig, RelayState, Result, SimulatedAnalog, TripTimer, Uart,
    };
}
