//! Command handling for received Tower packets
//!
//! [`CommandHandler::execute`] runs one command and returns its replies.
//! [`CommandHandler::handle`] wraps it with the acknowledgement rules: a
//! request with bit 7 set is echoed back with the bit set on success and
//! cleared on failure. Partial replies of a failed command are dropped.

use std::sync::Arc;

use tower_chip::analog::NB_INPUTS;
use tower_chip::flash::DATA_SIZE;
use tower_chip::protocol::{
    access, command, dor, dor_values, FLASH_ERASE_ADDRESS, VERSION_MAJOR, VERSION_MINOR,
    VERSION_REQUEST_END, VERSION_REQUEST_TAG, VERSION_TAG,
};
use tower_chip::relay::PHASE_COUNT;
use tracing::{debug, warn};

use crate::dsp::split_decimal;
use crate::error::{CommandError, Result};
use crate::idmt::Characteristic;
use crate::packet::Packet;
use crate::relay::RelayState;

type CommandResult<T> = std::result::Result<T, CommandError>;

/// Executes received packets against the relay state
#[derive(Debug, Clone)]
pub struct CommandHandler {
    state: Arc<RelayState>,
}

impl CommandHandler {
    /// Handler over `state`
    pub const fn new(state: Arc<RelayState>) -> Self {
        Self { state }
    }

    /// Relay state commands act on
    pub const fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Execute `packet` and return everything to send back, ACK/NAK included
    pub fn handle(&self, packet: &Packet) -> Vec<Packet> {
        let request = packet.without_ack();
        let outcome = self.execute(&request);
        let success = outcome.is_ok();

        let mut replies = outcome.unwrap_or_else(|e| {
            warn!("Command {request}: {e}");
            Vec::new()
        });
        if packet.is_ack_requested() {
            replies.push(if success { request.with_ack() } else { request });
        }
        replies
    }

    /// Execute one command (ACK bit already stripped)
    ///
    /// # Errors
    ///
    /// Returns error if the command is unknown, its parameters are invalid
    /// or the peripheral access it needs fails.
    pub fn execute(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        debug!("Executing {request}");
        match request.command {
            command::STARTUP => self.startup(request),
            command::VERSION => Self::version(request),
            command::TOWER_NUMBER => self.tower_number(request),
            command::TOWER_MODE => self.tower_mode(request),
            command::FLASH_PROGRAM => self.flash_program(request),
            command::FLASH_READ => self.flash_read(request),
            command::DOR => self.dor(request),
            command::ANALOG_GET => self.analog_get(request),
            command::DOR_VALUES => self.dor_values(request),
            command::SET_CHAR => self.set_char(request),
            command::SET_MODE => self.set_mode(request),
            other => Err(CommandError::UnknownCommand { command: other }),
        }
    }

    /// Startup, version, tower number and tower mode packets
    ///
    /// Sent unsolicited at power-up and in answer to a startup request.
    ///
    /// # Errors
    ///
    /// Returns error if the stored number or mode cannot be read.
    pub fn startup_packets(&self) -> Result<[Packet; 4]> {
        Ok([
            Packet::new(command::STARTUP, 0, 0, 0),
            version_packet(),
            self.number_packet()?,
            self.mode_packet()?,
        ])
    }

    // ── Tower standard ───────────────────────────────────────────────────────

    fn startup(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        expect_params(request, [0, 0, 0])?;
        Ok(self.startup_packets()?.to_vec())
    }

    fn version(request: &Packet) -> CommandResult<Vec<Packet>> {
        expect_params(request, [VERSION_TAG, VERSION_REQUEST_TAG, VERSION_REQUEST_END])?;
        Ok(vec![version_packet()])
    }

    fn tower_number(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        match request.parameter1 {
            access::GET => {
                expect_params(request, [access::GET, 0, 0])?;
                Ok(vec![self.number_packet()?])
            }
            access::SET => {
                self.state.set_tower_number(request.half_word())?;
                Ok(Vec::new())
            }
            _ => Err(invalid(request)),
        }
    }

    fn tower_mode(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        match request.parameter1 {
            access::GET => {
                expect_params(request, [access::GET, 0, 0])?;
                Ok(vec![self.mode_packet()?])
            }
            access::SET => {
                self.state.set_tower_mode(request.half_word())?;
                Ok(Vec::new())
            }
            _ => Err(invalid(request)),
        }
    }

    fn flash_program(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let address = request.parameter1;
        if request.parameter2 != 0 {
            return Err(invalid(request));
        }
        if address == FLASH_ERASE_ADDRESS {
            self.state.flash_erase()?;
        } else if usize::from(address) < DATA_SIZE {
            self.state
                .flash_program(usize::from(address), request.parameter3)?;
        } else {
            return Err(invalid(request));
        }
        Ok(Vec::new())
    }

    fn flash_read(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let address = request.parameter1;
        if usize::from(address) >= DATA_SIZE {
            return Err(invalid(request));
        }
        expect_params(request, [address, 0, 0])?;
        let byte = self.state.flash_read(usize::from(address))?;
        Ok(vec![Packet::new(command::FLASH_READ, address, 0, byte)])
    }

    // ── Directional overcurrent relay ────────────────────────────────────────

    fn dor(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let selector = request.parameter1;
        if selector == dor::CHARACTERISTIC {
            return match request.parameter2 {
                dor::CHARACTERISTIC_GET if request.parameter3 == 0 => Ok(vec![Packet::new(
                    command::DOR,
                    dor::CHARACTERISTIC,
                    dor::CHARACTERISTIC_GET,
                    self.state.characteristic().as_byte(),
                )]),
                dor::CHARACTERISTIC_SET => {
                    let characteristic = Characteristic::try_from(request.parameter3)
                        .map_err(|_| invalid(request))?;
                    self.state.set_characteristic(characteristic)?;
                    Ok(Vec::new())
                }
                _ => Err(invalid(request)),
            };
        }

        if request.parameter23() != 0 {
            return Err(invalid(request));
        }
        match selector {
            dor::CURRENTS => (0..PHASE_COUNT)
                .map(|phase| -> CommandResult<Packet> {
                    #[allow(clippy::cast_possible_truncation)]
                    let phase = phase as u8;
                    let (whole, hundredths) = split_decimal(self.state.irms(phase)?, 100.0);
                    Ok(Packet::new(command::DOR_CURRENT, phase, whole, hundredths))
                })
                .collect(),
            dor::FREQUENCY => {
                let frequency = self.state.line_frequency().unwrap_or(0.0);
                let (whole, hundredths) = split_decimal(frequency, 100.0);
                Ok(vec![Packet::new(
                    command::DOR,
                    dor::FREQUENCY,
                    whole,
                    hundredths,
                )])
            }
            dor::TIMES_TRIPPED => Ok(vec![Packet::with_half_word(
                command::DOR,
                dor::TIMES_TRIPPED,
                self.state.times_tripped(),
            )]),
            dor::LAST_FAULT => Ok(vec![Packet::new(
                command::DOR,
                dor::LAST_FAULT,
                self.state.last_fault(),
                0,
            )]),
            _ => Err(invalid(request)),
        }
    }

    // ── Diagnostics ──────────────────────────────────────────────────────────

    fn analog_get(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let channel = request.parameter1;
        if usize::from(channel) >= NB_INPUTS {
            return Err(invalid(request));
        }
        expect_params(request, [channel, 0, 0])?;
        let current = self.state.instantaneous_current(channel)?;
        let (magnitude, _) = split_decimal(current.abs(), 1.0);
        let positive = u8::from(current >= 0.0);
        Ok(vec![Packet::new(
            command::ANALOG_GET,
            channel,
            magnitude,
            positive,
        )])
    }

    fn dor_values(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let reply = |value: u8| -> CommandResult<Vec<Packet>> {
            Ok(vec![Packet::new(command::DOR_VALUES, value, 0, 0)])
        };
        match request.parameter1 {
            dor_values::CHARACTERISTIC => reply(self.state.characteristic().as_byte()),
            dor_values::FREQUENCY => {
                let channel = request.parameter2;
                if usize::from(channel) >= PHASE_COUNT || request.parameter3 != 0 {
                    return Err(invalid(request));
                }
                let frequency = self.state.frequency(channel)?.unwrap_or(0.0);
                let (whole, tenths) = split_decimal(frequency, 10.0);
                Ok(vec![Packet::new(command::DOR_VALUES, whole, tenths, channel)])
            }
            dor_values::TIMES_TRIPPED => {
                let [lo, _] = self.state.times_tripped().to_le_bytes();
                reply(lo)
            }
            dor_values::LAST_FAULT => reply(self.state.last_fault()),
            dor_values::SENSITIVE_MODE => reply(u8::from(self.state.sensitive_mode())),
            _ => Err(invalid(request)),
        }
    }

    fn set_char(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let characteristic =
            Characteristic::try_from(request.parameter1).map_err(|_| invalid(request))?;
        expect_params(request, [request.parameter1, 0, 0])?;
        self.state.set_characteristic(characteristic)?;
        Ok(Vec::new())
    }

    fn set_mode(&self, request: &Packet) -> CommandResult<Vec<Packet>> {
        let enable = match request.parameter1 {
            0 => false,
            1 => true,
            _ => return Err(invalid(request)),
        };
        expect_params(request, [request.parameter1, 0, 0])?;
        self.state.set_sensitive_mode(enable);
        Ok(Vec::new())
    }

    fn number_packet(&self) -> Result<Packet> {
        Ok(Packet::with_half_word(
            command::TOWER_NUMBER,
            access::GET,
            self.state.tower_number()?,
        ))
    }

    fn mode_packet(&self) -> Result<Packet> {
        Ok(Packet::with_half_word(
            command::TOWER_MODE,
            access::GET,
            self.state.tower_mode()?,
        ))
    }
}

const fn version_packet() -> Packet {
    Packet::new(command::VERSION, VERSION_TAG, VERSION_MAJOR, VERSION_MINOR)
}

fn invalid(request: &Packet) -> CommandError {
    CommandError::InvalidParameters {
        command: request.command,
        parameters: [request.parameter1, request.parameter2, request.parameter3],
    }
}

fn expect_params(request: &Packet, expected: [u8; 3]) -> CommandResult<()> {
    let actual = [request.parameter1, request.parameter2, request.parameter3];
    if actual == expected {
        Ok(())
    } else {
        Err(invalid(request))
    }
}
