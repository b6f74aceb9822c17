//! Relay configuration loaded from TOML
//!
//! ```toml
//! baud = 115200
//! module_clock = 50000000
//! listen = "127.0.0.1:5000"
//! flash = "tower-flash.bin"
//! sensitive_mode = false
//!
//! [simulation]
//! frequency = 50.0
//! currents = [0.5, 0.5, 0.5]
//! ```
//!
//! Every key is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tower_chip::clock::{BUS_CLOCK_HZ, DEFAULT_BAUD_RATE};
use tower_chip::relay::{
    NOMINAL_FREQUENCY, PHASE_COUNT, TRACKING_FREQUENCY_MAX, TRACKING_FREQUENCY_MIN,
};

use crate::error::{DriverError, Result};
use crate::uart::BaudDivisor;

/// Runtime settings of the emulated Tower
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// UART baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// UART module clock in Hz
    #[serde(default = "default_module_clock")]
    pub module_clock: u32,

    /// Address the serial bridge listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// File holding the flash data phrase; volatile flash when unset
    #[serde(default)]
    pub flash: Option<PathBuf>,

    /// Block timing while the line frequency is outside 47.5–52.5 Hz
    #[serde(default)]
    pub sensitive_mode: bool,

    /// Initial simulated line currents
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Simulated analog inputs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Line frequency (Hz)
    #[serde(default = "default_frequency")]
    pub frequency: f32,

    /// RMS current of each phase (amps)
    #[serde(default = "default_currents")]
    pub currents: [f32; PHASE_COUNT],
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_module_clock() -> u32 {
    BUS_CLOCK_HZ
}

fn default_listen() -> String {
    "127.0.0.1:5000".into()
}

fn default_frequency() -> f32 {
    NOMINAL_FREQUENCY
}

fn default_currents() -> [f32; PHASE_COUNT] {
    [0.5; PHASE_COUNT]
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            currents: default_currents(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            baud: default_baud(),
            module_clock: default_module_clock(),
            listen: default_listen(),
            flash: None,
            sensitive_mode: false,
            simulation: SimulationConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails [`RelayConfig::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| DriverError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or its contents are invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check that the settings describe a working board
    ///
    /// # Errors
    ///
    /// Returns error if the baud rate is unreachable, the simulated
    /// frequency is outside the tracking range, or a current is negative.
    pub fn validate(&self) -> Result<()> {
        BaudDivisor::new(self.baud, self.module_clock)?;

        let frequency = self.simulation.frequency;
        if !(TRACKING_FREQUENCY_MIN..=TRACKING_FREQUENCY_MAX).contains(&frequency) {
            return Err(DriverError::config(format!(
                "simulated frequency {frequency} Hz outside \
                 {TRACKING_FREQUENCY_MIN}-{TRACKING_FREQUENCY_MAX} Hz"
            )));
        }
        if let Some(amps) = self
            .simulation
            .currents
            .iter()
            .find(|a| !a.is_finite() || **a < 0.0)
        {
            return Err(DriverError::config(format!(
                "simulated current {amps} A is not a non-negative number"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.module_clock, 50_000_000);
        assert!(config.flash.is_none());
    }

    #[test]
    fn full_document() {
        let config = RelayConfig::from_toml_str(
            r#"
            baud = 38400
            listen = "0.0.0.0:7000"
            flash = "/tmp/tower.bin"
            sensitive_mode = true

            [simulation]
            frequency = 49.0
            currents = [0.2, 3.5, 0.2]
            "#,
        )
        .unwrap();
        assert_eq!(config.baud, 38400);
        assert_eq!(config.listen, "0.0.0.0:7000");
        assert_eq!(config.flash, Some(PathBuf::from("/tmp/tower.bin")));
        assert!(config.sensitive_mode);
        assert!((config.simulation.currents[1] - 3.5).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = RelayConfig::from_toml_str("parity = \"even\"").unwrap_err();
        assert!(matches!(err, DriverError::Config { .. }));
    }

    #[test]
    fn unreachable_baud_rejected() {
        let err = RelayConfig::from_toml_str("baud = 10").unwrap_err();
        assert!(matches!(err, DriverError::InvalidBaud { baud: 10, .. }));
    }

    #[test]
    fn frequency_and_current_checked() {
        assert!(RelayConfig::from_toml_str("[simulation]\nfrequency = 90.0").is_err());
        assert!(RelayConfig::from_toml_str("[simulation]\ncurrents = [1.0, -1.0, 1.0]").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        std::fs::write(&path, "sensitive_mode = true\n").unwrap();
        assert!(RelayConfig::from_toml_file(&path).unwrap().sensitive_mode);
        assert!(RelayConfig::from_toml_file(dir.path().join("missing.toml")).is_err());
    }
}
