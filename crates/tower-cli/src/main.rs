//! `tower`: command-line interface for the emulated K70 Tower relay.
//!
//! ```text
//! USAGE:
//!   tower run [--config FILE] [--listen ADDR] [--fault PHASE=AMPS]... [--clients N]
//!                                      Run the relay, serving one TCP client at a time
//!   tower encode CMD P1 P2 P3 [--ack]  Print the 5-byte frame of a packet
//!   tower decode HEX...                Decode frames from a hex byte stream
//!   tower trip-time --curve C AMPS     Trip time for a current
//!   tower curves                       Print the IDMT lookup tables
//!   tower baud --rate N [--clock HZ]   UART divisor for a baud rate
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tower_chip::clock::BUS_CLOCK_HZ;
use tower_chip::idmt::TABLE_CURRENTS;
use tower_chip::protocol::ACK_MASK;
use tower_chip::relay::PHASE_COUNT;
use tower_driver::{
    formula_trip_time_ms, table_trip_time_ms, trip_time_ms, BaudDivisor, Characteristic, Clock,
    Packet, PacketFramer, Relay, RelayConfig, SimulatedAnalog, Uart,
};

#[derive(Parser)]
#[command(name = "tower", about = "K70 Tower directional overcurrent relay emulator", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the relay with simulated line currents and bridge its UART to TCP.
    Run {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Address to listen on (overrides the configuration).
        #[arg(long)]
        listen: Option<String>,
        /// Flash image file (overrides the configuration).
        #[arg(long)]
        flash: Option<PathBuf>,
        /// UART baud rate (overrides the configuration).
        #[arg(long)]
        baud: Option<u32>,
        /// Block timing while the frequency is outside 47.5–52.5 Hz.
        #[arg(long)]
        sensitive: bool,
        /// Simulated line frequency in Hz.
        #[arg(long)]
        frequency: Option<f32>,
        /// Inject a fault current, e.g. `--fault 0=12.5` (repeatable).
        #[arg(long, value_parser = parse_fault)]
        fault: Vec<(u8, f32)>,
        /// Stop after serving this many clients (default: serve forever).
        #[arg(long)]
        clients: Option<usize>,
    },
    /// Encode a packet as its wire frame.
    Encode {
        /// Command byte (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_byte)]
        command: u8,
        /// First parameter.
        #[arg(value_parser = parse_byte)]
        parameter1: u8,
        /// Second parameter.
        #[arg(value_parser = parse_byte)]
        parameter2: u8,
        /// Third parameter.
        #[arg(value_parser = parse_byte)]
        parameter3: u8,
        /// Request an acknowledgement.
        #[arg(long)]
        ack: bool,
    },
    /// Decode packets from hex bytes (whitespace optional).
    Decode {
        /// Hex bytes, e.g. `04 00 00 00 04` or `0400000004`.
        #[arg(required = true)]
        hex: Vec<String>,
    },
    /// Trip time of a characteristic at a given current.
    TripTime {
        /// inverse, very or extremely.
        #[arg(long, default_value = "inverse")]
        curve: Characteristic,
        /// RMS current in amps.
        amps: f32,
    },
    /// Print the three IDMT lookup tables.
    Curves,
    /// Compute the UART baud divisor.
    Baud {
        /// Baud rate.
        #[arg(long, default_value_t = 115_200)]
        rate: u32,
        /// Module clock in Hz.
        #[arg(long, default_value_t = BUS_CLOCK_HZ)]
        clock: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            config,
            listen,
            flash,
            baud,
            sensitive,
            frequency,
            fault,
            clients,
        } => {
            let mut cfg = match config {
                Some(path) => RelayConfig::from_toml_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RelayConfig::default(),
            };
            if let Some(listen) = listen {
                cfg.listen = listen;
            }
            if flash.is_some() {
                cfg.flash = flash;
            }
            if let Some(baud) = baud {
                cfg.baud = baud;
            }
            if let Some(frequency) = frequency {
                cfg.simulation.frequency = frequency;
            }
            cfg.sensitive_mode |= sensitive;
            for (phase, amps) in fault {
                cfg.simulation.currents[usize::from(phase)] = amps;
            }
            cfg.validate()?;
            cmd_run(&cfg, clients)?;
        }
        Cmd::Encode {
            command,
            parameter1,
            parameter2,
            parameter3,
            ack,
        } => {
            let command = if ack { command | ACK_MASK } else { command };
            cmd_encode(Packet::new(command, parameter1, parameter2, parameter3));
        }
        Cmd::Decode { hex } => cmd_decode(&hex)?,
        Cmd::TripTime { curve, amps } => cmd_trip_time(curve, amps)?,
        Cmd::Curves => cmd_curves(),
        Cmd::Baud { rate, clock } => cmd_baud(rate, clock)?,
    }

    Ok(())
}

fn cmd_run(config: &RelayConfig, clients: Option<usize>) -> Result<()> {
    let clock = Clock::monotonic();
    let analog = Arc::new(SimulatedAnalog::new(clock.clone()));
    analog.set_balanced(0.0, config.simulation.frequency);
    for (phase, &amps) in config.simulation.currents.iter().enumerate() {
        analog.set_current(u8::try_from(phase)?, amps)?;
    }

    let listener = TcpListener::bind(&config.listen)
        .with_context(|| format!("binding {}", config.listen))?;
    let relay = Relay::start(config, analog, clock).context("starting relay")?;

    println!("Tower relay listening on {}", listener.local_addr()?);
    println!(
        "  characteristic {}  sensitive mode {}  trips recorded {}",
        relay.state().characteristic(),
        if relay.state().sensitive_mode() { "on" } else { "off" },
        relay.state().times_tripped()
    );

    let served = serve(&listener, relay.uart(), clients);
    relay.shutdown();
    served
}

/// Bridge accepted clients to the UART one at a time
///
/// Returns after `limit` clients, or with the first accept error.
fn serve(listener: &TcpListener, uart: &Arc<Uart>, limit: Option<usize>) -> Result<()> {
    let mut served = 0;
    while limit != Some(served) {
        let (stream, peer) = listener.accept().context("accepting client")?;
        info!("client {peer} connected");
        let reader = stream.try_clone()?;
        let dropped = serve_client(uart, reader, stream)?;
        if dropped > 0 {
            warn!("client {peer} hung up with {dropped} byte(s) unsent; discarded");
        }
        info!("client {peer} disconnected");
        served += 1;
    }
    Ok(())
}

/// Run one serial link until the client hangs up
///
/// Whatever is left in the Tx FIFO belongs to that client and is discarded
/// so the next one starts clean. Returns the number of bytes dropped.
fn serve_client<R, W>(uart: &Arc<Uart>, reader: R, writer: W) -> Result<usize>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    uart.attach(reader, writer)?.wait();
    Ok(uart.drain_transmit().len())
}

fn cmd_encode(packet: Packet) {
    let frame: Vec<String> = packet.to_bytes().iter().map(|b| format!("{b:02X}")).collect();
    println!("{}", frame.join(" "));
    println!("{packet}");
}

fn cmd_decode(hex: &[String]) -> Result<()> {
    let digits: String = hex.concat().chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        bail!("input is not hex");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    let bytes = (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .context("invalid hex")?;

    let mut framer = PacketFramer::new();
    let packets = framer.extend(&bytes);
    for packet in &packets {
        let ack = if packet.is_ack_requested() { "  [ACK]" } else { "" };
        println!("{packet}{ack}");
    }
    if framer.discarded() > 0 {
        println!("{} byte(s) discarded while resynchronising", framer.discarded());
    }
    if framer.pending() > 0 {
        println!("{} trailing byte(s) without a complete frame", framer.pending());
    }
    if packets.is_empty() {
        bail!("no valid packet found");
    }
    Ok(())
}

fn cmd_trip_time(curve: Characteristic, amps: f32) -> Result<()> {
    let Some(ms) = trip_time_ms(curve, amps) else {
        println!("{curve}: {amps} A is below pickup, no trip");
        return Ok(());
    };
    let table = table_trip_time_ms(curve, amps).context("table lookup")?;
    let (k, a) = curve.constants();
    println!("{curve} (k = {k}, a = {a}) at {amps} A");
    println!("  curve  : {ms} ms");
    println!("  table  : {table} ms (linear interpolation)");
    println!("  formula: {:.1} ms (unclamped)", formula_trip_time_ms(curve, amps));
    Ok(())
}

fn cmd_curves() {
    print!("{:>6}", "I (A)");
    for curve in Characteristic::ALL {
        print!("  {:>18}", curve.to_string());
    }
    println!();
    for (i, amps) in TABLE_CURRENTS.iter().enumerate() {
        print!("{amps:>6.2}");
        for curve in Characteristic::ALL {
            print!("  {:>15} ms", curve.table()[i]);
        }
        println!();
    }
}

fn cmd_baud(rate: u32, clock: u32) -> Result<()> {
    let divisor = BaudDivisor::new(rate, clock)?;
    let actual = divisor.actual_baud();
    println!("Baud {rate} from {clock} Hz");
    println!("  SBR  : {} (BDH {:#04x}, BDL {:#04x})", divisor.sbr, divisor.bdh(), divisor.bdl());
    println!("  BRFA : {}/32", divisor.brfa);
    println!(
        "  Actual {actual:.1} baud ({:+.3}%)",
        (actual - f64::from(rate)) / f64::from(rate) * 100.0
    );
    Ok(())
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None if s.len() == 3 && s.starts_with('\'') && s.ends_with('\'') => {
            return Ok(s.as_bytes()[1]);
        }
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}' is not a byte: {e}"))
}

fn parse_fault(s: &str) -> Result<(u8, f32), String> {
    let (phase, amps) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PHASE=AMPS, got '{s}'"))?;
    let phase: u8 = phase
        .trim()
        .parse()
        .map_err(|e| format!("bad phase '{phase}': {e}"))?;
    if usize::from(phase) >= PHASE_COUNT {
        return Err(format!("phase {phase} out of range (0-{})", PHASE_COUNT - 1));
    }
    let amps: f32 = amps
        .trim()
        .parse()
        .map_err(|e| format!("bad current '{amps}': {e}"))?;
    Ok((phase, amps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tower_chip::clock::DEFAULT_BAUD_RATE;
    use tower_chip::protocol::command;

    /// Link whose peer is gone: every write queues a late reply, then fails
    struct HungUp(Arc<Uart>);

    impl Write for HungUp {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            for byte in Packet::new(command::TOWER_MODE, 1, 1, 0).to_bytes() {
                self.0.out_char(byte).map_err(io::Error::other)?;
            }
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn replies_do_not_outlive_their_client() {
        let uart = Arc::new(Uart::new(DEFAULT_BAUD_RATE, BUS_CLOCK_HZ).unwrap());
        for byte in Packet::new(command::STARTUP, 0, 0, 0).to_bytes() {
            uart.out_char(byte).unwrap();
        }
        let writer = HungUp(Arc::clone(&uart));
        let dropped = serve_client(&uart, io::empty(), writer).unwrap();
        assert!(dropped >= 5, "dropped {dropped}");
        assert_eq!(uart.line_transmit(), None);
    }

    #[test]
    fn serves_a_limited_number_of_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let uart = Arc::new(Uart::new(DEFAULT_BAUD_RATE, BUS_CLOCK_HZ).unwrap());
        let clients = std::thread::spawn(move || {
            for _ in 0..2 {
                drop(std::net::TcpStream::connect(addr).unwrap());
            }
        });
        serve(&listener, &uart, Some(2)).unwrap();
        clients.join().unwrap();
    }

    #[test]
    fn bytes_in_every_notation() {
        assert_eq!(parse_byte("0x70"), Ok(0x70));
        assert_eq!(parse_byte("112"), Ok(112));
        assert_eq!(parse_byte("'v'"), Ok(b'v'));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0xZZ").is_err());
    }

    #[test]
    fn fault_argument() {
        assert_eq!(parse_fault("2=12.5"), Ok((2, 12.5)));
        assert!(parse_fault("3=1").is_err());
        assert!(parse_fault("1:5").is_err());
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from(["tower", "trip-time", "--curve", "very", "10"]).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::TripTime {
                curve: Characteristic::VeryInverse,
                ..
            }
        ));
        let cli = Cli::try_parse_from(["tower", "run", "--fault", "0=8", "--fault", "1=3"]).unwrap();
        let Cmd::Run { fault, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(fault.len(), 2);
    }

    #[test]
    fn decode_rejects_odd_input() {
        assert!(cmd_decode(&["0400000".into()]).is_err());
        assert!(cmd_decode(&["04 00 00 00 04".into()]).is_ok());
    }
}
