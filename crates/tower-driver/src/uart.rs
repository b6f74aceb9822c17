//! UART2 emulation: baud generator, Rx/Tx FIFOs and the serial line bridge
//!
//! The firmware side reads from the receive FIFO and writes into the transmit
//! FIFO. The line side is a byte stream (TCP socket, pty, serial device)
//! serviced by two pump threads that play the role of the receive and
//! transmit interrupt handlers.

use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tower_chip::clock;
use tracing::{debug, info, warn};

use crate::error::{DriverError, Result};
use crate::fifo::Fifo;
use crate::packet::{Packet, PacketFramer};

/// How long the transmit pump waits for a byte before checking for shutdown.
const TX_POLL: Duration = Duration::from_millis(50);

/// UART baud rate generator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudDivisor {
    /// 13-bit SBR divisor
    pub sbr: u16,
    /// 5-bit fine adjust (thirty-seconds of a divisor step)
    pub brfa: u8,
    module_clock: u32,
}

impl BaudDivisor {
    /// Compute the divisor for `baud` from `module_clock`
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidBaud`] when the SBR field would be zero
    /// or wider than 13 bits.
    pub fn new(baud: u32, module_clock: u32) -> Result<Self> {
        let (sbr, brfa) = clock::uart_divisor(baud, module_clock)
            .ok_or(DriverError::InvalidBaud { baud, module_clock })?;
        Ok(Self {
            sbr,
            brfa,
            module_clock,
        })
    }

    /// Value of the BDH register SBR field (upper five bits)
    pub const fn bdh(&self) -> u8 {
        ((self.sbr & 0x1F00) >> 8) as u8
    }

    /// Value of the BDL register (lower eight bits)
    pub const fn bdl(&self) -> u8 {
        (self.sbr & 0x00FF) as u8
    }

    /// Baud rate actually produced by these settings
    pub fn actual_baud(&self) -> f64 {
        let divisor = f64::from(self.sbr) + f64::from(self.brfa) / 32.0;
        f64::from(self.module_clock) / (16.0 * divisor)
    }
}

/// Emulated UART with receive and transmit FIFOs
#[derive(Debug)]
pub struct Uart {
    divisor: BaudDivisor,
    rx: Fifo,
    tx: Fifo,
}

impl Uart {
    /// Set up the UART for `baud` at `module_clock`
    ///
    /// # Errors
    ///
    /// Returns error if the baud rate cannot be generated.
    pub fn new(baud: u32, module_clock: u32) -> Result<Self> {
        let divisor = BaudDivisor::new(baud, module_clock)?;
        debug!(
            "UART: {baud} baud → SBR {} BRFA {} ({:.1} actual)",
            divisor.sbr,
            divisor.brfa,
            divisor.actual_baud()
        );
        Ok(Self {
            divisor,
            rx: Fifo::new(),
            tx: Fifo::new(),
        })
    }

    /// Baud generator settings
    pub const fn divisor(&self) -> BaudDivisor {
        self.divisor
    }

    // ── Firmware side ────────────────────────────────────────────────────────

    /// Take the next received byte, blocking until one arrives
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] after [`Uart::close`].
    pub fn in_char(&self) -> Result<u8> {
        self.rx.get()
    }

    /// Take the next received byte, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] after [`Uart::close`].
    pub fn in_char_timeout(&self, timeout: Duration) -> Result<Option<u8>> {
        self.rx.get_timeout(timeout)
    }

    /// Take a received byte if one is waiting
    pub fn try_in_char(&self) -> Option<u8> {
        self.rx.try_get()
    }

    /// Queue a byte for transmission, blocking while the transmit FIFO is full
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] after [`Uart::close`].
    pub fn out_char(&self, byte: u8) -> Result<()> {
        self.tx.put(byte)
    }

    // ── Line side ────────────────────────────────────────────────────────────

    /// A byte arrived on the line
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] after [`Uart::close`].
    pub fn line_receive(&self, byte: u8) -> Result<()> {
        self.rx.put(byte)
    }

    /// Next byte to put on the line, if any is queued
    pub fn line_transmit(&self) -> Option<u8> {
        self.tx.try_get()
    }

    /// Drain everything queued for transmission
    pub fn drain_transmit(&self) -> Vec<u8> {
        std::iter::from_fn(|| self.tx.try_get()).collect()
    }

    /// Close both FIFOs, releasing blocked readers and writers
    pub fn close(&self) {
        self.rx.close();
        self.tx.close();
    }

    /// Bridge the UART to a byte stream
    ///
    /// Spawns a receive pump (stream → Rx FIFO) and a transmit pump
    /// (Tx FIFO → stream). The link ends when the reader hits end of file
    /// or an error, or when [`SerialLink::disconnect`] is called.
    ///
    /// # Errors
    ///
    /// Returns error if a pump thread cannot be spawned.
    pub fn attach<R, W>(self: &Arc<Self>, reader: R, writer: W) -> Result<SerialLink>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));

        let rx_pump = {
            let uart = Arc::clone(self);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("uart-rx".into())
                .spawn(move || receive_pump(&uart, reader, &stop))?
        };

        let tx_pump = {
            let uart = Arc::clone(self);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("uart-tx".into())
                .spawn(move || transmit_pump(&uart, writer, &stop))?
        };

        info!("UART attached to serial link");
        Ok(SerialLink {
            stop,
            rx_pump: Some(rx_pump),
            tx_pump: Some(tx_pump),
        })
    }
}

fn receive_pump<R: Read>(uart: &Uart, mut reader: R, stop: &AtomicBool) {
    let mut buf = [0u8; 64];
    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("UART rx: end of stream");
                break;
            }
            Ok(n) => {
                for &byte in &buf[..n] {
                    if uart.line_receive(byte).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("UART rx: {e}");
                break;
            }
        }
    }
    stop.store(true, Ordering::Relaxed);
}

fn transmit_pump<W: Write>(uart: &Uart, mut writer: W, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let first = match uart.tx.get_timeout(TX_POLL) {
            Ok(Some(byte)) => byte,
            Ok(None) => continue,
            Err(_) => break,
        };
        let mut chunk = vec![first];
        chunk.extend(uart.drain_transmit());
        if let Err(e) = writer.write_all(&chunk).and_then(|()| writer.flush()) {
            warn!("UART tx: {e}");
            break;
        }
    }
    stop.store(true, Ordering::Relaxed);
}

/// Running bridge between a [`Uart`] and a byte stream
#[derive(Debug)]
pub struct SerialLink {
    stop: Arc<AtomicBool>,
    rx_pump: Option<JoinHandle<()>>,
    tx_pump: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Whether either pump has stopped
    pub fn is_closed(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Wait for the remote end to hang up, then stop the transmit pump
    pub fn wait(mut self) {
        if let Some(rx) = self.rx_pump.take() {
            let _ = rx.join();
        }
        self.stop.store(true, Ordering::Relaxed);
        if let Some(tx) = self.tx_pump.take() {
            let _ = tx.join();
        }
    }

    /// Ask both pumps to stop
    ///
    /// The receive pump only notices on its next read; close the underlying
    /// stream to unblock it.
    pub fn disconnect(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Packet-level access to a [`Uart`]
///
/// Receiving runs bytes through a [`PacketFramer`]; sending writes the five
/// bytes of a frame without interleaving with other senders.
#[derive(Debug)]
pub struct PacketPort {
    uart: Arc<Uart>,
    framer: Mutex<PacketFramer>,
    send: Mutex<()>,
}

impl PacketPort {
    /// Wrap a UART
    pub fn new(uart: Arc<Uart>) -> Self {
        Self {
            uart,
            framer: Mutex::new(PacketFramer::new()),
            send: Mutex::new(()),
        }
    }

    /// Underlying UART
    pub fn uart(&self) -> &Arc<Uart> {
        &self.uart
    }

    /// Block until a valid packet has been received
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the UART is closed.
    pub fn get(&self) -> Result<Packet> {
        let mut framer = self.framer.lock();
        loop {
            let byte = self.uart.in_char()?;
            if let Some(packet) = framer.push(byte) {
                return Ok(packet);
            }
        }
    }

    /// Wait up to `timeout` for a complete packet
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the UART is closed.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Packet>> {
        let mut framer = self.framer.lock();
        while let Some(byte) = self.uart.in_char_timeout(timeout)? {
            if let Some(packet) = framer.push(byte) {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    /// Return a packet if the bytes already received complete one
    pub fn try_get(&self) -> Option<Packet> {
        let mut framer = self.framer.lock();
        while let Some(byte) = self.uart.try_in_char() {
            if let Some(packet) = framer.push(byte) {
                return Some(packet);
            }
        }
        None
    }

    /// Queue a packet for transmission
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the UART is closed.
    pub fn put(&self, packet: &Packet) -> Result<()> {
        let _frame = self.send.lock();
        for byte in packet.to_bytes() {
            self.uart.out_char(byte)?;
        }
        debug!("Tx {packet}");
        Ok(())
    }
}
