//! Serial backend for the physical demonstrator (USB-UART at 115200 8N1).
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use claire_traits::{CommandSink, LineSource};
use serialport::SerialPort;
use tracing::{debug, trace};

use crate::error::{HwError, Result};

pub const DEFAULT_BAUD: u32 = 115_200;

/// Port read timeout; bounds how long a single `read` may block.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct SerialLink;

impl SerialLink {
    /// Open `port` and return its receive and transmit halves.
    ///
    /// On unix the port is opened exclusively so a second process cannot
    /// interleave commands on the same link.
    pub fn open(port: &str, baud: u32) -> Result<(SerialReader, SerialWriter)> {
        let open_err = |e: serialport::Error| HwError::Open {
            port: port.to_string(),
            reason: e.to_string(),
        };
        let builder = serialport::new(port, baud).timeout(PORT_TIMEOUT);

        #[cfg(unix)]
        let rx: Box<dyn SerialPort> = {
            let mut native = builder.open_native().map_err(open_err)?;
            native.set_exclusive(true).map_err(open_err)?;
            Box::new(native)
        };
        #[cfg(not(unix))]
        let rx: Box<dyn SerialPort> = builder.open().map_err(open_err)?;

        let tx = rx.try_clone().map_err(open_err)?;
        debug!(port, baud, "serial port opened");
        Ok((
            SerialReader {
                port: rx,
                pending: Vec::new(),
            },
            SerialWriter { port: tx },
        ))
    }
}

pub struct SerialReader {
    port: Box<dyn SerialPort>,
    /// Bytes received after the last complete line.
    pending: Vec<u8>,
}

impl SerialReader {
    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let rest = self.pending.split_off(pos + 1);
        let raw = std::mem::replace(&mut self.pending, rest);
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl LineSource for SerialReader {
    fn read_line(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                trace!(%line, "serial line");
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.port.read(&mut buf) {
                Ok(0) => return Err(Box::new(HwError::Disconnected)),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(Box::new(HwError::Io(e))),
            }
        }
    }
}

pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl CommandSink for SerialWriter {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.port.write_all(bytes).map_err(HwError::Io)?;
        self.port.flush().map_err(HwError::Io)?;
        Ok(())
    }
}
