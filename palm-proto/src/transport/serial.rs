//! Serial tty transport, backed by the `serialport` crate's blocking API
//! (the same crate family `vex-v5-serial` reaches for as its serial
//! backend).

use super::{Direction, Transport};
use crate::error::{Error, Result};
use log::{debug, info};
use std::io::{Read, Write};
use std::time::Duration;

/// Descending list of standard rates to probe on first open (spec.md
/// §4.1). Probing assumes that if rate R is supported, every lower listed
/// rate is too, so the probe can stop at the first success.
pub const PROBE_RATES: [u32; 13] = [
    230_400, 115_200, 76_800, 57_600, 38_400, 28_800, 19_200, 14_400, 9_600, 7_200, 4_800, 2_400,
    1_200,
];

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open `path` and probe for the fastest rate the port will accept,
    /// per spec.md §4.1.
    pub fn open(path: &str, read_timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        for &rate in &PROBE_RATES {
            match serialport::new(path, rate)
                .timeout(read_timeout)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .open()
            {
                Ok(port) => {
                    info!("serial: opened {path} at {rate} bps");
                    return Ok(SerialTransport { port, read_timeout });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::System(std::io::Error::new(
            std::io::ErrorKind::Other,
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no rate accepted".into()),
        )))
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn drain(&mut self) -> Result<()> {
        self.port.flush().map_err(|e| Error::System(e.into()))
    }

    fn select(&mut self, _dir: Direction, timeout: Duration) -> Result<bool> {
        // serialport's blocking API doesn't expose select(); instead we
        // shrink the read timeout for the duration of the wait and probe
        // with a zero-length peek via bytes_to_read().
        let prior = self.read_timeout;
        self.port
            .set_timeout(timeout)
            .map_err(|e| Error::System(e.into()))?;
        self.read_timeout = timeout;
        let ready = self.port.bytes_to_read().map_err(|e| Error::System(e.into()))? > 0;
        self.port
            .set_timeout(prior)
            .map_err(|e| Error::System(e.into()))?;
        self.read_timeout = prior;
        Ok(ready)
    }

    fn set_speed(&mut self, rate: u32) -> Result<()> {
        self.port.set_baud_rate(rate).map_err(|e| Error::System(e.into()))?;
        debug!("serial: set rate to {rate} bps, settling");
        std::thread::sleep(crate::cmp::RATE_CHANGE_SETTLE);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
