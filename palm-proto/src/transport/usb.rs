//! USB bulk-endpoint transport.
//!
//! The actual enumeration of endpoints via the vendor-specific
//! `GetConnectionInfo` control request, and the platform-specific bulk
//! read/write (FreeBSD `ugen`, Linux character usb, `libusb`), are external
//! collaborators per spec.md §1/§6: this module only defines the contract
//! they must satisfy (`RawUsbEndpoint`) and the buffering policy layered
//! on top of it.

use super::{Direction, Transport};
use crate::error::Result;
use std::io::{Read, Write};
use std::time::Duration;

const USB_READ_BUFFER_LEN: usize = 1024;

/// A single whole-bulk-packet read/write primitive, implemented by a
/// platform-specific adapter (ugen/char-usb/libusb) that has already done
/// endpoint discovery via `GetConnectionInfo` and selected the `HotSync`
/// function id.
pub trait RawUsbEndpoint {
    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn bulk_write(&mut self, buf: &[u8]) -> Result<usize>;
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool>;
    fn close(&mut self) -> Result<()>;
}

/// Services callers out of a ~1 KiB internal buffer, refilling it with a
/// single bulk read when empty, since the USB driver delivers whole bulk
/// packets at a time (spec.md §4.1).
pub struct UsbTransport {
    endpoint: Box<dyn RawUsbEndpoint + Send>,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl UsbTransport {
    pub fn new(endpoint: Box<dyn RawUsbEndpoint + Send>) -> Self {
        UsbTransport { endpoint, buf: vec![0u8; USB_READ_BUFFER_LEN], pos: 0, len: 0 }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        self.len = self
            .endpoint
            .bulk_read(&mut self.buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.pos = 0;
        Ok(())
    }
}

impl Read for UsbTransport {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.len {
            self.refill()?;
            if self.len == 0 {
                return Ok(0);
            }
        }
        let n = out.len().min(self.len - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for UsbTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.endpoint
            .bulk_write(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for UsbTransport {
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn select(&mut self, dir: Direction, timeout: Duration) -> Result<bool> {
        match dir {
            Direction::Read => {
                if self.pos < self.len {
                    return Ok(true);
                }
                self.endpoint.poll_readable(timeout)
            }
            // USB writes don't block behind a select-able condition here;
            // the bulk endpoint always accepts a write attempt.
            Direction::Write => Ok(true),
        }
    }

    fn set_speed(&mut self, _rate: u32) -> Result<()> {
        // No-op: USB runs "as fast as the link goes" (spec.md §4.1/§4.3).
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.endpoint.close()
    }
}
