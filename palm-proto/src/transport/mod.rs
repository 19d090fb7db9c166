//! Transport adapter: bytewise read/write/accept/close of a serial tty or
//! USB bulk endpoint, plus line-rate selection for serial.
//!
//! Modeled on the teacher's single `Transport` trait
//! (`s7::transport::Transport`, implemented once for `tcp::Transport`):
//! one trait, implemented once per physical medium, with everything above
//! it (SLP/PADP/CMP/NetSync/DLP) generic over `Read + Write`.

pub mod serial;
pub mod usb;

use crate::error::Result;
use std::time::Duration;

pub use serial::SerialTransport;
pub use usb::{RawUsbEndpoint, UsbTransport};

/// Which way a [`Transport::select`] call should watch the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Capability set a connection needs from its underlying medium. Both
/// `SerialTransport` and `UsbTransport` also implement `std::io::{Read,
/// Write}` directly so the framing layers (which are generic over `Read +
/// Write`) can use them without going through this trait.
pub trait Transport: std::io::Read + std::io::Write {
    /// Allow the peer to initiate (CMP wakeup or NetSync ritual). A no-op
    /// for mediums where nothing needs to be armed before the peer speaks.
    fn accept(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block until the output buffer has been fully drained to the wire.
    fn drain(&mut self) -> Result<()>;

    /// Block (up to `timeout`) until the descriptor is ready in `dir`.
    /// Returns `true` if ready, `false` on timeout.
    fn select(&mut self, dir: Direction, timeout: Duration) -> Result<bool>;

    /// Change the line rate. A no-op returning success for USB (spec.md
    /// §4.1: "For USB, set_speed is a no-op and returns success").
    fn set_speed(&mut self, rate: u32) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
