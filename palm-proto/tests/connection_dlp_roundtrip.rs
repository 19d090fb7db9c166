//! A full `Connection` (SLP+PADP+DLP) request/response cycle over a real
//! socket pair, with the "device" side hand-built from the same framing
//! primitives rather than mocked.

use palm_proto::dlp::commands;
use palm_proto::padp::PadpState;
use palm_proto::slp::{SlpAddress, SlpState};
use palm_proto::transport::{Direction, Transport};
use palm_proto::Connection;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

/// Opcode byte for `OpenConduit`, mirrored here since the test plays the
/// device side and can't import the desktop-only opcode table's meaning
/// in reverse.
const OPENCONDUIT_OPCODE: u8 = 0x2e;

/// Wraps a raw socket as a `Transport` for the host side of the test; the
/// device side talks SLP/PADP directly without going through `Connection`.
struct HostSocket(UnixStream);

impl Read for HostSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}
impl Write for HostSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}
impl Transport for HostSocket {
    fn drain(&mut self) -> palm_proto::Result<()> {
        Ok(())
    }
    fn select(&mut self, _dir: Direction, _timeout: Duration) -> palm_proto::Result<bool> {
        Ok(true)
    }
    fn set_speed(&mut self, _rate: u32) -> palm_proto::Result<()> {
        Ok(())
    }
    fn close(&mut self) -> palm_proto::Result<()> {
        Ok(())
    }
}

#[test]
fn open_conduit_round_trips_through_full_stack() {
    let (host_io, device_io) = UnixStream::pair().unwrap();

    let device = thread::spawn(move || {
        let mut device_io = device_io;
        let mut slp = SlpState::new(SlpAddress::new(3, 3));
        let mut padp = PadpState::new(1);
        let request = padp.recv(&mut device_io, &mut slp).unwrap();
        assert_eq!(request, vec![OPENCONDUIT_OPCODE, 0]);

        // NOERR response, no args: (opcode|0x80, argc=0, status=0).
        let response = vec![OPENCONDUIT_OPCODE | 0x80, 0, 0, 0];
        padp.send(&mut device_io, &mut slp, &response).unwrap();
    });

    let mut conn = Connection::new(HostSocket(host_io));
    conn.use_full_stack(SlpAddress::new(3, 3), 1).unwrap();
    // Skip the CMP handshake entirely in this test; `send_receive` doesn't
    // require `handshake_done`, only `use_*_stack` does the framing setup
    // `OpenConduit` needs.
    commands::open_conduit(&mut conn).unwrap();

    device.join().unwrap();
}
