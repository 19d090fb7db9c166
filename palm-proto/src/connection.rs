//! The session-scoped object owning the transport descriptor, per-layer
//! state, and the active protocol-stack mode. No other component may read
//! or write the wire directly.

use crate::cmp;
use crate::dlp::DlpChannel;
use crate::error::{Error, Result};
use crate::netsync::NetSyncState;
use crate::padp::PadpState;
use crate::slp::{SlpAddress, SlpState};
use crate::transport::Transport;
use log::info;

/// Which framing the connection speaks under DLP. Selecting one is only
/// valid before the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    /// SLP + PADP, the serial-line stack.
    Full,
    /// NetSync framing, used by USB devices.
    Simple,
    /// NetSync framing over a network transport.
    Net,
    /// No framing has been selected yet.
    None,
}

enum Framing {
    Full { slp: SlpState, padp: PadpState },
    Net { net: NetSyncState },
    None,
}

/// Owns exactly one transport and the framing state layered on top of it.
pub struct Connection<T: Transport> {
    transport: T,
    framing: Framing,
    handshake_done: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Connection { transport, framing: Framing::None, handshake_done: false }
    }

    pub fn mode(&self) -> StackMode {
        match &self.framing {
            Framing::Full { .. } => StackMode::Full,
            Framing::Net { .. } => StackMode::Simple,
            Framing::None => StackMode::None,
        }
    }

    fn require_not_handshaken(&self) -> Result<()> {
        if self.handshake_done {
            return Err(Error::Protocol("cannot switch stack mode after handshake".into()));
        }
        Ok(())
    }

    /// Select the SLP+PADP stack (serial). Must be called before
    /// handshake.
    pub fn use_full_stack(&mut self, local: SlpAddress, padp_seed: u8) -> Result<()> {
        self.require_not_handshaken()?;
        self.framing = Framing::Full { slp: SlpState::new(local), padp: PadpState::new(padp_seed) };
        Ok(())
    }

    /// Select NetSync framing (USB or network). Must be called before
    /// handshake.
    pub fn use_net_stack(&mut self) -> Result<()> {
        self.require_not_handshaken()?;
        self.framing = Framing::Net { net: NetSyncState::new() };
        Ok(())
    }

    /// Run the CMP speed-negotiation handshake (`Full` mode only) or the
    /// NetSync accept ritual (`Simple`/`Net` modes).
    pub fn handshake_full(&mut self, preferred_rate: Option<u32>) -> Result<cmp::HandshakeOutcome> {
        let Framing::Full { slp, padp } = &mut self.framing else {
            return Err(Error::Protocol("handshake_full called outside Full stack mode".into()));
        };
        let outcome = cmp::handshake(&mut self.transport, slp, padp, preferred_rate)?;
        if outcome.changed_rate {
            self.transport.drain()?;
            self.transport.set_speed(outcome.chosen_rate)?;
        }
        self.handshake_done = true;
        info!("connection: CMP handshake complete at {} bps", outcome.chosen_rate);
        Ok(outcome)
    }

    pub fn handshake_net(
        &mut self,
        resp1: &[u8],
        resp2: &[u8],
        resp3: &[u8],
        stmt2_len_hint: Option<u32>,
    ) -> Result<()> {
        let Framing::Net { net } = &mut self.framing else {
            return Err(Error::Protocol("handshake_net called outside Net/Simple stack mode".into()));
        };
        crate::netsync::server_ritual(&mut self.transport, net, resp1, resp2, resp3, stmt2_len_hint)?;
        self.handshake_done = true;
        info!("connection: NetSync ritual complete");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

impl<T: Transport> DlpChannel for Connection<T> {
    fn send_receive(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        match &mut self.framing {
            Framing::Full { slp, padp } => {
                padp.send(&mut self.transport, slp, request)?;
                padp.recv(&mut self.transport, slp)
            }
            Framing::Net { net } => {
                net.write(&mut self.transport, request)?;
                net.read(&mut self.transport, None)
            }
            Framing::None => Err(Error::Protocol("no stack mode selected".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Direction, Transport};
    use std::io::{Cursor, Read, Write};
    use std::time::Duration;

    struct MemTransport {
        inbox: Cursor<Vec<u8>>,
        outbox: Vec<u8>,
    }

    impl Read for MemTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbox.read(buf)
        }
    }
    impl Write for MemTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbox.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Transport for MemTransport {
        fn drain(&mut self) -> Result<()> {
            Ok(())
        }
        fn select(&mut self, _dir: Direction, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
        fn set_speed(&mut self, _rate: u32) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_stack_switch_after_handshake() {
        let transport = MemTransport { inbox: Cursor::new(Vec::new()), outbox: Vec::new() };
        let mut conn = Connection::new(transport);
        conn.use_net_stack().unwrap();
        conn.handshake_done = true;
        let err = conn.use_full_stack(SlpAddress::new(3, 3), 1).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn send_receive_with_no_mode_selected_errors() {
        let transport = MemTransport { inbox: Cursor::new(Vec::new()), outbox: Vec::new() };
        let mut conn = Connection::new(transport);
        let err = conn.send_receive(b"x").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
