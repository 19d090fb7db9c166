//! Connection Management Protocol: the two-packet rate-negotiation
//! handshake carried as a PADP payload at the start of a serial session.

use crate::error::Result;
use crate::padp::PadpState;
use crate::slp::SlpState;
use log::info;
use std::io::{Read, Write};
use std::time::Duration;

pub const WAKEUP: u8 = 1;
pub const INIT: u8 = 2;
pub const ABORT: u8 = 3;

pub const FLAG_CHANGERATE: u8 = 0x80;

/// Standard serial rates, descending, used both for transport rate-probing
/// (spec.md §4.1) and for validating a caller-supplied preferred rate here.
pub const RATE_TABLE: [u32; 13] = [
    230_400, 115_200, 76_800, 57_600, 38_400, 28_800, 19_200, 14_400, 9_600, 7_200, 4_800, 2_400,
    1_200,
];

#[derive(Debug, Clone, Copy)]
pub struct CmpPacket {
    pub kind: u8,
    pub flags: u8,
    pub ver_major: u8,
    pub ver_minor: u8,
    pub rate: u32,
}

impl CmpPacket {
    const LEN: usize = 10;

    fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.kind;
        out[1] = self.flags;
        out[2] = self.ver_major;
        out[3] = self.ver_minor;
        out[4] = 0;
        out[5] = 0;
        out[6..10].copy_from_slice(&self.rate.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(crate::error::Error::Protocol("CMP packet too short".into()));
        }
        Ok(CmpPacket {
            kind: bytes[0],
            flags: bytes[1],
            ver_major: bytes[2],
            ver_minor: bytes[3],
            rate: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }
}

/// Result of a completed handshake: the rate the transport should now be
/// switched to, and whether a rate change was actually requested.
pub struct HandshakeOutcome {
    pub chosen_rate: u32,
    pub changed_rate: bool,
}

/// Run the accept-side handshake on a serial connection: read CMP packets
/// (ignoring read timeouts) until WAKEUP arrives, then reply with INIT.
/// Per spec.md §4.3: if the caller supplied a nonzero preferred rate that
/// appears in `RATE_TABLE`, use it; otherwise use the device's proposed
/// rate verbatim.
pub fn handshake<IO: Read + Write>(
    io: &mut IO,
    slp: &mut SlpState,
    padp: &mut PadpState,
    preferred_rate: Option<u32>,
) -> Result<HandshakeOutcome> {
    let proposed_rate = loop {
        match padp.recv(io, slp) {
            Ok(body) => {
                let pkt = CmpPacket::decode(&body)?;
                if pkt.kind == WAKEUP {
                    info!("cmp: wakeup, device proposes {} bps", pkt.rate);
                    break pkt.rate;
                }
                // Non-WAKEUP packets before the handshake completes are
                // ignored; keep looping.
            }
            // Read timeouts are ignored while waiting for WAKEUP.
            Err(crate::error::Error::Timeout) => continue,
            Err(e) => return Err(e),
        }
    };

    let chosen_rate = match preferred_rate {
        Some(rate) if RATE_TABLE.contains(&rate) => rate,
        _ => proposed_rate,
    };
    let changed_rate = chosen_rate != proposed_rate;

    let init = CmpPacket {
        kind: INIT,
        flags: if changed_rate { FLAG_CHANGERATE } else { 0 },
        ver_major: 1,
        ver_minor: 1,
        rate: chosen_rate,
    };
    padp.send(io, slp, &init.encode())?;

    Ok(HandshakeOutcome { chosen_rate, changed_rate })
}

/// How long to sleep after `set_speed` on platforms where the UART needs
/// time to settle (spec.md §4.1).
pub const RATE_CHANGE_SETTLE: Duration = Duration::from_millis(50);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = CmpPacket { kind: INIT, flags: FLAG_CHANGERATE, ver_major: 1, ver_minor: 1, rate: 38_400 };
        let bytes = pkt.encode();
        let back = CmpPacket::decode(&bytes).unwrap();
        assert_eq!(back.kind, INIT);
        assert_eq!(back.flags, FLAG_CHANGERATE);
        assert_eq!(back.rate, 38_400);
    }

    #[test]
    fn preferred_rate_only_honored_if_in_table() {
        assert!(RATE_TABLE.contains(&38_400));
        assert!(!RATE_TABLE.contains(&38_401));
    }
}
