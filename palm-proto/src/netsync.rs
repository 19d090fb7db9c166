//! NetSync framer: an alternative to SLP+PADP used by USB and TCP-based
//! devices. Header is `(cmd:u8=1, xid:u8, length:u32 BE)` followed by
//! `length` bytes of payload.

use crate::error::{Error, Result};
use log::{debug, trace};
use std::io::{Read, Write};

const HEADER_LEN: usize = 6;
const CMD: u8 = 1;

pub struct NetSyncState {
    pub xid: u8,
}

impl NetSyncState {
    pub fn new() -> Self {
        NetSyncState { xid: 0 }
    }

    /// Read one frame. On the m50x anomaly the first inbound frame has no
    /// header; callers pass the out-of-band length via `no_header_len`.
    pub fn read(&mut self, io: &mut dyn Read, no_header_len: Option<u32>) -> Result<Vec<u8>> {
        let length = if let Some(len) = no_header_len {
            len
        } else {
            let mut hdr = [0u8; HEADER_LEN];
            io.read_exact(&mut hdr).map_err(Error::from)?;
            let cmd = hdr[0];
            let xid = hdr[1];
            let len = u32::from_be_bytes([hdr[2], hdr[3], hdr[4], hdr[5]]);
            trace!("netsync: <- cmd {cmd:#04x} xid {xid:#04x} len {len}");
            if cmd != CMD {
                return Err(Error::Protocol(format!("netsync: unexpected cmd {cmd:#04x}")));
            }
            len
        };

        let mut buf = vec![0u8; length as usize];
        let mut got = 0usize;
        while got < buf.len() {
            let n = io.read(&mut buf[got..])?;
            if n == 0 {
                return Err(Error::Eof);
            }
            got += n;
        }
        debug!("netsync: <- {} bytes", buf.len());
        Ok(buf)
    }

    pub fn write(&mut self, io: &mut dyn Write, payload: &[u8]) -> Result<()> {
        self.xid = self.xid.wrapping_add(1);
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(CMD);
        out.push(self.xid);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        io.write_all(&out)?;
        debug!("netsync: -> {} bytes, xid {:#04x}", payload.len(), self.xid);
        Ok(())
    }
}

impl Default for NetSyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// The three fixed ritual exchanges at accept time, server side: write
/// resp1, read stmt2, write resp2, read stmt3, write resp3. The payloads
/// are opaque byte blocks (spec.md §4.5); callers supply them since their
/// exact bytes are device/version-specific and out of this module's scope.
pub fn server_ritual(
    io: &mut (impl Read + Write),
    net: &mut NetSyncState,
    resp1: &[u8],
    resp2: &[u8],
    resp3: &[u8],
    stmt2_len_hint: Option<u32>,
) -> Result<()> {
    net.write(io, resp1)?;
    let _stmt2 = net.read(io, stmt2_len_hint)?;
    net.write(io, resp2)?;
    let _stmt3 = net.read(io, None)?;
    net.write(io, resp3)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut net = NetSyncState::new();
        let mut out = Vec::new();
        net.write(&mut out, b"payload bytes").unwrap();

        let mut net2 = NetSyncState::new();
        let mut cursor = Cursor::new(out);
        let got = net2.read(&mut cursor, None).unwrap();
        assert_eq!(got, b"payload bytes");
    }

    #[test]
    fn m50x_anomaly_no_header() {
        let mut net = NetSyncState::new();
        let mut cursor = Cursor::new(b"raw bytes, no header".to_vec());
        let got = net.read(&mut cursor, Some(20)).unwrap();
        assert_eq!(got, b"raw bytes, no header");
    }

    #[test]
    fn rejects_wrong_cmd() {
        let mut net = NetSyncState::new();
        let mut cursor = Cursor::new(vec![2u8, 0, 0, 0, 0, 0]);
        let err = net.read(&mut cursor, None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
