//! Packet Assembly/Disassembly Protocol: reliable, ordered, fragmented
//! message transport above SLP.
//!
//! Fragment layout (spec.md §3 "Padp Fragment"): `(type, flags,
//! size-or-offset: u16 BE)` followed by up to 1024 bytes of payload. The
//! 16-bit field holds the total message length in the first fragment and
//! the fragment's byte offset in every subsequent one.

use crate::error::{Error, Result};
use crate::slp::SlpState;
use log::{debug, trace, warn};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

pub const MAX_FRAGMENT_PAYLOAD: usize = 1024;
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

pub const TYPE_DATA: u8 = 1;
pub const TYPE_ACK: u8 = 2;
pub const TYPE_TICKLE: u8 = 4;
pub const TYPE_ABORT: u8 = 8;

pub const FLAG_FIRST: u8 = 0x80;
pub const FLAG_LAST: u8 = 0x40;
pub const FLAG_ERRNOMEM: u8 = 0x20;
pub const FLAG_LONGHDR: u8 = 0x10;

/// SLP packet type used for every PADP fragment.
const SLP_TYPE_PAD: u8 = 2;

pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_RETRIES: u32 = 10;

struct FragmentHeader {
    kind: u8,
    flags: u8,
    size_or_offset: u16,
}

impl FragmentHeader {
    const LEN: usize = 4;

    fn parse(body: &[u8]) -> Result<(Self, &[u8])> {
        if body.len() < Self::LEN {
            return Err(Error::Protocol("PADP fragment shorter than header".into()));
        }
        let header = FragmentHeader {
            kind: body[0],
            flags: body[1],
            size_or_offset: u16::from_be_bytes([body[2], body[3]]),
        };
        Ok((header, &body[Self::LEN..]))
    }

    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN + payload.len());
        out.push(self.kind);
        out.push(self.flags);
        out.extend_from_slice(&self.size_or_offset.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

/// A DATA fragment that arrived while `send` was waiting for an ACK,
/// stashed verbatim (xid, flags, size/offset, payload) so `recv` can both
/// ACK it correctly and reassemble past it if it isn't the whole message.
struct LookaheadFragment {
    xid: u8,
    flags: u8,
    size_or_offset: u16,
    payload: Vec<u8>,
}

/// Per-connection PADP state: the xid slot (shared with SLP, per spec.md
/// §3's documented cross-layer coupling) and the reassembly buffer.
pub struct PadpState {
    pub xid: u8,
    /// A DATA fragment that arrived while `send` was waiting for an ACK is
    /// treated as an implicit ACK (open question #2 in SPEC_FULL.md §9) and
    /// stashed here for the next `recv` call instead of being dropped.
    lookahead: Option<LookaheadFragment>,
}

impl PadpState {
    pub fn new(seed: u8) -> Self {
        let xid = if seed == 0 || seed == 0xff { 1 } else { seed };
        PadpState { xid, lookahead: None }
    }

    fn bump_xid(&mut self) {
        self.xid = self.xid.wrapping_add(1);
        if self.xid == 0xff || self.xid == 0x00 {
            self.xid = 1;
        }
    }

    /// Send a complete message, fragmenting as needed, and return once the
    /// final fragment has been ACKed.
    pub fn send<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
        message: &[u8],
    ) -> Result<()> {
        if message.len() > MAX_MESSAGE_LEN {
            return Err(Error::Protocol("message exceeds 64 KiB PADP limit".into()));
        }

        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&message[..0]]
        } else {
            message.chunks(MAX_FRAGMENT_PAYLOAD).collect()
        };
        let nchunks = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut flags = 0u8;
            let size_or_offset: u16;
            if i == 0 {
                flags |= FLAG_FIRST;
                size_or_offset = message.len() as u16;
            } else {
                size_or_offset = (i * MAX_FRAGMENT_PAYLOAD) as u16;
            }
            if i == nchunks - 1 {
                flags |= FLAG_LAST;
            }

            self.bump_xid();
            let header = FragmentHeader { kind: TYPE_DATA, flags, size_or_offset };
            let frame = header.encode(chunk);

            self.send_fragment_with_retries(io, slp, &frame, flags, size_or_offset)?;
        }
        Ok(())
    }

    fn send_fragment_with_retries<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
        frame: &[u8],
        sent_flags: u8,
        sent_size_or_offset: u16,
    ) -> Result<()> {
        let sent_xid = self.xid;
        for attempt in 0..MAX_RETRIES {
            let packet = slp.encode(frame, SLP_TYPE_PAD, sent_xid);
            io.write_all(&packet)?;

            match self.await_ack(io, slp, sent_xid, sent_flags, sent_size_or_offset)? {
                AckOutcome::Acked => return Ok(()),
                AckOutcome::Retry => {
                    debug!("padp: retrying fragment xid {sent_xid:#04x}, attempt {attempt}");
                    continue;
                }
                AckOutcome::PeerMovedOn(xid, flags, size_or_offset, payload) => {
                    // Treat the unexpected DATA as an implicit ack and hand
                    // it to the caller's next recv(), with its own xid and
                    // flags intact rather than the outbound xid we were
                    // waiting on.
                    self.lookahead = Some(LookaheadFragment { xid, flags, size_or_offset, payload });
                    return Ok(());
                }
            }
        }
        Err(Error::Timeout)
    }

    fn await_ack<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
        want_xid: u8,
        want_flags: u8,
        want_size_or_offset: u16,
    ) -> Result<AckOutcome> {
        let deadline = Instant::now() + ACK_TIMEOUT;
        loop {
            if Instant::now() >= deadline {
                return Ok(AckOutcome::Retry);
            }
            let (header, body) = match slp.read(io) {
                Ok(v) => v,
                Err(Error::Eof) => return Err(Error::Timeout),
                Err(e) => return Err(e),
            };
            if header.kind != SLP_TYPE_PAD {
                continue;
            }
            let (frag, payload) = FragmentHeader::parse(&body)?;
            match frag.kind {
                TYPE_TICKLE => {
                    trace!("padp: tickle while awaiting ack, not consuming a retry");
                    continue;
                }
                TYPE_ABORT => return Err(Error::Abort),
                TYPE_ACK => {
                    if header.xid == want_xid
                        && frag.flags == want_flags
                        && frag.size_or_offset == want_size_or_offset
                    {
                        return Ok(AckOutcome::Acked);
                    }
                    // Stale ack for an earlier retry; keep waiting.
                    continue;
                }
                TYPE_DATA => {
                    warn!("padp: data fragment arrived while awaiting ack; treating as implicit ack");
                    return Ok(AckOutcome::PeerMovedOn(
                        header.xid,
                        frag.flags,
                        frag.size_or_offset,
                        payload.to_vec(),
                    ));
                }
                _ => continue,
            }
        }
    }

    /// Receive a complete message, reassembling fragments and ACKing each
    /// one as it arrives.
    pub fn recv<IO: Read + Write>(&mut self, io: &mut IO, slp: &mut SlpState) -> Result<Vec<u8>> {
        if let Some(frag) = self.lookahead.take() {
            slp.last_rx_xid = frag.xid;
            self.ack(io, slp, frag.xid, frag.flags, frag.size_or_offset)?;
            if frag.flags & FLAG_LAST != 0 {
                return Ok(frag.payload);
            }
            let total = frag.size_or_offset as usize;
            let mut buf = Vec::with_capacity(total);
            buf.extend_from_slice(&frag.payload);
            return self.continue_reassembly(io, slp, Some((frag.size_or_offset, buf)));
        }
        self.continue_reassembly(io, slp, None)
    }

    /// Read and ACK fragments until a LAST one completes the message.
    /// `reassembly` seeds an already-ACKed FIRST fragment's buffer (the
    /// lookahead case); `None` means the next fragment read must itself
    /// carry FIRST.
    fn continue_reassembly<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
        mut reassembly: Option<(u16, Vec<u8>)>,
    ) -> Result<Vec<u8>> {
        loop {
            let (header, body) = self.read_with_wait_timeout(io, slp)?;
            let (frag, payload) = FragmentHeader::parse(&body)?;

            match frag.kind {
                TYPE_TICKLE => continue,
                TYPE_ABORT => return Err(Error::Abort),
                TYPE_DATA => {
                    if frag.flags & FLAG_FIRST != 0 {
                        self.ack(io, slp, header.xid, frag.flags, frag.size_or_offset)?;
                        if frag.flags & FLAG_LAST != 0 {
                            return Ok(payload.to_vec());
                        }
                        let total = frag.size_or_offset as usize;
                        let mut buf = Vec::with_capacity(total);
                        buf.extend_from_slice(payload);
                        reassembly = Some((frag.size_or_offset, buf));
                        continue;
                    }

                    let (_total, buf) = reassembly
                        .as_mut()
                        .ok_or_else(|| Error::Protocol("PADP continuation with no FIRST".into()))?;
                    if frag.size_or_offset as usize != buf.len() {
                        return Err(Error::Protocol(format!(
                            "PADP fragment offset mismatch: expected {}, got {}",
                            buf.len(),
                            frag.size_or_offset
                        )));
                    }
                    buf.extend_from_slice(payload);
                    self.ack(io, slp, header.xid, frag.flags, frag.size_or_offset)?;
                    if frag.flags & FLAG_LAST != 0 {
                        return Ok(reassembly.take().unwrap().1);
                    }
                }
                _ => continue,
            }
        }
    }

    fn ack<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
        rx_xid: u8,
        echo_flags: u8,
        echo_size_or_offset: u16,
    ) -> Result<()> {
        slp.last_rx_xid = rx_xid;
        self.xid = rx_xid;
        let header = FragmentHeader { kind: TYPE_ACK, flags: echo_flags, size_or_offset: echo_size_or_offset };
        let frame = header.encode(&[]);
        let packet = slp.encode(&frame, SLP_TYPE_PAD, self.xid);
        io.write_all(&packet)?;
        Ok(())
    }

    fn read_with_wait_timeout<IO: Read + Write>(
        &mut self,
        io: &mut IO,
        slp: &mut SlpState,
    ) -> Result<(crate::slp::SlpHeader, Vec<u8>)> {
        // The underlying transport enforces PADP_WAIT_TIMEOUT itself via
        // its read timeout (spec.md §4.1); here we just distinguish EOF
        // (dead link) from a genuine frame.
        let _ = WAIT_TIMEOUT;
        match slp.read(io) {
            Ok((h, b)) if h.kind == SLP_TYPE_PAD => Ok((h, b)),
            Ok(_) => self.read_with_wait_timeout(io, slp),
            Err(Error::Eof) => Err(Error::Timeout),
            Err(e) => Err(e),
        }
    }
}

enum AckOutcome {
    Acked,
    Retry,
    PeerMovedOn(u8, u8, u16, Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slp::SlpAddress;
    use std::io::Cursor;

    /// A loopback IO that appends writes to an internal outbox so tests
    /// can assert on exactly what hit the wire, while serving reads from a
    /// preloaded script of SLP-framed bytes.
    struct Script {
        inbox: Cursor<Vec<u8>>,
        outbox: Vec<u8>,
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbox.read(buf)
        }
    }
    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbox.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn xid_never_hits_reserved_values() {
        let mut padp = PadpState::new(0xfe);
        for _ in 0..300 {
            padp.bump_xid();
            assert_ne!(padp.xid, 0x00);
            assert_ne!(padp.xid, 0xff);
        }
    }

    #[test]
    fn single_fragment_send_receives_ack_and_completes() {
        let mut send_slp = SlpState::new(SlpAddress::new(3, 3));
        send_slp.peer = Some(SlpAddress::new(3, 3));
        let mut padp = PadpState::new(1);

        // Build a script whose "device" immediately ACKs whatever comes in.
        // We can't easily run two state machines over one stream in a unit
        // test without a background thread, so this test instead checks
        // the wire bytes produced for the first (and only) fragment.
        let mut script = Script { inbox: Cursor::new(Vec::new()), outbox: Vec::new() };

        // Pre-seed the inbox with the ACK the device would send back.
        let ack_header = FragmentHeader { kind: TYPE_ACK, flags: FLAG_FIRST | FLAG_LAST, size_or_offset: 5 };
        let ack_frame = ack_header.encode(&[]);
        let ack_packet = send_slp.encode(&ack_frame, SLP_TYPE_PAD, 2);
        script.inbox = Cursor::new(ack_packet);

        padp.send(&mut script, &mut send_slp, b"hello").unwrap();
        // The outgoing fragment must carry FIRST|LAST and size=5.
        assert_eq!(script.outbox[3 + 7], TYPE_DATA);
        assert_eq!(script.outbox[3 + 7 + 1], FLAG_FIRST | FLAG_LAST);
    }
}
