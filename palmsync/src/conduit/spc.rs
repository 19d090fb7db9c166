//! SPC side channel: the four-state machine (`ReadHdr`, `ReadData`,
//! `WriteHdr`, `WriteData`) that lets a conduit issue DLP requests back
//! through the parent (spec.md §4.10). The parent never has both read and
//! write pending on this socket at once.

use log::trace;
use nix::sys::socket::{recv, send, MsgFlags};
use palm_proto::dlp::commands::{self, DlpChannel};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

const HEADER_LEN: usize = 8;

pub const OP_DLP_COMMAND: u16 = 1;
pub const OP_GET_DB_INFO: u16 = 2;
pub const OP_READ_APP_PREFERENCE: u16 = 3;
pub const OP_WRITE_APP_PREFERENCE: u16 = 4;

const STATUS_OK: u16 = 0;
const STATUS_ERROR: u16 = 1;

enum State {
    ReadHdr { buf: Vec<u8> },
    ReadData { op: u16, buf: Vec<u8>, want: usize },
    WriteHdr { buf: Vec<u8>, pos: usize },
    WriteData { buf: Vec<u8>, pos: usize },
}

/// Owns the parent's end of the SPC socketpair and the in-progress
/// request/response state.
pub struct SpcChannel {
    socket: OwnedFd,
    state: State,
}

impl SpcChannel {
    pub fn new(socket: OwnedFd) -> Self {
        SpcChannel { socket, state: State::ReadHdr { buf: Vec::with_capacity(HEADER_LEN) } }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// `true` while a response is queued to go out; the caller's `poll`
    /// should watch for writability instead of readability in that case.
    pub fn wants_write(&self) -> bool {
        matches!(self.state, State::WriteHdr { .. } | State::WriteData { .. })
    }

    /// Perform exactly one non-blocking read-direction step.
    pub fn step_read(&mut self, channel: &mut impl DlpChannel) -> io::Result<bool> {
        match &mut self.state {
            State::ReadHdr { buf } => {
                let mut chunk = [0u8; HEADER_LEN];
                let n = match recv(self.socket.as_raw_fd(), &mut chunk, MsgFlags::MSG_DONTWAIT) {
                    Ok(n) => n,
                    Err(nix::errno::Errno::EAGAIN) => return Ok(false),
                    Err(e) => return Err(io::Error::from(e)),
                };
                if n == 0 {
                    return Ok(false);
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= HEADER_LEN {
                    let op = u16::from_be_bytes([buf[0], buf[1]]);
                    let _status = u16::from_be_bytes([buf[2], buf[3]]);
                    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
                    trace!("spc: request op {op:#06x}, len {len}");
                    self.state = State::ReadData { op, buf: Vec::with_capacity(len), want: len };
                }
                Ok(true)
            }
            State::ReadData { op, buf, want } => {
                if buf.len() >= *want {
                    let op = *op;
                    let payload = std::mem::take(buf);
                    let response = dispatch_request(op, &payload, channel);
                    self.state = State::WriteHdr { buf: encode_response(op, &response), pos: 0 };
                    return Ok(true);
                }
                let mut chunk = vec![0u8; (*want - buf.len()).min(4096)];
                let n = match recv(self.socket.as_raw_fd(), &mut chunk, MsgFlags::MSG_DONTWAIT) {
                    Ok(n) => n,
                    Err(nix::errno::Errno::EAGAIN) => return Ok(false),
                    Err(e) => return Err(io::Error::from(e)),
                };
                if n == 0 {
                    return Ok(false);
                }
                buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            State::WriteHdr { .. } | State::WriteData { .. } => Ok(false),
        }
    }

    /// Perform exactly one non-blocking write-direction step.
    pub fn step_write(&mut self) -> io::Result<bool> {
        match &mut self.state {
            State::WriteHdr { buf, pos } => {
                let n = match send(self.socket.as_raw_fd(), &buf[*pos..], MsgFlags::MSG_DONTWAIT) {
                    Ok(n) => n,
                    Err(nix::errno::Errno::EAGAIN) => return Ok(false),
                    Err(e) => return Err(io::Error::from(e)),
                };
                *pos += n;
                if *pos >= buf.len() {
                    self.state = State::ReadHdr { buf: Vec::with_capacity(HEADER_LEN) };
                }
                Ok(true)
            }
            State::WriteData { buf, pos } => {
                let n = match send(self.socket.as_raw_fd(), &buf[*pos..], MsgFlags::MSG_DONTWAIT) {
                    Ok(n) => n,
                    Err(nix::errno::Errno::EAGAIN) => return Ok(false),
                    Err(e) => return Err(io::Error::from(e)),
                };
                *pos += n;
                if *pos >= buf.len() {
                    self.state = State::ReadHdr { buf: Vec::with_capacity(HEADER_LEN) };
                }
                Ok(true)
            }
            State::ReadHdr { .. } | State::ReadData { .. } => Ok(false),
        }
    }
}

struct SpcResponse {
    status: u16,
    payload: Vec<u8>,
}

fn encode_response(op: u16, response: &SpcResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + response.payload.len());
    out.extend_from_slice(&op.to_be_bytes());
    out.extend_from_slice(&response.status.to_be_bytes());
    out.extend_from_slice(&(response.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&response.payload);
    out
}

/// `buf_len=0` to learn the true size, then an exact-size pass, mirroring
/// the protocol `prefcache::fetch_pref` uses.
fn fetch_preference_two_pass(
    channel: &mut impl DlpChannel,
    creator: u32,
    id: u16,
    backup: bool,
) -> palm_proto::error::Result<Vec<u8>> {
    let (actual_size, _) = commands::read_app_preference(channel, creator, id, 0, backup)?;
    if actual_size == 0 {
        return Ok(Vec::new());
    }
    let (_, data) = commands::read_app_preference(channel, creator, id, actual_size, backup)?;
    Ok(data)
}

fn dispatch_request(op: u16, payload: &[u8], channel: &mut impl DlpChannel) -> SpcResponse {
    match op {
        OP_DLP_COMMAND => match channel.send_receive(payload) {
            Ok(data) => SpcResponse { status: STATUS_OK, payload: data },
            Err(_) => SpcResponse { status: STATUS_ERROR, payload: Vec::new() },
        },
        OP_READ_APP_PREFERENCE => {
            if payload.len() < 7 {
                return SpcResponse { status: STATUS_ERROR, payload: Vec::new() };
            }
            let creator = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let id = u16::from_be_bytes([payload[4], payload[5]]);
            let backup = payload[6] != 0;
            match fetch_preference_two_pass(channel, creator, id, backup) {
                Ok(data) => SpcResponse { status: STATUS_OK, payload: data },
                Err(_) => SpcResponse { status: STATUS_ERROR, payload: Vec::new() },
            }
        }
        OP_WRITE_APP_PREFERENCE => {
            if payload.len() < 11 {
                return SpcResponse { status: STATUS_ERROR, payload: Vec::new() };
            }
            let creator = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let id = u16::from_be_bytes([payload[4], payload[5]]);
            let version = u16::from_be_bytes([payload[6], payload[7]]);
            let backup = payload[8] != 0;
            let data = &payload[9..];
            match commands::write_app_preference(channel, creator, id, version, backup, data) {
                Ok(()) => SpcResponse { status: STATUS_OK, payload: Vec::new() },
                Err(_) => SpcResponse { status: STATUS_ERROR, payload: Vec::new() },
            }
        }
        OP_GET_DB_INFO => {
            // A real handler would look this up from the live `Palm`
            // device view shared by the dispatcher; the side channel
            // itself only knows how to move bytes.
            SpcResponse { status: STATUS_ERROR, payload: Vec::new() }
        }
        _ => SpcResponse { status: STATUS_ERROR, payload: Vec::new() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_header_round_trips() {
        let response = SpcResponse { status: STATUS_OK, payload: vec![1, 2, 3] };
        let encoded = encode_response(OP_DLP_COMMAND, &response);
        assert_eq!(&encoded[0..2], &OP_DLP_COMMAND.to_be_bytes());
        assert_eq!(&encoded[2..4], &STATUS_OK.to_be_bytes());
        assert_eq!(&encoded[4..8], &3u32.to_be_bytes());
        assert_eq!(&encoded[8..], &[1, 2, 3]);
    }
}
