//! Error taxonomy shared across every layer of the stack.
//!
//! The kinds mirror the original protocol's error classes one-to-one: a
//! `System`/`Eof` distinction at the transport boundary, `Timeout`/`NoMem`
//! coming out of PADP, `BadId`/`Abort` from protocol-level corruption, and
//! `DlpStat` carrying a raw device status code upward unchanged so callers
//! can match on it (e.g. `NOTFOUND` means "no such block", not a failure).

use std::io;

/// A raw DLP status code as returned in a response header.
pub type DlpStatusCode = u16;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying `read`/`write`/`select`/`ioctl` failed.
    #[error("system I/O error: {0}")]
    System(#[source] io::Error),

    /// Peer closed the connection, or no bytes were available at EOF.
    #[error("end of file")]
    Eof,

    /// A PADP ack-wait or fragment-wait timed out after all retries.
    #[error("operation timed out")]
    Timeout,

    /// Allocation failed (reassembly buffer, argv growth, ...).
    #[error("out of memory")]
    NoMem,

    /// A DLP response's opcode didn't match the request's.
    #[error("response opcode did not match request (protocol corruption)")]
    BadId,

    /// A PADP abort fragment, or a DLP `CANCELSYNC` status.
    #[error("aborted")]
    Abort,

    /// The link is presumed dead.
    #[error("no connection")]
    NoConn,

    /// The user cancelled the sync from the device.
    #[error("cancelled by user")]
    Cancel,

    /// The device returned a non-zero DLP status.
    #[error("DLP error status {0:#04x}")]
    DlpStat(DlpStatusCode),

    /// A fragment (PADP) or frame (NetSync) violated the layer's framing
    /// contract (bad offset, bad header) in a way that isn't a silent-drop
    /// case. Named `Protocol` in spec.md's testable-properties section.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for the session-level errors that must stop the whole sync run
    /// (spec.md §4.9 "Full backup": abort whole run on `NoConn`/`Cancel`).
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::NoConn | Error::Cancel | Error::Abort)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::System(e)
        }
    }
}

/// DLP status codes, per the original `dlp.h` error response codes.
#[allow(non_upper_case_globals)]
pub mod dlp_status {
    use super::DlpStatusCode;

    pub const NOERR: DlpStatusCode = 0x00;
    pub const SYSTEM: DlpStatusCode = 0x01;
    pub const ILLEGALREQ: DlpStatusCode = 0x02;
    pub const MEMORY: DlpStatusCode = 0x03;
    pub const PARAM: DlpStatusCode = 0x04;
    pub const NOTFOUND: DlpStatusCode = 0x05;
    pub const NONEOPEN: DlpStatusCode = 0x06;
    pub const DATABASEOPEN: DlpStatusCode = 0x07;
    pub const TOOMANYOPENDATABASES: DlpStatusCode = 0x08;
    pub const ALREADYEXISTS: DlpStatusCode = 0x09;
    pub const CANTOPEN: DlpStatusCode = 0x0a;
    pub const RECORDDELETED: DlpStatusCode = 0x0b;
    pub const RECORDBUSY: DlpStatusCode = 0x0c;
    pub const NOTSUPPORTED: DlpStatusCode = 0x0d;
    pub const READONLY: DlpStatusCode = 0x0f;
    pub const NOTENOUGHSPACE: DlpStatusCode = 0x10;
    pub const LIMITEXCEEDED: DlpStatusCode = 0x11;
    pub const CANCELSYNC: DlpStatusCode = 0x12;
    pub const BADWRAPPER: DlpStatusCode = 0x13;
    pub const ARGMISSING: DlpStatusCode = 0x14;
    pub const ARGSIZE: DlpStatusCode = 0x15;

    /// Map a raw DLP status into the shared error taxonomy. `NOERR` is not
    /// representable as an `Error` — callers check for it before calling.
    pub fn to_error(code: DlpStatusCode) -> super::Error {
        match code {
            CANCELSYNC => super::Error::Cancel,
            _ => super::Error::DlpStat(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
