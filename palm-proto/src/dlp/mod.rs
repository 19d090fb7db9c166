//! Desktop Link Protocol: the RPC layer spoken over PADP or NetSync.
//!
//! `codec` handles the wire encoding (tiny/small/long argument classes);
//! `commands` provides typed wrappers over the DLP opcode table; `rpc`
//! handles the separately-encoded `ProcessRPC` call.

pub mod codec;
pub mod commands;
pub mod opcode;
pub mod rpc;

pub use codec::{DlpArg, DlpRequest, DlpResponse};
pub use commands::DlpChannel;

use crate::error::Result;

/// Initial capacity of the response argument vector. The original grows
/// this with `realloc` and never shrinks it back down for the life of the
/// connection; `Vec` gives us that for free just by not calling
/// `shrink_to_fit`.
pub const DEFAULT_ARGV_LEN: usize = 10;

/// Send `req` and wait for its response over `channel`, validating the
/// opcode match and translating a non-`NOERR` status into an `Err`.
pub fn transact(channel: &mut impl DlpChannel, req: DlpRequest) -> Result<DlpResponse> {
    let opcode = req.opcode;
    let raw_req = codec::encode_request(&req);
    let raw_resp = channel.send_receive(&raw_req)?;
    let resp = codec::decode_response(&raw_resp, opcode)?;
    codec::check_status(resp.status)?;
    Ok(resp)
}
