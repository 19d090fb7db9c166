//! RPC-over-DLP: `ProcessRPC` wraps a raw RPC call in a DLP packet whose
//! argument encoding is its own thing, not the tiny/small/long classes the
//! rest of DLP uses (the original's `DlpRPC()` builds this by hand because
//! "the format of the request is different from other DLP requests").

use super::opcode;
use crate::error::{Error, Result};

const RPC_TRAP_REQUEST: u8 = 0x0a;

#[derive(Debug, Clone, Copy)]
pub enum RpcParam {
    Byte { byref: bool, value: u8 },
    Word { byref: bool, value: u16 },
    DWord { byref: bool, value: u32 },
    /// A byref output buffer of `len` bytes, used when the callee writes
    /// back more than 4 bytes (e.g. `MemMove`'s destination argument).
    Buffer { byref: bool, len: u8 },
}

impl RpcParam {
    fn encode_into(self, out: &mut Vec<u8>) {
        match self {
            RpcParam::Byte { byref, value } => {
                out.push(byref as u8);
                out.push(1);
                out.push(value);
                out.push(0); // pad
            }
            RpcParam::Word { byref, value } => {
                out.push(byref as u8);
                out.push(2);
                out.extend_from_slice(&value.to_be_bytes());
            }
            RpcParam::DWord { byref, value } => {
                out.push(byref as u8);
                out.push(4);
                out.extend_from_slice(&value.to_be_bytes());
            }
            RpcParam::Buffer { byref, len } => {
                out.push(byref as u8);
                out.push(len);
                out.extend(std::iter::repeat(0u8).take(len as usize));
                if len % 2 != 0 {
                    out.push(0); // pad to keep the next param word-aligned
                }
            }
        }
    }
}

/// Build the raw ProcessRPC request body: DLP header, then the RPC header
/// (call type, padding, trap, D0, A0, argc), then each parameter.
///
/// Parameters are serialized in reverse of `params`' order: this is the
/// wire contract the original RPC trampoline expects (`argv[]` is populated
/// back-to-front relative to the trap's declared argument order), not a bug
/// to normalize away.
pub fn encode_call(trap: u16, d0: u32, a0: u32, params: &[RpcParam]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(opcode::PROCESSRPC);
    out.push(1); // DLP arg count, always 1 for RPC

    out.push(RPC_TRAP_REQUEST);
    out.push(0); // padding
    out.extend_from_slice(&trap.to_be_bytes());
    out.extend_from_slice(&d0.to_be_bytes());
    out.extend_from_slice(&a0.to_be_bytes());
    out.extend_from_slice(&(params.len() as u16).to_be_bytes());

    for p in params.iter().rev() {
        p.encode_into(&mut out);
    }
    out
}

pub struct RpcResult {
    pub status: u16,
    pub d0: u32,
    pub a0: u32,
    /// Byref argument values, in call order; `None` for arguments that
    /// were passed by value and so weren't echoed back.
    pub byref_values: Vec<Option<Vec<u8>>>,
}

/// Decode a ProcessRPC response. `argc` is the number of parameters the
/// call was made with (the response echoes the same count).
pub fn decode_response(message: &[u8], argc: usize) -> Result<RpcResult> {
    if message.len() < 12 {
        return Err(Error::Protocol("RPC response shorter than header".into()));
    }
    if message[0] & 0x7f != opcode::PROCESSRPC {
        return Err(Error::BadId);
    }
    let status = u16::from_be_bytes([message[2], message[3]]);
    // message[4] = call type echo, message[5] = padding, message[6..8] = trap
    let d0 = u32::from_be_bytes([message[8], message[9], message[10], message[11]]);
    let mut pos = 12;
    if pos + 4 > message.len() {
        return Err(Error::Protocol("RPC response truncated before A0/argc".into()));
    }
    let a0 = u32::from_be_bytes([message[pos], message[pos + 1], message[pos + 2], message[pos + 3]]);
    pos += 4;
    if pos + 2 > message.len() {
        return Err(Error::Protocol("RPC response truncated before return argc".into()));
    }
    let ret_argc = u16::from_be_bytes([message[pos], message[pos + 1]]) as usize;
    pos += 2;

    let mut byref_values = Vec::with_capacity(argc);
    for _ in 0..ret_argc {
        if pos + 2 > message.len() {
            return Err(Error::Protocol("RPC response truncated in argument list".into()));
        }
        let byref = message[pos] != 0;
        let arg_len = message[pos + 1] as usize;
        pos += 2;
        let padded = arg_len + (arg_len & 1);
        if pos + padded > message.len() {
            return Err(Error::Protocol("RPC response argument data truncated".into()));
        }
        if byref {
            byref_values.push(Some(message[pos..pos + arg_len].to_vec()));
        } else {
            byref_values.push(None);
        }
        pos += padded;
    }

    Ok(RpcResult { status, d0, a0, byref_values })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_and_params() {
        let params = [RpcParam::Word { byref: false, value: 0x1234 }];
        let bytes = encode_call(0xa027, 0, 0, &params);
        assert_eq!(bytes[0], opcode::PROCESSRPC);
        assert_eq!(bytes[2], RPC_TRAP_REQUEST);
        assert_eq!(&bytes[4..6], &0xa027u16.to_be_bytes());
    }

    #[test]
    fn decodes_byref_word_argument() {
        let mut msg = vec![opcode::PROCESSRPC | 0x80, 1, 0, 0]; // header + status
        msg.extend_from_slice(&[0, 0]); // call type echo + pad
        msg.extend_from_slice(&0xa027u16.to_be_bytes());
        msg.extend_from_slice(&0u32.to_be_bytes()); // D0
        msg.extend_from_slice(&0u32.to_be_bytes()); // A0
        msg.extend_from_slice(&1u16.to_be_bytes()); // ret_argc
        msg.push(1); // byref
        msg.push(2); // size
        msg.extend_from_slice(&0x5678u16.to_be_bytes());

        let result = decode_response(&msg, 1).unwrap();
        assert_eq!(result.byref_values[0], Some(vec![0x56, 0x78]));
    }
}
