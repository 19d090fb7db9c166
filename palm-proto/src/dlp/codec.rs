//! DLP wire codec: encodes requests and decodes responses, with the
//! tiny/small/long argument-size classes spec.md §3/§4.6 describe.

use crate::error::{dlp_status, Error, Result};

#[derive(Debug, Clone)]
pub struct DlpArg {
    pub id: u16,
    pub data: Vec<u8>,
}

impl DlpArg {
    pub fn new(id: u16, data: Vec<u8>) -> Self {
        DlpArg { id, data }
    }
}

#[derive(Debug, Clone)]
pub struct DlpRequest {
    pub opcode: u8,
    pub args: Vec<DlpArg>,
}

#[derive(Debug, Clone)]
pub struct DlpResponse {
    pub opcode: u8,
    pub status: u16,
    pub args: Vec<DlpArg>,
}

const TINY_MAX: usize = 0xff;
const SMALL_MAX: usize = 0xffff;

/// Encode a DLP request (header + args) into the bytes PADP/NetSync sends
/// as a single message.
pub fn encode_request(req: &DlpRequest) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(req.opcode);
    out.push(req.args.len() as u8);

    for arg in &req.args {
        let size = arg.data.len();
        if size <= TINY_MAX {
            out.push((arg.id as u8) & 0x3f);
            out.push(size as u8);
            out.extend_from_slice(&arg.data);
        } else if size <= SMALL_MAX {
            out.push(((arg.id as u8) & 0x3f) | 0x80);
            out.push(0); // pad
            out.extend_from_slice(&(size as u16).to_be_bytes());
            out.extend_from_slice(&arg.data);
        } else {
            let id_field = (arg.id & 0x3fff) | 0xc000;
            out.extend_from_slice(&id_field.to_be_bytes());
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&arg.data);
        }
    }
    out
}

/// Decode a DLP response message, validating that its opcode matches
/// `request_opcode` with the high bit set.
pub fn decode_response(message: &[u8], request_opcode: u8) -> Result<DlpResponse> {
    if message.len() < 4 {
        return Err(Error::Protocol("DLP response shorter than header".into()));
    }
    let resp_opcode = message[0];
    let argc = message[1];
    let status = u16::from_be_bytes([message[2], message[3]]);

    if resp_opcode & 0x80 != 0x80 || resp_opcode & 0x7f != request_opcode {
        return Err(Error::BadId);
    }

    let mut args = Vec::with_capacity(argc as usize);
    let mut pos = 4usize;
    for _ in 0..argc {
        if pos >= message.len() {
            return Err(Error::Protocol("DLP response truncated in argument list".into()));
        }
        let class_bits = message[pos] & 0xc0;
        if class_bits == 0xc0 {
            if pos + 6 > message.len() {
                return Err(Error::Protocol("truncated long DLP argument".into()));
            }
            let id = u16::from_be_bytes([message[pos], message[pos + 1]]) & 0x3fff;
            let size = u32::from_be_bytes([
                message[pos + 2],
                message[pos + 3],
                message[pos + 4],
                message[pos + 5],
            ]) as usize;
            pos += 6;
            if pos + size > message.len() {
                return Err(Error::Protocol("long DLP argument data truncated".into()));
            }
            args.push(DlpArg::new(id, message[pos..pos + size].to_vec()));
            pos += size;
        } else if class_bits == 0x80 {
            if pos + 4 > message.len() {
                return Err(Error::Protocol("truncated small DLP argument".into()));
            }
            let id = (message[pos] & 0x3f) as u16;
            let size = u16::from_be_bytes([message[pos + 2], message[pos + 3]]) as usize;
            pos += 4;
            if pos + size > message.len() {
                return Err(Error::Protocol("small DLP argument data truncated".into()));
            }
            args.push(DlpArg::new(id, message[pos..pos + size].to_vec()));
            pos += size;
        } else {
            if pos + 2 > message.len() {
                return Err(Error::Protocol("truncated tiny DLP argument".into()));
            }
            let id = (message[pos] & 0x3f) as u16;
            let size = message[pos + 1] as usize;
            pos += 2;
            if pos + size > message.len() {
                return Err(Error::Protocol("tiny DLP argument data truncated".into()));
            }
            args.push(DlpArg::new(id, message[pos..pos + size].to_vec()));
            pos += size;
        }
    }

    Ok(DlpResponse { opcode: resp_opcode & 0x7f, status, args })
}

/// `Ok(())` if the response status is `NOERR`, otherwise the mapped error.
pub fn check_status(status: u16) -> Result<()> {
    if status == dlp_status::NOERR {
        Ok(())
    } else {
        Err(dlp_status::to_error(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_arg_roundtrip() {
        let req = DlpRequest { opcode: 0x12, args: vec![DlpArg::new(1, vec![0xaa; 10])] };
        let bytes = encode_request(&req);
        // header(2) + tiny-id(1)+size(1)+data(10)
        assert_eq!(bytes.len(), 2 + 2 + 10);

        let mut resp = vec![0x92, 1, 0, 0];
        resp.push(1); // tiny id
        resp.push(10); // size
        resp.extend_from_slice(&[0xaa; 10]);
        let decoded = decode_response(&resp, 0x12).unwrap();
        assert_eq!(decoded.args[0].data, vec![0xaa; 10]);
    }

    #[test]
    fn small_arg_class_selected_above_255() {
        let req = DlpRequest { opcode: 0x20, args: vec![DlpArg::new(2, vec![0u8; 300])] };
        let bytes = encode_request(&req);
        assert_eq!(bytes[2] & 0xc0, 0x80);
    }

    #[test]
    fn long_arg_class_selected_above_65535() {
        let req = DlpRequest { opcode: 0x20, args: vec![DlpArg::new(3, vec![0u8; 70_000])] };
        let bytes = encode_request(&req);
        assert_eq!(bytes[2] & 0xc0, 0xc0);
    }

    #[test]
    fn bad_id_on_opcode_mismatch() {
        let resp = vec![0x92, 0, 0, 0];
        let err = decode_response(&resp, 0x13).unwrap_err();
        assert!(matches!(err, Error::BadId));
    }

    #[test]
    fn status_nonzero_maps_to_dlpstat() {
        assert!(matches!(check_status(0x05), Err(Error::DlpStat(0x05))));
        assert!(matches!(check_status(0x12), Err(Error::Cancel)));
        assert!(check_status(0).is_ok());
    }
}
