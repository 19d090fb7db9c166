//! DLP request opcodes, per the original protocol's `DLPREQ_*` table.

#![allow(dead_code)]

pub const READUSERINFO: u8 = 0x10;
pub const WRITEUSERINFO: u8 = 0x11;
pub const READSYSINFO: u8 = 0x12;
pub const GETSYSDATETIME: u8 = 0x13;
pub const SETSYSDATETIME: u8 = 0x14;
pub const READSTORAGEINFO: u8 = 0x15;
pub const READDBLIST: u8 = 0x16;
pub const OPENDB: u8 = 0x17;
pub const CREATEDB: u8 = 0x18;
pub const CLOSEDB: u8 = 0x19;
pub const DELETEDB: u8 = 0x1a;
pub const READAPPBLOCK: u8 = 0x1b;
pub const WRITEAPPBLOCK: u8 = 0x1c;
pub const READSORTBLOCK: u8 = 0x1d;
pub const WRITESORTBLOCK: u8 = 0x1e;
pub const READNEXTMODIFIEDREC: u8 = 0x1f;
pub const READRECORD: u8 = 0x20;
pub const WRITERECORD: u8 = 0x21;
pub const DELETERECORD: u8 = 0x22;
pub const READRESOURCE: u8 = 0x23;
pub const WRITERESOURCE: u8 = 0x24;
pub const DELETERESOURCE: u8 = 0x25;
pub const CLEANUPDATABASE: u8 = 0x26;
pub const RESETSYNCFLAGS: u8 = 0x27;
pub const CALLAPPLICATION: u8 = 0x28;
pub const RESETSYSTEM: u8 = 0x29;
pub const ADDSYNCLOGENTRY: u8 = 0x2a;
pub const READOPENDBINFO: u8 = 0x2b;
pub const MOVECATEGORY: u8 = 0x2c;
pub const PROCESSRPC: u8 = 0x2d;
pub const OPENCONDUIT: u8 = 0x2e;
pub const ENDOFSYNC: u8 = 0x2f;
pub const RESETRECORDINDEX: u8 = 0x30;
pub const READRECORDIDLIST: u8 = 0x31;
pub const READNEXTRECINCATEGORY: u8 = 0x32;
pub const READAPPPREFERENCE: u8 = 0x33;
pub const WRITEAPPPREFERENCE: u8 = 0x34;
pub const READNETSYNCINFO: u8 = 0x35;
pub const WRITENETSYNCINFO: u8 = 0x36;
pub const READFEATURE: u8 = 0x37;

/// Argument IDs are local to each opcode: the first argument of a request
/// is always id 1, the first of a response id 1, and so on, incrementing
/// per argument in the order the device-side spec lists them.
pub mod argid {
    pub const FIRST: u16 = 1;
}
