//! The `Palm` device view: cached facts about the connected handheld,
//! fetched lazily on first access (spec.md §4.8).

use crate::dlp::commands::{self, DbInfo, DlpChannel, NetSyncInfo, StorageInfo, SysInfo, UserInfo};
use crate::dlp::rpc::{RpcParam, RpcResult};
use crate::error::Result;

/// 12 bytes of `0xff` is the canonical Visor placeholder serial; devices
/// that never burned a real one report this instead.
const VISOR_PLACEHOLDER: [u8; 12] = [0xff; 12];
const VISOR_ALIAS: &str = "*Visor*";

/// RPC trap to read a ROM feature/token; `snum` returns a pointer and
/// length into device RAM that must then be pulled out with `MemMove`.
const TRAP_FTR_GET: u16 = 0xa27;
const TRAP_MEM_MOVE: u16 = 0xa026;
const SNUM_FEATURE_CREATOR: u32 = 0x70736973; // 'psis'

pub struct Palm {
    sys_info: Option<SysInfo>,
    user_info: Option<UserInfo>,
    netsync_info: Option<NetSyncInfo>,
    storage_info: Option<StorageInfo>,
    serial: Option<String>,
    db_list: Option<Vec<DbInfo>>,
    iter_pos: usize,
}

impl Palm {
    pub fn new() -> Self {
        Palm {
            sys_info: None,
            user_info: None,
            netsync_info: None,
            storage_info: None,
            serial: None,
            db_list: None,
            iter_pos: 0,
        }
    }

    pub fn sys_info(&mut self, ch: &mut impl DlpChannel) -> Result<&SysInfo> {
        if self.sys_info.is_none() {
            self.sys_info = Some(commands::read_sys_info(ch)?);
        }
        Ok(self.sys_info.as_ref().unwrap())
    }

    pub fn user_info(&mut self, ch: &mut impl DlpChannel) -> Result<&UserInfo> {
        if self.user_info.is_none() {
            self.user_info = Some(commands::read_user_info(ch)?);
        }
        Ok(self.user_info.as_ref().unwrap())
    }

    pub fn netsync_info(&mut self, ch: &mut impl DlpChannel) -> Result<&NetSyncInfo> {
        if self.netsync_info.is_none() {
            self.netsync_info = Some(commands::read_netsync_info(ch)?);
        }
        Ok(self.netsync_info.as_ref().unwrap())
    }

    pub fn storage_info(&mut self, ch: &mut impl DlpChannel) -> Result<&StorageInfo> {
        if self.storage_info.is_none() {
            self.storage_info = Some(commands::read_storage_info(ch)?);
        }
        Ok(self.storage_info.as_ref().unwrap())
    }

    /// Serial number, with ROM-version gating, ROM-token lookup, and alias
    /// substitution (spec.md §4.8). Empty string means "device has none."
    pub fn serial(&mut self, ch: &mut impl DlpChannel) -> Result<&str> {
        if self.serial.is_none() {
            let rom_version = self.sys_info(ch)?.rom_version;
            self.serial = Some(if rom_version < 0x03000000 {
                String::new()
            } else {
                fetch_serial(ch)?
            });
        }
        Ok(self.serial.as_deref().unwrap())
    }

    /// Load the full database list in one batched pass, following
    /// `more_flag` until it clears (authoritative regardless of any
    /// reported total count).
    pub fn ensure_all_dbs(&mut self, ch: &mut impl DlpChannel, card_no: u8) -> Result<&[DbInfo]> {
        if self.db_list.is_none() {
            let mut all = Vec::new();
            let mut start = 0u16;
            loop {
                let page = commands::read_db_list(ch, card_no, start)?;
                let got = page.entries.len();
                let more = page.more;
                all.extend(page.entries);
                if !more || got == 0 {
                    break;
                }
                start += got as u16;
            }
            self.db_list = Some(all);
        }
        Ok(self.db_list.as_ref().unwrap())
    }

    /// Append a locally-created database to the cached list, if one is
    /// loaded, keeping the count consistent without a re-fetch.
    pub fn note_created_db(&mut self, info: DbInfo) {
        if let Some(list) = self.db_list.as_mut() {
            list.push(info);
        }
    }

    pub fn reset_iter(&mut self) {
        self.iter_pos = 0;
    }

    pub fn next_db(&mut self) -> Option<&DbInfo> {
        let list = self.db_list.as_ref()?;
        let entry = list.get(self.iter_pos);
        if entry.is_some() {
            self.iter_pos += 1;
        }
        entry
    }
}

impl Default for Palm {
    fn default() -> Self {
        Self::new()
    }
}

fn fetch_serial(ch: &mut impl DlpChannel) -> Result<String> {
    let ftr = commands::process_rpc(
        ch,
        TRAP_FTR_GET,
        0,
        0,
        &[
            RpcParam::DWord { byref: false, value: SNUM_FEATURE_CREATOR },
            RpcParam::Word { byref: false, value: 0 },
            RpcParam::DWord { byref: true, value: 0 },
        ],
    )?;
    let ptr = ftr.d0;
    if ptr == 0 {
        return Ok(String::new());
    }

    let len_bytes = ftr
        .byref_values
        .last()
        .cloned()
        .flatten()
        .unwrap_or_default();
    let len = len_bytes.get(0).copied().unwrap_or(0) as u32;
    if len == 0 {
        return Ok(String::new());
    }

    let moved: RpcResult = commands::process_rpc(
        ch,
        TRAP_MEM_MOVE,
        0,
        0,
        &[
            RpcParam::Buffer { byref: true, len: len as u8 },
            RpcParam::DWord { byref: false, value: ptr },
            RpcParam::DWord { byref: false, value: len },
        ],
    )?;
    let raw = moved
        .byref_values
        .first()
        .cloned()
        .flatten()
        .unwrap_or_default();

    if raw.len() == VISOR_PLACEHOLDER.len() && raw == VISOR_PLACEHOLDER {
        return Ok(VISOR_ALIAS.to_string());
    }

    Ok(raw.iter().map(|&b| b as char).collect())
}

/// The snum check-character: fold each uppercased byte with a
/// left-rotating accumulator, then nibble-sum and offset by 2, mapping
/// 0-9/A-Z while skipping `0`/`1` (they're too easily confused with
/// `O`/`I` on a device screen).
pub fn check_character(serial: &str) -> char {
    let mut acc: u32 = 0;
    for b in serial.bytes() {
        let upper = b.to_ascii_uppercase();
        acc = acc.rotate_left(1).wrapping_add(upper as u32);
    }
    let nibble_sum = ((acc >> 28) & 0xf)
        + ((acc >> 24) & 0xf)
        + ((acc >> 20) & 0xf)
        + ((acc >> 16) & 0xf)
        + ((acc >> 12) & 0xf)
        + ((acc >> 8) & 0xf)
        + ((acc >> 4) & 0xf)
        + (acc & 0xf);
    let mut value = (nibble_sum + 2) % 34; // 0-9, A-Z minus O,I = 34 symbols
    let alphabet: Vec<char> = ('0'..='9').chain('A'..='Z').filter(|&c| c != 'O' && c != 'I').collect();
    if value as usize >= alphabet.len() {
        value = 0;
    }
    alphabet[value as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_character_is_stable_for_same_input() {
        let a = check_character("ABC123");
        let b = check_character("ABC123");
        assert_eq!(a, b);
    }

    #[test]
    fn check_character_never_emits_confusable_letters() {
        for s in ["", "X", "SERIALNUMBER123"] {
            let c = check_character(s);
            assert_ne!(c, 'O');
            assert_ne!(c, 'I');
        }
    }
}
