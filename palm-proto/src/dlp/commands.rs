//! Typed wrappers over the DLP opcode table (spec.md §4.7). Each function
//! builds a [`DlpRequest`], sends it over whatever channel session wiring
//! (PADP or NetSync) the caller has, and unpacks the typed response.

use super::opcode;
use super::{transact, DlpArg, DlpRequest, DlpResponse};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Whatever owns the session framing (a `Connection`, typically) needs to
/// be able to round-trip one opaque DLP message for the layer above.
pub trait DlpChannel {
    fn send_receive(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

fn arg1(data: Vec<u8>) -> Vec<DlpArg> {
    vec![DlpArg::new(1, data)]
}

fn first_arg<'a>(resp: &'a DlpResponse) -> Result<&'a [u8]> {
    resp.args
        .first()
        .map(|a| a.data.as_slice())
        .ok_or_else(|| Error::Protocol("expected at least one response argument".into()))
}

#[derive(Debug, Clone)]
pub struct SysInfo {
    pub rom_version: u32,
    pub localization: u32,
    pub product_id: u32,
}

pub fn read_sys_info(ch: &mut impl DlpChannel) -> Result<SysInfo> {
    let req = DlpRequest { opcode: opcode::READSYSINFO, args: vec![] };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let mut c = Cursor::new(data);
    let rom_version = c.read_u32::<BigEndian>()?;
    let localization = c.read_u32::<BigEndian>()?;
    let _unused = c.read_u8()?;
    let _prod_id_size = c.read_u8()?;
    let product_id = c.read_u32::<BigEndian>()?;
    Ok(SysInfo { rom_version, localization, product_id })
}

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user_id: u32,
    pub viewer_id: u32,
    pub last_sync_pc: u32,
    pub last_sync_date: u32,
    pub username: String,
}

pub fn read_user_info(ch: &mut impl DlpChannel) -> Result<UserInfo> {
    let req = DlpRequest { opcode: opcode::READUSERINFO, args: vec![] };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let mut c = Cursor::new(data);
    let user_id = c.read_u32::<BigEndian>()?;
    let viewer_id = c.read_u32::<BigEndian>()?;
    let last_sync_pc = c.read_u32::<BigEndian>()?;
    let last_sync_date = c.read_u32::<BigEndian>()?;
    let username_len = c.read_u8()? as usize;
    let _passwd_len = c.read_u8()?;
    let rest = &data[c.position() as usize..];
    let username = String::from_utf8_lossy(
        rest.get(..username_len.saturating_sub(1)).unwrap_or(&[]),
    )
    .into_owned();
    Ok(UserInfo { user_id, viewer_id, last_sync_pc, last_sync_date, username })
}

/// Bits of `dlp_setuserinfo`'s modification-flags byte (only the ones
/// this stack ever sets).
pub mod user_info_flags {
    pub const USER_ID: u8 = 0x80;
    pub const USERNAME: u8 = 0x40;
    pub const LAST_SYNC_PC: u8 = 0x10;
    pub const LAST_SYNC_DATE: u8 = 0x08;
}

pub fn write_user_info(ch: &mut impl DlpChannel, user_id: u32, username: &str) -> Result<()> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(user_id)?;
    body.write_u32::<BigEndian>(0)?; // viewer id, unchanged
    body.write_u32::<BigEndian>(0)?; // last sync pc, unchanged
    body.write_u32::<BigEndian>(0)?; // last sync date, unchanged
    body.push(user_info_flags::USER_ID);
    body.push(username.len() as u8 + 1);
    body.extend_from_slice(username.as_bytes());
    body.push(0);
    let req = DlpRequest { opcode: opcode::WRITEUSERINFO, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

/// End-of-session identity update: `last_sync_pc` and `last_sync_date`
/// only, per spec.md §4.9 ("update device userinfo with last_sync_pc=...,
/// last_sync_time=now").
pub fn write_sync_state(ch: &mut impl DlpChannel, last_sync_pc: u32, last_sync_date: u32) -> Result<()> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(0)?; // user id, unchanged
    body.write_u32::<BigEndian>(0)?; // viewer id, unchanged
    body.write_u32::<BigEndian>(last_sync_pc)?;
    body.write_u32::<BigEndian>(last_sync_date)?;
    body.push(user_info_flags::LAST_SYNC_PC | user_info_flags::LAST_SYNC_DATE);
    body.push(0); // username length: none set
    let req = DlpRequest { opcode: opcode::WRITEUSERINFO, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NetSyncInfo {
    pub lan_sync_on: bool,
    pub hostname: String,
    pub address: String,
    pub netmask: String,
}

pub fn read_netsync_info(ch: &mut impl DlpChannel) -> Result<NetSyncInfo> {
    let req = DlpRequest { opcode: opcode::READNETSYNCINFO, args: vec![] };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let lan_sync_on = data.first().copied().unwrap_or(0) != 0;
    let lens: Vec<usize> = data.get(5..11).unwrap_or(&[]).iter().map(|&b| b as usize).collect();
    let mut pos = 24usize.min(data.len());
    let mut take = |n: usize| -> String {
        let s = data.get(pos..pos + n.saturating_sub(1)).unwrap_or(&[]);
        pos += n;
        String::from_utf8_lossy(s).into_owned()
    };
    let hostname = lens.first().map(|&n| take(n)).unwrap_or_default();
    let address = lens.get(1).map(|&n| take(n)).unwrap_or_default();
    let netmask = lens.get(2).map(|&n| take(n)).unwrap_or_default();
    Ok(NetSyncInfo { lan_sync_on, hostname, address, netmask })
}

pub fn write_netsync_info(ch: &mut impl DlpChannel, info: &NetSyncInfo) -> Result<()> {
    let mut body = Vec::new();
    body.push(0x01); // modified fields: lan_sync_on
    body.push(info.lan_sync_on as u8);
    body.extend_from_slice(&[0u8; 22]);
    body.extend_from_slice(info.hostname.as_bytes());
    body.push(0);
    body.extend_from_slice(info.address.as_bytes());
    body.push(0);
    body.extend_from_slice(info.netmask.as_bytes());
    body.push(0);
    let req = DlpRequest { opcode: opcode::WRITENETSYNCINFO, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub card_no: u8,
    pub rom_size: u32,
    pub ram_size: u32,
    pub free_ram: u32,
    pub card_name: String,
    pub manufacturer_name: String,
}

/// Per the resolved open question: only one storage card is ever reported,
/// so there's no loop over a "more cards" flag here.
pub fn read_storage_info(ch: &mut impl DlpChannel) -> Result<StorageInfo> {
    let mut body = Vec::new();
    body.push(0); // card number requested
    body.push(0); // unused
    let req = DlpRequest { opcode: opcode::READSTORAGEINFO, args: arg1(body) };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let mut c = Cursor::new(data);
    let _last_card = c.read_u8()?;
    let _more = c.read_u8()?;
    let _act_count = c.read_u8()?;
    let _ = c.read_u8()?; // padding
    let card_no = 0;
    let rom_size = c.read_u32::<BigEndian>()?;
    let ram_size = c.read_u32::<BigEndian>()?;
    let free_ram = c.read_u32::<BigEndian>()?;
    let card_name_len = c.read_u8()? as usize;
    let manuf_name_len = c.read_u8()? as usize;
    let rest = &data[c.position() as usize..];
    let card_name =
        String::from_utf8_lossy(rest.get(..card_name_len.saturating_sub(1)).unwrap_or(&[])).into_owned();
    let manufacturer_name = String::from_utf8_lossy(
        rest.get(card_name_len..card_name_len + manuf_name_len.saturating_sub(1)).unwrap_or(&[]),
    )
    .into_owned();
    Ok(StorageInfo { card_no, rom_size, ram_size, free_ram, card_name, manufacturer_name })
}

#[derive(Debug, Clone)]
pub struct DbInfo {
    pub index: u16,
    pub db_flags: u16,
    pub db_type: u32,
    pub creator: u32,
    pub version: u16,
    pub more: bool,
    pub name: String,
}

pub struct DbListPage {
    pub entries: Vec<DbInfo>,
    pub more: bool,
}

/// List databases on `card_no` starting at `start_index`, one response
/// page at a time. The caller loops, bumping `start_index` by the number
/// of entries returned, until `more` is false (the authoritative signal;
/// see the resolved open question on ignoring any reported totals).
pub fn read_db_list(ch: &mut impl DlpChannel, card_no: u8, start_index: u16) -> Result<DbListPage> {
    let mut body = Vec::new();
    body.push(0x80); // flags: list RAM databases
    body.push(card_no);
    body.write_u16::<BigEndian>(start_index)?;
    let req = DlpRequest { opcode: opcode::READDBLIST, args: arg1(body) };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let mut c = Cursor::new(data);
    let last_index = c.read_u16::<BigEndian>()?;
    let num = c.read_u8()?;
    let more = c.read_u8()? != 0;
    let mut entries = Vec::with_capacity(num as usize);
    for i in 0..num {
        let entry_len = c.read_u8()? as usize;
        let start = c.position() as usize;
        let entry = &data[start..start + entry_len.saturating_sub(1)];
        let mut e = Cursor::new(entry);
        let db_flags = e.read_u16::<BigEndian>()?;
        let db_type = e.read_u32::<BigEndian>()?;
        let creator = e.read_u32::<BigEndian>()?;
        let version = e.read_u16::<BigEndian>()?;
        let _mod_num = e.read_u32::<BigEndian>()?;
        let name_bytes = &entry[e.position() as usize..];
        let name = String::from_utf8_lossy(
            name_bytes.split(|&b| b == 0).next().unwrap_or(&[]),
        )
        .into_owned();
        entries.push(DbInfo {
            index: last_index + i as u16,
            db_flags,
            db_type,
            creator,
            version,
            more,
            name,
        });
        c.set_position((start + entry_len) as u64);
    }
    Ok(DbListPage { entries, more })
}

pub fn open_db(ch: &mut impl DlpChannel, card_no: u8, name: &str, mode: u8) -> Result<u8> {
    let mut body = vec![card_no, mode];
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    let req = DlpRequest { opcode: opcode::OPENDB, args: arg1(body) };
    let resp = transact(ch, req)?;
    Ok(*first_arg(&resp)?.first().ok_or(Error::Protocol("OpenDB: missing handle".into()))?)
}

pub fn close_db(ch: &mut impl DlpChannel, handle: u8) -> Result<()> {
    let req = DlpRequest { opcode: opcode::CLOSEDB, args: arg1(vec![handle]) };
    transact(ch, req)?;
    Ok(())
}

pub fn create_db(
    ch: &mut impl DlpChannel,
    creator: u32,
    db_type: u32,
    card_no: u8,
    flags: u16,
    version: u16,
    name: &str,
) -> Result<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(creator)?;
    body.write_u32::<BigEndian>(db_type)?;
    body.push(card_no);
    body.push(0); // padding
    body.write_u16::<BigEndian>(flags)?;
    body.write_u16::<BigEndian>(version)?;
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    let req = DlpRequest { opcode: opcode::CREATEDB, args: arg1(body) };
    let resp = transact(ch, req)?;
    Ok(*first_arg(&resp)?.first().ok_or(Error::Protocol("CreateDB: missing handle".into()))?)
}

pub fn delete_db(ch: &mut impl DlpChannel, card_no: u8, name: &str) -> Result<()> {
    let mut body = vec![card_no, 0];
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    let req = DlpRequest { opcode: opcode::DELETEDB, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

pub fn open_conduit(ch: &mut impl DlpChannel) -> Result<()> {
    let req = DlpRequest { opcode: opcode::OPENCONDUIT, args: vec![] };
    transact(ch, req)?;
    Ok(())
}

pub fn end_of_sync(ch: &mut impl DlpChannel, status: u16) -> Result<()> {
    let mut body = Vec::new();
    body.write_u16::<BigEndian>(status)?;
    let req = DlpRequest { opcode: opcode::ENDOFSYNC, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

pub fn add_sync_log_entry(ch: &mut impl DlpChannel, message: &str) -> Result<()> {
    let mut body = message.as_bytes().to_vec();
    body.push(0);
    let req = DlpRequest { opcode: opcode::ADDSYNCLOGENTRY, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

pub fn reset_sync_flags(ch: &mut impl DlpChannel, handle: u8) -> Result<()> {
    let req = DlpRequest { opcode: opcode::RESETSYNCFLAGS, args: arg1(vec![handle]) };
    transact(ch, req)?;
    Ok(())
}

pub fn read_app_block(ch: &mut impl DlpChannel, handle: u8) -> Result<Vec<u8>> {
    let mut body = vec![handle, 0];
    body.write_u16::<BigEndian>(0)?; // offset
    body.write_u16::<BigEndian>(0xffff)?; // length: whole block
    let req = DlpRequest { opcode: opcode::READAPPBLOCK, args: arg1(body) };
    let resp = transact(ch, req)?;
    Ok(first_arg(&resp)?[2..].to_vec())
}

pub fn write_app_block(ch: &mut impl DlpChannel, handle: u8, data: &[u8]) -> Result<()> {
    let mut body = vec![handle, 0];
    body.write_u16::<BigEndian>(data.len() as u16)?;
    body.extend_from_slice(data);
    let req = DlpRequest { opcode: opcode::WRITEAPPBLOCK, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub record_id: u32,
    pub index: u16,
    pub size: u16,
    pub attrs: u8,
    pub category: u8,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub header: RecordHeader,
    pub data: Vec<u8>,
}

fn decode_record_response(resp: &DlpResponse) -> Result<Record> {
    let data = first_arg(resp)?;
    let mut c = Cursor::new(data);
    let record_id = c.read_u32::<BigEndian>()?;
    let index = c.read_u16::<BigEndian>()?;
    let size = c.read_u16::<BigEndian>()?;
    let attrs = c.read_u8()?;
    let category = c.read_u8()?;
    let body = data[c.position() as usize..].to_vec();
    Ok(Record { header: RecordHeader { record_id, index, size, attrs, category }, data: body })
}

pub fn read_record_by_index(ch: &mut impl DlpChannel, handle: u8, index: u16) -> Result<Record> {
    let mut body = vec![handle, 0];
    body.write_u16::<BigEndian>(index)?;
    let req = DlpRequest { opcode: opcode::READRECORD, args: arg1(body) };
    decode_record_response(&transact(ch, req)?)
}

pub fn read_record_by_id(ch: &mut impl DlpChannel, handle: u8, record_id: u32) -> Result<Record> {
    let mut body = vec![handle, 0];
    body.write_u32::<BigEndian>(record_id)?;
    let req = DlpRequest { opcode: opcode::READRECORD, args: arg1(body) };
    decode_record_response(&transact(ch, req)?)
}

pub fn read_record_id_list(
    ch: &mut impl DlpChannel,
    handle: u8,
    start_index: u16,
    max: u16,
) -> Result<Vec<u32>> {
    let mut body = vec![handle, 0];
    body.write_u16::<BigEndian>(start_index)?;
    body.write_u16::<BigEndian>(max)?;
    let req = DlpRequest { opcode: opcode::READRECORDIDLIST, args: arg1(body) };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    let count = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut ids = Vec::with_capacity(count);
    let mut c = Cursor::new(&data[2..]);
    for _ in 0..count {
        ids.push(c.read_u32::<BigEndian>()?);
    }
    Ok(ids)
}

pub fn write_record(ch: &mut impl DlpChannel, handle: u8, record: &Record) -> Result<u32> {
    let mut body = vec![handle, 0];
    body.write_u32::<BigEndian>(record.header.record_id)?;
    body.push(record.header.attrs);
    body.push(record.header.category);
    body.extend_from_slice(&record.data);
    let req = DlpRequest { opcode: opcode::WRITERECORD, args: arg1(body) };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

pub fn delete_record(ch: &mut impl DlpChannel, handle: u8, record_id: u32) -> Result<()> {
    let mut body = vec![handle, 0];
    body.write_u32::<BigEndian>(record_id)?;
    let req = DlpRequest { opcode: opcode::DELETERECORD, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

pub fn read_next_modified_rec(ch: &mut impl DlpChannel, handle: u8) -> Result<Option<Record>> {
    let req = DlpRequest { opcode: opcode::READNEXTMODIFIEDREC, args: arg1(vec![handle]) };
    match transact(ch, req) {
        Ok(resp) => Ok(Some(decode_record_response(&resp)?)),
        Err(Error::DlpStat(code)) if code == crate::error::dlp_status::NOTFOUND => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn read_resource_by_index(ch: &mut impl DlpChannel, handle: u8, index: u16) -> Result<Vec<u8>> {
    let mut body = vec![handle, 0];
    body.write_u16::<BigEndian>(index)?;
    let req = DlpRequest { opcode: opcode::READRESOURCE, args: arg1(body) };
    let resp = transact(ch, req)?;
    Ok(first_arg(&resp)?[10..].to_vec())
}

pub fn write_resource(
    ch: &mut impl DlpChannel,
    handle: u8,
    res_type: u32,
    res_id: u16,
    data: &[u8],
) -> Result<()> {
    let mut body = vec![handle, 0];
    body.write_u32::<BigEndian>(res_type)?;
    body.write_u16::<BigEndian>(res_id)?;
    body.write_u16::<BigEndian>(data.len() as u16)?;
    body.extend_from_slice(data);
    let req = DlpRequest { opcode: opcode::WRITERESOURCE, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

pub fn delete_resource(ch: &mut impl DlpChannel, handle: u8, res_type: u32, res_id: u16) -> Result<()> {
    let mut body = vec![handle, 0];
    body.write_u32::<BigEndian>(res_type)?;
    body.write_u16::<BigEndian>(res_id)?;
    let req = DlpRequest { opcode: opcode::DELETERESOURCE, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

/// Read an app preference with the caller-chosen `buf_len`: pass 0 to learn
/// the true size without transferring data, then the exact size to fetch
/// it. Returns `(actual_size, data)`; `data` is empty on the `buf_len=0` pass.
pub fn read_app_preference(
    ch: &mut impl DlpChannel,
    creator: u32,
    pref_id: u16,
    buf_len: u16,
    backup: bool,
) -> Result<(u16, Vec<u8>)> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(creator)?;
    body.write_u16::<BigEndian>(pref_id)?;
    body.write_u16::<BigEndian>(buf_len)?;
    body.push(backup as u8);
    body.push(0);
    let req = DlpRequest { opcode: opcode::READAPPPREFERENCE, args: arg1(body) };
    let resp = transact(ch, req)?;
    let raw = first_arg(&resp)?;
    if raw.len() < 6 {
        return Err(Error::Protocol("ReadAppPreference response shorter than header".into()));
    }
    let actual_size = u16::from_be_bytes([raw[0], raw[1]]);
    Ok((actual_size, raw[6..].to_vec()))
}

pub fn write_app_preference(
    ch: &mut impl DlpChannel,
    creator: u32,
    pref_id: u16,
    version: u16,
    backup: bool,
    data: &[u8],
) -> Result<()> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(creator)?;
    body.write_u16::<BigEndian>(pref_id)?;
    body.write_u16::<BigEndian>(version)?;
    body.write_u16::<BigEndian>(data.len() as u16)?;
    body.push(backup as u8);
    body.push(0);
    body.extend_from_slice(data);
    let req = DlpRequest { opcode: opcode::WRITEAPPPREFERENCE, args: arg1(body) };
    transact(ch, req)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OpenDbInfo {
    pub num_records: u16,
}

pub fn read_open_db_info(ch: &mut impl DlpChannel, handle: u8) -> Result<OpenDbInfo> {
    let req = DlpRequest { opcode: opcode::READOPENDBINFO, args: arg1(vec![handle]) };
    let resp = transact(ch, req)?;
    let data = first_arg(&resp)?;
    Ok(OpenDbInfo { num_records: u16::from_be_bytes([data[0], data[1]]) })
}

/// `ProcessRPC` uses its own raw encoding (see [`super::rpc`]), not the
/// tiny/small/long argument classes, so it bypasses [`transact`].
pub fn process_rpc(
    ch: &mut impl DlpChannel,
    trap: u16,
    d0: u32,
    a0: u32,
    params: &[super::rpc::RpcParam],
) -> Result<super::rpc::RpcResult> {
    let raw_req = super::rpc::encode_call(trap, d0, a0, params);
    let raw_resp = ch.send_receive(&raw_req)?;
    super::rpc::decode_response(&raw_resp, params.len())
}
