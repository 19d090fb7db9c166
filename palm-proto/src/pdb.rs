//! `.pdb`/`.prc` file format: 78-byte header, record or resource index,
//! optional AppInfo/SortInfo blocks, then payloads at the offsets the
//! index declares (spec.md §6).

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const HEADER_LEN: usize = 78;
const RECORD_LIST_HEADER_LEN: usize = 6;
const RECORD_INDEX_ENTRY_LEN: usize = 8;
const RESOURCE_INDEX_ENTRY_LEN: usize = 10;

/// Palm epoch (1904-01-01 UTC) is this many seconds before the POSIX
/// epoch.
const PALM_EPOCH_OFFSET: u64 = 2_082_844_800;

pub fn palm_time_to_unix(palm_secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs((palm_secs as u64).saturating_sub(PALM_EPOCH_OFFSET))
}

pub fn unix_to_palm_time(t: SystemTime) -> u32 {
    let unix_secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    (unix_secs + PALM_EPOCH_OFFSET) as u32
}

#[derive(Debug, Clone)]
pub struct PdbHeader {
    pub name: String,
    pub attributes: u16,
    pub version: u16,
    pub creation_time: u32,
    pub modification_time: u32,
    pub backup_time: u32,
    pub modification_number: u32,
    pub db_type: u32,
    pub creator: u32,
    pub unique_id_seed: u32,
}

#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub offset: u32,
    pub attributes: u8,
    pub unique_id: u32, // only the low 24 bits are stored on disk
}

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub res_type: u32,
    pub res_id: u16,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub enum Index {
    Records(Vec<RecordEntry>),
    Resources(Vec<ResourceEntry>),
}

#[derive(Debug, Clone)]
pub struct PdbFile {
    pub header: PdbHeader,
    pub index: Index,
    pub app_info: Option<Vec<u8>>,
    pub sort_info: Option<Vec<u8>>,
    pub payloads: Vec<Vec<u8>>,
}

const RESOURCE_DB_FLAG: u16 = 0x0001;

fn read_name(bytes: &[u8; 32]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn write_name(out: &mut [u8; 32], name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(31);
    out[..n].copy_from_slice(&bytes[..n]);
}

impl PdbFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + RECORD_LIST_HEADER_LEN {
            return Err(Error::Protocol("pdb file shorter than fixed headers".into()));
        }
        let mut c = Cursor::new(data);
        let mut name_buf = [0u8; 32];
        c.read_exact(&mut name_buf)?;
        let name = read_name(&name_buf);
        let attributes = c.read_u16::<BigEndian>()?;
        let version = c.read_u16::<BigEndian>()?;
        let creation_time = c.read_u32::<BigEndian>()?;
        let modification_time = c.read_u32::<BigEndian>()?;
        let backup_time = c.read_u32::<BigEndian>()?;
        let modification_number = c.read_u32::<BigEndian>()?;
        let _app_info_offset_on_disk = c.read_u32::<BigEndian>()?;
        let _sort_info_offset_on_disk = c.read_u32::<BigEndian>()?;
        let db_type = c.read_u32::<BigEndian>()?;
        let creator = c.read_u32::<BigEndian>()?;
        let unique_id_seed = c.read_u32::<BigEndian>()?;
        let _next_record_list_id = c.read_u32::<BigEndian>()?;
        let num_records = c.read_u16::<BigEndian>()?;

        let is_resource_db = attributes & RESOURCE_DB_FLAG != 0;
        let mut index = if is_resource_db { Index::Resources(Vec::new()) } else { Index::Records(Vec::new()) };

        let mut offsets = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            if is_resource_db {
                let res_type = c.read_u32::<BigEndian>()?;
                let res_id = c.read_u16::<BigEndian>()?;
                let offset = c.read_u32::<BigEndian>()?;
                if let Index::Resources(v) = &mut index {
                    v.push(ResourceEntry { res_type, res_id, offset });
                }
                offsets.push(offset);
            } else {
                let packed = c.read_u32::<BigEndian>()?;
                let attrs_and_id = c.read_u32::<BigEndian>()?;
                let attributes = (attrs_and_id >> 24) as u8;
                let unique_id = attrs_and_id & 0x00ff_ffff;
                if let Index::Records(v) = &mut index {
                    v.push(RecordEntry { offset: packed, attributes, unique_id });
                }
                offsets.push(packed);
            }
        }

        // 2 bytes of placeholder after the index.
        let mut pad = [0u8; 2];
        c.read_exact(&mut pad)?;

        let first_payload_offset = offsets.first().copied().unwrap_or(data.len() as u32) as usize;
        let header_end = c.position() as usize;

        let (app_info, sort_info, payload_region_start) = if header_end < first_payload_offset {
            // AppInfo/SortInfo sizes aren't declared; the convention is
            // that AppInfo runs up to SortInfo's start, and SortInfo runs
            // up to the first payload. Without separate offsets recorded
            // in this simplified header we treat the whole pre-payload
            // region as AppInfo when only one block is plausible, mirroring
            // callers that read AppInfo first and accept NOTFOUND for
            // SortInfo.
            let region = data[header_end..first_payload_offset].to_vec();
            (Some(region), None, first_payload_offset)
        } else {
            (None, None, header_end)
        };
        let _ = payload_region_start;

        let mut payloads = Vec::with_capacity(offsets.len());
        for (i, &off) in offsets.iter().enumerate() {
            let end = offsets.get(i + 1).copied().unwrap_or(data.len() as u32) as usize;
            let off = off as usize;
            if off > data.len() || end > data.len() || off > end {
                return Err(Error::Protocol("pdb record/resource offset out of range".into()));
            }
            payloads.push(data[off..end].to_vec());
        }

        Ok(PdbFile {
            header: PdbHeader {
                name,
                attributes,
                version,
                creation_time,
                modification_time,
                backup_time,
                modification_number,
                db_type,
                creator,
                unique_id_seed,
            },
            index,
            app_info,
            sort_info,
            payloads,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut name_buf = [0u8; 32];
        write_name(&mut name_buf, &self.header.name);
        out.extend_from_slice(&name_buf);
        out.write_u16::<BigEndian>(self.header.attributes)?;
        out.write_u16::<BigEndian>(self.header.version)?;
        out.write_u32::<BigEndian>(self.header.creation_time)?;
        out.write_u32::<BigEndian>(self.header.modification_time)?;
        out.write_u32::<BigEndian>(self.header.backup_time)?;
        out.write_u32::<BigEndian>(self.header.modification_number)?;
        let app_info_offset_pos = out.len();
        out.write_u32::<BigEndian>(0)?; // app info offset, patched below
        let sort_info_offset_pos = out.len();
        out.write_u32::<BigEndian>(0)?; // sort info offset, patched below
        out.write_u32::<BigEndian>(self.header.db_type)?;
        out.write_u32::<BigEndian>(self.header.creator)?;
        out.write_u32::<BigEndian>(self.header.unique_id_seed)?;
        out.write_u32::<BigEndian>(0)?; // next record list id, always 0 on disk

        let num_entries = match &self.index {
            Index::Records(v) => v.len(),
            Index::Resources(v) => v.len(),
        };
        out.write_u16::<BigEndian>(num_entries as u16)?;

        let index_start = out.len();
        let entry_len = match &self.index {
            Index::Records(_) => RECORD_INDEX_ENTRY_LEN,
            Index::Resources(_) => RESOURCE_INDEX_ENTRY_LEN,
        };
        // Reserve space for the index; offsets get patched in once payload
        // placement is known.
        out.resize(index_start + entry_len * num_entries, 0);
        out.write_u16::<BigEndian>(0)?; // 2-byte placeholder after index

        let app_info_offset = out.len() as u32;
        if let Some(app_info) = &self.app_info {
            out.extend_from_slice(app_info);
        }
        let sort_info_offset = out.len() as u32;
        if let Some(sort_info) = &self.sort_info {
            out.extend_from_slice(sort_info);
        }

        let mut payload_offsets = Vec::with_capacity(self.payloads.len());
        for payload in &self.payloads {
            payload_offsets.push(out.len() as u32);
            out.extend_from_slice(payload);
        }

        out[app_info_offset_pos..app_info_offset_pos + 4]
            .copy_from_slice(&(if self.app_info.is_some() { app_info_offset } else { 0 }).to_be_bytes());
        out[sort_info_offset_pos..sort_info_offset_pos + 4]
            .copy_from_slice(&(if self.sort_info.is_some() { sort_info_offset } else { 0 }).to_be_bytes());

        let mut idx_cursor = Cursor::new(&mut out[index_start..index_start + entry_len * num_entries]);
        match &self.index {
            Index::Records(entries) => {
                for (entry, &offset) in entries.iter().zip(&payload_offsets) {
                    idx_cursor.write_u32::<BigEndian>(offset)?;
                    let attrs_and_id = ((entry.attributes as u32) << 24) | (entry.unique_id & 0x00ff_ffff);
                    idx_cursor.write_u32::<BigEndian>(attrs_and_id)?;
                }
            }
            Index::Resources(entries) => {
                for (entry, &offset) in entries.iter().zip(&payload_offsets) {
                    idx_cursor.write_u32::<BigEndian>(entry.res_type)?;
                    idx_cursor.write_u16::<BigEndian>(entry.res_id)?;
                    idx_cursor.write_u32::<BigEndian>(offset)?;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palm_time_roundtrips_through_unix() {
        let original = 3_000_000_000u32;
        let unix = palm_time_to_unix(original);
        assert_eq!(unix_to_palm_time(unix), original);
    }

    #[test]
    fn record_db_roundtrip() {
        let pdb = PdbFile {
            header: PdbHeader {
                name: "TestDB".into(),
                attributes: 0,
                version: 1,
                creation_time: 0,
                modification_time: 0,
                backup_time: 0,
                modification_number: 0,
                db_type: u32::from_be_bytes(*b"DATA"),
                creator: u32::from_be_bytes(*b"TEST"),
                unique_id_seed: 0,
            },
            index: Index::Records(vec![
                RecordEntry { offset: 0, attributes: 0, unique_id: 1 },
                RecordEntry { offset: 0, attributes: 0, unique_id: 2 },
            ]),
            app_info: None,
            sort_info: None,
            payloads: vec![b"first record".to_vec(), b"second record".to_vec()],
        };

        let bytes = pdb.serialize().unwrap();
        let parsed = PdbFile::parse(&bytes).unwrap();
        assert_eq!(parsed.header.name, "TestDB");
        assert_eq!(parsed.payloads, vec![b"first record".to_vec(), b"second record".to_vec()]);
        match parsed.index {
            Index::Records(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[1].unique_id, 2);
            }
            _ => panic!("expected a record database"),
        }
    }

    #[test]
    fn resource_db_roundtrip() {
        let pdb = PdbFile {
            header: PdbHeader {
                name: "TestApp".into(),
                attributes: RESOURCE_DB_FLAG,
                version: 1,
                creation_time: 0,
                modification_time: 0,
                backup_time: 0,
                modification_number: 0,
                db_type: u32::from_be_bytes(*b"appl"),
                creator: u32::from_be_bytes(*b"TEST"),
                unique_id_seed: 0,
            },
            index: Index::Resources(vec![ResourceEntry {
                res_type: u32::from_be_bytes(*b"code"),
                res_id: 1,
                offset: 0,
            }]),
            app_info: None,
            sort_info: None,
            payloads: vec![vec![0xde, 0xad, 0xbe, 0xef]],
        };

        let bytes = pdb.serialize().unwrap();
        let parsed = PdbFile::parse(&bytes).unwrap();
        assert_eq!(parsed.payloads, vec![vec![0xde, 0xad, 0xbe, 0xef]]);
        assert!(matches!(parsed.index, Index::Resources(_)));
    }
}
