//! Sync engine: startup handshake, slow/fast sync decision, backup,
//! restore, attic archiving (spec.md §4.9).

pub mod attic;
pub mod filename;

use crate::conduit::{self, ConduitContext};
use crate::config::{ConduitFlavor, PdaIdentity, SyncConfig};
use crate::error::{Result, SyncError};
use crate::hostid::HostId;
use crate::prefcache::PrefCache;
use log::{info, warn};
use palm_proto::dlp::commands::{self, DbInfo, Record};
use palm_proto::error::{dlp_status, Error};
use palm_proto::pdb::{Index, PdbFile, PdbHeader, RecordEntry, ResourceEntry};
use palm_proto::{Connection, Palm};
use palm_proto::transport::Transport;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const RESOURCE_DB_FLAG: u16 = 0x0001;
/// DLP open-mode bits: read access plus the "show secret records" bit, the
/// combination every backup pass uses.
const OPEN_MODE_READ_SECRET: u8 = 0x80 | 0x20;

pub struct SyncEngine<T: Transport> {
    conn: Connection<T>,
    palm: Palm,
    host_id: HostId,
    config: SyncConfig,
    log_entries: Vec<String>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(conn: Connection<T>, host_id: HostId, config: SyncConfig) -> Self {
        SyncEngine { conn, palm: Palm::new(), host_id, config, log_entries: Vec::new() }
    }

    /// Run `OpenConduit`, fetch sysinfo/userinfo/serial, and check the
    /// device's reported identity against configuration.
    pub fn startup(&mut self) -> Result<()> {
        commands::open_conduit(&mut self.conn)?;
        let _ = self.palm.sys_info(&mut self.conn)?;
        let serial = self.palm.serial(&mut self.conn)?.to_string();
        let user_info = self.palm.user_info(&mut self.conn)?.clone();

        if let Some(identity) = self.config.identity_for(&serial).cloned() {
            self.check_identity(&identity, &user_info)?;
        }
        Ok(())
    }

    fn check_identity(&self, identity: &PdaIdentity, user_info: &commands::UserInfo) -> Result<()> {
        if let Some(expected_id) = identity.expected_user_id {
            if expected_id != user_info.user_id {
                return Err(SyncError::IdentityMismatch {
                    expected: expected_id.to_string(),
                    actual: user_info.user_id.to_string(),
                });
            }
        }
        if let Some(expected_name) = &identity.expected_username {
            if expected_name != &user_info.username {
                return Err(SyncError::IdentityMismatch {
                    expected: expected_name.clone(),
                    actual: user_info.username.clone(),
                });
            }
        }
        Ok(())
    }

    /// `need_slow_sync = (device.last_sync_pc != this_host_id)`.
    pub fn need_slow_sync(&mut self) -> Result<bool> {
        let last_sync_pc = self.palm.user_info(&mut self.conn)?.last_sync_pc;
        Ok(last_sync_pc != self.host_id.0)
    }

    fn backup_dir(&self) -> PathBuf {
        self.config.base_dir().join("backup")
    }

    /// Back up every database the device reports, logging and continuing
    /// on per-database failure unless it's session-fatal.
    pub fn full_backup(&mut self) -> Result<()> {
        std::fs::create_dir_all(self.backup_dir())?;
        let dbs = self.palm.ensure_all_dbs(&mut self.conn, 0)?.to_vec();
        let mut live_names = HashSet::new();

        for db in &dbs {
            live_names.insert(db.name.clone().into_bytes());
            if let Err(e) = self.backup_database(db) {
                if matches!(e, SyncError::Protocol(ref pe) if pe.is_session_fatal()) {
                    return Err(e);
                }
                warn!("full backup: {} failed: {e}", db.name);
                self.log_entries.push(format!("{}: backup failed: {e}", db.name));
            }
        }

        attic::archive_orphans(&self.backup_dir(), &live_names)?;
        Ok(())
    }

    /// Back up a single database: `OpenDB` → app/sort blocks → records or
    /// resources → write the `.pdb`/`.prc` → `CloseDB` regardless of
    /// outcome.
    pub fn backup_database(&mut self, db: &DbInfo) -> Result<()> {
        let handle = commands::open_db(&mut self.conn, 0, &db.name, OPEN_MODE_READ_SECRET)?;
        let result = self.backup_database_inner(db, handle);
        let _ = commands::close_db(&mut self.conn, handle);
        result
    }

    fn backup_database_inner(&mut self, db: &DbInfo, handle: u8) -> Result<()> {
        let app_info = read_optional_block(commands::read_app_block(&mut self.conn, handle))?;
        let is_resource_db = db.db_flags & RESOURCE_DB_FLAG != 0;

        let (index, payloads) = if is_resource_db {
            let open_info = commands::read_open_db_info(&mut self.conn, handle)?;
            let mut entries = Vec::new();
            let mut payloads = Vec::new();
            for i in 0..open_info.num_records {
                let data = commands::read_resource_by_index(&mut self.conn, handle, i)?;
                entries.push(ResourceEntry { res_type: db.db_type, res_id: i, offset: 0 });
                payloads.push(data);
            }
            (Index::Resources(entries), payloads)
        } else {
            let ids = read_all_record_ids(&mut self.conn, handle)?;
            let mut entries = Vec::with_capacity(ids.len());
            let mut payloads = Vec::with_capacity(ids.len());
            for id in ids {
                let record = commands::read_record_by_id(&mut self.conn, handle, id)?;
                entries.push(RecordEntry {
                    offset: 0,
                    attributes: record.header.attrs,
                    unique_id: record.header.record_id & 0x00ff_ffff,
                });
                payloads.push(record.data);
            }
            (Index::Records(entries), payloads)
        };

        let pdb = PdbFile {
            header: PdbHeader {
                name: db.name.clone(),
                attributes: db.db_flags,
                version: db.version,
                creation_time: 0,
                modification_time: 0,
                backup_time: 0,
                modification_number: 0,
                db_type: db.db_type,
                creator: db.creator,
                unique_id_seed: 0,
            },
            index,
            app_info,
            sort_info: None,
            payloads,
        };

        let extension = if is_resource_db { ".prc" } else { ".pdb" };
        let filename = filename::escape_with_extension(db.name.as_bytes(), extension);
        std::fs::write(self.backup_dir().join(filename), pdb.serialize()?)?;
        Ok(())
    }

    /// Parse `path`, delete any same-name database, `CreateDB`, write
    /// AppInfo/SortInfo, then stream records or resources in index order.
    pub fn restore_database(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let pdb = PdbFile::parse(&bytes)?;

        let _ = commands::delete_db(&mut self.conn, 0, &pdb.header.name);
        let handle = commands::create_db(
            &mut self.conn,
            pdb.header.creator,
            pdb.header.db_type,
            0,
            pdb.header.attributes,
            pdb.header.version,
            &pdb.header.name,
        )?;

        let result = self.restore_database_inner(&pdb, handle);
        let _ = commands::close_db(&mut self.conn, handle);
        result
    }

    fn restore_database_inner(&mut self, pdb: &PdbFile, handle: u8) -> Result<()> {
        if let Some(app_info) = &pdb.app_info {
            commands::write_app_block(&mut self.conn, handle, app_info)?;
        }

        match &pdb.index {
            Index::Records(entries) => {
                for (entry, data) in entries.iter().zip(&pdb.payloads) {
                    let record = Record {
                        header: commands::RecordHeader {
                            record_id: entry.unique_id,
                            index: 0,
                            size: data.len() as u16,
                            attrs: entry.attributes,
                            category: entry.attributes & 0x0f,
                        },
                        data: data.clone(),
                    };
                    commands::write_record(&mut self.conn, handle, &record)?;
                }
            }
            Index::Resources(entries) => {
                for (entry, data) in entries.iter().zip(&pdb.payloads) {
                    commands::write_resource(&mut self.conn, handle, entry.res_type, entry.res_id, data)?;
                }
            }
        }
        Ok(())
    }

    /// Run every `Sync`-flavor conduit against every database the device
    /// reports, after fetching the union of their declared preferences
    /// once up front.
    pub fn run_conduits(&mut self, daemon_name: &str, version: &str) -> Result<()> {
        let mut prefs = PrefCache::new();
        prefs.populate(&mut self.conn, &self.config.conduits)?;

        let dbs = self.palm.ensure_all_dbs(&mut self.conn, 0)?.to_vec();
        for db in &dbs {
            let ctx = ConduitContext {
                daemon_name,
                version,
                input_db: &db.name,
                output_db: &db.name,
                prefs: &prefs,
            };
            conduit::dispatch(&self.config.conduits, ConduitFlavor::Sync, db.creator, db.db_type, &ctx, &mut self.conn)?;
        }
        Ok(())
    }

    /// Update device userinfo, flush the accumulated sync-log text, issue
    /// `EndOfSync`, and close the transport.
    pub fn end_session(&mut self, success: bool) -> Result<()> {
        let now = palm_proto::pdb::unix_to_palm_time(std::time::SystemTime::now());
        commands::write_sync_state(&mut self.conn, self.host_id.0, now)?;
        for entry in self.log_entries.drain(..) {
            let _ = commands::add_sync_log_entry(&mut self.conn, &entry);
        }
        let status = if success { dlp_status::NOERR } else { dlp_status::CANCELSYNC };
        commands::end_of_sync(&mut self.conn, status)?;
        self.conn.close().map_err(Into::into)
    }
}

fn read_optional_block(result: palm_proto::error::Result<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    match result {
        Ok(data) => Ok(Some(data)),
        Err(Error::DlpStat(code)) if code == dlp_status::NOTFOUND => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_all_record_ids<C: commands::DlpChannel>(ch: &mut C, handle: u8) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    let mut start = 0u16;
    const BATCH: u16 = 500;
    loop {
        let batch = commands::read_record_id_list(ch, handle, start, BATCH)?;
        let got = batch.len();
        ids.extend(batch);
        if got < BATCH as usize {
            break;
        }
        start += got as u16;
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_db_flag_matches_pdb_convention() {
        assert_eq!(RESOURCE_DB_FLAG, 0x0001);
    }
}
