//! Preference cache: before running conduits, every conduit's declared
//! `(creator,id,flags)` preferences are unioned and dedup'd, then fetched
//! in a fixed two-pass protocol (spec.md §4.9).

use crate::config::{ConduitSpec, PrefDecl};
use palm_proto::dlp::commands::{self, DlpChannel};
use palm_proto::error::{dlp_status, Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PrefCacheEntry {
    pub creator: u32,
    pub id: u16,
    /// `None` means "fetched and found empty," not "not yet fetched."
    pub data: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct PrefCache {
    entries: HashMap<(u32, u16), PrefCacheEntry>,
}

impl PrefCache {
    pub fn new() -> Self {
        PrefCache::default()
    }

    pub fn get(&self, creator: u32, id: u16) -> Option<&PrefCacheEntry> {
        self.entries.get(&(creator, id))
    }

    /// Union every conduit's declared preferences into the cache, deduping
    /// by `(creator, id)`, and fetch each exactly once.
    pub fn populate(&mut self, ch: &mut impl DlpChannel, conduits: &[ConduitSpec]) -> Result<()> {
        let mut declared: HashMap<(u32, u16), PrefDecl> = HashMap::new();
        for conduit in conduits {
            for pref in &conduit.prefs {
                declared.entry((pref.creator, pref.id)).or_insert_with(|| pref.clone());
            }
        }

        for ((creator, id), decl) in declared {
            if self.entries.contains_key(&(creator, id)) {
                continue;
            }
            let data = fetch_pref(ch, creator, id, decl.saved)?;
            self.entries.insert((creator, id), PrefCacheEntry { creator, id, data });
        }
        Ok(())
    }
}

/// Fetch one preference via the documented two-pass protocol: first with
/// `buf_len=0` to learn the true size, then again with the exact size. If
/// `saved` isn't specified, try `SAVED` first, then `UNSAVED`.
fn fetch_pref(
    ch: &mut impl DlpChannel,
    creator: u32,
    id: u16,
    saved: Option<bool>,
) -> Result<Option<Vec<u8>>> {
    let attempts: Vec<bool> = match saved {
        Some(flag) => vec![flag],
        None => vec![true, false],
    };

    for backup_flag in attempts {
        let (actual_size, _) = match commands::read_app_preference(ch, creator, id, 0, backup_flag) {
            Ok(sized) => sized,
            Err(Error::DlpStat(code)) if code == dlp_status::NOTFOUND => continue,
            Err(e) => return Err(e),
        };
        if actual_size == 0 {
            return Ok(None);
        }
        let (_, data) = commands::read_app_preference(ch, creator, id, actual_size, backup_flag)?;
        return Ok(if data.is_empty() { None } else { Some(data) });
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_has_no_entries() {
        let cache = PrefCache::new();
        assert!(cache.get(1, 1).is_none());
    }
}
