//! Orphan archiving ("Attic"): after a sync, backup files whose database
//! no longer exists on the device are moved into a sibling `Attic/`
//! directory instead of being deleted (spec.md §4.9).

use super::filename::unescape;
use log::{info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAX_COLLISION_SUFFIX: u32 = 99;

/// Move every file in `backup_dir` whose decoded database name is not in
/// `live_names` into `backup_dir/Attic/`, handling `~N` collisions.
pub fn archive_orphans(backup_dir: &Path, live_names: &HashSet<Vec<u8>>) -> std::io::Result<()> {
    let attic_dir = backup_dir.join("Attic");
    std::fs::create_dir_all(&attic_dir)?;

    for entry in std::fs::read_dir(backup_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name();
        let Some(filename_str) = filename.to_str() else { continue };
        let Ok(db_name) = unescape(filename_str) else { continue };

        if live_names.contains(&db_name) {
            continue;
        }

        match archive_one(&entry.path(), &attic_dir, filename_str) {
            Ok(dest) => info!("attic: archived orphan {filename_str} to {}", dest.display()),
            Err(e) => warn!("attic: could not archive orphan {filename_str}: {e}"),
        }
    }
    Ok(())
}

fn archive_one(source: &Path, attic_dir: &Path, filename: &str) -> std::io::Result<PathBuf> {
    let plain_dest = attic_dir.join(filename);
    if !plain_dest.exists() {
        std::fs::rename(source, &plain_dest)?;
        return Ok(plain_dest);
    }

    let (stem, ext) = split_stem_ext(filename);
    for n in 0..=MAX_COLLISION_SUFFIX {
        let candidate = attic_dir.join(format!("{stem}~{n}{ext}"));
        if !candidate.exists() {
            std::fs::rename(source, &candidate)?;
            return Ok(candidate);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("all 100 Attic collision slots are taken for {filename}"),
    ))
}

fn split_stem_ext(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos) => (&filename[..pos], &filename[pos..]),
        None => (filename, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn orphan_with_no_collision_moves_plainly() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path();
        fs::write(backup.join("Orphan.pdb"), b"data").unwrap();

        archive_orphans(backup, &HashSet::new()).unwrap();

        assert!(!backup.join("Orphan.pdb").exists());
        assert!(backup.join("Attic").join("Orphan.pdb").exists());
    }

    #[test]
    fn live_database_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path();
        fs::write(backup.join("AddressDB.pdb"), b"data").unwrap();
        let mut live = HashSet::new();
        live.insert(b"AddressDB".to_vec());

        archive_orphans(backup, &live).unwrap();

        assert!(backup.join("AddressDB.pdb").exists());
    }

    #[test]
    fn collision_gets_a_tilde_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path();
        let attic = backup.join("Attic");
        fs::create_dir_all(&attic).unwrap();
        fs::write(attic.join("Orphan.pdb"), b"already archived").unwrap();
        fs::write(backup.join("Orphan.pdb"), b"new orphan").unwrap();

        archive_orphans(backup, &HashSet::new()).unwrap();

        assert!(attic.join("Orphan.pdb").exists());
        assert!(attic.join("Orphan~0.pdb").exists());
    }
}
