//! `SyncConfig`: the on-disk TOML configuration (spec.md §6, SPEC_FULL §3).

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConduitFlavor {
    Sync,
    Fetch,
    Dump,
    Install,
    Uninstall,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatorTypePredicate {
    /// `0` matches any creator/type; an empty `predicates` list on the
    /// owning conduit means "matches all databases."
    #[serde(default)]
    pub creator: u32,
    #[serde(default)]
    pub db_type: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrefDecl {
    pub creator: u32,
    pub id: u16,
    #[serde(default)]
    pub saved: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConduitSpec {
    pub path: PathBuf,
    pub flavor: ConduitFlavor,
    #[serde(default)]
    pub predicates: Vec<CreatorTypePredicate>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub r#final: bool,
    #[serde(default)]
    pub prefs: Vec<PrefDecl>,
    #[serde(default)]
    pub header_overrides: Vec<(String, String)>,
}

impl ConduitSpec {
    /// `true` if this conduit's predicate set admits `(creator, db_type)`.
    pub fn admits(&self, creator: u32, db_type: u32) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        self.predicates.iter().any(|p| {
            (p.creator == 0 || p.creator == creator) && (p.db_type == 0 || p.db_type == db_type)
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PdaIdentity {
    pub expected_user_id: Option<u32>,
    pub expected_username: Option<String>,
    #[serde(default)]
    pub install_first: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncPolicy {
    #[serde(default)]
    pub force_slow: bool,
    #[serde(default)]
    pub force_fast: bool,
    #[serde(default)]
    pub include_rom: bool,
    #[serde(default)]
    pub install_first: bool,
    #[serde(default)]
    pub force_install: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub pda: std::collections::HashMap<String, PdaIdentity>,
    #[serde(default)]
    pub conduits: Vec<ConduitSpec>,
    #[serde(default)]
    pub policy: SyncPolicy,
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| SyncError::ConfigRead { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| SyncError::ConfigParse { path: path.to_path_buf(), source })
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(default_base_dir)
    }

    /// Identity block for the device with this serial number, if any is
    /// configured.
    pub fn identity_for(&self, serial: &str) -> Option<&PdaIdentity> {
        self.pda.get(serial)
    }
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".palm")).unwrap_or_else(|| PathBuf::from(".palm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_predicate_admits_anything() {
        let spec = ConduitSpec {
            path: "noop".into(),
            flavor: ConduitFlavor::Sync,
            predicates: vec![CreatorTypePredicate { creator: 0, db_type: 0 }],
            default: false,
            r#final: false,
            prefs: vec![],
            header_overrides: vec![],
        };
        assert!(spec.admits(0x1234, 0x5678));
    }

    #[test]
    fn empty_predicate_list_admits_anything() {
        let spec = ConduitSpec {
            path: "noop".into(),
            flavor: ConduitFlavor::Sync,
            predicates: vec![],
            default: false,
            r#final: false,
            prefs: vec![],
            header_overrides: vec![],
        };
        assert!(spec.admits(1, 1));
    }

    #[test]
    fn specific_predicate_rejects_mismatch() {
        let spec = ConduitSpec {
            path: "noop".into(),
            flavor: ConduitFlavor::Sync,
            predicates: vec![CreatorTypePredicate { creator: 42, db_type: 7 }],
            default: false,
            r#final: false,
            prefs: vec![],
            header_overrides: vec![],
        };
        assert!(!spec.admits(43, 7));
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            [policy]
            force_slow = true
        "#;
        let cfg: SyncConfig = toml::from_str(toml_text).unwrap();
        assert!(cfg.policy.force_slow);
        assert!(cfg.conduits.is_empty());
    }
}
