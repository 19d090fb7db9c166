//! Conduit dispatcher: candidate selection, execution, header protocol,
//! status-line parsing (spec.md §4.10).

pub mod process;
pub mod spc;

use crate::config::{ConduitFlavor, ConduitSpec};
use crate::error::{Result, SyncError};
use crate::prefcache::PrefCache;
use log::info;
use palm_proto::dlp::commands::DlpChannel;
use sigchld::SigchldPipe;

pub mod sigchld;

pub struct ConduitContext<'a> {
    pub daemon_name: &'a str,
    pub version: &'a str,
    pub input_db: &'a str,
    pub output_db: &'a str,
    pub prefs: &'a PrefCache,
}

/// Run the conduits declared for `flavor`, in declaration order, applying
/// the default/final selection rules (spec.md §4.10 steps 1-4).
pub fn dispatch<C: DlpChannel>(
    conduits: &[ConduitSpec],
    flavor: ConduitFlavor,
    creator: u32,
    db_type: u32,
    ctx: &ConduitContext,
    channel: &mut C,
) -> Result<()> {
    let sigchld = SigchldPipe::install().map_err(|e| SyncError::Io(std::io::Error::from(e)))?;
    let mut stashed_default: Option<&ConduitSpec> = None;
    let mut ran_non_default = false;

    for spec in conduits {
        if spec.flavor != flavor || !spec.admits(creator, db_type) {
            continue;
        }

        if spec.default {
            stashed_default.get_or_insert(spec);
            continue;
        }

        info!("conduit: running {}", spec.path.display());
        let outcome = process::run_conduit(spec, ctx, channel, &sigchld)?;
        check_outcome(spec, outcome)?;
        ran_non_default = true;

        if spec.r#final {
            return Ok(());
        }
    }

    if !ran_non_default {
        if let Some(spec) = stashed_default {
            info!("conduit: running default {}", spec.path.display());
            let outcome = process::run_conduit(spec, ctx, channel, &sigchld)?;
            check_outcome(spec, outcome)?;
        }
    }
    Ok(())
}

fn check_outcome(spec: &ConduitSpec, status: u16) -> Result<()> {
    // 2xx is success; 0xx/1xx are debug/info and don't fail the run; 3xx+
    // is a warning or worse, but only 4xx/5xx are treated as a hard error
    // per spec.md's status-code table.
    if status >= 400 {
        return Err(SyncError::ConduitFailed {
            path: spec.path.display().to_string(),
            status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(path: &str, flavor: ConduitFlavor, default: bool, r#final: bool) -> ConduitSpec {
        ConduitSpec {
            path: PathBuf::from(path),
            flavor,
            predicates: vec![],
            default,
            r#final,
            prefs: vec![],
            header_overrides: vec![],
        }
    }

    #[test]
    fn check_outcome_accepts_2xx_and_rejects_4xx_5xx() {
        let s = spec("noop", ConduitFlavor::Sync, false, false);
        assert!(check_outcome(&s, 200).is_ok());
        assert!(check_outcome(&s, 399).is_ok());
        assert!(check_outcome(&s, 400).is_err());
        assert!(check_outcome(&s, 501).is_err());
    }
}
