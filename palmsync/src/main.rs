//! `palmsync`: HotSync backup/restore/sync CLI and conduit dispatcher.

mod conduit;
mod config;
mod error;
mod hostid;
mod prefcache;
mod sync;

use clap::{Parser, Subcommand, ValueEnum};
use config::SyncConfig;
use error::{Result, SyncError};
use hostid::HostId;
use log::{error, info, warn};
use palm_proto::slp::SlpAddress;
use palm_proto::transport::{SerialTransport, Transport};
use palm_proto::Connection;
use std::path::PathBuf;
use std::time::Duration;
use sync::SyncEngine;

/// Local address both ends agree on before the CMP handshake; `(protocol,
/// port) = (3, 3)` is the PADP loopback address every session starts at.
const PADP_LOCAL_ADDRESS: SlpAddress = SlpAddress::new(3, 3);
const DEFAULT_PADP_SEED: u8 = 1;
const SELECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "palmsync", about = "HotSync backup, restore, and conduit dispatch")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "palmsync.toml")]
    config: PathBuf,

    /// Serial device or USB node to connect on.
    #[arg(long, default_value = "/dev/ttyUSB1")]
    port: String,

    #[arg(long, value_enum, default_value_t = PortKind::Serial)]
    port_type: PortKind,

    /// Force the line-rate negotiation to stop at this rate instead of
    /// probing for the fastest the device will accept.
    #[arg(long)]
    max_rate: Option<u32>,

    #[arg(long)]
    force_slow: bool,

    #[arg(long)]
    force_fast: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Copy, ValueEnum)]
enum PortKind {
    Serial,
    Usb,
    Net,
}

#[derive(Subcommand)]
enum Mode {
    /// Back up every database on the device.
    Backup,
    /// Restore a single `.pdb`/`.prc` file to the device.
    Restore { path: PathBuf },
    /// Run the configured conduit set for a two-way sync.
    Sync,
    /// Wait for a device, run one sync pass, then exit (as opposed to a
    /// persistent listener).
    Standalone,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            error!("palmsync: {e}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<()> {
    let mut config = SyncConfig::load(&cli.config)?;
    if cli.force_slow {
        config.policy.force_slow = true;
    }
    if cli.force_fast {
        config.policy.force_fast = true;
    }

    let host_id = HostId::detect()?;
    info!("palmsync: host id {host_id}");

    match cli.port_type {
        PortKind::Serial => {
            let transport = SerialTransport::open(&cli.port, SELECT_TIMEOUT)?;
            run_session(transport, host_id, config, cli.max_rate, cli.mode)
        }
        PortKind::Usb | PortKind::Net => Err(SyncError::BadFilename(
            "usb/net transports require a platform-specific endpoint adapter; only serial is wired into this binary".into(),
        )),
    }
}

fn run_session<T: Transport>(
    transport: T,
    host_id: HostId,
    config: SyncConfig,
    max_rate: Option<u32>,
    mode: Mode,
) -> Result<()> {
    let mut conn = Connection::new(transport);
    conn.use_full_stack(PADP_LOCAL_ADDRESS, DEFAULT_PADP_SEED)?;
    let outcome = conn.handshake_full(max_rate)?;
    info!("palmsync: connected at {} bps", outcome.chosen_rate);

    let mut engine = SyncEngine::new(conn, host_id, config);
    let result = (|| -> Result<()> {
        engine.startup()?;
        match mode {
            Mode::Backup | Mode::Standalone => engine.full_backup(),
            Mode::Restore { path } => engine.restore_database(&path),
            Mode::Sync => {
                let slow = engine.need_slow_sync()?;
                if slow {
                    warn!("palmsync: host id changed since last sync, running a full backup first");
                    engine.full_backup()?;
                }
                engine.run_conduits("palmsync", env!("CARGO_PKG_VERSION"))
            }
        }
    })();

    engine.end_session(result.is_ok())?;
    result
}
