//! Conduit process spawn and the header/status wire protocol (spec.md
//! §4.10). Uses `std::process::Command` with piped stdio; the SPC
//! socketpair and `SIGCHLD` self-pipe use `nix`, grounded in the same
//! class of Unix process/signal plumbing the pack's `oferchen-rsync` and
//! `EFForg-rayhunter` manifests carry `nix` for.

use super::sigchld::SigchldPipe;
use super::spc::SpcChannel;
use super::ConduitContext;
use crate::config::ConduitSpec;
use crate::error::{Result, SyncError};
use log::{debug, trace, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::read;
use palm_proto::dlp::commands::DlpChannel;
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

const MAX_HEADER_LINE: usize = 4096;
const MAX_HEADER_NAME: usize = 64;

/// Spawn `spec`'s conduit, write the header block and declared preference
/// bytes to its stdin, then read status lines from its stdout, servicing
/// SPC requests on the socketpair until the child exits.
pub fn run_conduit<C: DlpChannel>(
    spec: &ConduitSpec,
    ctx: &ConduitContext,
    channel: &mut C,
    sigchld: &SigchldPipe,
) -> Result<u16> {
    let (parent_spc, child_spc) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(|e| SyncError::Io(std::io::Error::from(e)))?;

    let child_spc_fd = child_spc.as_raw_fd();
    let mut command = Command::new(&spec.path);
    command
        .arg("conduit")
        .arg(flavor_name(spec.flavor))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    // Dup the child's half of the socketpair onto a stable fd in the
    // child before exec, so the header's `SPCPipe:` line names something
    // real. `pre_exec` runs after fork, before exec, in the child only.
    unsafe {
        command.pre_exec(move || {
            let target = 20; // arbitrary fd above the standard three
            if child_spc_fd != target {
                nix::unistd::dup2(child_spc_fd, target)?;
            }
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(SyncError::Io)?;
    drop(child_spc);

    write_header(child.stdin.as_mut().expect("piped stdin"), spec, ctx)?;
    let mut stdin = child.stdin.take().expect("piped stdin");
    stdin.flush()?;
    drop(stdin);

    let stdout_fd: OwnedFd = child.stdout.take().expect("piped stdout").into();
    set_nonblocking(stdout_fd.as_raw_fd())?;
    set_nonblocking(parent_spc.as_raw_fd())?;

    sigchld.drain();
    let mut spc = SpcChannel::new(parent_spc);
    let status = service_conduit(&stdout_fd, &mut spc, sigchld, channel)?;

    child.wait().map_err(SyncError::Io)?;
    Ok(status)
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| SyncError::Io(std::io::Error::from(e)))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| SyncError::Io(std::io::Error::from(e)))?;
    Ok(())
}

fn flavor_name(flavor: crate::config::ConduitFlavor) -> &'static str {
    use crate::config::ConduitFlavor::*;
    match flavor {
        Sync => "sync",
        Fetch => "fetch",
        Dump => "dump",
        Install => "install",
        Uninstall => "uninstall",
    }
}

fn write_header(stdin: &mut impl Write, spec: &ConduitSpec, ctx: &ConduitContext) -> Result<()> {
    write_header_line(stdin, "Daemon", ctx.daemon_name)?;
    write_header_line(stdin, "Version", ctx.version)?;
    write_header_line(stdin, "InputDB", ctx.input_db)?;
    write_header_line(stdin, "OutputDB", ctx.output_db)?;
    write_header_line(stdin, "SPCPipe", "20")?;
    for (name, value) in &spec.header_overrides {
        write_header_line(stdin, name, value)?;
    }

    let mut pref_payloads = Vec::new();
    for pref in &spec.prefs {
        let data = ctx.prefs.get(pref.creator, pref.id).and_then(|e| e.data.clone()).unwrap_or_default();
        write_header_line(
            stdin,
            "Preference",
            &format!("{}/{}/{}", pref.creator, pref.id, data.len()),
        )?;
        pref_payloads.push(data);
    }
    writeln!(stdin)?; // blank line terminates the header block

    for payload in pref_payloads {
        stdin.write_all(&payload)?;
    }
    Ok(())
}

fn write_header_line(stdin: &mut impl Write, name: &str, value: &str) -> Result<()> {
    if name.len() > MAX_HEADER_NAME {
        return Err(SyncError::BadFilename(format!("header name too long: {name}")));
    }
    let line = format!("{name}: {value}\n");
    if line.len() > MAX_HEADER_LINE {
        return Err(SyncError::BadFilename(format!("header line too long: {name}")));
    }
    stdin.write_all(line.as_bytes())?;
    Ok(())
}

/// Multiplex the child's stdout, the SPC socket, and the `SIGCHLD`
/// self-pipe with a single `poll`, exactly as spec.md §4.10/§5 describe:
/// the SPC socket is only ever polled for one direction at a time, and a
/// readable self-pipe never by itself ends the loop — only stdout EOF
/// does, so buffered status lines written just before exit aren't lost.
fn service_conduit<C: DlpChannel>(
    stdout: &OwnedFd,
    spc: &mut SpcChannel,
    sigchld: &SigchldPipe,
    channel: &mut C,
) -> Result<u16> {
    let mut last_status = 0u16;
    let mut pending = Vec::new();
    let mut stdout_open = true;

    while stdout_open {
        let stdout_borrow: BorrowedFd = stdout.as_fd();
        let spc_borrow: BorrowedFd = unsafe { BorrowedFd::borrow_raw(spc.raw_fd()) };
        let sigchld_borrow: BorrowedFd = unsafe { BorrowedFd::borrow_raw(sigchld.as_raw_fd()) };

        let spc_flags = if spc.wants_write() { PollFlags::POLLOUT } else { PollFlags::POLLIN };
        let mut fds = [
            PollFd::new(stdout_borrow, PollFlags::POLLIN),
            PollFd::new(spc_borrow, spc_flags),
            PollFd::new(sigchld_borrow, PollFlags::POLLIN),
        ];

        poll(&mut fds, PollTimeout::NONE).map_err(|e| SyncError::Io(std::io::Error::from(e)))?;

        let ready = |i: usize| fds[i].revents().is_some_and(|r| !r.is_empty());

        if ready(2) {
            trace!("conduit: SIGCHLD self-pipe readable");
            sigchld.drain();
        }

        if ready(1) {
            if spc.wants_write() {
                spc.step_write()?;
            } else {
                spc.step_read(channel)?;
            }
        }

        if ready(0) {
            let mut chunk = [0u8; 4096];
            match read(stdout.as_raw_fd(), &mut chunk) {
                Ok(0) => stdout_open = false,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    last_status = drain_status_lines(&mut pending, last_status);
                }
                Err(nix::errno::Errno::EAGAIN) => {}
                Err(e) => return Err(SyncError::Io(std::io::Error::from(e))),
            }
        }
    }

    if !pending.is_empty() {
        last_status = drain_status_lines(&mut pending, last_status);
        if !pending.is_empty() {
            warn!("conduit: trailing partial status line {:?}, defaulting to 501", String::from_utf8_lossy(&pending));
            last_status = 501;
        }
    }
    Ok(last_status)
}

fn drain_status_lines(pending: &mut Vec<u8>, mut last_status: u16) -> u16 {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        match parse_status_line(&line) {
            Some(code) => {
                debug!("conduit status: {code} {}", line.trim_end());
                last_status = code;
            }
            None => {
                warn!("conduit: malformed status line {line:?}, defaulting to 501");
                last_status = 501;
            }
        }
    }
    last_status
}

fn parse_status_line(line: &str) -> Option<u16> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.len() < 4 {
        return None;
    }
    let digits = &trimmed[..3];
    let sep = trimmed.as_bytes().get(3).copied()?;
    if sep != b'-' && sep != b' ' {
        return None;
    }
    digits.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_status_lines() {
        assert_eq!(parse_status_line("200 OK\n"), Some(200));
        assert_eq!(parse_status_line("301- continued\n"), Some(301));
    }

    #[test]
    fn rejects_malformed_status_lines() {
        assert_eq!(parse_status_line("not a status\n"), None);
        assert_eq!(parse_status_line("20 short\n"), None);
    }
}
