//! Process environment checks run before anything is dispatched

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Set to any value to let rig run as root without sudo
pub const ALLOW_ROOT_ENV: &str = "RIG_ALLOW_ROOT";

/// What to do about the effective user before touching the home directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootAction {
    /// Not running as root
    Proceed,
    /// Root explicitly allowed through the environment
    AllowRoot,
    /// Started through sudo; switch back to the invoking user
    DropTo { uid: u32, gid: u32 },
    /// Plain root with no invoking user to fall back to
    Refuse,
}

/// Decide how to treat the effective user id
///
/// `sudo_uid` and `sudo_gid` are the values of `SUDO_UID` and `SUDO_GID`.
/// Ids that do not parse, or that name root again, are ignored.
pub fn root_action(
    euid: u32,
    sudo_uid: Option<&str>,
    sudo_gid: Option<&str>,
    allow_root: bool,
) -> RootAction {
    if euid != 0 {
        return RootAction::Proceed;
    }

    let parse = |id: Option<&str>| id.and_then(|v| v.trim().parse::<u32>().ok()).filter(|&v| v != 0);
    match (parse(sudo_uid), parse(sudo_gid)) {
        (Some(uid), Some(gid)) => RootAction::DropTo { uid, gid },
        _ if allow_root => RootAction::AllowRoot,
        _ => RootAction::Refuse,
    }
}

/// Refuse to run as root, dropping back to the sudo user when possible
///
/// Files written into the cache as root would leave it unusable for the
/// regular user afterwards.
#[cfg(unix)]
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    let sudo_uid = std::env::var("SUDO_UID").ok();
    let sudo_gid = std::env::var("SUDO_GID").ok();
    let allow_root = std::env::var_os(ALLOW_ROOT_ENV).is_some();

    match root_action(euid, sudo_uid.as_deref(), sudo_gid.as_deref(), allow_root) {
        RootAction::Proceed => Ok(()),
        RootAction::AllowRoot => {
            warn!("Running as root because {} is set", ALLOW_ROOT_ENV);
            Ok(())
        }
        RootAction::DropTo { uid, gid } => drop_privileges(uid, gid),
        RootAction::Refuse => bail!(
            "rig must not be run as root. Run it as a regular user, or set {} to override.",
            ALLOW_ROOT_ENV
        ),
    }
}

#[cfg(not(unix))]
pub fn check_root() -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn drop_privileges(uid: u32, gid: u32) -> Result<()> {
    // Group first, setgid is no longer permitted once the uid is dropped.
    // SAFETY: plain syscalls on integer ids; failures are reported through errno
    unsafe {
        if libc::setgroups(0, std::ptr::null()) != 0 {
            bail!("Failed to clear supplementary groups: {}", std::io::Error::last_os_error());
        }
        if libc::setgid(gid) != 0 {
            bail!("Failed to switch to group {}: {}", gid, std::io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            bail!("Failed to switch to user {}: {}", uid, std::io::Error::last_os_error());
        }
    }

    if let Some(home) = home_of(uid) {
        std::env::set_var("HOME", &home);
    }
    info!("Started through sudo, running as uid {} gid {}", uid, gid);
    Ok(())
}

/// Home directory recorded in the password database for `uid`
#[cfg(unix)]
fn home_of(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    // SAFETY: getpwuid returns null or a pointer to static storage that stays
    // valid until the next getpw* call; the directory is copied out at once
    unsafe {
        let entry = libc::getpwuid(uid);
        if entry.is_null() || (*entry).pw_dir.is_null() {
            return None;
        }
        let dir = CStr::from_ptr((*entry).pw_dir);
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(dir.to_bytes())))
    }
}

/// Load `~/.env` into the process environment
///
/// Variables already set are left alone. A missing file is not an error.
pub fn load_user_dotenv() {
    let Some(home) = dirs::home_dir() else {
        return;
    };
    let path = home.join(".env");

    match dotenvy::from_path(&path) {
        Ok(()) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load {}: {}", path.display(), e),
    }
}

/// The current user's home directory, which must exist
pub fn check_user_home() -> Result<PathBuf> {
    match dirs::home_dir() {
        Some(home) if home.is_dir() => Ok(home),
        Some(home) => bail!(
            "Home directory {} does not exist. rig keeps its cache there.",
            home.display()
        ),
        None => bail!("Could not determine the current user's home directory"),
    }
}
