//! Elevated bootstrap and privilege drop
//!
//! The process must start elevated (via sudo) because /dev/uinput is
//! root-only. The sequence is strict: create the virtual keyboard while
//! still root, then drop to the invoking user before any audio or
//! network work begins. The open device descriptor survives the drop
//! and is the only capability the elevated phase leaves behind. If the
//! drop cannot be completed and verified, the process refuses to run.

use crate::error::PrivilegeError;
use crate::inject::uinput::UinputKeyboard;
use nix::unistd::{setgid, setgroups, setuid, Gid, Uid, User};

/// Identity the process runs as after the drop.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub uid: Uid,
    pub gid: Gid,
    pub name: String,
    pub home: std::path::PathBuf,
}

/// Run the elevated phase and drop privileges.
///
/// Returns the virtual keyboard (created while root) and the identity
/// the process now runs as. Everything after this call runs unprivileged.
pub fn bootstrap() -> Result<(UinputKeyboard, SessionUser), PrivilegeError> {
    if !Uid::effective().is_root() {
        return Err(PrivilegeError::NotElevated);
    }

    let keyboard = UinputKeyboard::create()?;

    let user = invoking_user()?;
    restore_session_env(&user);
    drop_to(&user)?;
    verify_dropped()?;

    tracing::info!(
        "Dropped privileges to {} (uid {}, gid {})",
        user.name,
        user.uid,
        user.gid
    );

    Ok((keyboard, user))
}

/// Resolve the user who invoked sudo from SUDO_UID/SUDO_GID.
fn invoking_user() -> Result<SessionUser, PrivilegeError> {
    let (uid, gid) = parse_sudo_ids(
        std::env::var("SUDO_UID").ok().as_deref(),
        std::env::var("SUDO_GID").ok().as_deref(),
    )?;

    let user = User::from_uid(uid)
        .map_err(|e| PrivilegeError::NoInvokingUser(format!("uid {} lookup failed: {}", uid, e)))?
        .ok_or_else(|| PrivilegeError::NoInvokingUser(format!("uid {} has no passwd entry", uid)))?;

    Ok(SessionUser {
        uid,
        gid,
        name: user.name,
        home: user.dir,
    })
}

/// Parse and sanity-check the sudo-provided ids. A uid of 0 means the
/// invoker was already root, leaving no unprivileged identity to drop
/// to, which is refused.
fn parse_sudo_ids(
    uid: Option<&str>,
    gid: Option<&str>,
) -> Result<(Uid, Gid), PrivilegeError> {
    let uid: u32 = uid
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PrivilegeError::NoInvokingUser("SUDO_UID not set".into()))?;
    let gid: u32 = gid
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PrivilegeError::NoInvokingUser("SUDO_GID not set".into()))?;

    if uid == 0 {
        return Err(PrivilegeError::NoInvokingUser(
            "invoked by root directly; a non-root invoking user is required".into(),
        ));
    }

    Ok((Uid::from_raw(uid), Gid::from_raw(gid)))
}

/// Point the process environment back at the invoking user's session so
/// config paths, the audio server, and the session bus all resolve as
/// they would without sudo. `WAYLAND_DISPLAY`/`DISPLAY` survive
/// `sudo -E` untouched; the runtime-dir-derived addresses are filled in
/// only when sudo stripped them.
fn restore_session_env(user: &SessionUser) {
    let runtime_dir = format!("/run/user/{}", user.uid);

    std::env::set_var("HOME", &user.home);
    std::env::set_var("USER", &user.name);
    std::env::set_var("LOGNAME", &user.name);
    std::env::set_var("XDG_RUNTIME_DIR", &runtime_dir);

    if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none() {
        std::env::set_var(
            "DBUS_SESSION_BUS_ADDRESS",
            format!("unix:path={}/bus", runtime_dir),
        );
    }
    if std::env::var_os("PULSE_SERVER").is_none() {
        std::env::set_var("PULSE_SERVER", format!("unix:{}/pulse/native", runtime_dir));
    }
}

/// Drop supplementary groups, then gid, then uid. Order matters: once
/// the uid is gone, the others can no longer be changed.
fn drop_to(user: &SessionUser) -> Result<(), PrivilegeError> {
    setgroups(&[user.gid])
        .map_err(|e| PrivilegeError::DropFailed(format!("setgroups: {}", e)))?;
    setgid(user.gid).map_err(|e| PrivilegeError::DropFailed(format!("setgid: {}", e)))?;
    setuid(user.uid).map_err(|e| PrivilegeError::DropFailed(format!("setuid: {}", e)))?;
    Ok(())
}

/// Confirm the drop took and cannot be undone.
fn verify_dropped() -> Result<(), PrivilegeError> {
    if Uid::effective().is_root() || Uid::current().is_root() {
        return Err(PrivilegeError::DropNotVerified);
    }
    // Re-escalation must fail
    if setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::DropNotVerified);
    }
    Ok(())
}
