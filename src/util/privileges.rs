use crate::types::Identity;
use anyhow::{Context, Result};
use log::error;
use nix::unistd::{
    Gid, Uid, getegid, geteuid, setegid, seteuid, setgid, setuid,
};

/**
 * Make the real identity root. When running via setuid bits only the
 * effective uid is 0; promoting the real identity lets us flip the
 * effective identity back and forth for the rest of the process lifetime.
 */
pub fn become_root() -> Result<()> {
    setuid(Uid::from_raw(0)).context("failed to set real uid to root")?;
    setgid(Gid::from_raw(0)).context("failed to set real gid to root")?;
    Ok(())
}

/// Permanently drop to the given identity, group first.
pub fn drop_privileges(uid: Uid, gid: Gid) -> Result<()> {
    setgid(gid)?;
    setuid(uid)?;
    Ok(())
}

/**
 * Scoped effective-identity switch. While the guard is alive the process
 * runs with the given user's effective uid/gid, so files it creates are
 * owned by that user; dropping the guard restores the previously effective
 * identity.
 *
 * An identity we cannot change into, or out of, leaves the process in an
 * ambiguous state that no caller can reason about, so both directions are
 * treated as unrecoverable.
 */
pub struct ScopedIdentity {
    saved_uid: Uid,
    saved_gid: Gid,
}

impl ScopedIdentity {
    pub fn assume(identity: &Identity) -> Result<Self> {
        let saved_uid = geteuid();
        let saved_gid = getegid();

        // The gid must change while the effective uid is still privileged.
        setegid(identity.gid).context(format!(
            "failed to set effective gid to {}",
            identity.gid
        ))?;
        if let Err(e) = seteuid(identity.uid) {
            let _ = setegid(saved_gid);
            return Err(e).context(format!(
                "failed to set effective uid to {}",
                identity.uid
            ));
        }

        Ok(Self {
            saved_uid,
            saved_gid,
        })
    }
}

impl Drop for ScopedIdentity {
    fn drop(&mut self) {
        let uid_result = seteuid(self.saved_uid);
        let gid_result = setegid(self.saved_gid);
        if uid_result.is_err() || gid_result.is_err() {
            error!(
                "Failed to restore effective identity to {}/{}; aborting",
                self.saved_uid, self.saved_gid
            );
            std::process::exit(1);
        }
    }
}
