use anyhow::{Result, anyhow};
use nix::unistd::{Gid, Uid, getresgid, getresuid};
use std::path::Path;

use crate::types::UidGidHome;

/**
 * We may be being run with setuid bits, or via sudo. In either case we need
 * to know who we really are: that user owns the prefix and the pid record,
 * and it is the identity the target process will eventually run as.
 */
pub fn resolve_uid_gid_home() -> Result<UidGidHome> {
    let resuid = getresuid()?;
    let resgid = getresgid()?;

    // With setuid bits the real uid is still the user and only the
    // effective uid is 0; under sudo both are 0 and the SUDO_* variables
    // name the user.
    let is_setuid =
        resuid.real != resuid.effective && resuid.effective == Uid::from_raw(0);

    let (uid, gid, home) = if is_setuid {
        // Don't trust SUDO_* here; the caller may have them set for
        // unrelated reasons.
        let home = std::env::var("HOME").unwrap_or("/tmp".to_string());
        (resuid.real, resgid.real, home)
    } else {
        let home = std::env::var("SUDO_HOME")
            .or(std::env::var("HOME"))
            .unwrap_or("/tmp".to_string());
        let uid = match parse_id_var("SUDO_UID")? {
            Some(uid) => Uid::from_raw(uid),
            None => resuid.real,
        };
        let gid = match parse_id_var("SUDO_GID")? {
            Some(gid) => Gid::from_raw(gid),
            None => resgid.real,
        };
        (uid, gid, home)
    };

    let home_path = Path::new(&home);
    if !home_path.is_absolute() {
        return Err(anyhow!("Home directory is not absolute: {:?}", home));
    }
    if !home_path.exists() {
        return Err(anyhow!("Home directory does not exist: {:?}", home));
    }

    Ok(UidGidHome {
        uid,
        gid,
        home: home_path.to_path_buf(),
    })
}

fn parse_id_var(name: &str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| anyhow!("Failed to parse {}: {:?}", name, value)),
        Err(_) => Ok(None),
    }
}
