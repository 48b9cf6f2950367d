use crate::types::Identity;
use crate::util::ScopedIdentity;
use anyhow::{Context, Result, anyhow};
use log::info;
use nix::unistd::User;
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::Path;

/// The fixed directory skeleton of a fresh prefix.
const PREFIX_DIRS: &[&str] = &[
    "Volumes",
    "Applications",
    "usr",
    "usr/local",
    "usr/local/share",
    "private",
    "private/var",
    "private/var/log",
    "private/var/db",
    "private/etc",
    "var",
    "var/run",
    "var/tmp",
    "var/log",
];

/**
 * Check whether the prefix directory exists. A plain file squatting on the
 * path is a conflict the user has to resolve; we never remove it ourselves.
 */
pub fn check_prefix_dir(prefix: &Path) -> Result<bool> {
    match std::fs::metadata(prefix) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(anyhow!(
                    "{} is a file. Remove the file.",
                    prefix.display()
                ));
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow!("Cannot access {}: {}", prefix.display(), e)),
    }
}

/**
 * Create the prefix skeleton and its bootstrap account files, all owned by
 * the invoking user. Safe to run against a partially created tree; existing
 * directories are left alone and account files are rewritten.
 */
pub fn setup_prefix(prefix: &Path, identity: &Identity) -> Result<()> {
    info!("Setting up a new prefix at {}", prefix.display());

    let passwd_entry = User::from_uid(identity.uid)
        .context("failed to look up the invoking user")?
        .ok_or_else(|| {
            anyhow!("Failed to find an /etc/passwd entry for the current user")
        })?;

    let _user = ScopedIdentity::assume(identity)
        .context("assuming the invoking user's identity")?;

    create_dir(prefix)?;
    for dir in PREFIX_DIRS {
        create_dir(&prefix.join(dir))?;
    }

    write_account_files(prefix, &passwd_entry)?;

    Ok(())
}

fn write_account_files(prefix: &Path, entry: &User) -> Result<()> {
    let name = &entry.name;
    let uid = entry.uid.as_raw();
    let gid = entry.gid.as_raw();

    let passwd = format!(
        "root:*:0:0:System Administrator:/var/root:/bin/sh\n\
         {name}:*:{uid}:{gid}:Dbox User:/Users/{name}:/bin/bash\n"
    );
    let master_passwd = format!(
        "root:*:0:0::0:0:System Administrator:/var/root:/bin/sh\n\
         {name}:*:{uid}:{gid}::0:0:Dbox User:/Users/{name}:/bin/bash\n"
    );
    let group = format!(
        "wheel:*:0:root,{name}\n\
         {name}:*:{gid}:{name}\n"
    );

    for (path, contents) in [
        ("private/etc/passwd", passwd),
        ("private/etc/master.passwd", master_passwd),
        ("private/etc/group", group),
    ] {
        std::fs::write(prefix.join(path), contents).context(format!(
            "Failed to write {} within the prefix",
            path
        ))?;
    }

    Ok(())
}

/// mkdir that tolerates an existing directory but not a file in the way.
fn create_dir(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(anyhow!(
                    "{} already exists and is a file. Remove the file.",
                    path.display()
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => std::fs::DirBuilder::new()
            .mode(0o755)
            .create(path)
            .context(format!("Cannot create {}", path.display())),
        Err(e) => Err(anyhow!("Cannot access {}: {}", path.display(), e)),
    }
}

/**
 * The prefix must belong to whoever is invoking us, unless that is root.
 * Anything else would let one user run code as another through a planted
 * prefix.
 */
pub fn check_prefix_owner(prefix: &Path, identity: &Identity) -> Result<()> {
    match std::fs::metadata(prefix) {
        Ok(metadata) => {
            if !identity.is_root()
                && metadata.uid() != identity.uid.as_raw()
            {
                return Err(anyhow!("You do not own the prefix directory."));
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(anyhow!("You do not own the prefix directory."))
        }
        // Other failures surface later, on the operations that need the
        // prefix to exist.
        Err(_) => Ok(()),
    }
}

pub(super) fn setup_workdir(workdir: &Path) -> Result<()> {
    create_dir(workdir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getgid, getuid};
    use std::path::PathBuf;

    fn identity() -> Identity {
        Identity {
            uid: getuid(),
            gid: getgid(),
        }
    }

    fn scratch(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "dbox-test-prefix-{}-{}",
            std::process::id(),
            tag
        ));
        let _ = std::fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn test_check_prefix_dir_states() {
        let prefix = scratch("states");
        assert!(!check_prefix_dir(&prefix).unwrap());

        std::fs::create_dir_all(&prefix).unwrap();
        assert!(check_prefix_dir(&prefix).unwrap());
        std::fs::remove_dir_all(&prefix).unwrap();

        // A file squatting on the prefix path is a conflict
        std::fs::write(&prefix, "junk").unwrap();
        assert!(check_prefix_dir(&prefix).is_err());
        std::fs::remove_file(&prefix).unwrap();
    }

    #[test]
    fn test_setup_prefix_is_idempotent() {
        let prefix = scratch("idempotent");

        setup_prefix(&prefix, &identity()).unwrap();
        let passwd =
            std::fs::read_to_string(prefix.join("private/etc/passwd"))
                .unwrap();

        // Second run converges to the same tree without errors
        setup_prefix(&prefix, &identity()).unwrap();
        let passwd_again =
            std::fs::read_to_string(prefix.join("private/etc/passwd"))
                .unwrap();

        assert_eq!(passwd, passwd_again);
        for dir in PREFIX_DIRS {
            assert!(prefix.join(dir).is_dir(), "{} missing", dir);
        }
        std::fs::remove_dir_all(&prefix).unwrap();
    }

    #[test]
    fn test_account_files_name_the_user() {
        let prefix = scratch("accounts");
        setup_prefix(&prefix, &identity()).unwrap();

        let user = User::from_uid(getuid()).unwrap().unwrap();
        let passwd =
            std::fs::read_to_string(prefix.join("private/etc/passwd"))
                .unwrap();
        let group =
            std::fs::read_to_string(prefix.join("private/etc/group"))
                .unwrap();

        assert!(passwd.contains(&user.name));
        assert!(passwd.starts_with("root:*:0:0:"));
        assert!(group.starts_with("wheel:*:0:root,"));
        std::fs::remove_dir_all(&prefix).unwrap();
    }

    #[test]
    fn test_owner_check_accepts_own_prefix() {
        let prefix = scratch("owner");
        std::fs::create_dir_all(&prefix).unwrap();
        assert!(check_prefix_owner(&prefix, &identity()).is_ok());
        std::fs::remove_dir_all(&prefix).unwrap();
    }
}
