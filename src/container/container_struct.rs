use crate::config::INIT_PID_FILE;
use crate::types::Identity;
use std::path::{Path, PathBuf};

/**
 * One container per prefix: a single init process (`dboxd`) holding the
 * prefix's namespaces and hosting the spawn broker. The container may or
 * may not be running; `discover` finds a live one, `ensure_running` starts
 * one when needed.
 */
pub struct Container {
    pub prefix: PathBuf,
    pub identity: Identity,
    /// A freshly scaffolded prefix asks the new init process to fix up
    /// file permissions on first boot.
    pub fix_permissions: bool,
}

impl Container {
    pub fn new(
        prefix: PathBuf,
        identity: Identity,
        fix_permissions: bool,
    ) -> Container {
        Container {
            prefix,
            identity,
            fix_permissions,
        }
    }

    pub fn init_pid_path(&self) -> PathBuf {
        self.prefix.join(INIT_PID_FILE)
    }

    pub fn spawn_socket_path(&self) -> PathBuf {
        self.prefix.join(crate::config::SPAWN_SOCKET_PATH)
    }

    /// The `.workdir` sibling of the prefix, used by the init process for
    /// overlay scratch state.
    pub fn workdir_path(&self) -> PathBuf {
        workdir_for(&self.prefix)
    }
}

fn workdir_for(prefix: &Path) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let mut bytes = prefix.as_os_str().as_bytes().to_vec();
    while bytes.last() == Some(&b'/') {
        bytes.pop();
    }
    bytes.extend_from_slice(b".workdir");
    PathBuf::from(OsStr::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workdir_strips_trailing_slashes() {
        assert_eq!(
            workdir_for(Path::new("/home/u/.dbox")),
            PathBuf::from("/home/u/.dbox.workdir")
        );
        assert_eq!(
            workdir_for(Path::new("/home/u/.dbox///")),
            PathBuf::from("/home/u/.dbox.workdir")
        );
    }
}
