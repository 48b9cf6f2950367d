use super::Container;
use crate::config::INIT_PROCESS_NAME;
use crate::util::ProcessInfo;
use anyhow::Result;
use log::trace;
use nix::sys::signal::kill;
use nix::unistd::Pid;

impl Container {
    /**
     * Find the running init process of this prefix, if there is one.
     *
     * The pid record is only a hint: the process behind it may have died,
     * the pid may have been recycled by an unrelated process, or another
     * user may have planted it. A record that fails any of those checks is
     * deleted and the container is treated as not running; that is normal
     * operation, not an error.
     */
    pub fn discover(&self) -> Result<Option<Pid>> {
        let pid_path = self.init_pid_path();

        let contents = match std::fs::read_to_string(&pid_path) {
            Ok(contents) => contents,
            Err(_) => return Ok(None),
        };

        let pid = match contents.trim().parse::<i32>() {
            Ok(pid) => Pid::from_raw(pid),
            Err(_) => {
                trace!("Corrupt init pid record, cleaning up");
                self.discard_init_record();
                return Ok(None);
            }
        };

        // Does the process exist?
        if kill(pid, None).is_err() {
            trace!("Recorded init pid {} is gone, cleaning up", pid);
            self.discard_init_record();
            return Ok(None);
        }

        // Is it actually our init process?
        let info = match ProcessInfo::read(pid) {
            Ok(info) => info,
            Err(_) => {
                self.discard_init_record();
                return Ok(None);
            }
        };
        if info.comm != INIT_PROCESS_NAME {
            trace!(
                "Pid {} is running `{}', not `{}', cleaning up",
                pid, info.comm, INIT_PROCESS_NAME
            );
            self.discard_init_record();
            return Ok(None);
        }

        // Is it owned by the invoking user? Root skips this; a root-owned
        // prefix may legitimately host an init started by anyone.
        if !self.identity.is_root() && !info.owned_by(&self.identity) {
            trace!("Pid {} is not owned by the invoking user", pid);
            self.discard_init_record();
            return Ok(None);
        }

        trace!("Found running container with init pid {}", pid);
        Ok(Some(pid))
    }

    pub(super) fn discard_init_record(&self) {
        let _ = std::fs::remove_file(self.init_pid_path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use nix::unistd::{getgid, getuid};
    use rstest::rstest;
    use std::path::PathBuf;

    fn test_container(tag: &str) -> Container {
        let prefix = std::env::temp_dir().join(format!(
            "dbox-test-discover-{}-{}",
            std::process::id(),
            tag
        ));
        std::fs::create_dir_all(&prefix).unwrap();
        Container::new(
            prefix,
            Identity {
                uid: getuid(),
                gid: getgid(),
            },
            false,
        )
    }

    fn cleanup(prefix: &PathBuf) {
        let _ = std::fs::remove_dir_all(prefix);
    }

    #[test]
    fn test_no_record_means_not_running() {
        let container = test_container("absent");
        assert_eq!(container.discover().unwrap(), None);
        cleanup(&container.prefix);
    }

    #[rstest]
    #[case::corrupt("not-a-pid")]
    #[case::dead_pid("1073741823")] // far beyond any real pid
    fn test_stale_record_is_deleted(#[case] contents: &str) {
        let container = test_container(contents);
        std::fs::write(container.init_pid_path(), contents).unwrap();

        assert_eq!(container.discover().unwrap(), None);
        assert!(!container.init_pid_path().exists());
        cleanup(&container.prefix);
    }

    #[test]
    fn test_wrong_command_name_is_deleted() {
        // Our own pid is alive but certainly not running `dboxd`.
        let container = test_container("comm");
        std::fs::write(
            container.init_pid_path(),
            std::process::id().to_string(),
        )
        .unwrap();

        assert_eq!(container.discover().unwrap(), None);
        assert!(!container.init_pid_path().exists());
        cleanup(&container.prefix);
    }

    #[test]
    fn test_discover_is_idempotent() {
        let container = test_container("idempotent");
        std::fs::write(container.init_pid_path(), "not-a-pid").unwrap();

        assert_eq!(container.discover().unwrap(), None);
        // Second call sees no record and performs no further cleanup.
        assert_eq!(container.discover().unwrap(), None);
        cleanup(&container.prefix);
    }
}
