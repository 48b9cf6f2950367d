use super::Container;
use super::prefix::setup_workdir;
use crate::config::INIT_PROCESS_PATH;
use crate::util::{ScopedIdentity, isolate_uts_ipc};
use anyhow::{Context, Result};
use log::{error, trace};
use nix::unistd::{ForkResult, Pid, execv, fork, pipe};
use std::ffi::CString;
use std::os::fd::AsRawFd;

/// How long we give a fresh init process to bring up the spawn broker.
const SOCKET_WAIT_ATTEMPTS: u32 = 15;
const SOCKET_WAIT_DELAY: std::time::Duration =
    std::time::Duration::from_secs(1);

impl Container {
    /**
     * Return the pid of the running init process, starting a fresh
     * container first if none is alive.
     */
    pub fn ensure_running(&self) -> Result<Pid> {
        if let Some(pid) = self.discover()? {
            return Ok(pid);
        }

        // A previous container may have left its socket behind; the broker
        // cannot bind over it.
        let socket_path = self.spawn_socket_path();
        let _ = std::fs::remove_file(&socket_path);

        setup_workdir(&self.workdir_path()).context(format!(
            "failed to create workdir {}",
            self.workdir_path().display()
        ))?;

        let pid = self.start()?;
        self.write_init_record(pid);

        // Wait until the broker has bound its socket. Giving up here is not
        // fatal; the subsequent connect reports the real failure.
        for _ in 0..SOCKET_WAIT_ATTEMPTS {
            if socket_path.exists() {
                break;
            }
            std::thread::sleep(SOCKET_WAIT_DELAY);
        }

        Ok(pid)
    }

    /**
     * Fork and exec the init process inside freshly unshared UTS and IPC
     * namespaces, then block until it has finished its own setup. The child
     * signals readiness over a pipe: it either writes a byte or, more
     * commonly, just closes its end when it execs. The payload is
     * deliberately not interpreted.
     */
    fn start(&self) -> Result<Pid> {
        trace!("Starting a new container for {}", self.prefix.display());

        let (read_fd, write_fd) =
            pipe().context("Cannot create a pipe for synchronization")?;

        isolate_uts_ipc()
            .context("Cannot isolate namespaces for the init process")?;

        // The write end's descriptor number is passed to the child on its
        // command line, so it must be rendered before the fork.
        let argv = self.init_argv(write_fd.as_raw_fd())?;
        let init_path = CString::new(INIT_PROCESS_PATH)
            .context("init process path contains a nul byte")?;

        match unsafe { fork() }
            .context("Cannot fork() to create the init process")?
        {
            ForkResult::Parent { child } => {
                drop(write_fd);

                // Wait for the child to finish namespace and identity
                // setup; a byte or a closed pipe both mean "go ahead".
                let mut buffer = [0u8; 1];
                let _ = nix::unistd::read(read_fd.as_raw_fd(), &mut buffer);
                drop(read_fd);

                trace!("Init process started with pid {}", child);
                Ok(child)
            }
            ForkResult::Child => {
                drop(read_fd);

                let argv_refs: Vec<&std::ffi::CStr> =
                    argv.iter().map(|arg| arg.as_c_str()).collect();
                let _ = execv(&init_path, &argv_refs);

                error!("Failed to start {}", INIT_PROCESS_PATH);
                std::process::exit(1);
            }
        }
    }

    fn init_argv(&self, pipe_fd: i32) -> Result<Vec<CString>> {
        let prefix = self
            .prefix
            .to_str()
            .context("prefix path contains invalid UTF-8 characters")?;
        let fix_permissions = if self.fix_permissions { "1" } else { "0" };

        [
            crate::config::INIT_PROCESS_NAME.to_string(),
            prefix.to_string(),
            self.identity.uid.as_raw().to_string(),
            self.identity.gid.as_raw().to_string(),
            pipe_fd.to_string(),
            fix_permissions.to_string(),
        ]
        .into_iter()
        .map(|arg| CString::new(arg).context("argument contains a nul byte"))
        .collect()
    }

    /**
     * Record the init pid on disk, owned by the invoking user so the next
     * invocation (and the user themselves) can read and clean it. Failing
     * to record it degrades the next invocation to starting a duplicate
     * container; that is not worth killing this one over.
     */
    fn write_init_record(&self, pid: Pid) {
        let pid_path = self.init_pid_path();

        let guard = match ScopedIdentity::assume(&self.identity) {
            Ok(guard) => guard,
            Err(e) => {
                error!("Cannot write out the init process pid: {}", e);
                return;
            }
        };

        if let Err(e) = std::fs::write(&pid_path, pid.as_raw().to_string()) {
            error!("Cannot write out the init process pid: {}", e);
        }
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use nix::unistd::{getgid, getuid};

    #[test]
    fn test_init_argv_layout() {
        let container = Container::new(
            "/tmp/prefix".into(),
            Identity {
                uid: getuid(),
                gid: getgid(),
            },
            true,
        );

        let argv = container.init_argv(7).unwrap();
        let rendered: Vec<String> = argv
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(rendered[0], "dboxd");
        assert_eq!(rendered[1], "/tmp/prefix");
        assert_eq!(rendered[2], getuid().as_raw().to_string());
        assert_eq!(rendered[3], getgid().as_raw().to_string());
        assert_eq!(rendered[4], "7");
        assert_eq!(rendered[5], "1");
    }

    #[test]
    fn test_write_init_record_has_no_trailing_newline() {
        let prefix = std::env::temp_dir().join(format!(
            "dbox-test-record-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&prefix).unwrap();
        let container = Container::new(
            prefix.clone(),
            Identity {
                uid: getuid(),
                gid: getgid(),
            },
            false,
        );

        container.write_init_record(Pid::from_raw(4242));
        let contents =
            std::fs::read_to_string(container.init_pid_path()).unwrap();
        assert_eq!(contents, "4242");
        std::fs::remove_dir_all(prefix).unwrap();
    }
}
