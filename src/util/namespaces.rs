//! Narrow namespace-operations layer. Only Linux-like targets have a real
//! implementation; everywhere else these report "unsupported" so the rest
//! of the crate stays portable to compile.

use anyhow::Result;
use nix::unistd::Pid;

/**
 * Join the mount namespace of the given process.
 *
 * Between Linux 4.9 and 4.11, a strange bug has been introduced which
 * prevents connecting to Unix sockets if the socket was created in a
 * different mount namespace or under overlayfs. Entering the init process's
 * mount namespace before opening the client socket sidesteps it.
 *
 * Calling setns() with a mount namespace doesn't move this process's own
 * mount view; descriptors opened and children spawned afterwards land
 * inside the namespace, which is all we need.
 */
#[cfg(target_os = "linux")]
pub fn join_mount_namespace(pid: Pid) -> Result<()> {
    use anyhow::Context;
    use nix::sched::{CloneFlags, setns};
    use std::os::fd::AsFd;

    let path = format!("/proc/{}/ns/mnt", pid);
    let handle = std::fs::File::open(&path)
        .context(format!("Cannot open mnt namespace file {}", path))?;

    setns(handle.as_fd(), CloneFlags::CLONE_NEWNS)
        .context(format!("Cannot join mnt namespace of pid {}", pid))?;

    Ok(())
}

/**
 * Give the soon-to-be-spawned init process a private hostname and IPC
 * world. Affects this process and everything it forks from now on.
 */
#[cfg(target_os = "linux")]
pub fn isolate_uts_ipc() -> Result<()> {
    use anyhow::Context;
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC)
        .context("Cannot unshare UTS and IPC namespaces")?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn join_mount_namespace(_pid: Pid) -> Result<()> {
    Err(anyhow::anyhow!(
        "namespace operations are not supported on this platform"
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn isolate_uts_ipc() -> Result<()> {
    Err(anyhow::anyhow!(
        "namespace operations are not supported on this platform"
    ))
}
