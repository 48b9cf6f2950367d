use super::Container;
use anyhow::{Context, Result, anyhow};
use log::trace;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

impl Container {
    /**
     * Tear the container down: kill the spawn broker (the init process's
     * first child) and then the init process itself. There is no graceful
     * path yet; the init process has nothing to flush.
     */
    pub fn shutdown(&self) -> Result<()> {
        let pid = self
            .discover()?
            .ok_or_else(|| anyhow!("dbox container is not running"))?;

        let broker = first_child_of(pid)
            .context("Failed to shut down the dbox container")?;

        trace!("Killing broker {} and init process {}", broker, pid);
        let _ = kill(broker, Signal::SIGKILL);
        let _ = kill(pid, Signal::SIGKILL);

        Ok(())
    }
}

fn first_child_of(pid: Pid) -> Result<Pid> {
    let children_path =
        format!("/proc/{}/task/{}/children", pid.as_raw(), pid.as_raw());
    let children = std::fs::read_to_string(&children_path)
        .context(format!("failed to read {}", children_path))?;

    children
        .split_whitespace()
        .next()
        .and_then(|child| child.parse::<i32>().ok())
        .map(Pid::from_raw)
        .ok_or_else(|| anyhow!("init process {} has no children", pid))
}
