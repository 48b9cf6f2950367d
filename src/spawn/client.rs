use super::protocol::SpawnCommand;
use crate::config::{SPAWN_SOCKET_PATH, SYSTEM_ROOT};
use crate::types::Identity;
use anyhow::{Context, Result, anyhow};
use log::trace;
use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use nix::unistd::{User, geteuid};
use std::io::{IoSlice, Write};
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

/**
 * One spawn request to the broker inside the container. The connection is
 * single-use: configuration commands, one `Go` with the target's stdio
 * descriptors, then only `Signal` commands until the broker reports the
 * exit status.
 */
pub struct SpawnClient {
    stream: UnixStream,
}

impl SpawnClient {
    pub fn connect(prefix: &Path) -> Result<SpawnClient> {
        let socket_path = prefix.join(SPAWN_SOCKET_PATH);

        let stream = UnixStream::connect(&socket_path).context(format!(
            "Error connecting to the spawn broker in the container ({})",
            socket_path.display()
        ))?;

        Ok(SpawnClient { stream })
    }

    /**
     * Send one command. The write must land in full: the stream protocol
     * has no resynchronization, so a partial command leaves the broker
     * unable to parse anything that follows.
     */
    pub fn push(&self, command: &SpawnCommand) -> Result<()> {
        let message = command.encode();
        let written = (&self.stream)
            .write(&message)
            .context("Error sending command to the spawn broker")?;
        if written != message.len() {
            return Err(anyhow!(
                "Short write sending command to the spawn broker ({} of {} bytes)",
                written,
                message.len()
            ));
        }
        Ok(())
    }

    /// Send `Go` along with the target's stdin/stdout/stderr descriptors.
    pub fn send_go(&self, stdio: [RawFd; 3]) -> Result<()> {
        use std::os::fd::AsRawFd;

        let message = SpawnCommand::Go.encode();
        let iov = [IoSlice::new(&message)];
        let control = [ControlMessage::ScmRights(&stdio)];

        sendmsg::<()>(
            self.stream.as_raw_fd(),
            &iov,
            &control,
            MsgFlags::empty(),
            None,
        )
        .context("Error sending descriptors to the spawn broker")?;

        Ok(())
    }

    /// Environment every target starts from, regardless of run mode.
    pub fn push_standard_environment(&self) -> Result<()> {
        self.push(&SpawnCommand::SetEnv(
            "PATH=/usr/bin:\
             /bin:\
             /usr/sbin:\
             /sbin:\
             /usr/local/bin"
                .to_string(),
        ))?;
        self.push(&SpawnCommand::SetEnv(
            "TMPDIR=/private/tmp".to_string(),
        ))?;

        let login = resolve_login_name()?;
        self.push(&SpawnCommand::SetEnv(format!("HOME=/Users/{}", login)))?;

        Ok(())
    }

    /// Arguments for the login shell: a fully quoted `-c` command line.
    pub fn push_shell_command<S: AsRef<str>>(
        &self,
        arguments: &[S],
    ) -> Result<()> {
        self.push(&SpawnCommand::AddArg("-c".to_string()))?;
        self.push(&SpawnCommand::AddArg(super::quote_command_line(
            arguments,
        )))?;
        Ok(())
    }

    /// Direct execution: the binary plus its literal argument vector.
    pub fn push_exec(&self, binary: &str, arguments: &[String]) -> Result<()> {
        self.push(&SpawnCommand::SetExec(binary.to_string()))?;
        self.push(&SpawnCommand::AddArg(binary.to_string()))?;
        for argument in arguments {
            self.push(&SpawnCommand::AddArg(argument.clone()))?;
        }
        Ok(())
    }

    /// The invoker's working directory, as seen from inside the prefix.
    pub fn push_working_directory(&self, cwd: &Path) -> Result<()> {
        self.push(&SpawnCommand::Chdir(format!(
            "{}{}",
            SYSTEM_ROOT,
            cwd.display()
        )))
    }

    /// The identity the broker assumes before running the target.
    pub fn push_identity(&self, identity: &Identity) -> Result<()> {
        trace!(
            "Target will run as {}/{}",
            identity.uid, identity.gid
        );
        self.push(&SpawnCommand::SetUidGid {
            uid: identity.uid.as_raw(),
            gid: identity.gid.as_raw(),
        })
    }

    pub fn set_nonblocking(&self) -> Result<()> {
        self.stream
            .set_nonblocking(true)
            .context("failed to set the broker channel non-blocking")
    }

    pub fn raw_fd(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.stream.as_raw_fd()
    }
}

/// The user name behind the current effective uid, used to point HOME at
/// the right place under /Users.
fn resolve_login_name() -> Result<String> {
    if let Ok(Some(user)) = User::from_uid(geteuid()) {
        return Ok(user.name);
    }

    std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .map_err(|_| anyhow!("Cannot determine your user name"))
}
