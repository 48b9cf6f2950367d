use super::pty::{
    TerminalGuard, get_winsize, openpty_lenient, set_nonblocking,
    set_winsize,
};
use super::signals::{install_forwarding_handlers, take_pending_signals};
use crate::spawn::{SpawnClient, SpawnCommand};
use anyhow::{Context, Result, anyhow};
use log::trace;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::tcgetattr;
use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

const IO_BUFFER_SIZE: usize = 4096;

enum ProxyIo {
    /// stdin is a terminal: the target talks to a fresh pty, whose slave
    /// doubles as the target's stdout/stderr when those are terminals too.
    Interactive {
        master: OwnedFd,
        slave: Option<OwnedFd>,
        _terminal: Option<TerminalGuard>,
    },
    /// Redirected input: the target gets duplicates of our descriptors and
    /// the session only watches the broker channel.
    Redirected { stdin_copy: Option<OwnedFd> },
}

/**
 * The interactive half of a spawn request. Owns the descriptors handed to
 * the broker and the state of the real terminal, and pumps bytes between
 * them until the broker reports the target's exit status.
 */
pub struct ProxySession {
    client: SpawnClient,
    io: ProxyIo,
    stdio: [RawFd; 3],
}

impl ProxySession {
    /**
     * Decide the target's stdio and prepare the terminal. With a terminal
     * on stdin we allocate a pty, mirror the terminal's attributes and
     * window size onto it, and put the real terminal into raw mode for the
     * duration of the session.
     */
    pub fn open(client: SpawnClient) -> Result<ProxySession> {
        let stdin = std::io::stdin();

        if !stdin.is_terminal() {
            let stdin_copy = stdin
                .as_fd()
                .try_clone_to_owned()
                .context("duplicating standard input")?;
            let stdio = [
                stdin_copy.as_raw_fd(),
                libc::STDOUT_FILENO,
                libc::STDERR_FILENO,
            ];
            return Ok(ProxySession {
                client,
                io: ProxyIo::Redirected {
                    stdin_copy: Some(stdin_copy),
                },
                stdio,
            });
        }

        let attributes = tcgetattr(&stdin).ok();
        let (master, slave) = openpty_lenient(attributes.as_ref())
            .context("allocating a pty for the session")?;

        let mut stdio = [slave.as_raw_fd(); 3];
        if !std::io::stdout().is_terminal() {
            stdio[1] = libc::STDOUT_FILENO;
        }
        if !std::io::stderr().is_terminal() {
            stdio[2] = libc::STDERR_FILENO;
        }

        let terminal = match attributes {
            Some(_) => {
                let window = get_winsize(libc::STDIN_FILENO)
                    .context("reading the terminal window size")?;
                let guard = TerminalGuard::enter_raw_mode()?;
                set_winsize(master.as_raw_fd(), &window)?;
                Some(guard)
            }
            None => None,
        };

        Ok(ProxySession {
            client,
            io: ProxyIo::Interactive {
                master,
                slave: Some(slave),
                _terminal: terminal,
            },
            stdio,
        })
    }

    /**
     * Hand the stdio descriptors to the broker and proxy the session until
     * the target terminates. Returns the exit status to propagate.
     */
    pub fn run(mut self) -> Result<i32> {
        self.client.send_go(self.stdio)?;

        // The descriptors now live inside the container; release our
        // copies so the pty sees end-of-file when the target is done.
        let master_fd = match &mut self.io {
            ProxyIo::Interactive { master, slave, .. } => {
                slave.take();
                Some(master.as_raw_fd())
            }
            ProxyIo::Redirected { stdin_copy } => {
                stdin_copy.take();
                None
            }
        };

        self.client.set_nonblocking()?;
        if let Some(master) = master_fd {
            set_nonblocking(master)?;
        }

        install_forwarding_handlers();

        let channel_fd = self.client.raw_fd();
        loop {
            let mut poll_fds = Vec::with_capacity(3);
            poll_fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(channel_fd) },
                PollFlags::POLLIN,
            ));
            if let Some(master) = master_fd {
                poll_fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) },
                    PollFlags::POLLIN,
                ));
                poll_fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(master) },
                    PollFlags::POLLIN,
                ));
            }

            match poll(&mut poll_fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => {
                    self.forward_pending_signals(master_fd)?;
                    continue;
                }
                Err(e) => return Err(e).context("poll"),
            }

            self.forward_pending_signals(master_fd)?;

            let revents: Vec<PollFlags> = poll_fds
                .iter()
                .map(|fd| fd.revents().unwrap_or(PollFlags::empty()))
                .collect();
            let channel_ready = revents[0]
                .intersects(PollFlags::POLLIN | PollFlags::POLLHUP);
            let stdin_ready = revents
                .get(1)
                .is_some_and(|flags| flags.contains(PollFlags::POLLIN));
            let master_ready = revents
                .get(2)
                .is_some_and(|flags| flags.contains(PollFlags::POLLIN));

            if let Some(master) = master_fd {
                if master_ready {
                    drain_master(master, libc::STDOUT_FILENO)?;
                }
                if stdin_ready {
                    drain_stdin(master)?;
                }
            }

            if channel_ready {
                // The broker speaks exactly once: a 4-byte exit status, or
                // a bare close on abnormal termination.
                let mut status = [0u8; 4];
                let n = nix::unistd::read(channel_fd, &mut status)
                    .unwrap_or(0);
                let status = parse_exit_status(&status[..n]);
                trace!("Target terminated with status {}", status);
                return Ok(status);
            }
        }
    }

    fn forward_pending_signals(
        &self,
        master_fd: Option<RawFd>,
    ) -> Result<()> {
        for signo in take_pending_signals() {
            if signo == libc::SIGWINCH {
                if let Some(master) = master_fd {
                    // Window size changes are applied to the pty directly;
                    // the broker never sees them.
                    if let Ok(window) = get_winsize(libc::STDIN_FILENO) {
                        let _ = set_winsize(master, &window);
                    }
                    continue;
                }
            }

            // The broker can only find the foreground process group through
            // a pty. Without one it falls back to signalling the shell, and
            // shells ignore SIGINT; SIGTERM gives the user the interruption
            // they asked for.
            let signo = if master_fd.is_none() && signo == libc::SIGINT {
                libc::SIGTERM
            } else {
                signo
            };

            self.client.push(&SpawnCommand::Signal(signo))?;
        }
        Ok(())
    }
}

/// Copy everything the target wrote to the pty out to our stdout, stopping
/// at the first short read.
fn drain_master(master: RawFd, out: RawFd) -> Result<()> {
    let mut buffer = [0u8; IO_BUFFER_SIZE];
    loop {
        match nix::unistd::read(master, &mut buffer) {
            Ok(n) if n > 0 => {
                write_all(out, &buffer[..n])?;
                if n < buffer.len() {
                    break;
                }
            }
            // EAGAIN after a burst, or EIO once the slave side is gone; in
            // either case the broker channel delivers the verdict.
            _ => break,
        }
    }
    Ok(())
}

/// Feed queued keyboard input to the pty. Reads are capped to what the
/// kernel reports as pending so the blocking stdin descriptor never stalls
/// the loop.
fn drain_stdin(master: RawFd) -> Result<()> {
    let mut buffer = [0u8; IO_BUFFER_SIZE];
    loop {
        let queued = pending_input_bytes(libc::STDIN_FILENO)? as usize;
        let want = queued.min(buffer.len());
        if want == 0 {
            return Err(anyhow!("standard input closed"));
        }

        let n = match nix::unistd::read(libc::STDIN_FILENO, &mut buffer[..want])
        {
            Ok(n) if n > 0 => n,
            Ok(_) => return Err(anyhow!("standard input closed")),
            Err(e) => return Err(e).context("reading standard input"),
        };
        write_all(master, &buffer[..n])?;

        if n < buffer.len() {
            break;
        }
    }
    Ok(())
}

fn pending_input_bytes(fd: RawFd) -> Result<libc::c_int> {
    let mut count: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count) } < 0 {
        return Err(anyhow!(
            "failed to query pending input: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(count)
}

fn write_all(fd: RawFd, mut buffer: &[u8]) -> Result<()> {
    while !buffer.is_empty() {
        match nix::unistd::write(
            unsafe { BorrowedFd::borrow_raw(fd) },
            buffer,
        ) {
            Ok(n) => buffer = &buffer[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(e)
                    .context(format!("writing to descriptor {}", fd));
            }
        }
    }
    Ok(())
}

fn parse_exit_status(bytes: &[u8]) -> i32 {
    match bytes.try_into() {
        Ok(status) => i32::from_ne_bytes(status),
        // Anything but a complete status word counts as failure
        Err(_) => 1,
    }
}
