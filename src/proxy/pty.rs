use anyhow::{Context, Result, anyhow};
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::termios::{
    InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios, tcgetattr, tcsetattr,
};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

/**
 * Open a pseudo-terminal pair, optionally seeding it with the given
 * terminal attributes.
 *
 * This is a more lenient openpty(): grantpt() wants to chown the slave
 * node, which fails on some hosts, and we don't care — the broker hands
 * the slave straight to the target.
 */
pub fn openpty_lenient(
    attributes: Option<&Termios>,
) -> Result<(OwnedFd, OwnedFd)> {
    let master = posix_openpt(OFlag::O_RDWR).context("posix_openpt")?;
    let _ = grantpt(&master);
    unlockpt(&master).context("unlockpt")?;

    let slave_name = ptsname_r(&master).context("ptsname")?;
    let slave: OwnedFd = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_name)
        .context(format!("opening pty slave {}", slave_name))?
        .into();

    let master =
        unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    if let Some(attributes) = attributes {
        tcsetattr(&master, SetArg::TCSANOW, attributes)
            .context("setting pty attributes")?;
    }

    Ok((master, slave))
}

/**
 * Derive the raw mode the real terminal switches to while a session is
 * proxied: no canonical processing, no echo, no signal keys, no output
 * post-processing, and byte-at-a-time reads. Every keystroke goes to the
 * pty untouched; the terminal inside the prefix decides what it means.
 */
pub fn raw_mode(saved: &Termios) -> Termios {
    let mut raw = saved.clone();

    raw.local_flags.remove(
        LocalFlags::ICANON
            | LocalFlags::ISIG
            | LocalFlags::IEXTEN
            | LocalFlags::ECHO,
    );
    raw.input_flags.remove(
        InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::IGNBRK
            | InputFlags::IGNCR
            | InputFlags::INLCR
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::IXON
            | InputFlags::PARMRK,
    );
    raw.output_flags.remove(OutputFlags::OPOST);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    raw
}

pub fn get_winsize(fd: RawFd) -> Result<libc::winsize> {
    let mut window: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut window) } < 0 {
        return Err(anyhow!(
            "failed to read the terminal window size: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(window)
}

pub fn set_winsize(fd: RawFd, window: &libc::winsize) -> Result<()> {
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, window) } < 0 {
        return Err(anyhow!(
            "failed to set the pty window size: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/**
 * Restores the real terminal's attributes when dropped, so the session
 * cannot leave the user's terminal in raw mode on any return path.
 */
pub struct TerminalGuard {
    saved: Termios,
}

impl TerminalGuard {
    /// Switch the controlling terminal to raw mode; the returned guard
    /// undoes it.
    pub fn enter_raw_mode() -> Result<TerminalGuard> {
        let stdin = std::io::stdin();
        let saved =
            tcgetattr(&stdin).context("reading terminal attributes")?;

        tcsetattr(&stdin, SetArg::TCSANOW, &raw_mode(&saved))
            .context("switching the terminal to raw mode")?;

        Ok(TerminalGuard { saved })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = tcsetattr(&std::io::stdin(), SetArg::TCSANOW, &self.saved);
    }
}

/// Make a descriptor non-blocking; used for the pty master, which is
/// drained opportunistically from the event loop.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) } < 0 {
        return Err(anyhow!(
            "failed to set descriptor {} non-blocking: {}",
            fd,
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn plain_termios() -> Termios {
        // A zeroed termios then the flags we intend to clear, so the
        // assertions below are meaningful.
        let mut raw: libc::termios = unsafe { std::mem::zeroed() };
        raw.c_lflag = libc::ICANON | libc::ISIG | libc::ECHO | libc::IEXTEN;
        raw.c_iflag = libc::ICRNL | libc::IXON | libc::BRKINT;
        raw.c_oflag = libc::OPOST;
        Termios::from(raw)
    }

    #[test]
    fn test_raw_mode_disables_line_discipline() {
        let raw = raw_mode(&plain_termios());

        assert!(!raw.local_flags.contains(LocalFlags::ICANON));
        assert!(!raw.local_flags.contains(LocalFlags::ISIG));
        assert!(!raw.local_flags.contains(LocalFlags::ECHO));
        assert!(!raw.input_flags.contains(InputFlags::ICRNL));
        assert!(!raw.input_flags.contains(InputFlags::IXON));
        assert!(!raw.output_flags.contains(OutputFlags::OPOST));
    }

    #[test]
    fn test_raw_mode_reads_one_byte_at_a_time() {
        let raw = raw_mode(&plain_termios());
        assert_eq!(
            raw.control_chars[SpecialCharacterIndices::VMIN as usize],
            1
        );
        assert_eq!(
            raw.control_chars[SpecialCharacterIndices::VTIME as usize],
            0
        );
    }

    #[test]
    fn test_openpty_produces_a_connected_pair() {
        let (master, slave) = openpty_lenient(None).unwrap();

        nix::unistd::write(&slave, b"ping").unwrap();
        let mut buffer = [0u8; 16];
        let n =
            nix::unistd::read(master.as_raw_fd(), &mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"ping");
    }

    #[test]
    fn test_winsize_round_trip_on_pty() {
        let (master, _slave) = openpty_lenient(None).unwrap();

        let window = libc::winsize {
            ws_row: 42,
            ws_col: 132,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        set_winsize(master.as_raw_fd(), &window).unwrap();
        let read_back = get_winsize(master.as_raw_fd()).unwrap();
        assert_eq!(read_back.ws_row, 42);
        assert_eq!(read_back.ws_col, 132);
    }
}
