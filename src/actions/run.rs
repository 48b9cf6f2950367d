use crate::config::{Config, SYSTEM_ROOT};
use crate::container::Container;
use crate::proxy::ProxySession;
use crate::spawn::SpawnClient;
use crate::types::Identity;
use crate::util::join_mount_namespace;
use anyhow::{Context, Result, anyhow};
use log::trace;
use nix::unistd::seteuid;

pub enum RunMode {
    /// Interactive or `-c` login shell.
    Shell(Option<Vec<String>>),
    /// Plain `dbox <program> [args...]`: the program is resolved on the
    /// host and handed to the shell as a quoted command line.
    Command(Vec<String>),
    /// `dbox exec <program> [args...]`: no shell in between.
    Exec {
        program: String,
        arguments: Vec<String>,
    },
}

/**
 * Run one command inside the container and proxy its terminal. Returns the
 * exit status to propagate to our own caller.
 */
pub fn run(
    config: &Config,
    identity: &Identity,
    container: &Container,
    mode: RunMode,
) -> Result<i32> {
    let init_pid = container.ensure_running()?;

    // The broker's socket lives inside the container's mount namespace;
    // join it before opening any descriptors toward the socket.
    join_mount_namespace(init_pid)?;

    // Everything from here on happens as the invoking user: the socket
    // connection, the spawn request, the whole proxied session.
    seteuid(identity.uid).context(format!(
        "failed to set effective uid to {}",
        identity.uid
    ))?;

    let client = SpawnClient::connect(&config.prefix)?;
    client.push_standard_environment()?;

    match &mode {
        RunMode::Shell(None) => {
            trace!("Spawning an interactive shell");
        }
        RunMode::Shell(Some(arguments)) => {
            client.push_shell_command(arguments)?;
        }
        RunMode::Command(command) => {
            let program = translate_into_prefix(&command[0])?;
            trace!("Running `{}' through the shell", program);

            let mut arguments = vec![program];
            arguments.extend(command[1..].iter().cloned());
            client.push_shell_command(&arguments)?;
        }
        RunMode::Exec { program, arguments } => {
            let program = translate_into_prefix(program)?;
            trace!("Executing `{}' directly", program);
            client.push_exec(&program, arguments)?;
        }
    }

    client.push_working_directory(&config.working_directory)?;
    client.push_identity(identity)?;

    let session = ProxySession::open(client)?;
    session.run()
}

/// Resolve a host path and re-root it under the prefix's view of the host
/// file system.
fn translate_into_prefix(program: &str) -> Result<String> {
    let resolved = std::fs::canonicalize(program).map_err(|_| {
        anyhow!("'{}' is not a supported command or a file.", program)
    })?;

    Ok(format!("{}{}", SYSTEM_ROOT, resolved.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_prepends_the_system_root() {
        let resolved = std::fs::canonicalize("/bin/sh").unwrap();
        let translated = translate_into_prefix("/bin/sh").unwrap();
        assert_eq!(
            translated,
            format!("{}{}", SYSTEM_ROOT, resolved.display())
        );
        assert!(translated.starts_with("/Volumes/SystemRoot/"));
    }

    #[test]
    fn test_translate_resolves_symlinks_first() {
        let dir = std::env::temp_dir()
            .join(format!("dbox-test-translate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("prog");
        let link = dir.join("alias");
        std::fs::write(&target, "x").unwrap();
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let translated =
            translate_into_prefix(link.to_str().unwrap()).unwrap();
        let resolved = std::fs::canonicalize(&target).unwrap();
        assert_eq!(
            translated,
            format!("{}{}", SYSTEM_ROOT, resolved.display())
        );
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_translate_rejects_missing_programs() {
        let error = translate_into_prefix("/no/such/binary-at-all")
            .unwrap_err()
            .to_string();
        assert!(error.contains("not a supported command"));
    }
}
