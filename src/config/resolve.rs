use super::cli::Args;
use super::{Config, DEFAULT_PREFIX_DIR, DPREFIX_ENV, MAX_PREFIX_LEN};
use crate::types::UidGidHome;
use anyhow::{Context, Result, anyhow};
use log::trace;
use std::env;
use std::path::PathBuf;

/**
 * Resolve the effective configuration from the command line and the
 * environment. The prefix comes from `--prefix` / `$DPREFIX`, falling back
 * to a dot directory under the invoking user's home.
 */
pub fn resolve_config(cli: &Args, uid_gid_home: &UidGidHome) -> Result<Config> {
    let prefix = match cli.prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => PathBuf::from(prefix),
        _ => uid_gid_home.home.join(DEFAULT_PREFIX_DIR),
    };

    if prefix.as_os_str().len() > MAX_PREFIX_LEN {
        return Err(anyhow!("Prefix path too long"));
    }

    // Processes spawned into the prefix must not see the override, else a
    // nested dbox invocation inside the container would pick it up.
    unsafe {
        env::remove_var(DPREFIX_ENV);
    }

    let working_directory = env::current_dir()
        .context("Resolving the current working directory")?;

    trace!("Using prefix {}", prefix.display());

    Ok(Config {
        log_level: cli.log_level.unwrap_or(log::LevelFilter::Info),
        prefix,
        working_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn home() -> UidGidHome {
        UidGidHome {
            uid: nix::unistd::getuid(),
            gid: nix::unistd::getgid(),
            home: PathBuf::from("/home/someone"),
        }
    }

    #[test]
    fn test_default_prefix_under_home() {
        unsafe { std::env::remove_var(DPREFIX_ENV) };
        let cli = Args::parse_from(["dbox", "shutdown"]);
        let config = resolve_config(&cli, &home()).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/home/someone/.dbox"));
        assert_eq!(config.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn test_prefix_flag_overrides_home() {
        let cli =
            Args::parse_from(["dbox", "--prefix", "/tmp/other", "shutdown"]);
        let config = resolve_config(&cli, &home()).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/tmp/other"));
    }

    #[test]
    fn test_overlong_prefix_is_rejected() {
        let long = format!("/{}", "x".repeat(MAX_PREFIX_LEN + 1));
        let cli = Args::parse_from([
            "dbox",
            "--prefix",
            long.as_str(),
            "shutdown",
        ]);
        assert!(resolve_config(&cli, &home()).is_err());
    }
}
