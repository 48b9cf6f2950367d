#![allow(
    clippy::collapsible_else_if,
    clippy::collapsible_if,
    clippy::module_inception,
    clippy::useless_format
)]
#![deny(
    clippy::get_unwrap,
    clippy::panic,
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::use_debug,
    clippy::used_underscore_binding,
    clippy::used_underscore_items
)]

mod actions;
mod config;
mod container;
mod logger;
mod proxy;
mod spawn;
mod types;
mod util;

use anyhow::{Context, Result, anyhow};
use clap::CommandFactory;
use clap::Parser;
use clap_complete::CompleteEnv;
use config::{cli, resolve_config};
use container::Container;
use log::Log;
use nix::unistd::geteuid;
use types::Identity;
use util::{become_root, drop_privileges, resolve_uid_gid_home};

pub fn main() -> Result<()> {
    let logger = logger::DboxLogger::new(log::LevelFilter::Trace)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let cli: cli::Args = cli::Args::parse();

    if let Some(log_level) = cli.log_level {
        logger.set_level(log_level);
    } else {
        logger.set_level(log::LevelFilter::Info);
    };

    let uid_gid_home =
        resolve_uid_gid_home().context("Resolving uid/gid/home")?;

    // Tab completion never needs root. Drop to the invoking user and let clap
    // take over; this function will not return if completion was requested.
    if std::env::var("COMPLETE").is_ok() {
        drop_privileges(uid_gid_home.uid, uid_gid_home.gid)?;
        CompleteEnv::with_factory(cli::Args::command).complete();
        return Ok(());
    }

    logger.print_deferred();

    // Ensure we're running with root privileges, either via setuid bits or sudo
    let effective_uid = geteuid();
    if !effective_uid.is_root() {
        return Err(anyhow!(
            "`{}' is not setuid root, which is mandatory. dbox needs this to \
             create namespaces and to reach the init process of the prefix. \
             Retry using `sudo` or set the setuid bits.",
            std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "dbox".to_string())
        ));
    }

    // Figure out who we really are; this identity owns the prefix and every
    // file we write into it, and it is what the target process will run as.
    let identity = Identity {
        uid: uid_gid_home.uid,
        gid: uid_gid_home.gid,
    };

    // We may only be *effectively* root (setuid binary). Make the real
    // identity root once so the effective identity can be toggled freely
    // for the rest of the process lifetime.
    become_root().context("Acquiring a root real identity")?;

    let config = resolve_config(&cli, &uid_gid_home)?;
    logger.set_level(config.log_level);

    let fix_permissions = if container::check_prefix_dir(&config.prefix)? {
        false
    } else {
        container::setup_prefix(&config.prefix, &identity)?;
        true
    };
    container::check_prefix_owner(&config.prefix, &identity)?;

    let container =
        Container::new(config.prefix.clone(), identity, fix_permissions);

    let status = match cli.action {
        Some(cli::Action::Shutdown) => {
            container.shutdown()?;
            0
        }
        Some(cli::Action::Shell { arguments }) => actions::run(
            &config,
            &identity,
            &container,
            actions::RunMode::Shell(
                arguments.filter(|arguments| !arguments.is_empty()),
            ),
        )?,
        Some(cli::Action::Exec { program, arguments }) => actions::run(
            &config,
            &identity,
            &container,
            actions::RunMode::Exec {
                program,
                arguments: arguments.unwrap_or_default(),
            },
        )?,
        None => match cli.command {
            Some(command) if !command.is_empty() => actions::run(
                &config,
                &identity,
                &container,
                actions::RunMode::Command(command),
            )?,
            _ => {
                cli::Args::command()
                    .print_help()
                    .context("Printing help")?;
                1
            }
        },
    };

    logger.flush();
    std::process::exit(status);
}
