pub mod cli;
pub mod resolve;

pub use resolve::resolve_config;

use std::path::PathBuf;

/// Environment variable overriding the prefix location.
pub const DPREFIX_ENV: &str = "DPREFIX";

/// Prefix directory under the invoking user's home when DPREFIX is not set.
pub const DEFAULT_PREFIX_DIR: &str = ".dbox";

/// The prefix path travels through fixed-size OS structures (unix socket
/// addresses among them), so it is capped well below their limits.
pub const MAX_PREFIX_LEN: usize = 255;

/// Where the host file system shows up inside the prefix.
pub const SYSTEM_ROOT: &str = "/Volumes/SystemRoot";

/// The init/broker binary spawned into the prefix namespaces.
pub const INIT_PROCESS_PATH: &str = "/usr/local/libexec/dboxd";

/// Command name the init process is expected to run under, as reported by
/// the kernel.
pub const INIT_PROCESS_NAME: &str = "dboxd";

/// Pid record of the running init process, relative to the prefix root.
pub const INIT_PID_FILE: &str = ".init.pid";

/// Spawn broker socket, relative to the prefix root.
pub const SPAWN_SOCKET_PATH: &str = "var/run/spawnd.sock";

#[derive(Clone)]
pub struct Config {
    pub log_level: log::LevelFilter,
    pub prefix: PathBuf,
    pub working_directory: PathBuf,
}
