use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None,
    override_usage = "\n    dbox [OPTIONS] <PROGRAM> [ARGUMENTS...]\n    dbox [OPTIONS] shell [ARGUMENTS...]\n    dbox [OPTIONS] exec <PROGRAM> [ARGUMENTS...]\n    dbox [OPTIONS] shutdown")]
pub struct Args {
    /// Set the log level to one of trace, debug, info, warn, or error.
    /// `-v` is shorthand for enabling verbose (trace) logging.
    #[arg(short = 'v',
        long,
        global = true,
        default_missing_value = "trace",
        num_args = 0..=1,
        require_equals = true,
        value_parser = parse_log_level
    )]
    pub log_level: Option<log::LevelFilter>,

    /// Location of the dbox prefix. Defaults to `~/.dbox`.
    #[arg(
        long,
        global = true,
        env = "DPREFIX",
        value_hint = clap::ValueHint::DirPath
    )]
    pub prefix: Option<String>,

    /***************/
    /* Subcommands */
    /***************/
    #[command(subcommand)]
    pub action: Option<Action>,

    /********************/
    /* Prefixed Command */
    /********************/
    /// The program to run inside the prefix, interpreted as a shell command
    /// line. Use the `exec` action to run a binary without shell
    /// interpolation.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..,
        value_parser = validate_command,
        help_heading = "Prefixed Command",
    )]
    pub command: Option<Vec<String>>,
}

#[derive(clap::Subcommand, Clone, Debug)]
#[command(subcommand_help_heading = "Actions")]
pub enum Action {
    /// Start an interactive login shell inside the prefix
    Shell {
        /// Arguments joined into a single `-c` command line for the shell
        #[arg(value_name = "ARGUMENTS", trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        arguments: Option<Vec<String>>,
    },

    /// Run a binary inside the prefix without shell interpolation
    Exec {
        /// The binary to execute
        #[arg(value_name = "PROGRAM")]
        program: String,

        /// Arguments passed to the binary verbatim
        #[arg(value_name = "ARGUMENTS", trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        arguments: Option<Vec<String>>,
    },

    /// Kill the spawn broker and the init process of the prefix
    Shutdown,
}

static ARG_COUNT: AtomicUsize = AtomicUsize::new(0);

// Because of the way clap works, if someone tries to pass a parameter that
// doesn't exist, we'll see it here as a command. This is a bit of a hack to
// catch that case.
fn validate_command(s: &str) -> Result<String, String> {
    ARG_COUNT.fetch_add(1, Ordering::Relaxed);
    if ARG_COUNT.load(Ordering::Relaxed) == 1 {
        if s.starts_with('-') && s != "--" {
            Err(String::from("Unknown option"))
        } else {
            Ok(s.to_string())
        }
    } else {
        Ok(s.to_string())
    }
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter, String> {
    s.parse::<log::LevelFilter>().map_err(|e| e.to_string())
}
