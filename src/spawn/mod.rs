mod client;
mod protocol;
mod quote;

pub use client::SpawnClient;
pub use protocol::SpawnCommand;
pub use quote::quote_command_line;
