use nix::unistd::{Gid, Uid};
use std::path::PathBuf;

/// Who invoked us, resolved through setuid/sudo indirection, along with
/// their home directory (the default location of the prefix).
pub struct UidGidHome {
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
}
