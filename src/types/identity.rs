use nix::unistd::{Gid, Uid};

/**
 * The identity of the invoking user, captured once at startup before any
 * privilege change. Every user-owned file we create and every ownership
 * check we perform is expressed against this pair.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    pub fn is_root(&self) -> bool {
        self.uid.is_root()
    }
}
