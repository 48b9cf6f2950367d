mod namespaces;
mod privileges;
mod process_info;
mod resolve_uid_gid_home;

pub use namespaces::{isolate_uts_ipc, join_mount_namespace};
pub use privileges::{ScopedIdentity, become_root, drop_privileges};
pub use process_info::ProcessInfo;
pub use resolve_uid_gid_home::resolve_uid_gid_home;
