mod identity;
mod uid_gid_home;

pub use identity::Identity;
pub use uid_gid_home::UidGidHome;
