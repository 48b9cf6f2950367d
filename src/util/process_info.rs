use crate::types::Identity;
use anyhow::{Context, Result, anyhow};
use nix::unistd::Pid;
use std::path::Path;

/**
 * Structured view of a process as the kernel reports it: the command name
 * and the four uid/gid values (real, effective, saved, filesystem).
 *
 * Readers are parameterized by the process-information root so tests can
 * point them at a fabricated tree.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub comm: String,
    pub uids: [u32; 4],
    pub gids: [u32; 4],
}

impl ProcessInfo {
    pub fn read(pid: Pid) -> Result<Self> {
        Self::read_from(Path::new("/proc"), pid)
    }

    pub fn read_from(proc_root: &Path, pid: Pid) -> Result<Self> {
        let base = proc_root.join(pid.to_string());

        let comm = std::fs::read_to_string(base.join("comm"))
            .context(format!("failed to read {}/comm", base.display()))?
            .trim_end()
            .to_string();

        let status = std::fs::read_to_string(base.join("status"))
            .context(format!("failed to read {}/status", base.display()))?;

        let uids = parse_id_line(&status, "Uid:")
            .ok_or_else(|| anyhow!("no Uid line for pid {}", pid))?;
        let gids = parse_id_line(&status, "Gid:")
            .ok_or_else(|| anyhow!("no Gid line for pid {}", pid))?;

        Ok(Self { comm, uids, gids })
    }

    /// All four uid values and all four gid values match the identity.
    pub fn owned_by(&self, identity: &Identity) -> bool {
        self.uids.iter().all(|&uid| uid == identity.uid.as_raw())
            && self.gids.iter().all(|&gid| gid == identity.gid.as_raw())
    }
}

fn parse_id_line(status: &str, label: &str) -> Option<[u32; 4]> {
    let line = status.lines().find(|line| line.starts_with(label))?;
    let mut values = [0u32; 4];
    let mut fields = line[label.len()..].split_whitespace();
    for value in values.iter_mut() {
        *value = fields.next()?.parse().ok()?;
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{Gid, Uid};

    fn fake_proc(pid: i32, comm: &str, uid: u32, gid: u32) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!(
            "dbox-test-proc-{}-{}",
            std::process::id(),
            pid
        ));
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        std::fs::write(
            dir.join("status"),
            format!(
                "Name:\t{}\nUid:\t{}\t{}\t{}\t{}\nGid:\t{}\t{}\t{}\t{}\n",
                comm, uid, uid, uid, uid, gid, gid, gid, gid
            ),
        )
        .unwrap();
        root
    }

    #[test]
    fn test_read_from_fake_root() {
        let root = fake_proc(1234, "dboxd", 1000, 1000);
        let info =
            ProcessInfo::read_from(&root, Pid::from_raw(1234)).unwrap();
        assert_eq!(info.comm, "dboxd");
        assert_eq!(info.uids, [1000; 4]);
        assert_eq!(info.gids, [1000; 4]);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_ownership_match() {
        let root = fake_proc(1235, "dboxd", 1000, 1000);
        let info =
            ProcessInfo::read_from(&root, Pid::from_raw(1235)).unwrap();

        let owner = Identity {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
        };
        let stranger = Identity {
            uid: Uid::from_raw(1001),
            gid: Gid::from_raw(1000),
        };
        assert!(info.owned_by(&owner));
        assert!(!info.owned_by(&stranger));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_mismatched_saved_uid_is_not_owned() {
        // A process that changed only its effective uid still fails the
        // four-way match.
        let root = std::env::temp_dir().join(format!(
            "dbox-test-proc-{}-saved",
            std::process::id()
        ));
        let dir = root.join("77");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("comm"), "dboxd\n").unwrap();
        std::fs::write(
            dir.join("status"),
            "Uid:\t1000\t1000\t0\t1000\nGid:\t1000\t1000\t1000\t1000\n",
        )
        .unwrap();

        let info = ProcessInfo::read_from(&root, Pid::from_raw(77)).unwrap();
        let owner = Identity {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
        };
        assert!(!info.owned_by(&owner));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_missing_process_is_an_error() {
        let root = std::env::temp_dir().join("dbox-test-proc-none");
        assert!(ProcessInfo::read_from(&root, Pid::from_raw(1)).is_err());
    }
}
