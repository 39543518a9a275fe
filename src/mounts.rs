//! Mount-table probing: which disk a path lives on and whether that disk
//! rotates. Backed by sysinfo's disk list with a /sys/block fallback for
//! the rotational flag on Linux.

use std::path::{Path, PathBuf};

use log::debug;
use sysinfo::{DiskKind, Disks};

struct MountEntry {
    mount_point: PathBuf,
    name: String,
    is_rotational: bool,
}

/// Snapshot of the system's mounts, probed once per session.
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn probe() -> Self {
        let disks = Disks::new_with_refreshed_list();
        let entries = disks
            .iter()
            .map(|d| {
                debug!(
                    "mount {}: fs={}, kind={:?}",
                    d.mount_point().display(),
                    d.file_system().to_string_lossy(),
                    d.kind()
                );
                let is_rotational = match d.kind() {
                    DiskKind::HDD => true,
                    DiskKind::SSD => false,
                    DiskKind::Unknown(_) => read_rotational_from_sys(&d.name().to_string_lossy())
                        .unwrap_or(false),
                };
                MountEntry {
                    mount_point: d.mount_point().to_path_buf(),
                    name: d.name().to_string_lossy().into_owned(),
                    is_rotational,
                }
            })
            .collect();
        MountTable { entries }
    }

    /// An empty table; every lookup falls back to the file's own device
    /// number and non-rotational behavior.
    pub fn empty() -> Self {
        MountTable { entries: Vec::new() }
    }

    fn entry_for_path(&self, path: &Path) -> Option<(usize, &MountEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| path.starts_with(&e.mount_point))
            .max_by_key(|(_, e)| e.mount_point.as_os_str().len())
    }

    /// Stable id of the whole disk `path` sits on. Subvolume filesystems
    /// report distinct st_dev values per subvolume; mapping through the
    /// mount point collapses them onto one disk. Falls back to `dev`.
    pub fn disk_id(&self, dev: u64, path: &Path) -> u64 {
        match self.entry_for_path(path) {
            // offset so synthetic ids never collide with real dev numbers of 0
            Some((idx, _)) => (idx as u64) | (1 << 63),
            None => dev,
        }
    }

    pub fn disk_name(&self, path: &Path) -> String {
        self.entry_for_path(path)
            .map(|(_, e)| e.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_rotational(&self, path: &Path) -> bool {
        self.entry_for_path(path)
            .map(|(_, e)| e.is_rotational)
            .unwrap_or(false)
    }
}

/// Read /sys/block/{device}/queue/rotational to distinguish HDD (1) vs SSD (0).
#[cfg(target_os = "linux")]
fn read_rotational_from_sys(name: &str) -> Option<bool> {
    let dev_name = name.strip_prefix("/dev/")?;
    // Strip partition: sda1 -> sda, nvme0n1p1 -> nvme0n1
    let base_dev = if dev_name.starts_with("nvme") {
        dev_name.split('p').next().unwrap_or(dev_name)
    } else {
        dev_name.trim_end_matches(char::is_numeric)
    };

    let sys_path = format!("/sys/block/{base_dev}/queue/rotational");
    let rotational = std::fs::read_to_string(&sys_path).ok()?;
    Some(rotational.trim() == "1")
}

#[cfg(not(target_os = "linux"))]
fn read_rotational_from_sys(_name: &str) -> Option<bool> {
    None
}
