//! Per-file mutable state moved through the shredding machinery.
//!
//! A `ShredFile` is owned by exactly one place at a time: a device queue, a
//! group's holding list, or the worker currently hashing it. The hashed
//! prefix length only ever advances, and only under that single owner.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use super::device::ShredDevice;
use super::digest::ShredDigest;
use super::group::ShredGroup;

/// Processing state of a file record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Normal,
    /// The last read stopped at a physical extent boundary; the file goes
    /// back into the queue sorted by its new offset.
    Fragment,
    /// Unrecoverable per-file failure; the sifter discards it.
    Ignore,
}

/// Hardlinked siblings bundled under a cluster head. Only the head is
/// hashed; siblings rejoin the flat list when results are assembled.
#[derive(Default)]
pub struct HardlinkCluster {
    pub has_prefd: bool,
    pub has_non_prefd: bool,
    pub files: Vec<Box<ShredFile>>,
}

pub struct ShredFile {
    pub path: PathBuf,
    /// st_dev of the containing filesystem (not necessarily the whole disk).
    pub dev: u64,
    pub inode: u64,
    /// Index of the search root this file was found under.
    pub path_index: usize,
    pub file_size: u64,
    pub mtime: i64,

    pub is_prefd: bool,
    pub is_symlink: bool,
    pub is_on_subvol_fs: bool,
    pub is_new_or_has_new: bool,
    pub is_original: bool,
    /// True once this record was unbundled from a hardlink cluster; such
    /// duplicates free no space and are excluded from size totals.
    pub is_bundled_hardlink: bool,
    pub has_ext_cksum: bool,
    /// Checksum found in the sidecar cache, if any.
    pub ext_cksum: Option<String>,

    pub state: FileState,
    /// Set while the device worker blocks on this file's hash result.
    pub devlist_waiting: bool,
    /// Ask the hasher to readahead-hint the next increment.
    pub fadvise_requested: bool,

    /// Hashed prefix length H. Monotonic, advanced only by the owner.
    pub hash_offset: u64,
    /// Physical offset of the fragment containing `hash_offset` (0 when
    /// unknown); the read-order sort key.
    pub phys_offset: u64,

    pub digest: Option<Arc<ShredDigest>>,
    pub group: Option<Arc<ShredGroup>>,
    pub device: Option<Arc<ShredDevice>>,
    pub hardlinks: Option<HardlinkCluster>,
}

impl ShredFile {
    pub fn new(path: PathBuf, dev: u64, inode: u64, file_size: u64, mtime: i64) -> Self {
        ShredFile {
            path,
            dev,
            inode,
            path_index: 0,
            file_size,
            mtime,
            is_prefd: false,
            is_symlink: false,
            is_on_subvol_fs: false,
            is_new_or_has_new: false,
            is_original: false,
            is_bundled_hardlink: false,
            has_ext_cksum: false,
            ext_cksum: None,
            state: FileState::Normal,
            devlist_waiting: false,
            fadvise_requested: false,
            hash_offset: 0,
            phys_offset: 0,
            digest: None,
            group: None,
            device: None,
            hardlinks: None,
        }
    }

    /// Advance the hashed prefix. Caller must be the record's sole owner.
    pub fn advance(&mut self, bytes: u64) {
        let new = self.hash_offset + bytes;
        assert!(
            new <= self.file_size,
            "hash offset {} past end of {} byte file {}",
            new,
            self.file_size,
            self.path.display()
        );
        self.hash_offset = new;
    }

    /// Members of this record counting bundled hardlinks.
    pub fn member_count(&self) -> u64 {
        1 + self.hardlinks.as_ref().map_or(0, |h| h.files.len() as u64)
    }
}

/// Read-order comparison: device, then physical offset, then inode.
/// Subvolumes of one filesystem report distinct device numbers, so for two
/// files on subvolume filesystems under the same search root the device is
/// ignored.
pub fn cmp_read_order(a: &ShredFile, b: &ShredFile) -> Ordering {
    let phys = a.phys_offset.cmp(&b.phys_offset);
    let ino = a.inode.cmp(&b.inode);
    if a.is_on_subvol_fs && b.is_on_subvol_fs && a.path_index == b.path_index {
        phys.then(ino)
    } else {
        a.dev.cmp(&b.dev).then(phys).then(ino)
    }
}
