//! Public result types for the dupeshred API.

use std::path::PathBuf;

/// One member of a duplicate set.
#[derive(Clone, Debug)]
pub struct DupeEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Chosen to keep; at least one per set.
    pub is_original: bool,
    /// Hardlink of another member; removing it frees nothing.
    pub is_hardlink: bool,
    pub is_symlink: bool,
}

/// A finalized set of byte-identical files.
#[derive(Clone, Debug)]
pub struct DupeSet {
    /// Hex digest of the class, when one was computed.
    pub checksum: Option<String>,
    pub files: Vec<DupeEntry>,
}

impl DupeSet {
    /// Members that are safe to remove.
    pub fn duplicates(&self) -> impl Iterator<Item = &DupeEntry> {
        self.files.iter().filter(|f| !f.is_original)
    }
}

/// End-of-session totals.
#[derive(Clone, Debug, Default)]
pub struct ShredSummary {
    pub dup_groups: u64,
    pub dup_files: u64,
    /// Bytes freed if every duplicate were removed (hardlinks excluded).
    pub reclaimable_bytes: u64,
    /// Bytes actually read and fed to digests.
    pub bytes_hashed: u64,
    /// Candidate bytes at the start of shredding.
    pub bytes_considered: u64,
    pub aborted: bool,
}
