//! Physical offset probing.
//!
//! Rotational scheduling wants to know where file data actually sits on
//! the platter. On Linux the FIEMAP ioctl maps a logical offset to the
//! extent containing it; everywhere else (and on any failure) the oracle
//! answers "unknown" and read ordering degrades to inode order.

use std::path::Path;

pub trait OffsetOracle: Send + Sync {
    /// Physical byte position of `logical` within `path`, 0 when unknown.
    fn physical_offset(&self, path: &Path, logical: u64) -> u64;

    /// Logical end of the extent containing `logical`, when known. Reads
    /// crossing this boundary seek mid-increment.
    fn extent_end(&self, path: &Path, logical: u64) -> Option<u64>;
}

/// Oracle that never knows anything. Used off-Linux and when FIEMAP
/// probing is disabled.
pub struct NullOracle;

impl OffsetOracle for NullOracle {
    fn physical_offset(&self, _path: &Path, _logical: u64) -> u64 {
        0
    }

    fn extent_end(&self, _path: &Path, _logical: u64) -> Option<u64> {
        None
    }
}

#[cfg(target_os = "linux")]
pub use fiemap::FiemapOracle;

#[cfg(target_os = "linux")]
mod fiemap {
    use super::OffsetOracle;
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    const FS_IOC_FIEMAP: libc::c_ulong = 0xC020660B;
    const FIEMAP_FLAG_SYNC: u32 = 0x0001;

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    struct FiemapExtent {
        fe_logical: u64,
        fe_physical: u64,
        fe_length: u64,
        fe_reserved64: [u64; 2],
        fe_flags: u32,
        fe_reserved: [u32; 3],
    }

    #[repr(C)]
    struct FiemapRequest {
        fm_start: u64,
        fm_length: u64,
        fm_flags: u32,
        fm_mapped_extents: u32,
        fm_extent_count: u32,
        fm_reserved: u32,
        fm_extents: [FiemapExtent; 1],
    }

    /// FIEMAP-backed oracle. Each query maps a single extent; results are
    /// not cached because the scheduler probes each position once.
    pub struct FiemapOracle;

    fn query_extent(path: &Path, logical: u64) -> Option<FiemapExtent> {
        let file = File::open(path).ok()?;
        let mut req = FiemapRequest {
            fm_start: logical,
            fm_length: u64::MAX - logical,
            fm_flags: FIEMAP_FLAG_SYNC,
            fm_mapped_extents: 0,
            fm_extent_count: 1,
            fm_reserved: 0,
            fm_extents: [FiemapExtent::default()],
        };
        // SAFETY: req is a properly sized FIEMAP request with room for one
        // extent; the fd is open for the duration of the call.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_FIEMAP,
                &mut req as *mut FiemapRequest,
            )
        };
        if rc != 0 || req.fm_mapped_extents == 0 {
            return None;
        }
        Some(req.fm_extents[0])
    }

    impl OffsetOracle for FiemapOracle {
        fn physical_offset(&self, path: &Path, logical: u64) -> u64 {
            match query_extent(path, logical) {
                Some(ext) if ext.fe_logical <= logical => {
                    ext.fe_physical + (logical - ext.fe_logical)
                }
                _ => 0,
            }
        }

        fn extent_end(&self, path: &Path, logical: u64) -> Option<u64> {
            let ext = query_extent(path, logical)?;
            if ext.fe_logical > logical {
                return None;
            }
            Some(ext.fe_logical + ext.fe_length)
        }
    }
}
