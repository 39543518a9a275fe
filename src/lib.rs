//! Dupeshred: progressive duplicate-file detection.
//!
//! Same-size files are partitioned into equivalence classes refined by
//! ever-longer prefix hashes; each physical disk is swept in offset order
//! by its own worker, and classes that survive to the end of their files
//! come out as duplicate sets. Byte-exact ("paranoid") comparison runs
//! under a memory governor instead of hashing.

pub mod engine;
pub mod hasher;
pub mod iface;
pub mod mounts;
pub mod shred;
pub mod types;
pub mod utils;
pub mod walk;

/// Re-export types for API
pub use types::*;

use std::sync::Arc;

use anyhow::Result;

use iface::offsets::OffsetOracle;
use iface::report::CollectReporter;
use iface::sidecar::NullSidecar;
use mounts::MountTable;
use shred::results::UNFINISHED_GROUP_ID;
use shred::{ShredConfig, ShredContext};
use walk::SearchRoot;

/// The platform's best offset oracle: FIEMAP on Linux, nothing elsewhere.
pub fn default_oracle() -> Box<dyn OffsetOracle> {
    #[cfg(target_os = "linux")]
    {
        Box::new(iface::offsets::FiemapOracle)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(iface::offsets::NullOracle)
    }
}

/// Discover candidates under `roots` and run the full session against an
/// existing context. Lower-level entry for callers that bring their own
/// collaborators (reporter, sidecar, oracle).
pub fn run_with_ctx(roots: &[SearchRoot], ctx: &Arc<ShredContext>) -> Result<ShredSummary> {
    let files = walk::discover(roots, &ctx.cfg)?;
    let mounts = if ctx.cfg.fake_pathindex_as_disk {
        MountTable::empty()
    } else {
        MountTable::probe()
    };
    shred::scheduler::run(files, ctx, &mounts)?;

    let stats = ctx.stats_snapshot();
    Ok(ShredSummary {
        dup_groups: stats.dup_group_counter,
        dup_files: stats.dup_counter,
        reclaimable_bytes: stats.total_lint_size,
        bytes_hashed: stats.bytes_hashed,
        bytes_considered: stats.bytes_after_preprocess.max(0) as u64,
        aborted: ctx.was_aborted(),
    })
}

/// Single entry point: scan `roots` with `cfg` and return the duplicate
/// sets plus session totals. Results are collected in memory; use
/// [`run_with_ctx`] with your own [`iface::Reporter`] to stream them.
pub fn find_dupes(roots: &[SearchRoot], cfg: &ShredConfig) -> Result<(Vec<DupeSet>, ShredSummary)> {
    let collector = Arc::new(CollectReporter::new());
    let ctx = ShredContext::new(
        cfg.clone(),
        default_oracle(),
        Box::new(NullSidecar),
        Box::new(Arc::clone(&collector)),
    );
    let summary = run_with_ctx(roots, &ctx)?;

    let sets = collector
        .take_groups()
        .into_iter()
        .filter(|recs| recs.first().is_none_or(|r| r.group_id != UNFINISHED_GROUP_ID))
        .map(|recs| DupeSet {
            checksum: recs.first().and_then(|r| r.checksum.clone()),
            files: recs
                .into_iter()
                .map(|r| DupeEntry {
                    path: r.path,
                    size: r.size,
                    is_original: r.is_original,
                    is_hardlink: r.is_bundled_hardlink,
                    is_symlink: r.is_symlink,
                })
                .collect(),
        })
        .collect();
    Ok((sets, summary))
}
