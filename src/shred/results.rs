//! Result finalization: turning finished classes into reported duplicate
//! sets, and disposing of files whose class went nowhere.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::iface::report::ReportRecord;

use super::file::ShredFile;
use super::group::{GroupStatus, ShredGroup};
use super::session::ShredContext;

/// Group id used for unfinished-checksum records, which belong to no
/// duplicate set.
pub const UNFINISHED_GROUP_ID: u64 = u64::MAX;

/// Drop a file that will never be part of a duplicate set: deduct it from
/// its device's remaining work and, when configured, report the partial
/// checksum it accumulated so a later run can reuse it.
pub fn discard_file(mut file: Box<ShredFile>, ctx: &Arc<ShredContext>) {
    if let Some(device) = file.device.take() {
        device.adjust_counters(ctx, -1, -((file.file_size - file.hash_offset) as i64));

        // a lone file's partial checksum may still be worth caching
        let going_nowhere = file
            .group
            .as_ref()
            .is_some_and(|g| g.lock_inner().num_files <= 1);
        if ctx.cfg.write_unfinished
            && going_nowhere
            && let Some(group) = &file.group
        {
            let digest = file.digest.clone().or_else(|| group.prototype_digest());
            if let Some(digest) = digest {
                let hex = digest.hexdigest();
                ctx.reporter.write(&ReportRecord {
                    group_id: UNFINISHED_GROUP_ID,
                    path: file.path.clone(),
                    size: file.file_size,
                    checksum: Some(hex.clone()),
                    is_original: false,
                    is_bundled_hardlink: false,
                    is_symlink: file.is_symlink,
                    unfinished: true,
                });
                if ctx.cfg.write_cksum_to_sidecar && !file.has_ext_cksum {
                    ctx.sidecar.write_hash(&file.path, &hex);
                }
            }
        }
    }
    file.group = None;
    file.digest = None;
}

/// Ranking for original selection. A symlink is never the original while a
/// regular file exists; tagged status decides next when the configuration
/// cares; otherwise the supplied comparator ranks, with the pre-existing
/// original flag breaking ties.
fn cmp_orig_criteria(a: &ShredFile, b: &ShredFile, ctx: &ShredContext) -> Ordering {
    if a.is_symlink != b.is_symlink {
        return a.is_symlink.cmp(&b.is_symlink);
    }
    if a.is_prefd != b.is_prefd && (ctx.cfg.keep_all_untagged || ctx.cfg.must_match_untagged) {
        return a.is_prefd.cmp(&b.is_prefd);
    }
    match (ctx.cfg.rank_originals)(a, b) {
        Ordering::Equal => b.is_original.cmp(&a.is_original),
        other => other,
    }
}

/// Flatten hardlink clusters back into the member list and tag the
/// original(s) per the session's keep criteria.
pub fn find_originals(files: Vec<Box<ShredFile>>, ctx: &ShredContext) -> Vec<Box<ShredFile>> {
    let mut flat: Vec<Box<ShredFile>> = Vec::with_capacity(files.len());
    for mut file in files {
        file.is_original = false;
        if let Some(cluster) = file.hardlinks.take() {
            for mut link in cluster.files {
                link.is_original = false;
                link.is_bundled_hardlink = true;
                flat.push(link);
            }
        }
        flat.push(file);
    }

    for file in &mut flat {
        if (file.is_prefd && ctx.cfg.keep_all_tagged)
            || (!file.is_prefd && ctx.cfg.keep_all_untagged)
        {
            file.is_original = true;
        }
    }

    flat.sort_by(|a, b| cmp_orig_criteria(a, b, ctx));
    if !flat[0].is_original {
        flat[0].is_original = true;
    }
    flat
}

/// Finalize one finished class: unbundle, pick originals, update the
/// session totals and forward every member to the reporter (or the tree
/// merger when directory merging is on).
pub fn process_group(group: Arc<ShredGroup>, ctx: &Arc<ShredContext>, next_group_id: &mut u64) {
    let (held, checksum) = {
        let mut inner = group.lock_inner();
        let held = std::mem::take(&mut inner.held_files);
        let checksum = inner.digest.as_ref().map(|d| d.hexdigest());
        (held, checksum)
    };

    if held.is_empty() || ctx.was_aborted() {
        if ctx.was_aborted() {
            debug!("dropping finished group of {} files after abort", held.len());
        }
        group.lock_inner().status = GroupStatus::Finished;
        group.dispose(ctx);
        return;
    }

    let flat = find_originals(held, ctx);

    {
        let mut stats = ctx.stats.lock().unwrap();
        stats.dup_group_counter += 1;
        for file in &flat {
            if !file.is_original {
                stats.dup_counter += 1;
                // removing a hardlink frees no space
                if !file.is_bundled_hardlink {
                    stats.total_lint_size += file.file_size;
                }
            }
        }
    }

    let group_id = *next_group_id;
    *next_group_id += 1;

    for file in &flat {
        let rec = ReportRecord {
            group_id,
            path: file.path.clone(),
            size: file.file_size,
            checksum: checksum.clone(),
            is_original: file.is_original,
            is_bundled_hardlink: file.is_bundled_hardlink,
            is_symlink: file.is_symlink,
            unfinished: false,
        };
        match (&ctx.merger, ctx.cfg.merge_directories) {
            (Some(merger), true) => merger.feed(&rec),
            _ => ctx.reporter.write(&rec),
        }
        if ctx.cfg.write_cksum_to_sidecar
            && !file.has_ext_cksum
            && let Some(hex) = &checksum
        {
            ctx.sidecar.write_hash(&file.path, hex);
        }
    }

    // account the settled files before the records are dropped; unbundled
    // hardlinks were never counted into the device totals
    for file in flat {
        if !file.is_bundled_hardlink
            && let Some(device) = &file.device
        {
            device.adjust_counters(ctx, -1, -((file.file_size - file.hash_offset) as i64));
        }
    }

    group.lock_inner().status = GroupStatus::Finished;
    group.dispose(ctx);
}
