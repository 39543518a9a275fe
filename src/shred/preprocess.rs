//! Seeding: turn the discovered file table into same-size root classes and
//! populated device queues.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::mounts::MountTable;

use super::device::ShredDevice;
use super::group::{GroupStatus, ShredGroup};
use super::file::ShredFile;
use super::session::ShredContext;

/// Build the per-disk queues and same-size root groups from files already
/// bundled by hardlink identity. Zero-size files are dropped here; root
/// classes that cannot promote (singletons, missing tagged members) are
/// pruned before any hashing starts; rotational queues get their physical
/// offsets probed so the first pass already runs in platter order.
pub fn preprocess(
    files: Vec<Box<ShredFile>>,
    ctx: &Arc<ShredContext>,
    mounts: &MountTable,
) -> HashMap<u64, Arc<ShredDevice>> {
    let mut devices: HashMap<u64, Arc<ShredDevice>> = HashMap::new();
    let mut size_groups: HashMap<u64, Arc<ShredGroup>> = HashMap::new();

    debug!("moving {} files into size classes", files.len());
    for mut file in files {
        if file.file_size == 0 {
            debug!("skipping empty file {}", file.path.display());
            continue;
        }

        file.is_new_or_has_new = file.mtime >= ctx.cfg.min_mtime;
        if let Some(cluster) = &file.hardlinks {
            file.is_new_or_has_new |= cluster.files.iter().any(|l| l.mtime >= ctx.cfg.min_mtime);
        }

        let disk = if ctx.cfg.fake_pathindex_as_disk {
            file.path_index as u64
        } else {
            mounts.disk_id(file.dev, &file.path)
        };
        let device = devices
            .entry(disk)
            .or_insert_with(|| {
                let rotational =
                    ctx.cfg.fake_pathindex_as_disk || mounts.is_rotational(&file.path);
                debug!(
                    "new device queue for disk {} ({}), rotational={}",
                    disk,
                    mounts.disk_name(&file.path),
                    rotational
                );
                Arc::new(ShredDevice::new(disk, mounts.disk_name(&file.path), rotational))
            })
            .clone();
        file.device = Some(Arc::clone(&device));
        device.adjust_counters(ctx, 1, file.file_size as i64);

        if ctx.cfg.read_cksum_from_sidecar
            && let Some(hex) = ctx.sidecar.read_hash(&file.path)
        {
            file.ext_cksum = Some(hex);
            file.has_ext_cksum = true;
        }

        let group = size_groups
            .entry(file.file_size)
            .or_insert_with(|| ShredGroup::new_root(file.file_size, ctx.cfg.checksum_kind))
            .clone();
        let _back = group.push_file(file, true, ctx);
        debug_assert!(_back.is_none(), "initial pushes never return the file");
    }

    // A class whose every member has a cached checksum needs no reads.
    if ctx.cfg.read_cksum_from_sidecar {
        for group in size_groups.values() {
            let mut inner = group.lock_inner();
            if inner.num_files > 0 && inner.num_files == inner.num_ext_cksums {
                inner.has_only_ext_cksums = true;
            }
        }
    }

    // Classes that never promoted are going nowhere.
    let before = size_groups.len();
    size_groups.retain(|_, group| {
        if group.status() == GroupStatus::Dormant {
            group.dispose(ctx);
            false
        } else {
            true
        }
    });
    debug!(
        "discarded {} of {} size classes before hashing",
        before - size_groups.len(),
        before
    );

    // Queues were built head-first; order them for the first sweep and
    // learn where their data physically sits.
    for device in devices.values() {
        device.sort_queue();
        if device.is_rotational && ctx.cfg.build_fiemap {
            let mut q = device.lock_queue();
            let mut probed = 0u64;
            let mut found = 0u64;
            for file in q.files.iter_mut() {
                file.phys_offset = ctx.oracle.physical_offset(&file.path, 0);
                probed += 1;
                if file.phys_offset > 0 {
                    found += 1;
                }
            }
            let mut stats = ctx.stats.lock().unwrap();
            stats.offsets_read += probed;
            stats.offset_fragments += found;
            stats.offset_fails += probed - found;
        }
        device.flush_counters(ctx);
    }
    {
        let mut stats = ctx.stats.lock().unwrap();
        stats.bytes_after_preprocess = stats.shred_bytes_remaining;
    }

    devices.retain(|_, device| device.remaining_files() > 0);
    devices
}
