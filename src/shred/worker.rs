//! The per-device worker: sweeps the queue in read order, launches hash
//! increments, and decides when blocking on a result beats seeking to the
//! next file.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use crate::hasher::Hasher;
use crate::utils::config::{DeviceConsts, prematch_threshold, symlink_max_size};

use super::device::ShredDevice;
use super::digest::{ChecksumKind, ShredDigest};
use super::file::{FileState, ShredFile};
use super::session::ShredContext;
use super::sift::sift;

/// Give `file` a digest for its next increment, or report that it cannot
/// be processed yet (paranoid admission refused). Streaming files pick up
/// a copy of the class prototype; byte-exact files get a fresh buffer
/// sized to the increment and are registered for twin candidates when the
/// increment is large enough to be worth short-circuiting.
fn can_process(file: &mut ShredFile, ctx: &Arc<ShredContext>) -> bool {
    if file.digest.is_some() {
        return true;
    }
    let group = file.group.clone().expect("queued file belongs to a group");
    let mut inner = group.lock_inner();

    if inner.has_only_ext_cksums {
        match &file.ext_cksum {
            Some(hex) => {
                file.digest = Some(Arc::new(ShredDigest::new_ext(hex)));
                return true;
            }
            None => {
                warn!(
                    "no cached checksum for {} despite its class; hashing instead",
                    file.path.display()
                );
                file.has_ext_cksum = false;
                inner.has_only_ext_cksums = false;
            }
        }
    }

    match group.kind {
        ChecksumKind::Paranoid => {
            if !ctx.governor.admit(&group, &mut inner, 0) {
                return false;
            }
            if inner.next_offset <= group.hash_offset {
                let _ = group.next_read_size(&mut inner, file, ctx);
            }
            assert_eq!(group.hash_offset, file.hash_offset);

            let digest = if file.is_symlink && ctx.cfg.see_symlinks {
                Arc::new(ShredDigest::new_paranoid(
                    ctx.cfg.hash_seed,
                    symlink_max_size(),
                    ctx.shadow_hash(),
                ))
            } else {
                let digest = Arc::new(ShredDigest::new_paranoid(
                    ctx.cfg.hash_seed,
                    inner.next_offset - file.hash_offset,
                    ctx.shadow_hash(),
                ));
                if inner.next_offset > file.hash_offset + prematch_threshold(ctx.page_size) {
                    // large increment: wire up early twin matching
                    for child in inner.children.values() {
                        if let Some(proto) = child.prototype_digest() {
                            digest.add_twin_candidate(&proto);
                        }
                    }
                    inner.in_progress_digests.push(Arc::clone(&digest));
                }
                digest
            };
            file.digest = Some(digest);
        }
        ChecksumKind::Blake3 => {
            file.digest = Some(match &inner.digest {
                Some(proto) if !proto.is_external() => Arc::new(proto.fork()),
                _ => Arc::new(ShredDigest::new_stream(ctx.cfg.hash_seed)),
            });
        }
    }
    true
}

/// Completion callback handed to the hasher: runs on a hasher thread,
/// exactly once per increment.
fn on_increment_done(
    device: Arc<ShredDevice>,
    ctx: Arc<ShredContext>,
    mut file: Box<ShredFile>,
    bytes_read: u64,
    res: Result<()>,
) {
    if let Err(e) = res {
        warn!("hashing {} failed: {}", file.path.display(), e);
        file.state = FileState::Ignore;
    } else {
        ctx.stats.lock().unwrap().bytes_hashed += bytes_read;
        if device.is_rotational && ctx.cfg.build_fiemap && !file.is_symlink {
            let phys = ctx.oracle.physical_offset(&file.path, file.hash_offset);
            if phys > 0 {
                file.phys_offset = phys;
                device.note_seek_position(phys);
            }
        }
    }

    let group = file.group.clone().expect("hashed file belongs to a group");
    let expected = group.lock_inner().next_offset;
    if file.hash_offset != expected
        && file.state != FileState::Fragment
        && file.state != FileState::Ignore
    {
        // a protocol bug here risks reporting false duplicates
        panic!(
            "unexpected hash offset for {}: got {}, expected {}",
            file.path.display(),
            file.hash_offset,
            expected
        );
    }

    if file.state != FileState::Ignore
        && ctx.cfg.write_cksum_to_sidecar
        && !file.has_ext_cksum
        && file.hash_offset == file.file_size
        && let Some(digest) = &file.digest
    {
        ctx.sidecar.write_hash(&file.path, &digest.hexdigest());
    }

    if file.devlist_waiting {
        device.return_hashed(file);
    } else if file.state == FileState::Fragment {
        device.push_sorted(file);
    } else {
        sift(file, &ctx);
    }
}

/// Hash the next increment of `file`. Returns the file when the worker
/// should keep handling it (it blocked for the result, or the hasher
/// could not start); `None` once the completion callback owns it.
fn process_file(
    device: &Arc<ShredDevice>,
    ctx: &Arc<ShredContext>,
    hasher: &Hasher,
    mut file: Box<ShredFile>,
) -> Option<Box<ShredFile>> {
    let group = file.group.clone().expect("queued file belongs to a group");

    if group.lock_inner().has_only_ext_cksums {
        // checksum came from the sidecar; settle the whole file unread so
        // the remaining-bytes deduction happens exactly once
        let remaining = file.file_size - file.hash_offset;
        device.adjust_counters(ctx, 0, -(remaining as i64));
        file.advance(remaining);
        return Some(file);
    }

    let (mut bytes_to_read, mut worth_waiting) = {
        let mut inner = group.lock_inner();
        let bytes = group.next_read_size(&mut inner, &mut file, ctx);
        let wait = inner.next_offset != file.file_size
            && (ctx.cfg.always_wait
                || (device.is_rotational
                    && bytes < DeviceConsts::TOO_MANY_BYTES_TO_WAIT
                    && file.state == FileState::Normal
                    && !ctx.cfg.never_wait));
        (bytes, wait)
    };

    // clamp the read at a physical extent boundary so the device head does
    // not jump mid-increment; the file comes back sorted by its new offset
    if ctx.cfg.build_fiemap
        && device.is_rotational
        && !file.is_symlink
        && let Some(extent_end) = ctx.oracle.extent_end(&file.path, file.hash_offset)
        && extent_end > file.hash_offset
        && extent_end < file.hash_offset + bytes_to_read
    {
        bytes_to_read = extent_end - file.hash_offset;
        file.state = FileState::Fragment;
        worth_waiting = false;
    }

    let task = match hasher.start_increment(
        &file.path,
        file.hash_offset,
        bytes_to_read,
        file.is_symlink,
        file.fadvise_requested,
    ) {
        Ok(task) => task,
        Err(e) => {
            warn!("cannot read {}: {}", file.path.display(), e);
            file.state = FileState::Ignore;
            return Some(file);
        }
    };
    file.fadvise_requested = false;
    file.advance(bytes_to_read);

    if file.is_symlink {
        device.adjust_counters(ctx, 0, -(file.file_size as i64));
    } else {
        device.adjust_counters(ctx, 0, -(bytes_to_read as i64));
    }

    if worth_waiting {
        // last check: only wait when a candidate to match against exists
        let inner = group.lock_inner();
        worth_waiting = !inner.children.is_empty();
        if worth_waiting
            && group.kind == ChecksumKind::Paranoid
            && let Some(digest) = &file.digest
        {
            worth_waiting = digest.has_twin_candidate();
        }
    }
    file.devlist_waiting = worth_waiting;

    let digest = Arc::clone(file.digest.as_ref().expect("processed file has a digest"));
    let cb_device = Arc::clone(device);
    let cb_ctx = Arc::clone(ctx);
    hasher.finish_increment(
        task,
        file,
        digest,
        Box::new(move |file, bytes_read, res| {
            on_increment_done(cb_device, cb_ctx, file, bytes_read, res)
        }),
    );

    if worth_waiting {
        Some(device.wait_hashed())
    } else {
        None
    }
}

/// Find the queue index nearest to `pos`, scanning forward from `cursor`
/// and restarting from the head when the head position jumped backwards.
fn seek_index(files: &VecDeque<Box<ShredFile>>, cursor: usize, pos: u64) -> usize {
    let mut i = match files.get(cursor) {
        Some(f) if f.phys_offset > pos => 0,
        _ => cursor,
    };
    while i + 1 < files.len() && files[i].phys_offset < pos {
        i += 1;
    }
    i
}

fn insert_sorted(files: &mut VecDeque<Box<ShredFile>>, file: Box<ShredFile>) {
    let idx = files.partition_point(|f| {
        super::file::cmp_read_order(f, &file) == std::cmp::Ordering::Less
    });
    files.insert(idx, file);
}

/// One pass over a device's queue, bounded by the per-pass byte and file
/// budgets. Exits when the budget is spent, the queue stays empty, or the
/// session was aborted; the driver decides whether to schedule another
/// pass.
pub fn run_device_pass(device: &Arc<ShredDevice>, ctx: &Arc<ShredContext>, hasher: &Hasher) {
    let (bytes_per_pass, files_per_pass) = {
        let mut q = device.lock_queue();
        q.bytes_read_this_pass = 0;
        q.files_read_this_pass = 0;
        q.new_seek_position = 0;
        debug!(
            "device {} pass started with {} queued, {} remaining",
            device.disk_name,
            q.files.len(),
            q.remaining_files
        );
        if q.files.is_empty() && q.remaining_files > 0 {
            // other devices may release held files to us shortly
            q = device.wait_for_work(q);
        }
        (q.bytes_per_pass, q.files_per_pass)
    };

    let mut cursor = 0usize;
    loop {
        if ctx.was_aborted() {
            break;
        }

        let file = {
            let mut q = device.lock_queue();
            if q.bytes_read_this_pass > bytes_per_pass || q.files_read_this_pass > files_per_pass
            {
                break;
            }
            if q.new_seek_position > 0 {
                let pos = q.new_seek_position;
                q.new_seek_position = 0;
                cursor = seek_index(&q.files, cursor, pos);
            }
            if cursor >= q.files.len() {
                break;
            }
            q.files.remove(cursor).unwrap()
        };

        let mut file = file;
        if !can_process(&mut file, ctx) {
            // admission refused; leave it queued for a later pass
            let mut q = device.lock_queue();
            insert_sorted(&mut q.files, file);
            cursor += 1;
            continue;
        }

        let mut current = Some(file);
        while let Some(f) = current.take() {
            let start_offset = f.hash_offset;
            let Some(mut f) = process_file(device, ctx, hasher, f) else {
                break; // completion callback owns the file now
            };
            if f.hash_offset == start_offset && !f.has_ext_cksum {
                debug!("hash offset stuck at {} for {}", start_offset, f.path.display());
                f.state = FileState::Ignore;
            }
            if f.state == FileState::Fragment {
                device.push_sorted(f);
            } else if let Some(mut f) = sift(f, ctx) {
                // same file continues into the next generation
                if can_process(&mut f, ctx) {
                    current = Some(f);
                } else {
                    let mut q = device.lock_queue();
                    insert_sorted(&mut q.files, f);
                }
            }
        }
    }

    debug!("device {} pass done", device.disk_name);
}
