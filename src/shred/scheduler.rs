//! The driver: owns the device worker pool, the hasher service and the
//! finalizer thread, hands out per-pass quotas, and joins everything back
//! together — including after cancellation.

use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow};
use crossbeam_channel::unbounded;
use log::{debug, info};

use crate::hasher::Hasher;
use crate::iface::report::ProgressPhase;
use crate::mounts::MountTable;
use crate::utils::config::MemConsts;

use super::digest::ChecksumKind;
use super::file::ShredFile;
use super::preprocess::preprocess;
use super::results::process_group;
use super::session::ShredContext;
use super::worker::run_device_pass;

/// Run the whole shredding session over an already-discovered file table.
/// Returns once every device has drained (or the session was aborted) and
/// the finalizer has emitted all finished classes.
pub fn run(files: Vec<Box<ShredFile>>, ctx: &Arc<ShredContext>, mounts: &MountTable) -> Result<()> {
    ctx.reporter.set_phase(ProgressPhase::Preprocess);
    let devices = preprocess(files, ctx, mounts);

    // Split the memory budget: what the file table itself costs goes off
    // the top; paranoid mode banks the leftovers for comparison buffers,
    // streaming mode would rather have bigger read buffers.
    let files_remaining = ctx.stats.lock().unwrap().shred_files_remaining.max(0) as u64;
    let table_mem = MemConsts::AVERAGE_MEM_PER_FILE * files_remaining;
    let mut read_buffer_mem = ctx.cfg.read_buffer_mem;
    if ctx.cfg.checksum_kind == ChecksumKind::Paranoid {
        let budget = (ctx.cfg.paranoid_mem as i64)
            .max(ctx.cfg.total_mem as i64 - table_mem as i64 - read_buffer_mem as i64);
        ctx.governor.fund(budget);
        info!("paranoid comparison budget: {} bytes", budget);
    } else {
        // no comparison buffers to feed: leftovers go to the readers
        read_buffer_mem =
            read_buffer_mem.max((ctx.cfg.total_mem as i64 - table_mem as i64).max(0) as u64);
    }
    info!("read buffer budget: {} bytes", read_buffer_mem);

    let hasher = Hasher::new(ctx.cfg.threads, ctx.cfg.use_buffered_read, read_buffer_mem);

    let (results_tx, results_rx) = unbounded();
    ctx.install_results_tx(results_tx);
    let finalizer = {
        let ctx = Arc::clone(ctx);
        thread::spawn(move || {
            let mut next_group_id = 0u64;
            while let Ok(group) = results_rx.recv() {
                process_group(group, &ctx, &mut next_group_id);
            }
        })
    };

    let device_count = devices.len();
    info!("devices: {}", device_count);

    if device_count > 0 {
        let (work_tx, work_rx) = unbounded::<Arc<super::device::ShredDevice>>();
        let (return_tx, return_rx) = unbounded::<Arc<super::device::ShredDevice>>();

        let workers: Vec<_> = (0..device_count)
            .map(|_| {
                let work_rx = work_rx.clone();
                let return_tx = return_tx.clone();
                let ctx = Arc::clone(ctx);
                let hasher = Arc::clone(&hasher);
                thread::spawn(move || {
                    while let Ok(device) = work_rx.recv() {
                        run_device_pass(&device, &ctx, &hasher);
                        if return_tx.send(device).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        ctx.reporter.set_phase(ProgressPhase::Shredder);

        let mut devices_left = device_count as u64;
        for device in devices.values() {
            {
                let mut q = device.lock_queue();
                q.after_preprocess = true;
                q.bytes_per_pass = ctx.cfg.sweep_size / devices_left;
                q.files_per_pass = ctx.cfg.sweep_count / devices_left;
            }
            device.sort_queue();
            debug!("pushing device {} to the pool", device.disk_name);
            work_tx.send(Arc::clone(device)).expect("workers are alive");
        }
        drop(devices);

        // Joiner: recycle devices with work left, retire drained ones.
        while devices_left > 0 {
            let device = return_rx
                .recv()
                .map_err(|_| anyhow!("device workers died unexpectedly"))?;
            let remaining = device.remaining_files();
            debug!(
                "device {} returned with {} files remaining (active groups {}, mem avail {})",
                device.disk_name,
                remaining,
                ctx.governor.active_groups(),
                ctx.governor.available()
            );
            if remaining > 0 && !ctx.was_aborted() {
                let mut q = device.lock_queue();
                q.bytes_per_pass = ctx.cfg.sweep_size / devices_left;
                q.files_per_pass = ctx.cfg.sweep_count / devices_left;
                drop(q);
                work_tx.send(device).expect("workers are alive");
            } else {
                devices_left -= 1;
            }
        }

        drop(work_tx);
        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow!("device worker panicked"))?;
        }
    }

    hasher.shutdown();

    // Closing the channel lets the finalizer drain and exit.
    drop(ctx.take_results_tx());
    finalizer.join().map_err(|_| anyhow!("finalizer panicked"))?;

    Ok(())
}
