//! Per-device work queues.
//!
//! Every physical disk gets one queue and one worker thread. Files are kept
//! in read order (device, physical offset, inode) so rotational devices see
//! mostly-sequential access; counters track how much work remains and how
//! much of the current pass budget is spent.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;

use crate::iface::report::{ProgressDelta, ProgressPhase};
use crate::utils::config::DeviceConsts;

use super::file::{ShredFile, cmp_read_order};
use super::session::ShredContext;

/// Mutable queue state, all guarded by the device lock.
pub struct DeviceQueue {
    pub files: VecDeque<Box<ShredFile>>,

    /// Files/bytes not yet fully hashed or discarded on this device.
    /// Written by any thread that moves work, hence behind the lock.
    pub remaining_files: i64,
    pub remaining_bytes: i64,

    pub bytes_read_this_pass: u64,
    pub files_read_this_pass: u64,
    pub bytes_per_pass: u64,
    pub files_per_pass: u64,

    /// Physical position a read ended at; lets the worker jump the queue
    /// cursor to the nearest file instead of seeking backwards.
    pub new_seek_position: u64,

    /// Set once shredding proper starts, to report the right phase.
    pub after_preprocess: bool,

    // Counter deltas batched locally to keep reporter traffic low.
    cache_file_count: i64,
    cache_filtered_count: i64,
    cache_byte_count: i64,
}

pub struct ShredDevice {
    pub disk: u64,
    pub disk_name: String,
    pub is_rotational: bool,

    queue: Mutex<DeviceQueue>,
    change: Condvar,

    /// Completion channel for increments the worker chose to wait on.
    hashed_return_tx: Sender<Box<ShredFile>>,
    hashed_return_rx: Receiver<Box<ShredFile>>,
}

impl ShredDevice {
    pub fn new(disk: u64, disk_name: String, is_rotational: bool) -> Self {
        let (hashed_return_tx, hashed_return_rx) = unbounded();
        ShredDevice {
            disk,
            disk_name,
            is_rotational,
            queue: Mutex::new(DeviceQueue {
                files: VecDeque::new(),
                remaining_files: 0,
                remaining_bytes: 0,
                bytes_read_this_pass: 0,
                files_read_this_pass: 0,
                bytes_per_pass: 0,
                files_per_pass: 0,
                new_seek_position: 0,
                after_preprocess: false,
                cache_file_count: 0,
                cache_filtered_count: 0,
                cache_byte_count: 0,
            }),
            change: Condvar::new(),
            hashed_return_tx,
            hashed_return_rx,
        }
    }

    pub fn lock_queue(&self) -> MutexGuard<'_, DeviceQueue> {
        self.queue.lock().unwrap()
    }

    /// Push to the queue head without sorting. Used for the initial list
    /// build, where sorting every insert would only slow things down.
    pub fn push(&self, file: Box<ShredFile>) {
        let mut q = self.lock_queue();
        q.files.push_front(file);
        self.change.notify_all();
    }

    /// Insert in read order. Used for re-inserts during shredding so the
    /// worker's sweep stays mostly sequential.
    pub fn push_sorted(&self, file: Box<ShredFile>) {
        let mut q = self.lock_queue();
        let idx = q
            .files
            .partition_point(|f| cmp_read_order(f, &file) == std::cmp::Ordering::Less);
        q.files.insert(idx, file);
        self.change.notify_all();
    }

    pub fn sort_queue(&self) {
        let mut q = self.lock_queue();
        let mut v: Vec<_> = q.files.drain(..).collect();
        v.sort_by(|a, b| cmp_read_order(a, b));
        q.files = v.into();
    }

    /// Bounded wait for work when the queue is empty but files remain
    /// (another device's worker may release held files to us).
    pub fn wait_for_work<'a>(&self, q: MutexGuard<'a, DeviceQueue>) -> MutexGuard<'a, DeviceQueue> {
        let (q, _timeout) = self
            .change
            .wait_timeout(q, DeviceConsts::EMPTY_QUEUE_WAIT)
            .unwrap();
        q
    }

    /// Record where the last read ended so the worker can pick the next
    /// file with the least seek.
    pub fn note_seek_position(&self, pos: u64) {
        if pos > 0 {
            self.lock_queue().new_seek_position = pos;
        }
    }

    /// Hand a finished increment back to a worker blocked on this device.
    pub fn return_hashed(&self, file: Box<ShredFile>) {
        // Receiver lives as long as the device; send cannot fail.
        self.hashed_return_tx.send(file).unwrap();
    }

    pub fn wait_hashed(&self) -> Box<ShredFile> {
        self.hashed_return_rx.recv().unwrap()
    }

    /// Update remaining-work counters. Deltas are cached locally and
    /// flushed to the session in batches, or immediately when the device
    /// runs dry.
    pub fn adjust_counters(&self, ctx: &ShredContext, files: i64, bytes: i64) {
        let mut q = self.lock_queue();
        q.remaining_files += files;
        q.cache_file_count += files;
        q.remaining_bytes += bytes;
        q.cache_byte_count += bytes;
        if bytes < 0 {
            q.bytes_read_this_pass += (-bytes) as u64;
        }
        if files < 0 {
            q.files_read_this_pass += 1;
            q.cache_filtered_count += files;
        }

        if q.cache_file_count.abs() >= DeviceConsts::COUNTER_BATCH
            || q.remaining_bytes == 0
            || q.remaining_files == 0
        {
            self.flush_counters_locked(ctx, &mut q);
        }
    }

    /// Flush any batched counter deltas to the session and reporter.
    pub fn flush_counters(&self, ctx: &ShredContext) {
        let mut q = self.lock_queue();
        self.flush_counters_locked(ctx, &mut q);
    }

    fn flush_counters_locked(&self, ctx: &ShredContext, q: &mut DeviceQueue) {
        if q.cache_file_count == 0 && q.cache_filtered_count == 0 && q.cache_byte_count == 0 {
            return;
        }
        {
            let mut stats = ctx.stats.lock().unwrap();
            stats.shred_files_remaining += q.cache_file_count;
            stats.total_filtered_files -= q.cache_filtered_count;
            stats.shred_bytes_remaining += q.cache_byte_count;
        }
        ctx.reporter.progress(ProgressDelta {
            files_remaining: q.cache_file_count,
            bytes_remaining: q.cache_byte_count,
            files_filtered: -q.cache_filtered_count,
        });
        ctx.reporter.set_phase(if q.after_preprocess {
            ProgressPhase::Shredder
        } else {
            ProgressPhase::Preprocess
        });
        q.cache_file_count = 0;
        q.cache_filtered_count = 0;
        q.cache_byte_count = 0;
    }

    pub fn remaining_files(&self) -> i64 {
        self.lock_queue().remaining_files
    }
}

impl Drop for ShredDevice {
    fn drop(&mut self) {
        let q = self.queue.get_mut().unwrap();
        if !q.files.is_empty() {
            debug!(
                "device {} dropped with {} files still queued",
                self.disk_name,
                q.files.len()
            );
        }
    }
}
