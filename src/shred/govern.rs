//! Admission control for paranoid-mode comparison buffers.
//!
//! Byte-exact comparison holds whole increments in memory, one buffer per
//! in-flight file. The governor caps how many groups may hash at once by
//! lending each group an estimated allocation from a global budget; groups
//! inherit what their parent no longer needs, and everything returns to the
//! pool when a group dies. Callers are never blocked: admission either
//! succeeds now or the file simply stays queued for a later pass.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use log::debug;

use crate::utils::config::ReadSizeConsts;

use super::group::{GroupInner, GroupStatus, ShredGroup};

struct GovernState {
    /// Remaining global byte budget for paranoid buffers.
    avail: i64,
    /// Groups currently holding an allocation.
    active_groups: i64,
    /// Deduplicates refusal log lines.
    refusing: bool,
}

pub struct MemGovernor {
    state: Mutex<GovernState>,
}

impl MemGovernor {
    pub fn new() -> Self {
        MemGovernor {
            state: Mutex::new(GovernState {
                avail: 0,
                active_groups: 0,
                refusing: false,
            }),
        }
    }

    /// Set the global budget once the session knows how much memory the
    /// file table itself needs.
    pub fn fund(&self, budget: i64) {
        self.state.lock().unwrap().avail = budget;
    }

    pub fn available(&self) -> i64 {
        self.state.lock().unwrap().avail
    }

    pub fn active_groups(&self) -> i64 {
        self.state.lock().unwrap().active_groups
    }

    /// Worst-case member count for `group`: its own pending references plus
    /// every ancestor's, minus the parent-alive ref double counted at each
    /// hop. Reads are racy by design; the estimate only steers admission.
    fn potential_file_count(group: &Arc<ShredGroup>) -> u64 {
        let mut total = group.ref_count.load(Ordering::Relaxed);
        let mut cursor = group.parent();
        while let Some(p) = cursor {
            total += p.ref_count.load(Ordering::Relaxed).saturating_sub(1);
            cursor = p.parent();
        }
        total
    }

    /// Try to admit `group` for hashing. Must be called with the group's
    /// state lock held (`inner`); the governor lock is always taken after
    /// it. Idempotent once the group reached `Hashing`.
    ///
    /// Admission succeeds when the budget (plus whatever can be inherited
    /// from the parent's allocation) covers the estimate, or when fewer
    /// than `active_group_threshold` groups are active — the latter
    /// guarantees progress even on a budget too small for one group.
    pub fn admit(
        &self,
        group: &Arc<ShredGroup>,
        inner: &mut GroupInner,
        active_group_threshold: i64,
    ) -> bool {
        if inner.status >= GroupStatus::Hashing {
            return true;
        }

        let per_file = (group.file_size - group.hash_offset)
            .min(ReadSizeConsts::PARANOID_MAX_INCREMENT);
        let mem_required = (Self::potential_file_count(group) / 2 + 1) * per_file;
        let mem_required = mem_required as i64;

        let parent = group.parent();
        let mut state = self.state.lock().unwrap();

        let inherited_avail = parent
            .as_ref()
            .map_or(0, |p| p.mem_allocation.load(Ordering::Relaxed) as i64);

        if mem_required <= state.avail + inherited_avail
            || state.active_groups <= active_group_threshold
        {
            // Take only what we need from the parent, the rest from the bank.
            let inherited = inherited_avail.min(mem_required);
            if inherited > 0 {
                let p = parent.as_ref().unwrap();
                p.mem_allocation
                    .fetch_sub(inherited as u64, Ordering::Relaxed);
                group
                    .mem_allocation
                    .fetch_add(inherited as u64, Ordering::Relaxed);
            }
            let borrowed = (mem_required - inherited).min(state.avail.max(0));
            state.avail -= borrowed;
            group
                .mem_allocation
                .fetch_add(borrowed as u64, Ordering::Relaxed);

            state.active_groups += 1;
            state.refusing = false;
            group.is_active.store(true, Ordering::Relaxed);
            inner.status = GroupStatus::Hashing;
            debug!(
                "mem avail {}, active groups {}: borrowed {} and inherited {} bytes",
                state.avail, state.active_groups, borrowed, inherited
            );
            true
        } else {
            if !state.refusing {
                debug!(
                    "mem avail {}, active groups {}: refused request for {} bytes",
                    state.avail, state.active_groups, mem_required
                );
                state.refusing = true;
            }
            false
        }
    }

    /// Return a dead or finished group's allocation to the pool and drop
    /// its prototype buffer. Called with the group's state lock held.
    pub fn reclaim(&self, group: &ShredGroup, inner: &mut GroupInner) {
        if !group.is_active.swap(false, Ordering::Relaxed) {
            return;
        }
        let returned = group.mem_allocation.swap(0, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.avail += returned as i64;
        state.active_groups -= 1;
        state.refusing = false;
        debug!(
            "mem avail {}, active groups {}: returned {} bytes",
            state.avail, state.active_groups, returned
        );
        inner.digest = None;
    }
}

impl Default for MemGovernor {
    fn default() -> Self {
        Self::new()
    }
}
