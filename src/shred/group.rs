//! Equivalence-class nodes of the refinement tree.
//!
//! A group holds all files known to agree on their first `hash_offset`
//! bytes. Files arriving with a fresh digest sift into a child group one
//! generation deeper; a group stays alive while its parent lives or any of
//! its files has not yet re-homed into a child. The explicit reference
//! count drives those lifecycle decisions — `Arc` only keeps the memory.
//!
//! Lock discipline: a thread holding a group's state lock may lock a child
//! or a device queue, but never its parent; `unref` on the parent happens
//! only after this group's lock is released. The parent pointer sits in
//! its own leaf mutex so it can be read from anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::digest::{ChecksumKind, DigestKey, ShredDigest};
use super::file::{FileState, ShredFile};
use super::results::discard_file;
use super::session::ShredContext;
use crate::utils::config::ReadSizeConsts;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupStatus {
    /// Waiting for enough members to be worth hashing.
    Dormant,
    /// Promoted; held files are being released to the device queues.
    StartHashing,
    /// Actively hashing; new arrivals bypass the holding list.
    Hashing,
    /// Fully hashed (or externally checksummed); waiting for the parent to
    /// die so no more twins can arrive.
    Finishing,
    /// Output produced.
    Finished,
}

/// Mutable group state, guarded by the group lock.
pub struct GroupInner {
    pub status: GroupStatus,
    /// Prefix length members are currently extending to.
    pub next_offset: u64,
    /// Read-size multiplier for the next generation.
    pub offset_factor: u64,
    pub num_files: u64,
    pub num_ext_cksums: u64,
    pub has_pref: bool,
    pub has_npref: bool,
    pub has_new: bool,
    pub has_only_ext_cksums: bool,
    /// Prototype digest files pick up when they enter this class.
    pub digest: Option<Arc<ShredDigest>>,
    /// Files parked until the class is promoted (or forever, if FINISHING).
    pub held_files: Vec<Box<ShredFile>>,
    /// Digests of members still extending to `next_offset`; new sibling
    /// classes are announced to them as twin candidates.
    pub in_progress_digests: Vec<Arc<ShredDigest>>,
    pub children: HashMap<DigestKey, Arc<ShredGroup>>,
}

pub struct ShredGroup {
    /// Size shared by all contained files.
    pub file_size: u64,
    /// Prefix length at which this class was separated from its parent.
    pub hash_offset: u64,
    pub kind: ChecksumKind,

    parent: Mutex<Option<Arc<ShredGroup>>>,

    /// Reasons to stay alive: 1 while the parent lives, plus one per file
    /// not yet re-homed into a child. Mutated only under the group lock;
    /// atomic so the governor may read it racily for its estimate.
    pub(crate) ref_count: AtomicU64,
    /// Bytes on loan from the governor. Guarded by the governor lock.
    pub(crate) mem_allocation: AtomicU64,
    /// Whether the governor admitted this group. Guarded likewise.
    pub(crate) is_active: AtomicBool,

    inner: Mutex<GroupInner>,
}

fn new_inner(offset_factor: u64, digest: Option<Arc<ShredDigest>>, only_ext: bool) -> GroupInner {
    GroupInner {
        status: GroupStatus::Dormant,
        next_offset: 0,
        offset_factor,
        num_files: 0,
        num_ext_cksums: 0,
        has_pref: false,
        has_npref: false,
        has_new: false,
        has_only_ext_cksums: only_ext,
        digest,
        held_files: Vec::new(),
        in_progress_digests: Vec::new(),
        children: HashMap::new(),
    }
}

impl ShredGroup {
    /// A same-size root class. Roots have no digest yet and read one
    /// balanced increment in their first generation.
    pub fn new_root(file_size: u64, kind: ChecksumKind) -> Arc<Self> {
        Arc::new(ShredGroup {
            file_size,
            hash_offset: 0,
            kind,
            parent: Mutex::new(None),
            ref_count: AtomicU64::new(0),
            mem_allocation: AtomicU64::new(0),
            is_active: AtomicBool::new(false),
            inner: Mutex::new(new_inner(1, None, false)),
        })
    }

    /// A child class seeded from the first file to diverge into it. Takes
    /// the file's digest as the class prototype. Caller holds the parent's
    /// lock and passes its state in.
    pub fn new_child(
        file: &mut ShredFile,
        parent: &Arc<ShredGroup>,
        parent_inner: &GroupInner,
        ctx: &ShredContext,
    ) -> Arc<Self> {
        let digest = file.digest.take().expect("sifted file carries a digest");
        let factor = (parent_inner.offset_factor * ReadSizeConsts::FACTOR_GROWTH)
            .min(ReadSizeConsts::max_read_factor(ctx.page_size));
        Arc::new(ShredGroup {
            file_size: file.file_size,
            hash_offset: file.hash_offset,
            kind: parent.kind,
            parent: Mutex::new(Some(Arc::clone(parent))),
            // the live parent counts as one reason to stay alive
            ref_count: AtomicU64::new(1),
            mem_allocation: AtomicU64::new(0),
            is_active: AtomicBool::new(false),
            inner: Mutex::new(new_inner(
                factor,
                Some(digest),
                parent_inner.has_only_ext_cksums,
            )),
        })
    }

    pub fn lock_inner(&self) -> MutexGuard<'_, GroupInner> {
        self.inner.lock().unwrap()
    }

    pub fn parent(&self) -> Option<Arc<ShredGroup>> {
        self.parent.lock().unwrap().clone()
    }

    pub fn status(&self) -> GroupStatus {
        self.lock_inner().status
    }

    pub fn prototype_digest(&self) -> Option<Arc<ShredDigest>> {
        self.lock_inner().digest.clone()
    }

    pub fn ref_count_value(&self) -> u64 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Bytes currently on loan from the governor.
    pub fn mem_allocation_value(&self) -> u64 {
        self.mem_allocation.load(Ordering::Relaxed)
    }

    /// Place `file` in this class. `initial` marks the preprocessing build,
    /// which pushes queues unsorted and never interacts with the governor.
    ///
    /// Returns the file back when the pushing worker declared itself
    /// waiting and the class is already hashing — the worker may continue
    /// with this same file and skip a seek.
    pub fn push_file(
        self: &Arc<Self>,
        mut file: Box<ShredFile>,
        initial: bool,
        ctx: &Arc<ShredContext>,
    ) -> Option<Box<ShredFile>> {
        file.group = Some(Arc::clone(self));
        file.digest = None;
        assert_eq!(
            file.hash_offset, self.hash_offset,
            "file must join a class at its separation offset"
        );

        let mut inner = self.lock_inner();

        let (link_pref, link_npref) = file
            .hardlinks
            .as_ref()
            .map_or((false, false), |h| (h.has_prefd, h.has_non_prefd));
        inner.has_pref |= file.is_prefd || link_pref;
        inner.has_npref |= !file.is_prefd || link_npref;
        inner.has_new |= file.is_new_or_has_new;
        if file.has_ext_cksum {
            inner.num_ext_cksums += 1;
        }

        self.ref_count.fetch_add(1, Ordering::Relaxed);
        inner.num_files += file.member_count();

        let was_dormant = inner.status == GroupStatus::Dormant;
        self.update_status(&mut inner, ctx);

        if was_dormant && inner.status == GroupStatus::StartHashing {
            // Promotion: everything held goes to the device queues; future
            // arrivals bypass the holding list.
            for held in std::mem::take(&mut inner.held_files) {
                let device = held.device.clone().expect("held file has a device");
                if initial {
                    device.push(held);
                } else {
                    device.push_sorted(held);
                }
            }
            if self.kind == ChecksumKind::Paranoid {
                if !initial {
                    ctx.governor.admit(self, &mut inner, 1);
                }
            } else {
                inner.status = GroupStatus::Hashing;
            }
        }

        let mut result = None;
        match inner.status {
            GroupStatus::StartHashing | GroupStatus::Hashing => {
                if initial || !file.devlist_waiting {
                    let device = file.device.clone().expect("file has a device");
                    if initial {
                        device.push(file);
                    } else {
                        device.push_sorted(file);
                    }
                } else {
                    result = Some(file);
                }
            }
            GroupStatus::Dormant | GroupStatus::Finishing => inner.held_files.push(file),
            GroupStatus::Finished => unreachable!("push into finished group"),
        }
        result
    }

    /// Re-evaluate the promotion predicate. Caller holds the group lock.
    pub fn update_status(&self, inner: &mut GroupInner, ctx: &ShredContext) {
        if inner.status != GroupStatus::Dormant {
            return;
        }
        if inner.num_files >= 2
            && (inner.has_pref || !ctx.needs_pref())
            && (inner.has_npref || !ctx.needs_npref())
            && (inner.has_new || !ctx.needs_new())
        {
            if self.hash_offset < self.file_size && !inner.has_only_ext_cksums {
                inner.status = GroupStatus::StartHashing;
            } else {
                inner.status = GroupStatus::Finishing;
            }
        }
    }

    /// Compute the increment for `file`'s next read and refresh
    /// `next_offset`. Caller holds the group lock.
    ///
    /// The target grows geometrically with the generation, is rounded up
    /// to whole pages, absorbs the file tail when the remainder would be a
    /// near-empty read, and in paranoid mode is capped at the comparison
    /// buffer limit.
    pub fn next_read_size(
        &self,
        inner: &mut GroupInner,
        file: &mut ShredFile,
        ctx: &ShredContext,
    ) -> u64 {
        let balanced = ctx.page_size * ReadSizeConsts::BALANCED_PAGES;
        let target = balanced * inner.offset_factor;
        let pages = (target / ctx.page_size).max(1);
        let target = pages * ctx.page_size;

        if file.hash_offset == 0 {
            file.fadvise_requested = true;
        }
        if self.hash_offset + target + balanced >= self.file_size {
            inner.next_offset = self.file_size;
            file.fadvise_requested = true;
        } else {
            inner.next_offset = self.hash_offset + target;
        }
        if self.kind == ChecksumKind::Paranoid {
            inner.next_offset = inner
                .next_offset
                .min(self.hash_offset + ReadSizeConsts::PARANOID_MAX_INCREMENT);
        }

        file.state = FileState::Normal;
        inner.next_offset - file.hash_offset
    }

    /// Drop one reason for this group to stay alive and resolve what its
    /// death means: dormant groups are freed outright, finished classes
    /// with a dead parent go to the finalizer, and a drained hashing group
    /// orphans its children before freeing itself.
    pub fn unref(self: &Arc<Self>, ctx: &Arc<ShredContext>) {
        let mut needs_free = false;
        let mut unref_parent = false;
        let mut send_results = false;
        let mut orphans: Vec<Arc<ShredGroup>> = Vec::new();
        {
            let mut inner = self.lock_inner();
            let prev = self.ref_count.fetch_sub(1, Ordering::Relaxed);
            assert!(prev > 0, "unref of a dead group");
            let rc = prev - 1;
            if rc == 0 {
                ctx.governor.reclaim(self, &mut inner);
            }
            match inner.status {
                GroupStatus::Dormant => {
                    // never promoted; no more files can arrive
                    needs_free = true;
                    unref_parent = true;
                }
                GroupStatus::Finishing => {
                    debug_assert!(inner.children.is_empty());
                    if self.parent().is_none() {
                        send_results = true;
                    }
                }
                GroupStatus::StartHashing | GroupStatus::Hashing => {
                    if rc == 0 {
                        orphans.extend(inner.children.drain().map(|(_, c)| c));
                        unref_parent = true;
                        needs_free = true;
                    }
                }
                GroupStatus::Finished => unreachable!("unref of a finished group"),
            }
        }

        for child in orphans {
            child.make_orphan(ctx);
        }
        if unref_parent {
            let parent = self.parent.lock().unwrap().take();
            if let Some(parent) = parent {
                parent.unref(ctx);
            }
        }
        if send_results {
            ctx.send_to_finalizer(Arc::clone(self));
        } else if needs_free {
            self.dispose(ctx);
        }
    }

    /// The parent died: clear the back pointer and drop its liveness ref.
    pub fn make_orphan(self: &Arc<Self>, ctx: &Arc<ShredContext>) {
        self.parent.lock().unwrap().take();
        self.unref(ctx);
    }

    /// Release everything the group still owns: governor loan, prototype
    /// digest, and any files parked in the holding list.
    pub(crate) fn dispose(self: &Arc<Self>, ctx: &Arc<ShredContext>) {
        debug_assert!(self.parent().is_none(), "children outlive their parents");
        let held = {
            let mut inner = self.lock_inner();
            ctx.governor.reclaim(self, &mut inner);
            inner.digest = None;
            inner.in_progress_digests.clear();
            debug_assert!(inner.children.is_empty());
            std::mem::take(&mut inner.held_files)
        };
        for file in held {
            discard_file(file, ctx);
        }
    }
}
