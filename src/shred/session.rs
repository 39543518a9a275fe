//! Session-wide configuration, context and counters.
//!
//! Everything the shredding machinery shares — config, governor, abort
//! flag, collaborator handles, statistics — travels in one `ShredContext`
//! value passed explicitly; there are no ambient globals.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::iface::offsets::{NullOracle, OffsetOracle};
use crate::iface::report::Reporter;
use crate::iface::report::TreeMerger;
use crate::iface::sidecar::{NullSidecar, SidecarStore};
use crate::utils::config::{MemConsts, SweepConsts, page_size};

use super::digest::ChecksumKind;
use super::file::ShredFile;
use super::govern::MemGovernor;
use super::group::ShredGroup;

/// Ranking function used to pick originals inside a duplicate set. Smaller
/// is better; ties fall back to the existing original flag.
pub type RankOriginals = Arc<dyn Fn(&ShredFile, &ShredFile) -> Ordering + Send + Sync>;

/// Default ranking: earlier search root, then older mtime, then path.
pub fn default_rank() -> RankOriginals {
    Arc::new(|a, b| {
        a.path_index
            .cmp(&b.path_index)
            .then(a.mtime.cmp(&b.mtime))
            .then_with(|| a.path.cmp(&b.path))
    })
}

#[derive(Clone)]
pub struct ShredConfig {
    pub checksum_kind: ChecksumKind,

    /// Files modified at or after this epoch second count as "new".
    /// 0 disables the requirement.
    pub min_mtime: i64,
    pub must_match_tagged: bool,
    pub must_match_untagged: bool,
    pub keep_all_tagged: bool,
    pub keep_all_untagged: bool,

    /// Route finished records to the tree merger instead of the reporter.
    pub merge_directories: bool,
    pub read_cksum_from_sidecar: bool,
    pub write_cksum_to_sidecar: bool,
    /// Also report/cache lone files whose class went nowhere.
    pub write_unfinished: bool,

    pub paranoid_mem: u64,
    pub total_mem: u64,
    pub read_buffer_mem: u64,

    /// Per-pass budgets, split across devices each round.
    pub sweep_size: u64,
    pub sweep_count: u64,

    /// Hasher worker threads.
    pub threads: usize,
    pub use_buffered_read: bool,

    pub always_wait: bool,
    pub never_wait: bool,

    /// Probe physical offsets on rotational devices.
    pub build_fiemap: bool,
    /// Treat each search root as its own disk (testing and odd setups).
    pub fake_pathindex_as_disk: bool,
    /// Hash symlink targets instead of skipping links.
    pub see_symlinks: bool,

    pub hash_seed: u64,
    pub rank_originals: RankOriginals,
}

impl Default for ShredConfig {
    fn default() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        ShredConfig {
            checksum_kind: ChecksumKind::Blake3,
            min_mtime: 0,
            must_match_tagged: false,
            must_match_untagged: false,
            keep_all_tagged: false,
            keep_all_untagged: false,
            merge_directories: false,
            read_cksum_from_sidecar: false,
            write_cksum_to_sidecar: false,
            write_unfinished: false,
            paranoid_mem: MemConsts::DEFAULT_PARANOID_MEM,
            total_mem: sys.total_memory() / MemConsts::TOTAL_MEM_DIVISOR,
            read_buffer_mem: MemConsts::DEFAULT_READ_BUFFER_MEM,
            sweep_size: SweepConsts::DEFAULT_SWEEP_SIZE,
            sweep_count: SweepConsts::DEFAULT_SWEEP_COUNT,
            threads: rayon::current_num_threads(),
            use_buffered_read: false,
            always_wait: false,
            never_wait: false,
            build_fiemap: true,
            fake_pathindex_as_disk: false,
            see_symlinks: false,
            hash_seed: 0,
            rank_originals: default_rank(),
        }
    }
}

/// Aggregate counters, updated in batches from the device queues and by
/// the finalizer.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub dup_counter: u64,
    pub dup_group_counter: u64,
    /// Reclaimable bytes: duplicates excluding bundled hardlinks.
    pub total_lint_size: u64,
    pub shred_files_remaining: i64,
    pub shred_bytes_remaining: i64,
    pub bytes_after_preprocess: i64,
    pub total_filtered_files: i64,
    /// Bytes actually fed to digests.
    pub bytes_hashed: u64,
    pub offsets_read: u64,
    pub offset_fragments: u64,
    pub offset_fails: u64,
}

/// Shared session context.
pub struct ShredContext {
    pub cfg: ShredConfig,
    pub governor: MemGovernor,
    pub oracle: Box<dyn OffsetOracle>,
    pub sidecar: Box<dyn SidecarStore>,
    pub reporter: Box<dyn Reporter>,
    pub merger: Option<Box<dyn TreeMerger>>,
    pub page_size: u64,
    pub stats: Mutex<SessionStats>,

    aborted: AtomicBool,
    /// Finished groups flow to the finalizer thread through here; taken
    /// (and thereby closed) at shutdown.
    results_tx: Mutex<Option<Sender<Arc<ShredGroup>>>>,
}

impl ShredContext {
    pub fn new(
        cfg: ShredConfig,
        oracle: Box<dyn OffsetOracle>,
        sidecar: Box<dyn SidecarStore>,
        reporter: Box<dyn Reporter>,
    ) -> Arc<Self> {
        Self::with_merger(cfg, oracle, sidecar, reporter, None)
    }

    /// Like [`ShredContext::new`], with a directory-merge sink that takes
    /// over record delivery when `merge_directories` is set.
    pub fn with_merger(
        cfg: ShredConfig,
        oracle: Box<dyn OffsetOracle>,
        sidecar: Box<dyn SidecarStore>,
        reporter: Box<dyn Reporter>,
        merger: Option<Box<dyn TreeMerger>>,
    ) -> Arc<Self> {
        Arc::new(ShredContext {
            cfg,
            governor: MemGovernor::new(),
            oracle,
            sidecar,
            reporter,
            merger,
            page_size: page_size(),
            stats: Mutex::new(SessionStats::default()),
            aborted: AtomicBool::new(false),
            results_tx: Mutex::new(None),
        })
    }

    /// Minimal context for unit tests: defaults, null collaborators.
    pub fn for_tests(cfg: ShredConfig) -> Arc<Self> {
        Self::new(
            cfg,
            Box::new(NullOracle),
            Box::new(NullSidecar),
            Box::new(crate::iface::report::CollectReporter::new()),
        )
    }

    pub fn abort(&self) {
        self.aborted.store(true, AtomicOrdering::Relaxed);
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(AtomicOrdering::Relaxed)
    }

    /// Group promotion requires a tagged member.
    pub fn needs_pref(&self) -> bool {
        self.cfg.must_match_tagged || self.cfg.keep_all_untagged
    }

    /// Group promotion requires an untagged member.
    pub fn needs_npref(&self) -> bool {
        self.cfg.must_match_untagged || self.cfg.keep_all_tagged
    }

    /// Group promotion requires a member newer than the mtime cutoff.
    pub fn needs_new(&self) -> bool {
        self.cfg.min_mtime != 0
    }

    /// Carry a streaming shadow alongside paranoid buffers, so hex
    /// digests exist for the sidecar and merged output.
    pub fn shadow_hash(&self) -> bool {
        self.cfg.merge_directories
            || self.cfg.read_cksum_from_sidecar
            || self.cfg.write_cksum_to_sidecar
    }

    pub fn install_results_tx(&self, tx: Sender<Arc<ShredGroup>>) {
        *self.results_tx.lock().unwrap() = Some(tx);
    }

    pub fn take_results_tx(&self) -> Option<Sender<Arc<ShredGroup>>> {
        self.results_tx.lock().unwrap().take()
    }

    /// Queue a finished group for the finalizer.
    pub fn send_to_finalizer(&self, group: Arc<ShredGroup>) {
        if let Some(tx) = self.results_tx.lock().unwrap().as_ref() {
            let _ = tx.send(group);
        }
    }

    pub fn stats_snapshot(&self) -> SessionStats {
        self.stats.lock().unwrap().clone()
    }
}
