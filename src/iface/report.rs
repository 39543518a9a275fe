//! Output side of the core: progress state and emitted duplicate records.
//!
//! The core talks to one `Reporter` for the whole session. Counter updates
//! arrive pre-batched as deltas (one call replaces the lock/update/unlock
//! dance), records arrive one per file in rank order with a shared group id.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Mutex;

use colored::Colorize;
use kdam::{Bar, BarExt};
use serde::Serialize;

/// Which phase the session is in, for progress display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressPhase {
    Preprocess,
    Shredder,
}

/// One batch of counter deltas. Positive while work is discovered,
/// negative as it is hashed or filtered away.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressDelta {
    pub files_remaining: i64,
    pub bytes_remaining: i64,
    /// Files settled this batch (duplicates confirmed or discarded).
    pub files_filtered: i64,
}

/// A single emitted file record.
#[derive(Clone, Debug, Serialize)]
pub struct ReportRecord {
    /// Shared by every member of one duplicate set.
    pub group_id: u64,
    pub path: PathBuf,
    pub size: u64,
    pub checksum: Option<String>,
    pub is_original: bool,
    pub is_bundled_hardlink: bool,
    pub is_symlink: bool,
    /// Lone file reported only for its partial checksum.
    pub unfinished: bool,
}

pub trait Reporter: Send + Sync {
    fn set_phase(&self, phase: ProgressPhase);
    fn progress(&self, delta: ProgressDelta);
    fn write(&self, rec: &ReportRecord);
}

impl<R: Reporter> Reporter for std::sync::Arc<R> {
    fn set_phase(&self, phase: ProgressPhase) {
        (**self).set_phase(phase);
    }

    fn progress(&self, delta: ProgressDelta) {
        (**self).progress(delta);
    }

    fn write(&self, rec: &ReportRecord) {
        (**self).write(rec);
    }
}

/// Receives finished records instead of the reporter when directory
/// merging is enabled. The merge itself lives outside the core.
pub trait TreeMerger: Send + Sync {
    fn feed(&self, rec: &ReportRecord);
}

// ---- Terminal reporter ----

struct TermState {
    phase: ProgressPhase,
    bytes_remaining: i64,
    bar: Option<Bar>,
    last_group: Option<u64>,
}

/// Default reporter: colored duplicate listing on stdout, progress bar on
/// stderr while shredding a terminal session.
pub struct TerminalReporter {
    state: Mutex<TermState>,
    show_progress: bool,
}

impl TerminalReporter {
    pub fn new(show_progress: bool) -> Self {
        TerminalReporter {
            state: Mutex::new(TermState {
                phase: ProgressPhase::Preprocess,
                bytes_remaining: 0,
                bar: None,
                last_group: None,
            }),
            show_progress: show_progress && std::io::stderr().is_terminal(),
        }
    }
}

impl Reporter for TerminalReporter {
    fn set_phase(&self, phase: ProgressPhase) {
        let mut st = self.state.lock().unwrap();
        if st.phase == ProgressPhase::Preprocess && phase == ProgressPhase::Shredder {
            st.phase = phase;
            if self.show_progress {
                st.bar = Some(kdam::tqdm!(
                    total = st.bytes_remaining.max(0) as usize,
                    desc = "shredding",
                    unit = "B",
                    unit_scale = true
                ));
            }
        }
    }

    fn progress(&self, delta: ProgressDelta) {
        let mut st = self.state.lock().unwrap();
        st.bytes_remaining += delta.bytes_remaining;
        if st.phase == ProgressPhase::Shredder
            && delta.bytes_remaining < 0
            && let Some(bar) = st.bar.as_mut()
        {
            let _ = bar.update((-delta.bytes_remaining) as usize);
        }
    }

    fn write(&self, rec: &ReportRecord) {
        let mut st = self.state.lock().unwrap();
        if let Some(bar) = st.bar.as_mut() {
            let _ = bar.clear();
        }
        if rec.unfinished {
            println!(
                "{} {}  {}",
                "partial".dimmed(),
                rec.checksum.as_deref().unwrap_or("-").dimmed(),
                rec.path.display()
            );
            return;
        }
        if st.last_group != Some(rec.group_id) {
            st.last_group = Some(rec.group_id);
            println!();
        }
        if rec.is_original {
            println!("{} {}", "keep".green().bold(), rec.path.display());
        } else {
            let tag = if rec.is_bundled_hardlink {
                "link".blue()
            } else {
                "dupe".red()
            };
            println!("{} {}", tag, rec.path.display());
        }
    }
}

// ---- JSON reporter ----

/// Line-delimited JSON records on stdout, one object per file.
pub struct JsonReporter {
    out: Mutex<()>,
}

impl JsonReporter {
    pub fn new() -> Self {
        JsonReporter { out: Mutex::new(()) }
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn set_phase(&self, _phase: ProgressPhase) {}

    fn progress(&self, _delta: ProgressDelta) {}

    fn write(&self, rec: &ReportRecord) {
        let _guard = self.out.lock().unwrap();
        if let Ok(line) = serde_json::to_string(rec) {
            println!("{}", line);
        }
    }
}

// ---- Collecting reporter ----

/// Collects emitted records in memory, grouped by group id. Used by the
/// library API and by tests.
#[derive(Default)]
pub struct CollectReporter {
    groups: Mutex<HashMap<u64, Vec<ReportRecord>>>,
}

impl CollectReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain collected records into duplicate sets, ordered by group id.
    pub fn take_groups(&self) -> Vec<Vec<ReportRecord>> {
        let mut map = self.groups.lock().unwrap();
        let mut keyed: Vec<(u64, Vec<ReportRecord>)> = map.drain().collect();
        keyed.sort_by_key(|(id, _)| *id);
        keyed.into_iter().map(|(_, recs)| recs).collect()
    }
}

impl Reporter for CollectReporter {
    fn set_phase(&self, _phase: ProgressPhase) {}

    fn progress(&self, _delta: ProgressDelta) {}

    fn write(&self, rec: &ReportRecord) {
        self.groups
            .lock()
            .unwrap()
            .entry(rec.group_id)
            .or_default()
            .push(rec.clone());
    }
}
