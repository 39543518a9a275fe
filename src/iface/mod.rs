//! Contracts with the core's external collaborators: offset probing,
//! checksum sidecars, and result reporting.

pub mod offsets;
pub mod report;
pub mod sidecar;

pub use offsets::{NullOracle, OffsetOracle};
pub use report::{
    CollectReporter, JsonReporter, ProgressDelta, ProgressPhase, ReportRecord, Reporter,
    TerminalReporter, TreeMerger,
};
pub use sidecar::{JsonSidecar, NullSidecar, SidecarStore};

#[cfg(target_os = "linux")]
pub use offsets::FiemapOracle;
