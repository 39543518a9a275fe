//! The shredding core: progressive refinement of same-size classes into
//! byte-identical duplicate sets, scheduled per device in disk order.

pub mod device;
pub mod digest;
pub mod file;
pub mod govern;
pub mod group;
pub mod preprocess;
pub mod results;
pub mod scheduler;
pub mod session;
pub mod sift;
pub mod worker;

pub use device::ShredDevice;
pub use digest::{ChecksumKind, DigestKey, ShredDigest};
pub use file::{FileState, HardlinkCluster, ShredFile};
pub use govern::MemGovernor;
pub use group::{GroupStatus, ShredGroup};
pub use session::{SessionStats, ShredConfig, ShredContext, default_rank};
pub use sift::sift;
