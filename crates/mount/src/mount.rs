//! Mount Monitor (C3) and Mount-File Store (C4): watching `mountinfo` for
//! changes and remembering the mounts this daemon created itself.

mod monitor;
mod store;

pub use monitor::{diff, parse_mountinfo, MountDiff, MountMonitor, MountRecord};
pub use store::{MountFileEntry, MountFileStore};
