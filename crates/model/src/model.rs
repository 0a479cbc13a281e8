//! The shared data model (§3): the four entity kinds and their exported
//! properties. This crate has no behavior of its own — derivation lives in
//! `storaged-pipeline`, storage lives in `storaged-registry`.

mod adapter;
mod device;
mod entity;
mod expander;
mod object_id;
mod port;

pub use adapter::Adapter;
pub use device::{
    Device, Drive, FilesystemId, Identity, IdUsage, JobState, Loop, Luks, LinuxMd, Lvm2, Medium,
    MountState, Multipath, OpticalDisc, Partition, PartitionTable, Presentation,
};
pub use entity::{Entity, EntityKind};
pub use expander::Expander;
pub use object_id::ObjectId;
pub use port::Port;
