use camino::Utf8PathBuf;

use crate::object_id::ObjectId;

/// `id-usage` (§3 Device / filesystem id): what an `ID_FS_USAGE`-style probe
/// found on the device, or that nothing has been probed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdUsage {
    #[default]
    Empty,
    Filesystem,
    Crypto,
    Raid,
    Other,
}

/// Identity: attributes every Device carries regardless of role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub device_file: Utf8PathBuf,
    pub device_file_presentation: Utf8PathBuf,
    pub device_file_by_id: Vec<Utf8PathBuf>,
    pub device_file_by_path: Vec<Utf8PathBuf>,
    pub major: u32,
    pub minor: u32,
}

/// Medium: size, removability, and media-present state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Medium {
    pub size: u64,
    pub block_size: u64,
    pub is_removable: bool,
    pub is_media_available: bool,
    /// Monotonic epoch at which media availability was last observed to
    /// transition, per §3's `detection-time` convention.
    pub media_detection_time: u64,
    pub is_read_only: bool,
}

/// Filesystem/crypto/raid id, as would come from a `blkid`-style probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesystemId {
    pub usage: IdUsage,
    pub id_type: String,
    pub id_version: String,
    pub id_uuid: String,
    pub id_label: String,
}

/// Partition role, populated iff `is_partition`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub is_partition: bool,
    pub slave: Option<ObjectId>,
    pub scheme: String,
    pub part_type: String,
    pub label: String,
    pub uuid: String,
    pub flags: Vec<String>,
    pub number: u32,
    pub offset: u64,
    pub size: u64,
    pub alignment_offset: u64,
}

/// Partition-table role, populated iff `is_partition_table`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionTable {
    pub is_partition_table: bool,
    pub scheme: String,
    pub count: u32,
}

/// Drive-level metadata. Populated on the whole-disk Device that
/// represents a physical drive (`is_drive`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drive {
    pub is_drive: bool,
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub serial: String,
    pub wwn: String,
    pub connection_interface: String,
    pub connection_speed: u64,
    pub media_compatibility: Vec<String>,
    pub media: String,
    pub is_media_ejectable: bool,
    pub can_detach: bool,
    pub can_spindown: bool,
    pub is_rotational: bool,
    pub rotation_rate: i32,
    pub write_cache: String,
    pub adapter: Option<ObjectId>,
    pub ports: Vec<ObjectId>,
    /// Devices clustered by SERIAL+WWN equality (§9 open question: this is
    /// intentionally coarse).
    pub similar_devices: Vec<ObjectId>,
    /// Cached S.M.A.R.T. status (`drive-ata-smart-status`), refreshed by
    /// the SMART Refresh operation, not by the ordinary pipeline.
    pub ata_smart_status: String,
    pub ata_smart_time_collected: u64,
    pub ata_smart_blob: Vec<u8>,
}

/// Optical disc state, populated iff `is_optical_disc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpticalDisc {
    pub is_optical_disc: bool,
    pub is_blank: bool,
    pub is_appendable: bool,
    pub is_closed: bool,
    pub num_tracks: u32,
    pub num_audio_tracks: u32,
    pub num_sessions: u32,
}

/// LUKS ciphertext/cleartext relationship.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Luks {
    pub is_luks: bool,
    pub holder: Option<ObjectId>,
    pub is_cleartext: bool,
    pub cleartext_slave: Option<ObjectId>,
    pub cleartext_unlocked_by_uid: Option<u32>,
}

/// Linux software RAID (md) component/array role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinuxMd {
    pub is_component: bool,
    pub component_level: String,
    pub component_position: i32,
    pub component_num_raid_devices: u32,
    pub component_uuid: String,
    pub component_home_host: String,
    pub component_name: String,
    pub component_version: String,
    pub component_holder: Option<ObjectId>,
    pub component_state: Vec<String>,

    pub is_array: bool,
    pub state: String,
    pub level: String,
    pub num_raid_devices: u32,
    pub uuid: String,
    pub home_host: String,
    pub name: String,
    pub version: String,
    pub slaves: Vec<ObjectId>,
    pub is_degraded: bool,
    pub sync_action: String,
    pub sync_percentage: f64,
    pub sync_speed: u64,
}

/// LVM2 physical/logical volume role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lvm2 {
    pub is_lv: bool,
    pub lv_name: String,
    pub lv_uuid: String,
    pub lv_group_name: String,
    pub lv_group_uuid: String,

    pub is_pv: bool,
    pub pv_uuid: String,
    pub pv_num_metadata_areas: u32,
    pub pv_group_name: String,
    pub pv_group_uuid: String,
    pub pv_group_size: u64,
    pub pv_group_unallocated_size: u64,
    pub pv_group_sequence_number: u64,
    pub pv_group_extent_size: u64,
    pub pv_group_physical_volumes: Vec<String>,
    pub pv_group_logical_volumes: Vec<String>,
}

/// Device-mapper multipath role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multipath {
    pub is_dmmp: bool,
    pub dmmp_name: String,
    pub dmmp_slaves: Vec<ObjectId>,
    pub dmmp_parameters: String,
    pub is_dmmp_component: bool,
    pub dmmp_component_holder: Option<ObjectId>,
}

/// Loop-device backing file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loop {
    pub is_loop: bool,
    pub filename: Utf8PathBuf,
}

/// Mount state, kept in sync with the Mount Monitor (C3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountState {
    pub is_mounted: bool,
    pub mount_paths: Vec<Utf8PathBuf>,
    pub mounted_by_uid: Option<u32>,
}

/// Client-presentation hints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presentation {
    pub hide: bool,
    pub nopolicy: bool,
    pub name: String,
    pub icon_name: String,
}

/// Job state mirrored onto the Device by the Job Engine (C9); never set
/// directly by the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobState {
    pub in_progress: bool,
    pub id: String,
    pub initiated_by_uid: Option<u32>,
    pub is_cancellable: bool,
    /// `-1` before the helper has emitted its first progress line.
    pub percentage: f64,
}

/// A block device: whole disk, partition, crypto mapping, md member,
/// multipath map, loop device, logical volume, or other block entity the
/// daemon has chosen to track (§3 Device).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub native_path: String,
    pub object_id: ObjectId,
    pub detection_time: u64,

    pub identity: Identity,
    pub medium: Medium,
    pub fs_id: FilesystemId,
    pub partition: Partition,
    pub partition_table: PartitionTable,
    pub drive: Drive,
    pub optical: OpticalDisc,
    pub luks: Luks,
    pub md: LinuxMd,
    pub lvm2: Lvm2,
    pub multipath: Multipath,
    pub loop_: Loop,
    pub mount: MountState,
    pub presentation: Presentation,
    pub job: JobState,

    /// Derived transitive closure (§3 invariant 7): false iff only
    /// reachable, via partition-slave / luks-cleartext-slave / md-slave
    /// chains, to components on hot-pluggable buses or removable media.
    pub is_system_internal: bool,

    /// Internal-only, not exported to clients: objpaths of devices this
    /// one is built upon.
    pub slaves_objpath: Vec<ObjectId>,
    /// Internal-only: objpaths of devices built upon this one.
    pub holders_objpath: Vec<ObjectId>,
    /// Internal-only: the device-mapper name, when this is a dm device
    /// (LUKS cleartext or multipath map); used to recognize the daemon's
    /// own naming convention on teardown.
    pub dm_name: String,
}

impl Device {
    /// Construct a bare Device for `native_path`, computing its object id
    /// and detection time. Everything else starts at its neutral default
    /// and is filled in by the Entity Update Pipeline (C6).
    pub fn new(native_path: impl Into<String>, detection_time: u64) -> Self {
        let native_path = native_path.into();
        let object_id = ObjectId::from_native_path(&native_path);
        Self {
            native_path,
            object_id,
            detection_time,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_object_id() {
        let d = Device::new("/sys/block/sda", 42);
        assert_eq!(d.object_id.as_str(), "sda");
        assert_eq!(d.detection_time, 42);
        assert!(!d.mount.is_mounted);
        assert!(d.mount.mount_paths.is_empty());
    }
}
