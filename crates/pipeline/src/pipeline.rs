//! Entity Update Pipeline (C6): the single "recompute all derived
//! attributes" entry point, and the dirty-tracking/change-coalescing
//! wrapper around it.

mod probe;
mod stages;

pub use probe::{BlkidProbe, IdProbe, IdProbeResult};

use std::collections::HashMap;

use camino::Utf8PathBuf;
use storaged_model::{Device, ObjectId};
use storaged_registry::{AdapterRegistry, DeviceRegistry, PortRegistry};
use storaged_sysfs::SysfsReader;

/// Everything the pipeline needs that isn't carried on the Device itself:
/// raw inputs from sysfs, the sibling registries used for cross-entity
/// derivations, and the current mount-table view from the Mount Monitor.
pub struct PipelineContext<'a> {
    pub sysfs: &'a SysfsReader,
    pub dev_disk_root: Utf8PathBuf,
    pub devices: &'a DeviceRegistry,
    pub adapters: &'a AdapterRegistry,
    pub ports: &'a PortRegistry,
    pub mounts: &'a HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>,
    pub id_probe: &'a dyn IdProbe,
    pub now: u64,
}

/// Result of one `recompute` call.
#[derive(Debug, Default)]
pub struct PipelineResult {
    /// False ⇒ the Reconciliation Core must remove this entity even
    /// though the triggering event wasn't itself a remove (§4.6).
    pub keep: bool,
    /// True iff any exported attribute changed — the Reconciliation Core
    /// schedules a single coalesced "changed" emission when this is set.
    pub changed: bool,
    /// Neighbors whose slaves/holders set gained or lost this entity;
    /// the caller schedules an idle-priority recompute on each (§4.6 step
    /// 6).
    pub neighbors_to_recompute: Vec<ObjectId>,
}

/// Run the full ordered derivation sequence (§4.6) on `device`, returning
/// whether to keep it and what changed.
pub fn recompute(device: &mut Device, ctx: &PipelineContext) -> PipelineResult {
    let before = device.clone();
    let was_media_available = before.medium.is_media_available;

    stages::classify(device, ctx.sysfs);
    if !ctx.sysfs.exists(&device.native_path) {
        return PipelineResult { keep: false, changed: true, neighbors_to_recompute: prior_neighbors(&before) };
    }

    stages::device_file(device, &ctx.dev_disk_root);
    stages::medium(device, ctx.sysfs);
    let (new_slaves, new_holders) = stages::neighbors(device, ctx.sysfs, ctx.devices);

    stages::loop_(device, ctx.sysfs);
    stages::partition(device, ctx.sysfs, ctx.devices);
    stages::partition_table(device, ctx.devices);
    stages::presentation(device);
    stages::id(device, ctx.id_probe);
    stages::drive(device, ctx.sysfs);
    stages::optical(device, ctx.sysfs);
    stages::luks(device, ctx.devices);
    stages::luks_cleartext(device, ctx.sysfs, ctx.devices);
    stages::lvm2_lv(device, ctx.sysfs);
    stages::lvm2_pv(device);
    stages::dmmp(device, ctx.sysfs);
    let on_dmmp_partition = stages::partition_on_dmmp(device, ctx.devices);
    stages::dmmp_component(device, ctx.devices, on_dmmp_partition);
    stages::md_component(device, ctx.sysfs, ctx.devices);
    stages::md(device, ctx.sysfs);
    // ata-smart is refreshed only by the SMART Refresh operation; the
    // pipeline just clears the cached value off a non-drive entity.
    if !device.drive.is_drive {
        device.drive.ata_smart_status.clear();
        device.drive.ata_smart_blob.clear();
        device.drive.ata_smart_time_collected = 0;
    }
    stages::can_spindown(device);
    device.is_system_internal = stages::is_system_internal(device, ctx.devices);
    stages::mount_state(device, ctx.mounts);
    stages::media_detection(device, was_media_available, ctx.now);
    stages::drive_adapter(device, ctx.adapters);
    stages::drive_ports(device, ctx.ports);
    stages::drive_similar_devices(device, ctx.devices);

    let mut neighbors_to_recompute = diff_neighbors(&before.slaves_objpath, &new_slaves);
    neighbors_to_recompute.extend(diff_neighbors(&before.holders_objpath, &new_holders));

    PipelineResult {
        keep: true,
        changed: *device != before,
        neighbors_to_recompute,
    }
}

fn prior_neighbors(before: &Device) -> Vec<ObjectId> {
    let mut v = before.slaves_objpath.clone();
    v.extend(before.holders_objpath.clone());
    v
}

/// Symmetric difference of two neighbor lists: anything that appeared or
/// disappeared needs its own recompute scheduled.
fn diff_neighbors(old: &[ObjectId], new: &[ObjectId]) -> Vec<ObjectId> {
    let mut out = Vec::new();
    for id in old {
        if !new.contains(id) {
            out.push(id.clone());
        }
    }
    for id in new {
        if !old.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::FakeProbe;

    fn empty_ctx<'a>(
        sysfs: &'a SysfsReader,
        devices: &'a DeviceRegistry,
        adapters: &'a AdapterRegistry,
        ports: &'a PortRegistry,
        mounts: &'a HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>,
        probe: &'a FakeProbe,
    ) -> PipelineContext<'a> {
        PipelineContext {
            sysfs,
            dev_disk_root: Utf8PathBuf::from("/dev/disk"),
            devices,
            adapters,
            ports,
            mounts,
            id_probe: probe,
            now: 100,
        }
    }

    #[test]
    fn test_recompute_removes_vanished_device() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let sysfs = SysfsReader::new(root);
        let devices = DeviceRegistry::new();
        let adapters = AdapterRegistry::new();
        let ports = PortRegistry::new();
        let mounts = HashMap::new();
        let probe = FakeProbe(Default::default());
        let ctx = empty_ctx(&sysfs, &devices, &adapters, &ports, &mounts, &probe);

        let mut d = Device::new("block/sda", 0);
        let result = recompute(&mut d, &ctx);
        assert!(!result.keep);
    }

    #[test]
    fn test_recompute_keeps_present_device_and_flags_changed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        std::fs::write(dir.path().join("block/sda/size"), "100").unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let sysfs = SysfsReader::new(root);
        let devices = DeviceRegistry::new();
        let adapters = AdapterRegistry::new();
        let ports = PortRegistry::new();
        let mounts = HashMap::new();
        let probe = FakeProbe(Default::default());
        let ctx = empty_ctx(&sysfs, &devices, &adapters, &ports, &mounts, &probe);

        let mut d = Device::new("block/sda", 0);
        let result = recompute(&mut d, &ctx);
        assert!(result.keep);
        assert!(result.changed);
        assert_eq!(d.identity.device_file, "/dev/sda");
    }
}
