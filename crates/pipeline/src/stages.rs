//! Individual derivation functions for the C6 ordered sequence (§4.6 step
//! 5), kept as free functions so each can be exercised in isolation
//! against a synthetic sysfs fixture, per the testability addition in
//! SPEC_FULL.md.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use storaged_model::{Device, IdUsage, ObjectId};
use storaged_registry::{AdapterRegistry, DeviceRegistry, PortRegistry};
use storaged_sysfs::{resolve_dev_disk_links, SysfsReader};

use crate::probe::IdProbe;

/// Step 1: `is-drive` (a whole disk exposes a `range` attribute that
/// partitions don't) and the `major`/`minor` pair from the `dev` file.
pub fn classify(d: &mut Device, sys: &SysfsReader) {
    d.drive.is_drive = sys.exists(&format!("{}/range", d.native_path));
    let dev_attr = sys.read_string(&format!("{}/dev", d.native_path));
    if let Some((maj, min)) = dev_attr.split_once(':') {
        d.identity.major = maj.trim().parse().unwrap_or(0);
        d.identity.minor = min.trim().parse().unwrap_or(0);
    }
}

/// Step 2: device-file plus by-id/by-path symlink lists.
pub fn device_file(d: &mut Device, dev_disk_root: &Utf8Path) {
    let name = d.object_id.as_str();
    d.identity.device_file = Utf8PathBuf::from("/dev").join(name);
    d.identity.device_file_presentation = d.identity.device_file.clone();
    d.identity.device_file_by_id =
        resolve_dev_disk_links(dev_disk_root, "by-id", &d.identity.device_file)
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();
    d.identity.device_file_by_path =
        resolve_dev_disk_links(dev_disk_root, "by-path", &d.identity.device_file)
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();
}

/// Step 3: removable / media-available / size / block-size / read-only.
/// `media_available` transitions are timestamped by the caller (see
/// [`media_detection`]), not here.
pub fn medium(d: &mut Device, sys: &SysfsReader) {
    d.medium.is_removable = sys.read_bool(&format!("{}/removable", d.native_path));
    d.medium.size = sys.read_uint64(&format!("{}/size", d.native_path)) * 512;
    d.medium.block_size = {
        let bs = sys.read_uint64(&format!("{}/queue/logical_block_size", d.native_path));
        if bs == 0 { 512 } else { bs }
    };
    d.medium.is_read_only = sys.read_bool(&format!("{}/ro", d.native_path));
    // A non-removable device always has media; a removable one has media
    // iff the kernel reports a non-zero size for it.
    d.medium.is_media_available = !d.medium.is_removable || d.medium.size > 0;
}

/// Step 4: slaves/holders objpath lists, resolved against the registry by
/// treating each `slaves/`/`holders/` directory entry's name as another
/// entity's object id (kernel device names and object ids coincide for the
/// common alphanumeric case, per the glossary's object-id derivation).
pub fn neighbors(d: &mut Device, sys: &SysfsReader, devices: &DeviceRegistry) -> (Vec<ObjectId>, Vec<ObjectId>) {
    let resolve = |names: Vec<String>| -> Vec<ObjectId> {
        names
            .into_iter()
            .filter_map(|name| {
                let id = ObjectId::from_native_path(&name);
                devices.get(&id).map(|_| id)
            })
            .collect()
    };
    let slaves = resolve(sys.list_dir(&format!("{}/slaves", d.native_path)));
    let holders = resolve(sys.list_dir(&format!("{}/holders", d.native_path)));
    d.slaves_objpath = slaves.clone();
    d.holders_objpath = holders.clone();
    (slaves, holders)
}

/// `loop` role: a loop device exposes `loop/backing_file`.
pub fn loop_(d: &mut Device, sys: &SysfsReader) {
    let backing = sys.read_string(&format!("{}/loop/backing_file", d.native_path));
    d.loop_.is_loop = !backing.is_empty();
    d.loop_.filename = Utf8PathBuf::from(backing);
}

/// `partition` role: a partition exposes `partition` (the 1-based number)
/// and `start`/`size` (in 512-byte sectors) under its own sysfs node, and
/// its parent directory entry is the partition-table Device.
pub fn partition(d: &mut Device, sys: &SysfsReader, devices: &DeviceRegistry) {
    let number = sys.read_int(&format!("{}/partition", d.native_path));
    d.partition.is_partition = number > 0;
    if !d.partition.is_partition {
        d.partition = Default::default();
        return;
    }
    d.partition.number = number as u32;
    d.partition.offset = sys.read_uint64(&format!("{}/start", d.native_path)) * 512;
    d.partition.size = sys.read_uint64(&format!("{}/size", d.native_path)) * 512;
    d.partition.alignment_offset =
        sys.read_uint64(&format!("{}/alignment_offset", d.native_path));

    let Some(parent) = parent_native_path(&d.native_path) else {
        return;
    };
    let parent_id = ObjectId::from_native_path(&parent);
    if devices.get(&parent_id).is_some() {
        d.partition.slave = Some(parent_id);
    }
}

fn parent_native_path(native_path: &str) -> Option<String> {
    let (head, _tail) = native_path.rsplit_once('/')?;
    Some(head.to_string())
}

/// `partition-table` role: counts registered Devices whose `partition.slave`
/// points back at this one.
pub fn partition_table(d: &mut Device, devices: &DeviceRegistry) {
    let count = devices
        .iter()
        .filter(|other| other.partition.slave.as_ref() == Some(&d.object_id))
        .count();
    d.partition_table.is_partition_table = count > 0;
    d.partition_table.count = count as u32;
    if d.partition_table.is_partition_table && d.partition_table.scheme.is_empty() {
        d.partition_table.scheme = "mbr".to_string();
    }
}

/// `presentation`: hide internal-only synthetic entries (none by default);
/// derive a human name from label/uuid when unset.
pub fn presentation(d: &mut Device) {
    if d.presentation.name.is_empty() {
        d.presentation.name = if !d.fs_id.id_label.is_empty() {
            d.fs_id.id_label.clone()
        } else {
            d.identity.device_file.file_name().unwrap_or("").to_string()
        };
    }
}

/// `id`: filesystem/crypto/raid signature via the external probe.
pub fn id(d: &mut Device, probe: &dyn IdProbe) {
    let result = probe.probe(&d.identity.device_file);
    d.fs_id.usage = match result.usage.as_str() {
        "filesystem" => IdUsage::Filesystem,
        "crypto" => IdUsage::Crypto,
        "raid" => IdUsage::Raid,
        "" => IdUsage::Empty,
        _ => IdUsage::Other,
    };
    d.fs_id.id_type = result.id_type;
    d.fs_id.id_version = result.id_version;
    d.fs_id.id_uuid = result.id_uuid;
    d.fs_id.id_label = result.id_label;
}

/// `drive` metadata for a whole-disk Device, read off the enclosing SCSI/
/// ATA `device` node.
pub fn drive(d: &mut Device, sys: &SysfsReader) {
    if !d.drive.is_drive {
        return;
    }
    let base = format!("{}/device", d.native_path);
    d.drive.vendor = sys.read_string(&format!("{base}/vendor")).trim().to_string();
    d.drive.model = sys.read_string(&format!("{base}/model")).trim().to_string();
    d.drive.revision = sys.read_string(&format!("{base}/rev")).trim().to_string();
    d.drive.serial = sys.read_string(&format!("{base}/serial")).trim().to_string();
    d.drive.wwn = sys.read_string(&format!("{}/wwid", d.native_path)).trim().to_string();
    d.drive.is_rotational = sys.read_bool(&format!("{}/queue/rotational", d.native_path));
    d.drive.is_media_ejectable = sys.read_bool(&format!("{base}/removable"));
    d.drive.can_detach = sys.exists(&format!("{base}/delete"));
    d.drive.connection_interface = sys.read_string(&format!("{base}/transport")).trim().to_string();
}

/// `optical-disc` role: presence of a CD-ROM capability attribute.
pub fn optical(d: &mut Device, sys: &SysfsReader) {
    d.optical.is_optical_disc = sys.exists(&format!("{}/device/media_type", d.native_path))
        && sys.read_string(&format!("{}/device/media_type", d.native_path)).to_lowercase().contains("cd");
    if !d.optical.is_optical_disc {
        d.optical = Default::default();
    }
}

/// `luks` ciphertext role: a crypto-signature Device whose `holders/`
/// contains a cleartext mapping. `holder` is derived the same way
/// [`dmmp_component`] derives its reverse pointer: scan the registry for
/// a dm device whose `luks_cleartext` slave is this one (its
/// `cleartext_slave` field was set by [`luks_cleartext`] on that device's
/// own pass).
pub fn luks(d: &mut Device, devices: &DeviceRegistry) {
    d.luks.is_luks = d.fs_id.usage == IdUsage::Crypto && d.fs_id.id_type == "crypto_LUKS";
    if !d.luks.is_luks {
        d.luks.holder = None;
        return;
    }
    d.luks.holder = devices
        .iter()
        .find(|other| other.luks.cleartext_slave.as_ref() == Some(&d.object_id))
        .map(|other| other.object_id.clone());
}

/// `luks-cleartext` role: a dm device whose single slave is a LUKS Device.
pub fn luks_cleartext(d: &mut Device, sys: &SysfsReader, devices: &DeviceRegistry) {
    d.dm_name = sys.read_string(&format!("{}/dm/name", d.native_path));
    if d.slaves_objpath.len() != 1 {
        d.luks.is_cleartext = false;
        d.luks.cleartext_slave = None;
        return;
    }
    let slave_id = d.slaves_objpath[0].clone();
    let is_luks_slave = devices.get(&slave_id).map(|s| s.luks.is_luks).unwrap_or(false);
    d.luks.is_cleartext = is_luks_slave;
    d.luks.cleartext_slave = is_luks_slave.then_some(slave_id);
}

/// `lvm2-lv` role: a dm device whose UUID carries the LVM `LVM-` prefix.
pub fn lvm2_lv(d: &mut Device, sys: &SysfsReader) {
    let uuid = sys.read_string(&format!("{}/dm/uuid", d.native_path));
    d.lvm2.is_lv = uuid.starts_with("LVM-");
    if d.lvm2.is_lv {
        d.lvm2.lv_uuid = uuid;
        let name = sys.read_string(&format!("{}/dm/name", d.native_path));
        if let Some((vg, lv)) = name.split_once('-') {
            d.lvm2.lv_group_name = vg.to_string();
            d.lvm2.lv_name = lv.to_string();
        } else {
            d.lvm2.lv_name = name;
        }
    }
}

/// `lvm2-pv` role: `id-type == "LVM2_member"`.
pub fn lvm2_pv(d: &mut Device) {
    d.lvm2.is_pv = d.fs_id.usage == IdUsage::Raid && d.fs_id.id_type == "LVM2_member";
    if d.lvm2.is_pv && d.lvm2.pv_uuid.is_empty() {
        d.lvm2.pv_uuid = d.fs_id.id_uuid.clone();
    }
}

/// `dmmp` (multipath map) role: a dm device whose UUID carries the
/// `mpath-` prefix.
pub fn dmmp(d: &mut Device, sys: &SysfsReader) {
    let uuid = sys.read_string(&format!("{}/dm/uuid", d.native_path));
    d.multipath.is_dmmp = uuid.starts_with("mpath-");
    if d.multipath.is_dmmp {
        d.multipath.dmmp_name = sys.read_string(&format!("{}/dm/name", d.native_path));
        d.multipath.dmmp_slaves = d.slaves_objpath.clone();
    }
}

/// `partition-on-dmmp`: true iff this partition's table-owning slave is
/// itself a multipath map (no separate boolean in the model; folded into
/// `dmmp_component` below per the original source's treatment of this as
/// an edge case of the dmmp-component derivation).
pub fn partition_on_dmmp(d: &Device, devices: &DeviceRegistry) -> bool {
    let Some(slave) = d.partition.slave.as_ref() else { return false };
    devices.get(slave).map(|s| s.multipath.is_dmmp).unwrap_or(false)
}

/// `dmmp-component`: a Device is a path of a multipath map iff it (or its
/// enclosing partition table) appears in some dmmp Device's slave list.
pub fn dmmp_component(d: &mut Device, devices: &DeviceRegistry, on_dmmp_partition: bool) {
    let holder = devices
        .iter()
        .find(|other| other.multipath.is_dmmp && other.multipath.dmmp_slaves.contains(&d.object_id));
    d.multipath.is_dmmp_component = holder.is_some() || on_dmmp_partition;
    d.multipath.dmmp_component_holder = holder.map(|h| h.object_id.clone());
}

/// `md-component` role: `id-type == "linux_raid_member"`.
/// `component_holder` (§3 invariant 4) is derived in reverse, the same
/// way [`dmmp_component`] finds its holder: a component's own sysfs node
/// carries no pointer back to its array until the array is assembled, so
/// this scans the registry for a running md array whose slave list
/// contains this device. Position/state are then read off that array's
/// own `md/dev-<name>/{slot,state}` attributes (the kernel's per-member
/// sysfs nodes), and home-host/name/version off the array's own
/// attributes, since Linux exposes no per-component equivalent of them.
pub fn md_component(d: &mut Device, sys: &SysfsReader, devices: &DeviceRegistry) {
    d.md.is_component = d.fs_id.usage == IdUsage::Raid && d.fs_id.id_type == "linux_raid_member";
    if !d.md.is_component {
        d.md.component_level.clear();
        d.md.component_position = 0;
        d.md.component_num_raid_devices = 0;
        d.md.component_uuid.clear();
        d.md.component_home_host.clear();
        d.md.component_name.clear();
        d.md.component_version.clear();
        d.md.component_holder = None;
        d.md.component_state.clear();
        return;
    }

    d.md.component_level = sys.read_string(&format!("{}/md/level", d.native_path));
    d.md.component_uuid = d.fs_id.id_uuid.clone();

    let holder = devices.iter().find(|other| other.md.is_array && other.md.slaves.contains(&d.object_id));
    d.md.component_holder = holder.map(|h| h.object_id.clone());

    let Some(holder) = holder else {
        d.md.component_position = 0;
        d.md.component_num_raid_devices = 0;
        d.md.component_home_host.clear();
        d.md.component_name.clear();
        d.md.component_version.clear();
        d.md.component_state.clear();
        return;
    };

    d.md.component_num_raid_devices = holder.md.num_raid_devices;
    d.md.component_version = sys.read_string(&format!("{}/md/metadata_version", holder.native_path));
    d.md.component_home_host = sys.read_string(&format!("{}/md/homehost", holder.native_path));
    d.md.component_name = sys.read_string(&format!("{}/md/array_name", holder.native_path));

    let member_node = format!("{}/md/dev-{}", holder.native_path, basename(&d.native_path));
    d.md.component_position = sys.read_int(&format!("{member_node}/slot")).max(0) as i32;
    d.md.component_state = sys
        .read_string(&format!("{member_node}/state"))
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
}

fn basename(native_path: &str) -> &str {
    native_path.rsplit('/').next().unwrap_or(native_path)
}

/// `md` array role: presence of an `md/` sysfs subdirectory.
pub fn md(d: &mut Device, sys: &SysfsReader) {
    let base = format!("{}/md", d.native_path);
    d.md.is_array = sys.exists(&base);
    if !d.md.is_array {
        return;
    }
    d.md.level = sys.read_string(&format!("{base}/level"));
    d.md.state = sys.read_string(&format!("{base}/array_state"));
    d.md.num_raid_devices = sys.read_int(&format!("{base}/raid_disks")).max(0) as u32;
    d.md.slaves = d.slaves_objpath.clone();
    d.md.is_degraded = sys.read_int(&format!("{base}/degraded")) > 0;
    d.md.sync_action = sys.read_string(&format!("{base}/sync_action"));
    if d.md.sync_action.is_empty() {
        d.md.sync_action = "idle".to_string();
    }
    if d.md.sync_action != "idle" {
        let completed = sys.read_string(&format!("{base}/sync_completed"));
        if let Some((done, total)) = completed.split_once(" / ") {
            let (done, total): (f64, f64) = (done.trim().parse().unwrap_or(0.0), total.trim().parse().unwrap_or(1.0));
            d.md.sync_percentage = if total > 0.0 { 100.0 * done / total } else { 0.0 };
        }
        d.md.sync_speed = sys.read_uint64(&format!("{base}/sync_speed"));
    } else {
        d.md.sync_percentage = 0.0;
        d.md.sync_speed = 0;
    }
}

/// `can-spindown`: rotational ATA/SCSI drives support standby; USB/flash
/// media generally don't expose the needed sysfs transport attribute.
pub fn can_spindown(d: &mut Device) {
    d.drive.can_spindown = d.drive.is_drive
        && d.drive.is_rotational
        && matches!(d.drive.connection_interface.as_str(), "ata" | "scsi" | "sas" | "sata");
}

/// `is-system-internal` (§3 invariant 7): reachable only via internal
/// chains unless it sits on a hot-pluggable bus or removable media.
pub fn is_system_internal(d: &mut Device, devices: &DeviceRegistry) -> bool {
    if d.medium.is_removable {
        return false;
    }
    if d.drive.is_drive {
        return !matches!(d.drive.connection_interface.as_str(), "usb" | "firewire" | "sdio");
    }
    let mut internal = true;
    for slave in &d.slaves_objpath {
        if let Some(s) = devices.get(slave) {
            if !s.is_system_internal {
                internal = false;
                break;
            }
        }
    }
    internal
}

/// `mount-state`: joins this Device's `(major, minor)` against the Mount
/// Monitor's last snapshot.
pub fn mount_state(d: &mut Device, mounts: &HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>) {
    let key = (d.identity.major, d.identity.minor);
    match mounts.get(&key) {
        Some(rows) if !rows.is_empty() => {
            d.mount.is_mounted = true;
            d.mount.mount_paths = rows.iter().map(|(p, _)| p.clone()).collect();
            d.mount.mounted_by_uid = rows.first().map(|(_, uid)| *uid);
        }
        _ => {
            d.mount.is_mounted = false;
            d.mount.mount_paths.clear();
            d.mount.mounted_by_uid = None;
        }
    }
}

/// `media-detection`: stamp `media_detection_time` when availability
/// transitions, rather than every recompute.
pub fn media_detection(d: &mut Device, was_available: bool, now: u64) {
    if d.medium.is_media_available != was_available {
        d.medium.media_detection_time = now;
    }
}

/// `drive-adapter`: find the enclosing Adapter by native-path prefix.
pub fn drive_adapter(d: &mut Device, adapters: &AdapterRegistry) {
    if !d.drive.is_drive {
        return;
    }
    d.drive.adapter = adapters
        .iter()
        .find(|a| a.encloses(&d.native_path))
        .map(|a| a.object_id.clone());
}

/// `drive-ports`: every Port that encloses this drive's native path.
pub fn drive_ports(d: &mut Device, ports: &PortRegistry) {
    if !d.drive.is_drive {
        return;
    }
    d.drive.ports = ports
        .iter()
        .filter(|p| p.encloses(&d.native_path))
        .map(|p| p.object_id.clone())
        .collect();
}

/// `drive-similar-devices`: cluster by SERIAL+WWN equality (§9 open
/// question: intentionally coarse, kept as-is).
pub fn drive_similar_devices(d: &mut Device, devices: &DeviceRegistry) {
    if !d.drive.is_drive || (d.drive.serial.is_empty() && d.drive.wwn.is_empty()) {
        d.drive.similar_devices.clear();
        return;
    }
    d.drive.similar_devices = devices
        .iter()
        .filter(|other| {
            other.object_id != d.object_id
                && other.drive.is_drive
                && other.drive.serial == d.drive.serial
                && other.drive.wwn == d.drive.wwn
        })
        .map(|other| other.object_id.clone())
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_with(files: &[(&str, &str)]) -> (tempfile::TempDir, SysfsReader) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, contents) in files {
            let p = dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, contents).unwrap();
        }
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, SysfsReader::new(root))
    }

    #[test]
    fn test_classify_whole_disk() {
        let (_dir, sys) = reader_with(&[("block/sda/range", "16"), ("block/sda/dev", "8:0")]);
        let mut d = Device::new("block/sda", 0);
        classify(&mut d, &sys);
        assert!(d.drive.is_drive);
        assert_eq!(d.identity.major, 8);
        assert_eq!(d.identity.minor, 0);
    }

    #[test]
    fn test_classify_partition_has_no_range() {
        let (_dir, sys) = reader_with(&[("block/sda/sda1/dev", "8:1")]);
        let mut d = Device::new("block/sda/sda1", 0);
        classify(&mut d, &sys);
        assert!(!d.drive.is_drive);
    }

    #[test]
    fn test_medium_size_in_bytes() {
        let (_dir, sys) = reader_with(&[("block/sda/size", "2048")]);
        let mut d = Device::new("block/sda", 0);
        medium(&mut d, &sys);
        assert_eq!(d.medium.size, 1_048_576);
        assert!(d.medium.is_media_available);
    }

    #[test]
    fn test_partition_detects_parent() {
        let (_dir, sys) = reader_with(&[
            ("block/sda/sda1/partition", "1"),
            ("block/sda/sda1/start", "2048"),
            ("block/sda/sda1/size", "1024"),
        ]);
        let mut registry = DeviceRegistry::new();
        registry.insert(Device::new("block/sda", 0));
        let mut d = Device::new("block/sda/sda1", 0);
        partition(&mut d, &sys, &registry);
        assert!(d.partition.is_partition);
        assert_eq!(d.partition.number, 1);
        assert_eq!(d.partition.offset, 1_048_576);
        assert_eq!(d.partition.slave.unwrap().as_str(), "sda");
    }

    #[test]
    fn test_partition_table_counts_children() {
        let mut registry = DeviceRegistry::new();
        let parent = Device::new("block/sda", 0);
        let parent_id = parent.object_id.clone();
        registry.insert(parent);
        let mut child = Device::new("block/sda/sda1", 0);
        child.partition.slave = Some(parent_id.clone());
        registry.insert(child);

        let mut parent = registry.remove(&parent_id).unwrap();
        partition_table(&mut parent, &registry);
        assert!(parent.partition_table.is_partition_table);
        assert_eq!(parent.partition_table.count, 1);
    }

    #[test]
    fn test_luks_cleartext_requires_single_luks_slave() {
        let mut registry = DeviceRegistry::new();
        let mut luks_dev = Device::new("block/sdb", 0);
        luks_dev.luks.is_luks = true;
        let luks_id = luks_dev.object_id.clone();
        registry.insert(luks_dev);

        let (_dir, sys) = reader_with(&[]);
        let mut cleartext = Device::new("block/dm-0", 0);
        cleartext.slaves_objpath = vec![luks_id];
        luks_cleartext(&mut cleartext, &sys, &registry);
        assert!(cleartext.luks.is_cleartext);
    }

    #[test]
    fn test_luks_holder_found_via_reverse_cleartext_lookup() {
        let mut luks_dev = Device::new("block/sdb", 0);
        luks_dev.fs_id.usage = IdUsage::Crypto;
        luks_dev.fs_id.id_type = "crypto_LUKS".to_string();
        let luks_id = luks_dev.object_id.clone();

        let mut registry = DeviceRegistry::new();
        let mut cleartext = Device::new("block/dm-0", 0);
        cleartext.luks.cleartext_slave = Some(luks_id.clone());
        let cleartext_id = cleartext.object_id.clone();
        registry.insert(cleartext);

        luks(&mut luks_dev, &registry);
        assert!(luks_dev.luks.is_luks);
        assert_eq!(luks_dev.luks.holder, Some(cleartext_id));
    }

    #[test]
    fn test_luks_holder_cleared_when_not_luks() {
        let mut registry = DeviceRegistry::new();
        let mut d = Device::new("block/sdb", 0);
        d.luks.holder = Some(ObjectId::from_native_path("block/dm-0"));
        luks(&mut d, &registry);
        assert!(!d.luks.is_luks);
        assert_eq!(d.luks.holder, None);
        let _ = &mut registry;
    }

    #[test]
    fn test_md_component_fills_holder_and_position() {
        let (_dir, sys) = reader_with(&[
            ("devices/array/md/dev-sdb1/slot", "1"),
            ("devices/array/md/dev-sdb1/state", "in_sync,sync"),
            ("devices/array/md/metadata_version", "1.2"),
            ("devices/array/md/homehost", "host1"),
            ("devices/array/md/array_name", "myarray"),
        ]);

        let mut component = Device::new("devices/sdb1", 0);
        component.fs_id.usage = IdUsage::Raid;
        component.fs_id.id_type = "linux_raid_member".to_string();
        component.fs_id.id_uuid = "abc-uuid".to_string();
        let component_id = component.object_id.clone();

        let mut registry = DeviceRegistry::new();
        let mut array = Device::new("devices/array", 0);
        array.md.is_array = true;
        array.md.num_raid_devices = 2;
        array.md.slaves = vec![component_id.clone()];
        let array_id = array.object_id.clone();
        registry.insert(array);

        md_component(&mut component, &sys, &registry);
        assert!(component.md.is_component);
        assert_eq!(component.md.component_holder, Some(array_id));
        assert_eq!(component.md.component_position, 1);
        assert_eq!(component.md.component_num_raid_devices, 2);
        assert_eq!(component.md.component_version, "1.2");
        assert_eq!(component.md.component_home_host, "host1");
        assert_eq!(component.md.component_name, "myarray");
        assert_eq!(component.md.component_state, vec!["in_sync".to_string(), "sync".to_string()]);
    }

    #[test]
    fn test_is_system_internal_removable_is_external() {
        let registry = DeviceRegistry::new();
        let mut d = Device::new("block/sdc", 0);
        d.medium.is_removable = true;
        assert!(!is_system_internal(&mut d, &registry));
    }

    #[test]
    fn test_mount_state_joins_by_major_minor() {
        let mut mounts = HashMap::new();
        mounts.insert((8, 1), vec![(Utf8PathBuf::from("/media/x"), 1000)]);
        let mut d = Device::new("block/sda/sda1", 0);
        d.identity.major = 8;
        d.identity.minor = 1;
        mount_state(&mut d, &mounts);
        assert!(d.mount.is_mounted);
        assert_eq!(d.mount.mount_paths, vec![Utf8PathBuf::from("/media/x")]);
    }

    #[test]
    fn test_drive_similar_devices_by_serial_and_wwn() {
        let mut registry = DeviceRegistry::new();
        let mut a = Device::new("block/sda", 0);
        a.drive.is_drive = true;
        a.drive.serial = "S1".into();
        a.drive.wwn = "W1".into();
        let mut b = Device::new("block/sdb", 0);
        b.drive.is_drive = true;
        b.drive.serial = "S1".into();
        b.drive.wwn = "W1".into();
        let b_id = b.object_id.clone();
        registry.insert(b);
        registry.insert(a.clone());

        drive_similar_devices(&mut a, &registry);
        assert_eq!(a.drive.similar_devices, vec![b_id]);
    }
}
