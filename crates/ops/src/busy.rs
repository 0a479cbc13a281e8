//! The shared "busy" predicate (§4.12) used by most mutating operations.

use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_registry::DeviceRegistry;

/// `check_partitions`: also treat the device busy if any of its
/// partitions is busy (extended transitively for extended/logical mbr
/// partitions).
pub fn is_busy(device: &Device, jobs: &JobEngine, devices: &DeviceRegistry, check_partitions: bool) -> bool {
    if jobs.is_busy(&device.object_id) {
        return true;
    }
    if device.mount.is_mounted {
        return true;
    }
    if !device.holders_objpath.is_empty() && !device.multipath.is_dmmp {
        return true;
    }
    if check_partitions && device.partition_table.is_partition_table {
        let partitions_busy = devices
            .iter()
            .filter(|other| other.partition.slave.as_ref() == Some(&device.object_id))
            .any(|p| is_busy(p, jobs, devices, true));
        if partitions_busy {
            return true;
        }
    }
    if is_extended_mbr_partition(device) {
        let logical_busy = devices
            .iter()
            .filter(|other| other.partition.slave.as_ref() == device.partition.slave.as_ref())
            .any(|p| p.object_id != device.object_id && is_busy(p, jobs, devices, false));
        if logical_busy {
            return true;
        }
    }
    false
}

/// mbr extended partition types: 0x05, 0x0f, 0x85 (§4.12 Partition Delete).
pub fn is_extended_mbr_partition(device: &Device) -> bool {
    device.partition.is_partition
        && matches!(device.partition.part_type.to_lowercase().as_str(), "0x05" | "0x0f" | "0x85")
}

pub fn extended_partition_has_logical_partitions(device: &Device, devices: &DeviceRegistry) -> bool {
    is_extended_mbr_partition(device)
        && devices
            .iter()
            .any(|other| other.partition.slave.as_ref() == device.partition.slave.as_ref() && other.object_id != device.object_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storaged_model::{Device, ObjectId};

    #[test]
    fn test_mounted_device_is_busy() {
        let mut d = Device::new("block/sda1", 0);
        d.mount.is_mounted = true;
        let jobs = JobEngine::new();
        let devices = DeviceRegistry::new();
        assert!(is_busy(&d, &jobs, &devices, false));
    }

    #[test]
    fn test_dmmp_with_holders_is_not_busy() {
        let mut d = Device::new("block/sda", 0);
        d.holders_objpath = vec![ObjectId::from_native_path("block/dm-0")];
        d.multipath.is_dmmp = true;
        let jobs = JobEngine::new();
        let devices = DeviceRegistry::new();
        assert!(!is_busy(&d, &jobs, &devices, false));
    }

    #[test]
    fn test_idle_unmounted_device_is_not_busy() {
        let d = Device::new("block/sda1", 0);
        let jobs = JobEngine::new();
        let devices = DeviceRegistry::new();
        assert!(!is_busy(&d, &jobs, &devices, false));
    }
}
