//! Poller & Spindown Supervisor (C12, spec.md §4.12's Drive Poll Media /
//! Inhibit Polling / Set Spindown Timeout family, plus the periodic MD
//! sync-progress re-read from §8 scenario 6). Owns no I/O itself — it
//! decides *what* to poll and *what* standby timer to apply; the actual
//! helper invocations are dispatched from the top-level event loop
//! (`app.rs`) through the same `storaged-ops`/Job Engine path a client
//! request would use, so a poll tick looks to the rest of the daemon
//! exactly like an explicit `drive_poll_media` call.

use std::collections::{HashMap, HashSet};

use storaged_auth::InhibitorRegistry;
use storaged_model::ObjectId;
use storaged_ops::encode_standby_timeout;
use storaged_registry::DeviceRegistry;

/// Tracks which devices are eligible for periodic polling and the last
/// standby-timer byte applied to each drive, so ticks only act on
/// changes.
#[derive(Debug, Default)]
pub struct Poller {
    poll_set: HashSet<ObjectId>,
    md_sync_set: HashSet<ObjectId>,
    applied_standby: HashMap<ObjectId, u8>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the poll set and MD-sync set from the current registry
    /// contents. Called after every reconciliation pass that may have
    /// added or removed a Device (§4.12: "recompute poller/spindown sets"
    /// on block add/remove).
    pub fn recompute_sets(&mut self, devices: &DeviceRegistry) {
        self.poll_set = devices
            .iter()
            .filter(|d| d.drive.is_drive && d.medium.is_removable && d.drive.is_media_ejectable)
            .map(|d| d.object_id.clone())
            .collect();
        self.md_sync_set = devices.iter().filter(|d| d.md.is_array && d.md.sync_action != "idle").map(|d| d.object_id.clone()).collect();
        self.applied_standby.retain(|id, _| devices.get(id).is_some());
    }

    /// Devices due for a `drive_poll_media` this tick: every member of
    /// the poll set whose polling isn't inhibited globally or per-device.
    pub fn due_for_poll(&self, inhibitors: &InhibitorRegistry) -> Vec<ObjectId> {
        if inhibitors.is_polling_inhibited() {
            return Vec::new();
        }
        self.poll_set.iter().filter(|id| !inhibitors.is_device_polling_inhibited(id)).cloned().collect()
    }

    /// Devices whose MD sync-action should be re-read this tick (§8
    /// scenario 6's 2-second cadence).
    pub fn due_for_md_sync_read(&self) -> Vec<ObjectId> {
        self.md_sync_set.iter().cloned().collect()
    }

    /// Drives whose effective spindown timeout (lowest of every
    /// outstanding request, or the configured default) differs from what
    /// was last applied, paired with the standby-timer byte to write.
    /// Callers apply it then record it with [`Self::mark_applied`].
    pub fn pending_spindown_changes(&self, devices: &DeviceRegistry, inhibitors: &InhibitorRegistry, default_timeout_secs: u32) -> Vec<(ObjectId, u8)> {
        devices
            .iter()
            .filter(|d| d.drive.is_drive)
            .filter_map(|d| {
                let effective = inhibitors.effective_spindown_timeout(&d.object_id).unwrap_or(default_timeout_secs);
                let byte = encode_standby_timeout(effective);
                if self.applied_standby.get(&d.object_id) == Some(&byte) {
                    None
                } else {
                    Some((d.object_id.clone(), byte))
                }
            })
            .collect()
    }

    pub fn mark_applied(&mut self, device: ObjectId, byte: u8) {
        self.applied_standby.insert(device, byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storaged_auth::CallerId;
    use storaged_model::Device;

    fn removable_drive(native_path: &str) -> Device {
        let mut d = Device::new(native_path, 0);
        d.drive.is_drive = true;
        d.drive.is_media_ejectable = true;
        d.medium.is_removable = true;
        d
    }

    #[test]
    fn test_recompute_sets_picks_up_ejectable_removable_drives() {
        let mut registry = DeviceRegistry::new();
        registry.insert(removable_drive("block/sr0"));
        let mut poller = Poller::new();
        poller.recompute_sets(&registry);
        assert_eq!(poller.poll_set.len(), 1);
    }

    #[test]
    fn test_due_for_md_sync_read_picks_up_syncing_arrays_only() {
        let mut registry = DeviceRegistry::new();
        let mut syncing = Device::new("block/md0", 0);
        syncing.md.is_array = true;
        syncing.md.sync_action = "resync".to_string();
        let syncing_id = syncing.object_id.clone();
        registry.insert(syncing);

        let mut idle = Device::new("block/md1", 0);
        idle.md.is_array = true;
        idle.md.sync_action = "idle".to_string();
        registry.insert(idle);

        let mut poller = Poller::new();
        poller.recompute_sets(&registry);
        let due = poller.due_for_md_sync_read();
        assert_eq!(due, vec![syncing_id]);
    }

    #[test]
    fn test_due_for_poll_respects_global_inhibit() {
        let mut registry = DeviceRegistry::new();
        registry.insert(removable_drive("block/sr0"));
        let mut poller = Poller::new();
        poller.recompute_sets(&registry);
        let mut inhibitors = InhibitorRegistry::new();
        assert_eq!(poller.due_for_poll(&inhibitors).len(), 1);
        inhibitors.inhibit_all_polling(CallerId("test".to_string()));
        assert!(poller.due_for_poll(&inhibitors).is_empty());
    }

    #[test]
    fn test_pending_spindown_changes_only_reports_deltas() {
        let mut registry = DeviceRegistry::new();
        let mut d = Device::new("block/sda", 0);
        d.drive.is_drive = true;
        registry.insert(d);
        let mut poller = Poller::new();
        let inhibitors = InhibitorRegistry::new();
        let pending = poller.pending_spindown_changes(&registry, &inhibitors, 120);
        assert_eq!(pending.len(), 1);
        let (id, byte) = pending[0].clone();
        poller.mark_applied(id, byte);
        let pending_again = poller.pending_spindown_changes(&registry, &inhibitors, 120);
        assert!(pending_again.is_empty());
    }
}
