//! Top-level wiring: the single-threaded cooperative event loop (§5) that
//! owns every component and drives C1/C3/C11/C12 off three timers plus a
//! shutdown signal. There is no RPC transport here (out of scope per
//! spec.md §1's Non-goals) — this module is the daemon's entire observable
//! behavior today: scan sysfs, reconcile, track mounts, keep pollers and
//! spindown timers in sync, and log what happened.

use std::collections::{HashMap, HashSet};

use camino::Utf8PathBuf;
use storaged_auth::{CallerRegistry, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_mount::{MountFileStore, MountMonitor};
use storaged_pipeline::BlkidProbe;
use storaged_sysfs::SysfsReader;

use crate::config::Config;
use crate::event_source::EventSource;
use crate::poller::Poller;
use crate::reconcile::{self, DaemonSignal, ReconcileInputs, Registries};

/// Everything the daemon owns. Constructed once in `main`, then driven by
/// repeated calls to [`AppState::scan_tick`], [`AppState::mount_tick`] and
/// [`AppState::poll_tick`] from the event loop.
pub struct AppState {
    pub config: Config,
    pub registries: Registries,
    pub poller: Poller,
    pub jobs: JobEngine,
    pub inhibitors: InhibitorRegistry,
    pub callers: CallerRegistry,
    pub mount_monitor: MountMonitor,
    pub mount_file_store: MountFileStore,
    sysfs: SysfsReader,
    probe: BlkidProbe,
    event_source: EventSource,
    fstab_device_files: HashSet<Utf8PathBuf>,
    now: u64,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let sysfs = SysfsReader::new(config.sysfs_root.clone());
        let mount_file_store = MountFileStore::load(&config.mount_file_store_path)?;
        Ok(Self {
            registries: Registries::default(),
            poller: Poller::new(),
            jobs: JobEngine::new(),
            inhibitors: InhibitorRegistry::new(),
            callers: CallerRegistry::new(),
            mount_monitor: MountMonitor::new(),
            mount_file_store,
            sysfs,
            probe: BlkidProbe,
            event_source: EventSource::new(),
            fstab_device_files: read_fstab_device_files(),
            now: 0,
            config,
        })
    }

    /// Monotonic-ish tick counter used as the pipeline's `now` (§3
    /// `detection-time`); the event loop advances it once per scan.
    pub fn advance_clock(&mut self, now: u64) {
        self.now = now;
    }

    /// Build the `(major, minor) -> [(path, uid)]` map `PipelineContext`
    /// needs, from the current `MountMonitor` snapshot.
    fn mount_map(&self) -> HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>> {
        let mut map: HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>> = HashMap::new();
        for record in self.mount_monitor.snapshot() {
            map.entry((record.major, record.minor)).or_default().push((record.mount_path.clone(), 0));
        }
        map
    }

    /// C1: re-scan sysfs and dispatch every event through the
    /// Reconciliation Core, then let C12 pick up any add/remove.
    pub fn scan_tick(&mut self) -> Vec<DaemonSignal> {
        let events = self.event_source.scan(&self.config.sysfs_root);
        let mounts = self.mount_map();
        let mut signals = Vec::new();
        for event in events {
            let inputs = build_inputs(&self.config, &self.sysfs, &self.probe, &self.mount_file_store, &self.fstab_device_files, self.now, &mounts);
            signals.extend(reconcile::handle_event(&mut self.registries, &inputs, &event.native_path, event.action, event.subsystem, false));
        }
        if !signals.is_empty() {
            self.poller.recompute_sets(&self.registries.devices);
        }
        for signal in &signals {
            tracing::info!(?signal, "entity change");
        }
        signals
    }

    /// C3: re-read `/proc/self/mountinfo` and synthesize a change on any
    /// Device whose mount state moved (§4.3).
    pub fn mount_tick(&mut self, mountinfo_contents: &str) -> Vec<DaemonSignal> {
        let diff = self.mount_monitor.refresh(mountinfo_contents);
        let mut affected = Vec::new();
        for record in diff.removed.iter().chain(diff.added.iter()) {
            if let Some(device) = self.registries.devices.get_by_major_minor(record.major, record.minor) {
                affected.push(device.object_id.clone());
            }
        }
        let mounts = self.mount_map();
        let mut signals = Vec::new();
        for device_id in affected {
            let inputs = build_inputs(&self.config, &self.sysfs, &self.probe, &self.mount_file_store, &self.fstab_device_files, self.now, &mounts);
            signals.extend(reconcile::synthesize_changed(&mut self.registries, &inputs, &device_id));
        }
        signals
    }

    /// C12: fire off any due `drive-poll-media` helper runs and apply any
    /// pending standby-timer changes. Internal polling isn't a caller
    /// request, so it bypasses the Authorization Gate the way the
    /// original daemon's own poll thread does — there's no client to
    /// authorize against.
    pub async fn poll_tick(&mut self) {
        for device_id in self.poller.due_for_poll(&self.inhibitors) {
            if self.jobs.is_busy(&device_id) {
                continue;
            }
            let Some(device) = self.registries.devices.get(&device_id) else { continue };
            let argv = vec![self.config.helper_dir.join("storaged-helper-poll-media").into_string(), device.identity.device_file.to_string()];
            if let Err(error) = self.jobs.run_helper(device_id.clone(), "drive-poll-media", 0, &argv, None, None, false).await {
                tracing::warn!(%error, "poll-media helper failed to start");
            }
            let mounts = self.mount_map();
            let inputs = build_inputs(&self.config, &self.sysfs, &self.probe, &self.mount_file_store, &self.fstab_device_files, self.now, &mounts);
            reconcile::synthesize_changed(&mut self.registries, &inputs, &device_id);
        }

        let pending = self.poller.pending_spindown_changes(&self.registries.devices, &self.inhibitors, self.config.default_spindown_timeout_secs);
        self.apply_spindown_changes(pending);
    }

    /// C12: re-derive `linux-md-sync-{percentage,speed}` on every array
    /// still syncing (§8 scenario 6's 2 s re-read cadence — the kernel
    /// emits no change event for sync progress on its own).
    pub fn md_sync_tick(&mut self) {
        let mounts = self.mount_map();
        for device_id in self.poller.due_for_md_sync_read() {
            let inputs = build_inputs(&self.config, &self.sysfs, &self.probe, &self.mount_file_store, &self.fstab_device_files, self.now, &mounts);
            reconcile::synthesize_changed(&mut self.registries, &inputs, &device_id);
        }
    }

    fn apply_spindown_changes(&mut self, pending: Vec<(storaged_model::ObjectId, u8)>) {
        for (device_id, byte) in pending {
            let Some(device) = self.registries.devices.get(&device_id) else { continue };
            let argv = vec![
                self.config.helper_dir.join("storaged-helper-set-spindown").into_string(),
                device.identity.device_file.to_string(),
                byte.to_string(),
            ];
            match std::process::Command::new(&argv[0]).args(&argv[1..]).status() {
                Ok(_) => self.poller.mark_applied(device_id, byte),
                Err(error) => tracing::warn!(%error, "spindown helper failed to start"),
            }
        }
    }

    /// Startup reconciliation (SPEC_FULL.md's Supplemented features):
    /// purge mount-file-store entries for devices no longer present, and
    /// sweep any `<prefix>-uuid-*` dm device that has no live Device
    /// entry pointing at it (left behind by a crash between unlock and
    /// lock).
    pub fn reconcile_on_startup(&mut self) -> anyhow::Result<()> {
        let present: Vec<Utf8PathBuf> = self.registries.devices.iter().map(|d| d.identity.device_file.clone()).collect();
        let stale = self.mount_file_store.purge_stale(&present)?;
        for (device_file, _entry) in &stale {
            tracing::info!(%device_file, "purged stale mount-file entry on startup");
        }

        let known_dm_names: HashSet<&str> = self.registries.devices.iter().map(|d| d.dm_name.as_str()).collect();
        if let Ok(entries) = std::fs::read_dir("/dev/mapper") {
            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(&format!("{}-uuid-", self.config.dm_name_prefix)) && !known_dm_names.contains(name) {
                    tracing::warn!(dm_name = name, "orphaned LUKS cleartext mapping found on startup, closing");
                    let helper = self.config.helper_dir.join("storaged-helper-luks-close");
                    let _ = std::process::Command::new(helper.as_str()).arg(name).spawn();
                }
            }
        }
        Ok(())
    }
}

/// Assemble a [`ReconcileInputs`] from disjoint fields rather than a
/// `&self` method, so callers can hold `&mut self.registries` alongside
/// it without the borrow checker treating `AppState` as borrowed whole.
#[allow(clippy::too_many_arguments)]
fn build_inputs<'a>(
    config: &'a Config,
    sysfs: &'a SysfsReader,
    probe: &'a BlkidProbe,
    mount_file_store: &'a MountFileStore,
    fstab_device_files: &'a HashSet<Utf8PathBuf>,
    now: u64,
    mounts: &'a HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>,
) -> ReconcileInputs<'a> {
    ReconcileInputs {
        sysfs,
        dev_disk_root: config.dev_disk_root.clone(),
        id_probe: probe,
        mounts,
        mount_file_store,
        fstab_device_files,
        helper_dir: &config.helper_dir,
        dm_name_prefix: &config.dm_name_prefix,
        now,
    }
}

/// Parse device files named in `/etc/fstab` (§4.11's fstab OR arm).
/// Missing file, comments, and swap/none entries are simply skipped.
fn read_fstab_device_files() -> HashSet<Utf8PathBuf> {
    let Ok(contents) = std::fs::read_to_string("/etc/fstab") else {
        return HashSet::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .filter(|field| field.starts_with('/'))
        .map(Utf8PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_with_defaults_does_not_fail() {
        let mut config = Config::default();
        config.mount_file_store_path = Utf8PathBuf::from("/nonexistent/mounted-fs");
        let app = AppState::new(config);
        assert!(app.is_ok());
    }

    #[test]
    fn test_md_sync_tick_over_empty_registry_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sysfs_root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        config.mount_file_store_path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        let mut app = AppState::new(config).unwrap();
        app.md_sync_tick();
    }

    #[test]
    fn test_scan_tick_over_empty_sysfs_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sysfs_root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        config.mount_file_store_path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        let mut app = AppState::new(config).unwrap();
        let signals = app.scan_tick();
        assert!(signals.is_empty());
    }
}
