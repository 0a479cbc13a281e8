//! Reconciliation Core (C11, spec.md §4.10): the single `handle_event`
//! entry point, dispatching to one of four sub-reconcilers and collapsing
//! add/change/remove into the uniform algorithm spec.md describes. Block
//! devices get the full C6 pipeline (`storaged_pipeline::recompute`);
//! Adapter/Port/Expander are simple enough (a handful of sysfs reads, no
//! derived busy/mount/job state) that their "pipeline" is just the direct
//! read below, grounded on the same classify-then-derive shape as
//! `storaged_pipeline::stages`.

use std::collections::{HashMap, HashSet, VecDeque};

use camino::{Utf8Path, Utf8PathBuf};
use storaged_model::{Adapter, Entity, Expander, ObjectId, Port};
use storaged_mount::MountFileStore;
use storaged_pipeline::{recompute, IdProbe, PipelineContext};
use storaged_registry::{AdapterRegistry, DeviceRegistry, ExpanderRegistry, PortRegistry};
use storaged_sysfs::SysfsReader;

use crate::event_source::{Action, Subsystem};

/// Outbound notifications a transport adapter (out of scope per spec.md
/// §1's Non-goals) would relay to clients (§6 "Signals").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonSignal {
    DeviceAdded(ObjectId),
    DeviceChanged(ObjectId),
    DeviceRemoved(ObjectId),
    AdapterAdded(ObjectId),
    AdapterChanged(ObjectId),
    AdapterRemoved(ObjectId),
    PortAdded(ObjectId),
    PortRemoved(ObjectId),
    ExpanderAdded(ObjectId),
    ExpanderRemoved(ObjectId),
}

/// Everything `handle_event` needs beyond the registries themselves.
pub struct ReconcileInputs<'a> {
    pub sysfs: &'a SysfsReader,
    pub dev_disk_root: Utf8PathBuf,
    pub id_probe: &'a dyn IdProbe,
    pub mounts: &'a HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>,
    pub mount_file_store: &'a MountFileStore,
    /// Device files named in the system fstab (§4.11's second OR arm).
    pub fstab_device_files: &'a HashSet<Utf8PathBuf>,
    pub helper_dir: &'a Utf8Path,
    pub dm_name_prefix: &'a str,
    pub now: u64,
}

/// The four dictionaries-of-dictionaries (C5) the reconciliation core
/// mutates. Owned by `storaged-daemon`'s top-level app state; passed here
/// by mutable reference so `storaged-ops` can borrow the same
/// `DeviceRegistry` for its own (read-only, from its point of view)
/// lookups between reconciliation ticks.
#[derive(Debug, Default)]
pub struct Registries {
    pub devices: DeviceRegistry,
    pub adapters: AdapterRegistry,
    pub ports: PortRegistry,
    pub expanders: ExpanderRegistry,
}

/// Dispatch one event. `synthesized` marks a self-triggered re-entry
/// (from [`synthesize_changed`]/[`synthesize_changed_on_all_devices`] or
/// from a neighbor recompute) rather than a fresh kernel-reported event;
/// it currently has no behavioral effect here (spec.md notes synthesized
/// changes are the only ones allowed during a job completion callback,
/// which is an invariant on *callers*, not on this function).
pub fn handle_event(registries: &mut Registries, inputs: &ReconcileInputs, native_path: &str, action: Action, subsystem: Subsystem, synthesized: bool) -> Vec<DaemonSignal> {
    let _ = synthesized;
    match subsystem {
        Subsystem::Block => handle_block(registries, inputs, native_path, action),
        Subsystem::Pci => handle_simple_adapter(registries, inputs.sysfs, native_path, action),
        Subsystem::ScsiHost | Subsystem::SasPhy => handle_simple_port(registries, inputs.sysfs, native_path, action),
        Subsystem::SasExpander => handle_simple_expander(registries, native_path, action),
    }
}

/// Re-run C6 on `device` without a real triggering kernel event — used
/// after a Job completion to pick up the effect of a helper invocation
/// (§4.10 "Synthesized changes").
pub fn synthesize_changed(registries: &mut Registries, inputs: &ReconcileInputs, device: &ObjectId) -> Vec<DaemonSignal> {
    let Some(native_path) = registries.devices.get(device).map(|d| d.native_path.clone()) else {
        return Vec::new();
    };
    handle_block(registries, inputs, &native_path, Action::Change)
}

/// Re-run C6 on every currently registered Device.
pub fn synthesize_changed_on_all_devices(registries: &mut Registries, inputs: &ReconcileInputs) -> Vec<DaemonSignal> {
    let paths: Vec<String> = registries.devices.iter().map(|d| d.native_path.clone()).collect();
    let mut signals = Vec::new();
    for path in paths {
        signals.extend(handle_block(registries, inputs, &path, Action::Change));
    }
    signals
}

/// The block sub-reconciler (§4.10), including the neighbor-recompute
/// fan-out from C6 step 6, processed breadth-first off a work queue
/// rather than recursively so a long dependency chain can't blow the
/// stack.
fn handle_block(registries: &mut Registries, inputs: &ReconcileInputs, native_path: &str, action: Action) -> Vec<DaemonSignal> {
    let mut signals = Vec::new();
    let mut queue: VecDeque<(String, Action)> = VecDeque::new();
    queue.push_back((native_path.to_string(), action));

    while let Some((path, action)) = queue.pop_front() {
        let id = ObjectId::from_native_path(&path);
        let is_registered = registries.devices.contains_native_path(&path);

        match action {
            Action::Add if is_registered => queue.push_back((path, Action::Change)),
            Action::Add => {
                let mut device = storaged_model::Device::new(path.clone(), inputs.now);
                let ctx = PipelineContext {
                    sysfs: inputs.sysfs,
                    dev_disk_root: inputs.dev_disk_root.clone(),
                    devices: &registries.devices,
                    adapters: &registries.adapters,
                    ports: &registries.ports,
                    mounts: inputs.mounts,
                    id_probe: inputs.id_probe,
                    now: inputs.now,
                };
                let result = recompute(&mut device, &ctx);
                if result.keep {
                    let neighbors = result.neighbors_to_recompute;
                    registries.devices.insert(device);
                    signals.push(DaemonSignal::DeviceAdded(id));
                    enqueue_neighbors(registries, &mut queue, neighbors);
                }
            }
            Action::Change if !is_registered => queue.push_back((path, Action::Add)),
            Action::Change => {
                let Some(mut device) = registries.devices.remove(&id) else { continue };
                let ctx = PipelineContext {
                    sysfs: inputs.sysfs,
                    dev_disk_root: inputs.dev_disk_root.clone(),
                    devices: &registries.devices,
                    adapters: &registries.adapters,
                    ports: &registries.ports,
                    mounts: inputs.mounts,
                    id_probe: inputs.id_probe,
                    now: inputs.now,
                };
                let result = recompute(&mut device, &ctx);
                let neighbors = result.neighbors_to_recompute.clone();
                if result.keep {
                    registries.devices.insert(device);
                    if result.changed {
                        signals.push(DaemonSignal::DeviceChanged(id));
                    }
                    enqueue_neighbors(registries, &mut queue, neighbors);
                } else {
                    crate::teardown::force_teardown(registries, inputs, &device);
                    signals.push(DaemonSignal::DeviceRemoved(id));
                    enqueue_neighbors(registries, &mut queue, neighbors);
                }
            }
            Action::Remove if !is_registered => {}
            Action::Remove => {
                let Some(device) = registries.devices.remove(&id) else { continue };
                signals.push(DaemonSignal::DeviceRemoved(id));
                crate::teardown::force_teardown(registries, inputs, &device);
                enqueue_neighbors(registries, &mut queue, device.slaves_objpath.iter().chain(device.holders_objpath.iter()).cloned().collect());
            }
        }
    }
    signals
}

/// Schedule an idle-priority recompute on every neighbor (§4.6 step 6):
/// re-enter the block reconciler as a `Change` on each one, provided it's
/// still registered (it may have just been removed in the same tick).
fn enqueue_neighbors(registries: &Registries, queue: &mut VecDeque<(String, Action)>, neighbors: Vec<ObjectId>) {
    for neighbor in neighbors {
        if let Some(device) = registries.devices.get(&neighbor) {
            queue.push_back((device.native_path.clone(), Action::Change));
        }
    }
}

fn handle_simple_adapter(registries: &mut Registries, sysfs: &SysfsReader, native_path: &str, action: Action) -> Vec<DaemonSignal> {
    let id = ObjectId::from_native_path(native_path);
    match action {
        Action::Remove => {
            if registries.adapters.remove(&id).is_some() {
                vec![DaemonSignal::AdapterRemoved(id)]
            } else {
                Vec::new()
            }
        }
        Action::Add | Action::Change => {
            let is_new = registries.adapters.get(&id).is_none();
            let mut adapter = registries.adapters.remove(&id).unwrap_or_else(|| Adapter::new(native_path, 0));
            adapter.vendor = sysfs.read_string(&format!("{native_path}/vendor"));
            adapter.model = sysfs.read_string(&format!("{native_path}/device"));
            adapter.driver = sysfs
                .read_symlink(&format!("{native_path}/driver"))
                .file_name()
                .unwrap_or_default()
                .to_string();
            registries.adapters.insert(adapter);
            if is_new {
                vec![DaemonSignal::AdapterAdded(id)]
            } else {
                vec![DaemonSignal::AdapterChanged(id)]
            }
        }
    }
}

fn handle_simple_port(registries: &mut Registries, sysfs: &SysfsReader, native_path: &str, action: Action) -> Vec<DaemonSignal> {
    let id = ObjectId::from_native_path(native_path);
    match action {
        Action::Remove => {
            if registries.ports.remove(&id).is_some() {
                vec![DaemonSignal::PortRemoved(id)]
            } else {
                Vec::new()
            }
        }
        Action::Add | Action::Change => {
            let is_new = registries.ports.get(&id).is_none();
            let mut port = registries.ports.remove(&id).unwrap_or_else(|| Port::new(native_path, 0));
            port.connector_type = sysfs.read_string(&format!("{native_path}/connector_type"));
            port.adapter = registries.adapters.iter().find(|a| a.encloses(native_path)).map(|a| a.object_id().clone());
            registries.ports.insert(port);
            if is_new {
                vec![DaemonSignal::PortAdded(id)]
            } else {
                vec![]
            }
        }
    }
}

fn handle_simple_expander(registries: &mut Registries, native_path: &str, action: Action) -> Vec<DaemonSignal> {
    let id = ObjectId::from_native_path(native_path);
    match action {
        Action::Remove => {
            if registries.expanders.remove(&id).is_some() {
                vec![DaemonSignal::ExpanderRemoved(id)]
            } else {
                Vec::new()
            }
        }
        Action::Add | Action::Change => {
            let is_new = registries.expanders.get(&id).is_none();
            let expander = registries.expanders.remove(&id).unwrap_or_else(|| Expander::new(native_path, 0));
            registries.expanders.insert(expander);
            if is_new {
                vec![DaemonSignal::ExpanderAdded(id)]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storaged_pipeline::BlkidProbe;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn empty_store() -> MountFileStore {
        MountFileStore::load(Utf8Path::new("/nonexistent/mounted-fs")).unwrap()
    }

    fn inputs<'a>(
        sysfs: &'a SysfsReader,
        mounts: &'a HashMap<(u32, u32), Vec<(Utf8PathBuf, u32)>>,
        probe: &'a BlkidProbe,
        store: &'a MountFileStore,
        fstab: &'a HashSet<Utf8PathBuf>,
    ) -> ReconcileInputs<'a> {
        ReconcileInputs {
            sysfs,
            dev_disk_root: Utf8PathBuf::from("/dev/disk"),
            id_probe: probe,
            mounts,
            mount_file_store: store,
            fstab_device_files: fstab,
            helper_dir: Utf8Path::new("/usr/libexec/storaged"),
            dm_name_prefix: "storaged",
            now: 1,
        }
    }

    #[test]
    fn test_add_then_registered_device_appears() {
        let (dir, root) = fixture();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        std::fs::write(dir.path().join("block/sda/size"), "2048").unwrap();
        let sysfs = SysfsReader::new(root);
        let mounts = HashMap::new();
        let probe = BlkidProbe;
        let store = empty_store();
        let fstab = HashSet::new();
        let mut registries = Registries::default();
        let signals = handle_event(&mut registries, &inputs(&sysfs, &mounts, &probe, &store, &fstab), "block/sda", Action::Add, Subsystem::Block, false);
        assert!(signals.iter().any(|s| matches!(s, DaemonSignal::DeviceAdded(_))));
        assert!(registries.devices.contains_native_path("block/sda"));
    }

    #[test]
    fn test_remove_of_unregistered_device_is_noop() {
        let (_dir, root) = fixture();
        let sysfs = SysfsReader::new(root);
        let mounts = HashMap::new();
        let probe = BlkidProbe;
        let store = empty_store();
        let fstab = HashSet::new();
        let mut registries = Registries::default();
        let signals = handle_event(&mut registries, &inputs(&sysfs, &mounts, &probe, &store, &fstab), "block/sda", Action::Remove, Subsystem::Block, false);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_change_on_vanished_device_removes_it() {
        let (dir, root) = fixture();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        let sysfs = SysfsReader::new(root.clone());
        let mounts = HashMap::new();
        let probe = BlkidProbe;
        let store = empty_store();
        let fstab = HashSet::new();
        let mut registries = Registries::default();
        handle_event(&mut registries, &inputs(&sysfs, &mounts, &probe, &store, &fstab), "block/sda", Action::Add, Subsystem::Block, false);
        assert!(registries.devices.contains_native_path("block/sda"));

        std::fs::remove_dir_all(dir.path().join("block/sda")).unwrap();
        let signals = handle_event(&mut registries, &inputs(&sysfs, &mounts, &probe, &store, &fstab), "block/sda", Action::Change, Subsystem::Block, false);
        assert!(signals.iter().any(|s| matches!(s, DaemonSignal::DeviceRemoved(_))));
        assert!(!registries.devices.contains_native_path("block/sda"));
    }
}
