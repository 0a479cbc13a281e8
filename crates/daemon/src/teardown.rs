//! Force-Teardown (spec.md §4.11): triggered by the Reconciliation Core on
//! an explicit kernel `remove`, or on a media-available→false transition
//! for a removable device. Everything here is best-effort and
//! non-blocking — §4.11 says it runs concurrently with the removal
//! signal, so failures are logged and swallowed rather than propagated;
//! there is no caller left to report them to by the time this runs.

use storaged_model::Device;

use crate::reconcile::{Registries, ReconcileInputs};

/// Spawn `argv[0]` with the remaining args, detached, ignoring the
/// outcome beyond a trace line. Mirrors `storaged-ops`'s helper-invocation
/// shape but outside the Job Engine: a force-teardown has no caller to
/// report progress or exit status to.
fn spawn_detached(helper_dir: &camino::Utf8Path, name: &str, args: &[String]) {
    let path = helper_dir.join(name);
    match std::process::Command::new(path.as_str()).args(args).spawn() {
        Ok(_) => tracing::debug!(helper = name, "force-teardown helper spawned"),
        Err(error) => tracing::warn!(helper = name, %error, "force-teardown helper failed to start"),
    }
}

/// Does `dm_name` match `<prefix>-uuid-<UUID>-uid<UID>`, the daemon's own
/// LUKS cleartext naming convention (§4.11, §4.12 LUKS Unlock)?
fn is_own_cleartext_name(dm_name: &str, prefix: &str) -> bool {
    let Some(rest) = dm_name.strip_prefix(prefix) else { return false };
    let Some(rest) = rest.strip_prefix("-uuid-") else { return false };
    let Some((_uuid, uid_part)) = rest.rsplit_once("-uid") else { return false };
    !uid_part.is_empty() && uid_part.bytes().all(|b| b.is_ascii_digit())
}

/// Run §4.11's teardown policy for `device`, which has just been removed
/// from the registries (or had media go away). Recurses onto a LUKS
/// ciphertext's live cleartext holder before closing the holder itself.
pub fn force_teardown(registries: &Registries, inputs: &ReconcileInputs, device: &Device) {
    let has_daemon_mount = inputs.mount_file_store.has_device(&device.identity.device_file);
    let in_fstab = inputs.fstab_device_files.contains(&device.identity.device_file);
    if device.mount.is_mounted && (has_daemon_mount || in_fstab) {
        for mount_path in &device.mount.mount_paths {
            spawn_detached(inputs.helper_dir, "storaged-helper-unmount", &[mount_path.to_string(), "--lazy".to_string()]);
        }
    }

    if device.luks.is_luks {
        if let Some(holder_id) = &device.luks.holder {
            if let Some(holder) = registries.devices.get(holder_id) {
                if is_own_cleartext_name(&holder.dm_name, inputs.dm_name_prefix) {
                    force_teardown(registries, inputs, holder);
                    spawn_detached(inputs.helper_dir, "storaged-helper-luks-close", &[holder.dm_name.clone()]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_own_cleartext_name_matches() {
        assert!(is_own_cleartext_name("storaged-uuid-1234-5678-uid1000", "storaged"));
        assert!(!is_own_cleartext_name("storaged-uuid-1234-5678-uid", "storaged"));
        assert!(!is_own_cleartext_name("cryptsetup-uuid-1234-uid1000", "storaged"));
        assert!(!is_own_cleartext_name("storaged-uuid-1234-uidabc", "storaged"));
    }

    #[test]
    fn test_force_teardown_noop_for_plain_unmounted_device() {
        let registries = Registries::default();
        let store = storaged_mount::MountFileStore::load(camino::Utf8Path::new("/nonexistent")).unwrap();
        let fstab = std::collections::HashSet::new();
        let inputs = ReconcileInputs {
            sysfs: &storaged_sysfs::SysfsReader::new("/nonexistent"),
            dev_disk_root: camino::Utf8PathBuf::from("/dev/disk"),
            id_probe: &storaged_pipeline::BlkidProbe,
            mounts: &std::collections::HashMap::new(),
            mount_file_store: &store,
            fstab_device_files: &fstab,
            helper_dir: camino::Utf8Path::new("/nonexistent/helpers"),
            dm_name_prefix: "storaged",
            now: 1,
        };
        let device = Device::new("block/sda", 0);
        force_teardown(&registries, &inputs, &device);
    }
}
