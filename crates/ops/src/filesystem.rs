//! Mount, Unmount, List Open Files, Filesystem Check, Filesystem Create
//! (§4.12).

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::{Device, IdUsage};
use storaged_utils::SecretBytes;
use tokio::sync::Notify;

use crate::busy::is_busy;
use crate::error::{map_known_exit_code, OpError};
use crate::options::{default_options, validate_options};
use crate::partition::wait_for;

/// Read `/proc/filesystems`, returning the set of kernel-registered fstype
/// names (both the built-in and `nodev` entries carry a name in the second
/// column). Used as a cheap pre-check before Filesystem Create bothers
/// spawning `mkfs.<type>` at all.
pub fn read_supported_filesystems() -> std::collections::HashSet<String> {
    std::fs::read_to_string("/proc/filesystems")
        .map(|contents| contents.lines().filter_map(|line| line.split_whitespace().last()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// A `luks_encrypt=` create only shells out to `cryptsetup`, not `mkfs`,
/// so the kernel-driver pre-check doesn't apply to it.
fn needs_kernel_filesystem_support(options: &[String]) -> bool {
    !options.iter().any(|o| o.starts_with("luks_encrypt="))
}

/// Everything a handler needs beyond the Device itself: where helpers
/// live, the caller's identity, and the shared engines.
pub struct OpContext<'a> {
    pub helper_dir: &'a Utf8Path,
    pub caller_uid: u32,
    pub caller_gid: u32,
    pub allow_interaction: bool,
}

impl<'a> OpContext<'a> {
    /// Build a context from just the caller's uid, resolving their primary
    /// gid from the system user database (matches `daemon.c`'s use of the
    /// caller's pwent, not a transport-supplied gid).
    pub fn for_caller_uid(helper_dir: &'a Utf8Path, caller_uid: u32, allow_interaction: bool) -> Self {
        let caller_gid = uzers::get_user_by_uid(caller_uid).map(|u| u.primary_group_id()).unwrap_or(caller_uid);
        OpContext { helper_dir, caller_uid, caller_gid, allow_interaction }
    }
}

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

async fn authorize<A: Authority>(
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    ctx: &OpContext<'_>,
    action: &str,
    details: &AuthDetails,
    subject_removed: Arc<Notify>,
) -> Result<(), OpError> {
    gate.authorize(
        authority,
        inhibitors,
        action,
        details,
        ctx.allow_interaction,
        Arc::new(Notify::new()),
        subject_removed,
    )
    .await
    .map_err(OpError::from)
}

fn subject_details(device: &Device, operation: &str) -> AuthDetails {
    AuthDetails {
        operation: operation.to_string(),
        subject_device_file: device.identity.device_file.to_string(),
        is_partition: device.partition.is_partition,
        partition_number: device.partition.number,
        ..Default::default()
    }
}

/// Compose a mount-point candidate under `/media` from `id-label`/`id-uuid`,
/// with `/` remapped to `_`, uniquified by appending underscores.
pub fn compose_mount_point(device: &Device, exists: impl Fn(&Utf8Path) -> bool) -> Utf8PathBuf {
    let base_name = if !device.fs_id.id_label.is_empty() {
        device.fs_id.id_label.clone()
    } else if !device.fs_id.id_uuid.is_empty() {
        device.fs_id.id_uuid.clone()
    } else {
        device.object_id.as_str().to_string()
    };
    let base_name = base_name.replace('/', "_");
    let mut name = base_name;
    let mut candidate = Utf8PathBuf::from("/media").join(&name);
    while exists(&candidate) {
        name.push('_');
        candidate = Utf8PathBuf::from("/media").join(&name);
    }
    candidate
}

/// `filesystem_mount(fstype, options[])`.
#[allow(clippy::too_many_arguments)]
pub async fn mount<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    fstype: &str,
    user_options: &[String],
    in_fstab: bool,
    exists: impl Fn(&Utf8Path) -> bool,
    mkdir: impl FnOnce(&Utf8Path) -> std::io::Result<()>,
    rmdir: impl FnOnce(&Utf8Path),
) -> Result<Utf8PathBuf, OpError> {
    if device.fs_id.usage != IdUsage::Filesystem && !(matches!(fstype, "auto" | "") && device.fs_id.usage == IdUsage::Empty) {
        return Err(OpError::NotSupported("device does not carry a filesystem".to_string()));
    }
    let devices = storaged_registry::DeviceRegistry::new();
    if is_busy(device, jobs, &devices, false) {
        return Err(OpError::Busy);
    }
    authorize(
        gate,
        authority,
        inhibitors,
        ctx,
        "org.storaged.filesystem-mount",
        &subject_details(device, "filesystem-mount"),
        Arc::new(Notify::new()),
    )
    .await?;

    if in_fstab {
        let argv = vec![helper(ctx, "storaged-helper-fstab-mount"), device.identity.device_file.to_string()];
        let completion = jobs
            .run_helper(device.object_id.clone(), "filesystem-mount", ctx.caller_uid, &argv, None, None, false)
            .await?;
        if !completion.success() {
            return Err(map_known_exit_code(exit_code(&completion), "mount").unwrap_or(OpError::Failed(completion.stderr)));
        }
        return Ok(device.mount.mount_paths.first().cloned().unwrap_or_default());
    }

    let effective_fstype = if device.fs_id.id_type.is_empty() { "auto" } else { device.fs_id.id_type.as_str() };
    validate_options(effective_fstype, user_options, ctx.caller_uid, ctx.caller_gid)?;

    let mount_point = compose_mount_point(device, exists);
    let created_dir = mkdir(&mount_point).is_ok();

    let mut options: Vec<String> = default_options(effective_fstype)
        .into_iter()
        .map(|opt| match opt.as_str() {
            "uid=" => format!("uid={}", ctx.caller_uid),
            "gid=" => format!("gid={}", ctx.caller_gid),
            other => other.to_string(),
        })
        .collect();
    options.extend(user_options.iter().cloned());
    options.push("uhelper=storaged".to_string());

    let argv = vec![
        helper(ctx, "storaged-helper-mount"),
        device.identity.device_file.to_string(),
        mount_point.to_string(),
        effective_fstype.to_string(),
        options.join(","),
    ];
    let completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-mount", ctx.caller_uid, &argv, None, None, false)
        .await?;
    if !completion.success() {
        if created_dir {
            rmdir(&mount_point);
        }
        return Err(map_known_exit_code(exit_code(&completion), "mount").unwrap_or(OpError::Failed(completion.stderr)));
    }
    Ok(mount_point)
}

/// `filesystem_unmount(options[])`.
pub async fn unmount<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    options: &[String],
    mounted_by_uid: Option<u32>,
    in_fstab: bool,
    recorded_by_us: bool,
) -> Result<(), OpError> {
    for opt in options {
        if opt != "force" {
            return Err(OpError::InvalidOption(opt.clone()));
        }
    }
    let action = if recorded_by_us || mounted_by_uid == Some(ctx.caller_uid) {
        "org.storaged.filesystem-unmount"
    } else if !in_fstab {
        "org.storaged.filesystem-unmount-others"
    } else {
        "org.storaged.filesystem-unmount"
    };
    authorize(
        gate,
        authority,
        inhibitors,
        ctx,
        action,
        &subject_details(device, "filesystem-unmount"),
        Arc::new(Notify::new()),
    )
    .await?;

    let mount_path = device.mount.mount_paths.first().cloned().ok_or_else(|| OpError::NotSupported("not mounted".to_string()))?;
    let lazy = options.iter().any(|o| o == "force");
    let helper_name = if in_fstab && !recorded_by_us { "storaged-helper-fstab-unmount" } else { "storaged-helper-unmount" };
    let mut argv = vec![helper(ctx, helper_name), mount_path.to_string()];
    if lazy {
        argv.push("--lazy".to_string());
    }
    let completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-unmount", ctx.caller_uid, &argv, None, None, false)
        .await?;
    if !completion.success() {
        return Err(map_known_exit_code(exit_code(&completion), "umount").unwrap_or(OpError::Failed(completion.stderr)));
    }
    Ok(())
}

/// `filesystem_list_open_files()`. `pid_uid`/`pid_cmdline` resolve a pid
/// via `/proc`-style lookups, injected so this stays unit-testable.
pub async fn list_open_files<A: Authority>(
    device: &Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    pid_uid: impl Fn(u32) -> Option<u32>,
    pid_cmdline: impl Fn(u32) -> Option<String>,
) -> Result<Vec<(u32, Option<u32>, Option<String>)>, OpError> {
    authorize(gate, authority, inhibitors, ctx, "", &subject_details(device, "filesystem-list-open-files"), Arc::new(Notify::new())).await?;
    let mount_path = device.mount.mount_paths.first().cloned().ok_or_else(|| OpError::NotSupported("not mounted".to_string()))?;
    let argv = vec![helper(ctx, "storaged-helper-list-open-files"), mount_path.to_string()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-list-open-files", ctx.caller_uid, &argv, None, None, false)
        .await?;
    let code = exit_code(&completion);
    if code != 0 && code != 1 {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(completion
        .stdout
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .map(|pid| (pid, pid_uid(pid), pid_cmdline(pid)))
        .collect())
}

/// Filesystem Check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub is_clean: bool,
}

pub async fn check<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<CheckResult, OpError> {
    if device.mount.is_mounted {
        return Err(OpError::NotSupported("filesystem is mounted".to_string()));
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.filesystem-check", &subject_details(device, "filesystem-check"), Arc::new(Notify::new())).await?;
    let argv = vec![helper(ctx, "storaged-helper-fsck"), device.identity.device_file.to_string(), device.fs_id.id_type.clone()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-check", ctx.caller_uid, &argv, None, None, false)
        .await?;
    let rc = exit_code(&completion);
    let is_clean = rc == 0 || (rc & 1 != 0 && rc & 4 == 0);
    Ok(CheckResult { is_clean })
}

/// `filesystem_create(fstype, options[])`, including the `luks_encrypt=`
/// magic-option path (§4.12, §9 open question: kept as-is): luksFormat,
/// luksOpen, wait up to 10 s for the cleartext mapping to appear, then
/// `mkfs` the cleartext with `plain_options` — the same wait-then-chain
/// shape as [`crate::lvm2::lv_create_with_filesystem`].
#[allow(clippy::too_many_arguments)]
pub async fn create<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    fstype: &str,
    options: &[String],
    label: Option<&str>,
    supported_filesystems: impl Fn() -> std::collections::HashSet<String>,
    dm_prefix: &str,
    mut find_luks_cleartext: impl FnMut(&str) -> Option<storaged_model::ObjectId>,
    mut lookup_device: impl FnMut(&storaged_model::ObjectId) -> Option<Device>,
) -> Result<(), OpError> {
    let devices = storaged_registry::DeviceRegistry::new();
    if is_busy(device, jobs, &devices, true) {
        return Err(OpError::Busy);
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.filesystem-create", &subject_details(device, "filesystem-create"), Arc::new(Notify::new())).await?;

    if needs_kernel_filesystem_support(options) && !supported_filesystems().contains(fstype) {
        return Err(OpError::FilesystemToolsMissing(fstype.to_string()));
    }

    let mut plain_options = Vec::new();
    let mut luks_passphrase = None;
    for opt in options {
        if let Some(passphrase) = opt.strip_prefix("luks_encrypt=") {
            luks_passphrase = Some(passphrase);
        } else {
            plain_options.push(opt.clone());
        }
    }

    let Some(passphrase) = luks_passphrase else {
        return run_mkfs(device, ctx, jobs, fstype, &plain_options, label).await;
    };

    let format_argv = vec![helper(ctx, "storaged-helper-luks-format"), device.identity.device_file.to_string()];
    let format_secret = SecretBytes::new(passphrase.as_bytes().to_vec());
    let format_completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-create", ctx.caller_uid, &format_argv, Some(format_secret), None, false)
        .await?;
    if !format_completion.success() {
        return Err(OpError::Failed(format_completion.stderr));
    }

    let dm_name = crate::luks::cleartext_dm_name(dm_prefix, &device.fs_id.id_uuid, ctx.caller_uid);
    let open_argv = vec![helper(ctx, "storaged-helper-luks-open"), device.identity.device_file.to_string(), dm_name.clone()];
    let open_secret = SecretBytes::new(passphrase.as_bytes().to_vec());
    let open_completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-create", ctx.caller_uid, &open_argv, Some(open_secret), None, false)
        .await?;
    if !open_completion.success() {
        return Err(OpError::Failed(open_completion.stderr));
    }

    let cleartext_id = wait_for(|| find_luks_cleartext(&dm_name), Duration::from_secs(10))
        .await
        .ok_or_else(|| OpError::Failed(format!("timeout waiting for cleartext device {dm_name}")))?;
    let mut cleartext_device =
        lookup_device(&cleartext_id).ok_or_else(|| OpError::Internal(anyhow::anyhow!("cleartext device {cleartext_id:?} not found in registry")))?;
    run_mkfs(&mut cleartext_device, ctx, jobs, fstype, &plain_options, label).await
}

async fn run_mkfs(
    device: &mut Device,
    ctx: &OpContext<'_>,
    jobs: &mut JobEngine,
    fstype: &str,
    plain_options: &[String],
    label: Option<&str>,
) -> Result<(), OpError> {
    validate_options(fstype, plain_options, ctx.caller_uid, ctx.caller_gid)?;
    let mut argv = vec![helper(ctx, "storaged-helper-mkfs"), device.identity.device_file.to_string(), fstype.to_string()];
    if let Some(label) = label {
        argv.push(format!("label={label}"));
    }
    argv.extend(plain_options.iter().cloned());
    let completion = jobs
        .run_helper(device.object_id.clone(), "filesystem-create", ctx.caller_uid, &argv, None, None, false)
        .await?;
    if !completion.success() {
        return Err(map_known_exit_code(exit_code(&completion), "mkfs").unwrap_or(OpError::Failed(completion.stderr)));
    }
    Ok(())
}

fn exit_code(completion: &storaged_jobs::JobCompletion) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    completion.exit_status.map(|s| s.code().unwrap_or_else(|| s.signal().unwrap_or(-1))).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_mount_point_prefers_label() {
        let mut d = Device::new("block/sdb1", 0);
        d.fs_id.id_label = "DATA".to_string();
        let p = compose_mount_point(&d, |_| false);
        assert_eq!(p, Utf8PathBuf::from("/media/DATA"));
    }

    #[test]
    fn test_compose_mount_point_remaps_slash_and_uniquifies() {
        let mut d = Device::new("block/sdb1", 0);
        d.fs_id.id_label = "a/b".to_string();
        let p = compose_mount_point(&d, |p| p == Utf8Path::new("/media/a_b"));
        assert_eq!(p, Utf8PathBuf::from("/media/a_b_"));
    }

    #[test]
    fn test_compose_mount_point_accumulates_underscores_past_first_collision() {
        let mut d = Device::new("block/sdb1", 0);
        d.fs_id.id_label = "a".to_string();
        let p = compose_mount_point(&d, |p| p == Utf8Path::new("/media/a") || p == Utf8Path::new("/media/a_"));
        assert_eq!(p, Utf8PathBuf::from("/media/a__"));
    }

    #[test]
    fn test_mount_default_options_fill_caller_uid_gid_placeholders() {
        let defaults = default_options("vfat");
        let filled: Vec<String> = defaults
            .into_iter()
            .map(|opt| match opt.as_str() {
                "uid=" => "uid=1000".to_string(),
                "gid=" => "gid=1000".to_string(),
                other => other.to_string(),
            })
            .collect();
        assert!(filled.contains(&"uid=1000".to_string()));
        assert!(filled.contains(&"gid=1000".to_string()));
        assert!(!filled.iter().any(|o| o == "uid=" || o == "gid="));
    }

    #[test]
    fn test_needs_kernel_filesystem_support_skips_luks_encrypt() {
        assert!(!needs_kernel_filesystem_support(&["luks_encrypt=hunter2".to_string()]));
        assert!(needs_kernel_filesystem_support(&["label=x".to_string()]));
        assert!(needs_kernel_filesystem_support(&[]));
    }

    #[test]
    fn test_check_result_dirty_bits() {
        let clean = |rc: i32| rc == 0 || (rc & 1 != 0 && rc & 4 == 0);
        assert!(clean(0));
        assert!(clean(1));
        assert!(!clean(4));
        assert!(!clean(5));
    }
}
