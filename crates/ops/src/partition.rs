//! Partition Delete / Create, Partition Table Create (§4.12).

use std::sync::Arc;
use std::time::Duration;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_registry::DeviceRegistry;
use tokio::sync::Notify;

use crate::busy::{extended_partition_has_logical_partitions, is_busy};
use crate::error::OpError;
use crate::filesystem::OpContext;

const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

fn details(device: &Device, operation: &str) -> AuthDetails {
    AuthDetails {
        operation: operation.to_string(),
        subject_device_file: device.identity.device_file.to_string(),
        is_partition: device.partition.is_partition,
        partition_number: device.partition.number,
        ..Default::default()
    }
}

async fn authorize<A: Authority>(
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    ctx: &OpContext<'_>,
    action: &str,
    device: &Device,
    operation: &str,
) -> Result<(), OpError> {
    gate.authorize(
        authority,
        inhibitors,
        action,
        &details(device, operation),
        ctx.allow_interaction,
        Arc::new(Notify::new()),
        Arc::new(Notify::new()),
    )
    .await
    .map_err(OpError::from)
}

/// Wait, polling `lookup` at a fixed cadence, for a predicate to hold,
/// up to `timeout`. Models §5's "convergence wait" as a plain async loop
/// rather than a registry-signal future, since this crate doesn't own
/// the registry's change notifications — the daemon crate wires those.
pub async fn wait_for<T>(mut lookup: impl FnMut() -> Option<T>, timeout: Duration) -> Option<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(v) = lookup() {
            return Some(v);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Partition Delete: reject deleting an extended mbr partition while
/// logical partitions exist.
pub async fn delete<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
) -> Result<(), OpError> {
    if !device.partition.is_partition {
        return Err(OpError::NotSupported("not a partition".to_string()));
    }
    if extended_partition_has_logical_partitions(device, devices) {
        return Err(OpError::NotSupported("extended partition has logical partitions".to_string()));
    }
    if is_busy(device, jobs, devices, false) {
        return Err(OpError::Busy);
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.partition-delete", device, "partition-delete").await?;
    let Some(table_file) = device.partition.slave.as_ref().and_then(|id| devices.get(id)).map(|t| t.identity.device_file.to_string()) else {
        return Err(OpError::Internal(anyhow::anyhow!("partition's table slave not found")));
    };
    let argv = vec![helper(ctx, "storaged-helper-delete-partition"), device.identity.device_file.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "partition-delete", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    // A kernel-change event on the enclosing table is generated by the
    // caller after this returns (§4.12: normalized to always be the
    // handler's job, not the helper's).
    let _ = table_file;
    Ok(())
}

/// Partition Create: parses the helper's two printed lines (offset, the
/// new partition's minor device path) to discover the created device,
/// waits up to 10 s for it to appear with matching offset/size, then — if
/// `fstype` is non-empty — chains a Filesystem Create on it (§4.12).
#[allow(clippy::too_many_arguments)]
pub async fn create<A: Authority>(
    table_device: &Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    offset: u64,
    size: u64,
    part_type: &str,
    label: &str,
    flags: &[String],
    mut find_by_offset_size: impl FnMut(u64, u64) -> Option<Device>,
    fstype: &str,
    fs_options: &[String],
    supported_filesystems: impl Fn() -> std::collections::HashSet<String>,
    dm_prefix: &str,
    find_luks_cleartext: impl FnMut(&str) -> Option<storaged_model::ObjectId>,
    lookup_luks_device: impl FnMut(&storaged_model::ObjectId) -> Option<Device>,
) -> Result<(u64, String), OpError> {
    if !table_device.partition_table.is_partition_table {
        return Err(OpError::NotSupported("not a partition table".to_string()));
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.partition-create", table_device, "partition-create").await?;
    let argv = vec![
        helper(ctx, "storaged-helper-create-partition"),
        table_device.identity.device_file.to_string(),
        offset.to_string(),
        size.to_string(),
        part_type.to_string(),
        label.to_string(),
        flags.join(","),
    ];
    let completion = jobs.run_helper(table_device.object_id.clone(), "partition-create", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    let mut lines = completion.stdout.lines();
    let reported_offset: u64 = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(offset);
    let device_file = lines.next().map(|l| l.trim().to_string()).ok_or_else(|| OpError::Failed("helper produced no device path".to_string()))?;

    let mut new_device = wait_for(|| find_by_offset_size(reported_offset, size), CONVERGENCE_TIMEOUT)
        .await
        .ok_or_else(|| OpError::Failed(format!("timeout waiting for partition to appear at offset={reported_offset},size={size}")))?;

    if !fstype.is_empty() {
        crate::filesystem::create(
            &mut new_device,
            ctx,
            gate,
            authority,
            inhibitors,
            jobs,
            fstype,
            fs_options,
            None,
            supported_filesystems,
            dm_prefix,
            find_luks_cleartext,
            lookup_luks_device,
        )
        .await?;
    }

    Ok((reported_offset, device_file))
}

/// Partition Table Create: waits up to 10 s for `partition-table-scheme`
/// to converge to `scheme`.
pub async fn create_table<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    scheme: &str,
    mut recompute_and_check: impl FnMut(&mut Device) -> bool,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.partition-table-create", device, "partition-table-create").await?;
    let argv = vec![helper(ctx, "storaged-helper-create-partition-table"), device.identity.device_file.to_string(), scheme.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "partition-table-create", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    let converged = wait_for(
        || {
            if recompute_and_check(device) {
                Some(())
            } else {
                None
            }
        },
        CONVERGENCE_TIMEOUT,
    )
    .await;
    converged.ok_or_else(|| OpError::Failed(format!("timeout waiting for partition-table-scheme={scheme}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_immediate_success() {
        let r = wait_for(|| Some(42), CONVERGENCE_TIMEOUT).await;
        assert_eq!(r, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let r = wait_for(|| None::<()>, Duration::from_millis(500)).await;
        assert_eq!(r, None);
    }
}
