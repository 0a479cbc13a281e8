//! MD Start / Stop / Check / Repair / Add-Spare / Remove-Component /
//! Expand / Create (§4.12).

use std::sync::Arc;
use std::time::Duration;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_registry::DeviceRegistry;
use tokio::sync::Notify;

use crate::busy::is_busy;
use crate::error::OpError;
use crate::filesystem::OpContext;
use crate::partition::wait_for;

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

fn details(device: &Device, operation: &str) -> AuthDetails {
    AuthDetails {
        operation: operation.to_string(),
        subject_device_file: device.identity.device_file.to_string(),
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

/// Scan kernel md slots `/dev/md<N>` for the first with no `array_state`
/// file, or one reporting `"clear"`, to find a free minor number for
/// Start/Create. `slot_state` abstracts the sysfs read so this stays
/// unit-testable.
pub fn first_free_md_minor(slot_state: impl Fn(u32) -> Option<String>) -> u32 {
    (0..).find(|&n| slot_state(n).map(|s| s == "clear").unwrap_or(true)).expect("unbounded search")
}

/// MD Start.
pub async fn start<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    minor: u32,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-start", device, "md-start").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-start"), format!("md{minor}")];
    let completion = jobs.run_helper(device.object_id.clone(), "md-start", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// MD Stop.
pub async fn stop<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
) -> Result<(), OpError> {
    if is_busy(device, jobs, devices, false) {
        return Err(OpError::Busy);
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-stop", device, "md-stop").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-stop"), device.identity.device_file.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "md-stop", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdCheckResult {
    pub mismatch_cnt: u64,
}

pub async fn check<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<MdCheckResult, OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-check", device, "md-check").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-check"), device.identity.device_file.to_string()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "md-check", ctx.caller_uid, &argv, None, Some("progress"), true)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    let mismatch_cnt = completion.stdout.trim().parse().unwrap_or(0);
    Ok(MdCheckResult { mismatch_cnt })
}

pub async fn repair<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-repair", device, "md-repair").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-repair"), device.identity.device_file.to_string()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "md-repair", ctx.caller_uid, &argv, None, Some("progress"), true)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// MD Add Spare.
pub async fn add_spare<A: Authority>(
    array: &mut Device,
    spare_device_file: &str,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-add-spare", array, "md-add-spare").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-add-spare"), array.identity.device_file.to_string(), spare_device_file.to_string()];
    let completion = jobs.run_helper(array.object_id.clone(), "md-add-spare", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// MD Remove-Component: hot-removes, waits for the slave to stop being
/// busy, then scrubs it with an empty Filesystem Create.
pub async fn remove_component<A: Authority>(
    array: &mut Device,
    component: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
    wipe_argv0: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-remove-component", array, "md-remove-component").await?;
    let argv = vec![helper(ctx, "storaged-helper-md-remove-component"), array.identity.device_file.to_string(), component.identity.device_file.to_string()];
    let completion = jobs.run_helper(array.object_id.clone(), "md-remove-component", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    let freed = wait_for(
        || if !is_busy(component, jobs, devices, false) { Some(()) } else { None },
        Duration::from_secs(10),
    )
    .await;
    freed.ok_or_else(|| OpError::Failed("timeout waiting for removed component to become idle".to_string()))?;

    let scrub = vec![helper(ctx, wipe_argv0), component.identity.device_file.to_string()];
    let completion = jobs.run_helper(component.object_id.clone(), "md-remove-component-scrub", ctx.caller_uid, &scrub, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// MD Expand.
pub async fn expand<A: Authority>(
    array: &mut Device,
    new_members: &[String],
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.md-expand", array, "md-expand").await?;
    let mut argv = vec![helper(ctx, "storaged-helper-md-expand"), array.identity.device_file.to_string()];
    argv.extend(new_members.iter().cloned());
    let completion = jobs
        .run_helper(array.object_id.clone(), "md-expand", ctx.caller_uid, &argv, None, Some("progress"), true)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
/// MD Create.
pub async fn create<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    level: &str,
    name: &str,
    members: &[String],
    minor: u32,
) -> Result<(), OpError> {
    gate.authorize(
        authority,
        inhibitors,
        "org.storaged.md-create",
        &AuthDetails { operation: "md-create".to_string(), ..Default::default() },
        ctx.allow_interaction,
        Arc::new(Notify::new()),
        Arc::new(Notify::new()),
    )
    .await?;
    let mut argv = vec![helper(ctx, "storaged-helper-md-create"), format!("md{minor}"), level.to_string(), name.to_string()];
    argv.extend(members.iter().cloned());
    let placeholder_id = storaged_model::ObjectId::from_native_path(&format!("block/md{minor}"));
    let completion = jobs.run_helper(placeholder_id, "md-create", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_free_md_minor_skips_active_slots() {
        let minor = first_free_md_minor(|n| match n {
            0 => Some("active".to_string()),
            1 => Some("clear".to_string()),
            _ => None,
        });
        assert_eq!(minor, 1);
    }

    #[test]
    fn test_first_free_md_minor_on_empty_kernel() {
        assert_eq!(first_free_md_minor(|_| None), 0);
    }
}
