//! LVM2 VG/LV operations (§4.12): Start/Stop/SetName/AddPV/RemovePV/LV
//! Create/Remove. The underlying helpers take names, not UUIDs, so UUID
//! arguments are resolved to names by scanning the observed PV property
//! bag.

use std::sync::Arc;
use std::time::Duration;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_registry::DeviceRegistry;
use tokio::sync::Notify;

use crate::error::OpError;
use crate::filesystem::{create as filesystem_create, OpContext};
use crate::partition::wait_for;

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

async fn authorize<A: Authority>(
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    ctx: &OpContext<'_>,
    action: &str,
    operation: &str,
) -> Result<(), OpError> {
    gate.authorize(
        authority,
        inhibitors,
        action,
        &AuthDetails { operation: operation.to_string(), ..Default::default() },
        ctx.allow_interaction,
        Arc::new(Notify::new()),
        Arc::new(Notify::new()),
    )
    .await
    .map_err(OpError::from)
}

/// Resolve a VG's UUID to its current name by scanning every Device's
/// `linux_lvm2_pv_group_{name,uuid}` property pair for a match.
pub fn resolve_vg_name<'a>(devices: &'a DeviceRegistry, vg_uuid: &str) -> Option<&'a str> {
    devices.iter().find(|d| d.lvm2.is_pv && d.lvm2.pv_group_uuid == vg_uuid).map(|d| d.lvm2.pv_group_name.as_str())
}

/// LVM2 VG Start.
pub async fn vg_start<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-vg-start", "lvm2-vg-start").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-vg-start"), vg_name.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-vg-start", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LVM2 VG Stop.
pub async fn vg_stop<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-vg-stop", "lvm2-vg-stop").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-vg-stop"), vg_name.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-vg-stop", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LVM2 VG SetName.
pub async fn vg_set_name<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
    new_name: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-vg-set-name", "lvm2-vg-set-name").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-vg-rename"), vg_name.to_string(), new_name.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-vg-set-name", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LVM2 VG AddPV.
pub async fn vg_add_pv<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
    pv_device_file: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-vg-add-pv", "lvm2-vg-add-pv").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-vg-extend"), vg_name.to_string(), pv_device_file.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-vg-add-pv", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LVM2 VG RemovePV.
pub async fn vg_remove_pv<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
    pv_device_file: &str,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-vg-remove-pv", "lvm2-vg-remove-pv").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-vg-reduce"), vg_name.to_string(), pv_device_file.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-vg-remove-pv", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LV Create: waits up to 10 s for the LV Device to appear, evidenced by
/// a PV's `group_logical_volumes` containing the new LV's uuid, then
/// optionally chains a Filesystem Create.
#[allow(clippy::too_many_arguments)]
pub async fn lv_create<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
    lv_name: &str,
    size_bytes: u64,
    mut find_by_lv_uuid_in_group: impl FnMut() -> Option<(storaged_model::ObjectId, String)>,
) -> Result<storaged_model::ObjectId, OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-lv-create", "lvm2-lv-create").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-lv-create"), vg_name.to_string(), lv_name.to_string(), size_bytes.to_string()];
    let id = storaged_model::ObjectId::escape(vg_name);
    let completion = jobs.run_helper(id, "lvm2-lv-create", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    wait_for(|| find_by_lv_uuid_in_group().map(|(id, _)| id), Duration::from_secs(10))
        .await
        .ok_or_else(|| OpError::Failed(format!("timeout waiting for logical volume {lv_name} to appear")))
}

/// LVM2 LV Remove.
pub async fn lv_remove<A: Authority>(
    lv: &Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.lvm2-lv-remove", "lvm2-lv-remove").await?;
    let argv = vec![helper(ctx, "storaged-helper-lvm2-lv-remove"), lv.lvm2.lv_group_name.clone(), lv.lvm2.lv_name.clone()];
    let completion = jobs.run_helper(lv.object_id.clone(), "lvm2-lv-remove", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// LV Create with an optional chained Filesystem Create on the new LV.
#[allow(clippy::too_many_arguments)]
pub async fn lv_create_with_filesystem<A: Authority>(
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    vg_name: &str,
    lv_name: &str,
    size_bytes: u64,
    find_by_lv_uuid_in_group: impl FnMut() -> Option<(storaged_model::ObjectId, String)>,
    fstype: Option<&str>,
    mut lookup_device: impl FnMut(&storaged_model::ObjectId) -> Option<Device>,
) -> Result<storaged_model::ObjectId, OpError> {
    let lv_id = lv_create(ctx, gate, authority, inhibitors, jobs, vg_name, lv_name, size_bytes, find_by_lv_uuid_in_group).await?;
    if let Some(fstype) = fstype {
        let mut lv_device = lookup_device(&lv_id).ok_or_else(|| OpError::Internal(anyhow::anyhow!("new LV not found in registry")))?;
        filesystem_create(
            &mut lv_device,
            ctx,
            gate,
            authority,
            inhibitors,
            jobs,
            fstype,
            &[],
            None,
            crate::filesystem::read_supported_filesystems,
            "",
            |_| None,
            |_| None,
        )
        .await?;
    }
    Ok(lv_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storaged_model::Device;

    #[test]
    fn test_resolve_vg_name_matches_uuid() {
        let mut registry = DeviceRegistry::new();
        let mut d = Device::new("block/sda1", 0);
        d.lvm2.is_pv = true;
        d.lvm2.pv_group_uuid = "vg-uuid-1".to_string();
        d.lvm2.pv_group_name = "myvg".to_string();
        registry.insert(d);
        assert_eq!(resolve_vg_name(&registry, "vg-uuid-1"), Some("myvg"));
        assert_eq!(resolve_vg_name(&registry, "nonexistent"), None);
    }
}
