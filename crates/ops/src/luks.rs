//! LUKS Unlock / Lock / Change Passphrase (§4.12).

use std::sync::Arc;
use std::time::Duration;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_utils::SecretBytes;
use tokio::sync::Notify;

use crate::error::OpError;
use crate::filesystem::OpContext;
use crate::partition::wait_for;

const UNLOCK_TIMEOUT: Duration = Duration::from_secs(15);

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

/// The daemon's device-mapper naming convention for cleartext mappings,
/// used both to derive the mapping name on Unlock and to recognize it
/// on Lock / force-teardown.
pub fn cleartext_dm_name(prefix: &str, id_uuid: &str, caller_uid: u32) -> String {
    format!("{prefix}-uuid-{id_uuid}-uid{caller_uid}")
}

/// Parse a dm name produced by [`cleartext_dm_name`] back into its uid
/// suffix, or `None` if it doesn't follow the convention.
pub fn parse_cleartext_uid(prefix: &str, dm_name: &str) -> Option<u32> {
    dm_name.strip_prefix(&format!("{prefix}-uuid-"))?.rsplit_once("-uid")?.1.parse().ok()
}

/// LUKS Unlock: derive the mapping name, reject if a cleartext already
/// exists, pass the secret on stdin (zeroed on drop), then wait up to
/// 15 s for the cleartext Device to appear.
pub async fn unlock<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    dm_prefix: &str,
    passphrase: SecretBytes,
    mut find_cleartext: impl FnMut(&str) -> Option<storaged_model::ObjectId>,
) -> Result<storaged_model::ObjectId, OpError> {
    if device.luks.holder.is_some() {
        return Err(OpError::NotSupported("already unlocked".to_string()));
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.luks-unlock", device, "luks-unlock").await?;
    let dm_name = cleartext_dm_name(dm_prefix, &device.fs_id.id_uuid, ctx.caller_uid);
    let argv = vec![helper(ctx, "storaged-helper-luks-open"), device.identity.device_file.to_string(), dm_name.clone()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "luks-unlock", ctx.caller_uid, &argv, Some(passphrase), None, false)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    wait_for(|| find_cleartext(&dm_name), UNLOCK_TIMEOUT)
        .await
        .ok_or_else(|| OpError::Failed(format!("timeout waiting for cleartext device {dm_name}")))
}

/// LUKS Lock: requires the cleartext's dm name follow the daemon
/// convention, parses the uid suffix, and requires either uid match or
/// the "lock others" authorization.
pub async fn lock<A: Authority>(
    ciphertext: &Device,
    cleartext_dm_name_actual: &str,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    dm_prefix: &str,
    mut cleartext_is_gone: impl FnMut() -> bool,
) -> Result<(), OpError> {
    let owner_uid =
        parse_cleartext_uid(dm_prefix, cleartext_dm_name_actual).ok_or_else(|| OpError::NotSupported("cleartext was not created by this daemon".to_string()))?;
    let action = if owner_uid == ctx.caller_uid { "org.storaged.luks-lock" } else { "org.storaged.luks-lock-others" };
    authorize(gate, authority, inhibitors, ctx, action, ciphertext, "luks-lock").await?;

    jobs.local_start(ciphertext.object_id.clone(), "luks-lock", ctx.caller_uid)?;
    let argv = vec![helper(ctx, "storaged-helper-luks-close"), cleartext_dm_name_actual.to_string()];
    let completion = jobs.run_helper(ciphertext.object_id.clone(), "luks-lock-close", ctx.caller_uid, &argv, None, None, false).await;
    let completion = match completion {
        Ok(c) => c,
        Err(e) => {
            jobs.local_end(&ciphertext.object_id);
            return Err(e.into());
        }
    };
    if !completion.success() {
        jobs.local_end(&ciphertext.object_id);
        return Err(OpError::Failed(completion.stderr));
    }
    let gone = wait_for(|| if cleartext_is_gone() { Some(()) } else { None }, UNLOCK_TIMEOUT).await;
    jobs.local_end(&ciphertext.object_id);
    gone.ok_or_else(|| OpError::Failed("timeout waiting for cleartext device removal".to_string()))
}

/// LUKS Change Passphrase: metadata-only, may run while mounted.
pub async fn change_passphrase<A: Authority>(
    device: &Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    old_passphrase: SecretBytes,
    new_passphrase: SecretBytes,
) -> Result<(), OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.luks-change-passphrase", device, "luks-change-passphrase").await?;
    let mut combined = old_passphrase.as_bytes().to_vec();
    combined.push(b'\n');
    combined.extend_from_slice(new_passphrase.as_bytes());
    let argv = vec![helper(ctx, "storaged-helper-luks-change-key"), device.identity.device_file.to_string()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "luks-change-passphrase", ctx.caller_uid, &argv, Some(SecretBytes::new(combined)), None, false)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleartext_dm_name_roundtrip() {
        let name = cleartext_dm_name("storaged-luks", "11111111-2222-3333-4444-555555555555", 1000);
        assert_eq!(name, "storaged-luks-uuid-11111111-2222-3333-4444-555555555555-uid1000");
        assert_eq!(parse_cleartext_uid("storaged-luks", &name), Some(1000));
    }

    #[test]
    fn test_parse_cleartext_uid_rejects_foreign_name() {
        assert_eq!(parse_cleartext_uid("storaged-luks", "some-other-dm-name"), None);
    }
}
