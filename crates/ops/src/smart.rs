//! SMART Refresh / Selftest (§4.12).

use std::sync::Arc;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use tokio::sync::Notify;

use crate::error::OpError;
use crate::filesystem::OpContext;

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

fn details(device: &Device, operation: &str) -> AuthDetails {
    AuthDetails {
        operation: operation.to_string(),
        subject_device_file: device.identity.device_file.to_string(),
        drive_vendor: device.drive.vendor.clone(),
        drive_model: device.drive.model.clone(),
        drive_serial: device.drive.serial.clone(),
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

#[derive(Debug, Clone)]
pub struct SmartResult {
    pub status: String,
    pub blob: Vec<u8>,
    pub time_collected: u64,
}

/// SMART Refresh. `simulate` (base64, root-only) substitutes synthetic
/// helper output; `now` is the wallclock epoch the caller stamps the
/// result with (this crate never reads the clock itself, see the
/// workspace-wide `Date.now`-style ban on ambient time sources).
pub async fn refresh<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    nowakeup: bool,
    simulate: Option<&str>,
    now: u64,
    decode_and_compute_status: impl FnOnce(&[u8]) -> anyhow::Result<String>,
) -> Result<SmartResult, OpError> {
    authorize(gate, authority, inhibitors, ctx, "org.storaged.ata-smart-refresh", device, "ata-smart-refresh").await?;
    if let Some(sim) = simulate {
        if ctx.caller_uid != 0 {
            return Err(OpError::PermissionDenied);
        }
        let blob = base64_decode(sim).map_err(|e| OpError::InvalidOption(e.to_string()))?;
        let status = decode_and_compute_status(&blob)?;
        return Ok(SmartResult { status, blob, time_collected: now });
    }
    let mut argv = vec![helper(ctx, "storaged-helper-ata-smart-collect"), device.identity.device_file.to_string()];
    if nowakeup {
        argv.push("--nowakeup".to_string());
    }
    let completion = jobs.run_helper(device.object_id.clone(), "ata-smart-refresh", ctx.caller_uid, &argv, None, None, false).await?;
    let code = exit_code(&completion);
    if code == 2 {
        return Err(OpError::AtaSmartWouldWakeup);
    }
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    let blob = base64_decode(completion.stdout.trim()).map_err(|e| OpError::Failed(e.to_string()))?;
    let status = decode_and_compute_status(&blob)?;
    Ok(SmartResult { status, blob, time_collected: now })
}

/// SMART Selftest: after completion, always triggers a refresh
/// regardless of outcome (left to the caller, since it needs the same
/// closures `refresh` does — this returns whether the selftest itself
/// succeeded).
pub async fn selftest<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    test: &str,
) -> Result<(), OpError> {
    if !matches!(test, "short" | "extended" | "conveyance") {
        return Err(OpError::InvalidOption(test.to_string()));
    }
    authorize(gate, authority, inhibitors, ctx, "org.storaged.ata-smart-selftest", device, "ata-smart-selftest").await?;
    let argv = vec![helper(ctx, "storaged-helper-ata-smart-selftest"), device.identity.device_file.to_string(), test.to_string()];
    let completion = jobs
        .run_helper(device.object_id.clone(), "ata-smart-selftest", ctx.caller_uid, &argv, None, Some("progress"), true)
        .await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

fn exit_code(completion: &storaged_jobs::JobCompletion) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    completion.exit_status.map(|s| s.code().unwrap_or_else(|| s.signal().unwrap_or(-1))).unwrap_or(-1)
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode_roundtrip_known_value() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_base64_decode_rejects_garbage() {
        assert!(base64_decode("not valid!!").is_err());
    }
}
