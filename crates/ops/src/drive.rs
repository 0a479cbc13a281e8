//! Drive Eject / Detach / Poll Media / Inhibit Polling / Set Spindown
//! Timeout / Benchmark (§4.12).

use std::sync::Arc;

use storaged_auth::{AuthDetails, AuthorizationGate, Authority, CallerId, InhibitorRegistry};
use storaged_jobs::JobEngine;
use storaged_model::Device;
use storaged_registry::DeviceRegistry;
use tokio::sync::Notify;

use crate::busy::is_busy;
use crate::error::OpError;
use crate::filesystem::OpContext;

fn helper(ctx: &OpContext, name: &str) -> String {
    ctx.helper_dir.join(name).into_string()
}

fn drive_details(device: &Device, operation: &str) -> AuthDetails {
    AuthDetails {
        operation: operation.to_string(),
        subject_device_file: device.identity.device_file.to_string(),
        drive_device_file: Some(device.identity.device_file.to_string()),
        drive_vendor: device.drive.vendor.clone(),
        drive_model: device.drive.model.clone(),
        drive_revision: device.drive.revision.clone(),
        drive_serial: device.drive.serial.clone(),
        drive_connection_interface: device.drive.connection_interface.clone(),
        ..Default::default()
    }
}

async fn authorize_drive<A: Authority>(
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
        &drive_details(device, operation),
        ctx.allow_interaction,
        Arc::new(Notify::new()),
        Arc::new(Notify::new()),
    )
    .await
    .map_err(OpError::from)
}

fn require_drive(device: &Device) -> Result<(), OpError> {
    if !device.drive.is_drive {
        return Err(OpError::NotSupported("not a drive".to_string()));
    }
    Ok(())
}

fn require_no_busy_partitions(device: &Device, jobs: &JobEngine, devices: &DeviceRegistry) -> Result<(), OpError> {
    if is_busy(device, jobs, devices, true) {
        return Err(OpError::Busy);
    }
    Ok(())
}

/// Drive Eject.
pub async fn eject<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
) -> Result<(), OpError> {
    require_drive(device)?;
    require_no_busy_partitions(device, jobs, devices)?;
    authorize_drive(gate, authority, inhibitors, ctx, "org.storaged.drive-eject", device, "drive-eject").await?;
    let argv = vec![helper(ctx, "storaged-helper-eject"), device.identity.device_file.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "drive-eject", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// Drive Detach.
pub async fn detach<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
) -> Result<(), OpError> {
    require_drive(device)?;
    if !device.drive.can_detach {
        return Err(OpError::NotSupported("drive cannot be detached".to_string()));
    }
    require_no_busy_partitions(device, jobs, devices)?;
    authorize_drive(gate, authority, inhibitors, ctx, "org.storaged.drive-detach", device, "drive-detach").await?;
    let argv = vec![helper(ctx, "storaged-helper-detach"), device.identity.device_file.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "drive-detach", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// Drive Poll Media.
pub async fn poll_media<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    devices: &DeviceRegistry,
) -> Result<(), OpError> {
    require_drive(device)?;
    require_no_busy_partitions(device, jobs, devices)?;
    authorize_drive(gate, authority, inhibitors, ctx, "org.storaged.drive-poll-media", device, "drive-poll-media").await?;
    let argv = vec![helper(ctx, "storaged-helper-poll-media"), device.identity.device_file.to_string()];
    let completion = jobs.run_helper(device.object_id.clone(), "drive-poll-media", ctx.caller_uid, &argv, None, None, false).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(())
}

/// `drive_inhibit_all_polling`. Returns the cookie.
pub fn inhibit_all_polling(inhibitors: &mut InhibitorRegistry, caller: CallerId) -> String {
    inhibitors.inhibit_all_polling(caller)
}

/// `drive_set_spindown_timeout` for a single device. Encodes seconds into
/// the ATA standby-timer byte per the range table in §4.12.
pub fn encode_standby_timeout(seconds: u32) -> u8 {
    match seconds {
        0 => 0,
        1..=1200 => (seconds / 5).max(1) as u8,
        1201..=19800 => {
            let units = 240 + seconds / (30 * 60);
            units.min(251) as u8
        }
        _ => 251,
    }
}

/// Drive Set Spindown Timeout for a single device.
pub fn set_spindown_timeout(inhibitors: &mut InhibitorRegistry, device_id: &storaged_model::ObjectId, caller: CallerId, timeout_secs: u32) -> String {
    inhibitors.set_device_spindown_timeout(device_id.clone(), caller, timeout_secs)
}

/// Drive Benchmark. Rejects if a partition table or filesystem signature
/// is present when write-benchmark is requested.
pub async fn benchmark<A: Authority>(
    device: &mut Device,
    ctx: &OpContext<'_>,
    gate: &AuthorizationGate,
    authority: &A,
    inhibitors: &InhibitorRegistry,
    jobs: &mut JobEngine,
    write_benchmark: bool,
) -> Result<Vec<(u64, f64)>, OpError> {
    require_drive(device)?;
    if write_benchmark && (device.partition_table.is_partition_table || device.fs_id.usage != storaged_model::IdUsage::Empty) {
        return Err(OpError::NotSupported("refusing write-benchmark on a device with data".to_string()));
    }
    authorize_drive(gate, authority, inhibitors, ctx, "org.storaged.drive-benchmark", device, "drive-benchmark").await?;
    let mut argv = vec![helper(ctx, "storaged-helper-benchmark"), device.identity.device_file.to_string()];
    if write_benchmark {
        argv.push("--write".to_string());
    }
    let completion = jobs.run_helper(device.object_id.clone(), "drive-benchmark", ctx.caller_uid, &argv, None, Some("progress"), true).await?;
    if !completion.success() {
        return Err(OpError::Failed(completion.stderr));
    }
    Ok(completion
        .stdout
        .lines()
        .filter_map(|l| {
            let (off, rate) = l.split_once(' ')?;
            Some((off.parse().ok()?, rate.parse().ok()?))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_standby_timeout_ranges() {
        assert_eq!(encode_standby_timeout(0), 0);
        assert_eq!(encode_standby_timeout(5), 1);
        assert_eq!(encode_standby_timeout(1200), 240);
        assert_eq!(encode_standby_timeout(19800), 251);
        assert_eq!(encode_standby_timeout(100_000), 251);
    }

    #[test]
    fn test_require_drive_rejects_non_drive() {
        let d = Device::new("block/sda1", 0);
        assert!(require_drive(&d).is_err());
    }
}
