//! The filesystem/crypto/raid signature probe the `id` derivation stage
//! consumes. Real probing (libblkid-equivalent) is an external collaborator
//! per spec.md §1; this crate only defines the seam and a `blkid`-shelling
//! default so the rest of the pipeline is testable against a fake.

use camino::Utf8Path;
use storaged_utils::CommandRunExt;

/// Raw signature data for one device, as `blkid -p -o export` would report
/// it. Left entirely empty (`usage` stays `""`) when nothing is detected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdProbeResult {
    pub usage: String,
    pub id_type: String,
    pub id_version: String,
    pub id_uuid: String,
    pub id_label: String,
}

/// The `id` derivation's external collaborator.
pub trait IdProbe {
    fn probe(&self, device_file: &Utf8Path) -> IdProbeResult;
}

/// Shells out to `blkid -p -o export <device>`, parsing its `KEY=value`
/// lines. A failed or empty probe (e.g. the device disappeared mid-scrape)
/// yields the neutral zero value, matching C2's "never propagate" policy.
#[derive(Debug, Default)]
pub struct BlkidProbe;

impl IdProbe for BlkidProbe {
    fn probe(&self, device_file: &Utf8Path) -> IdProbeResult {
        let mut cmd = std::process::Command::new("blkid");
        cmd.args(["-p", "-o", "export", device_file.as_str()]);
        let output = match cmd.run_get_string() {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("blkid probe of {device_file}: {e}");
                return IdProbeResult::default();
            }
        };
        let mut result = IdProbeResult::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else { continue };
            match key {
                "USAGE" => result.usage = value.to_ascii_lowercase(),
                "TYPE" => result.id_type = value.to_string(),
                "VERSION" => result.id_version = value.to_string(),
                "UUID" => result.id_uuid = value.to_string(),
                "LABEL" => result.id_label = value.to_string(),
                _ => {}
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) struct FakeProbe(pub std::collections::HashMap<String, IdProbeResult>);

#[cfg(test)]
impl IdProbe for FakeProbe {
    fn probe(&self, device_file: &Utf8Path) -> IdProbeResult {
        self.0.get(device_file.as_str()).cloned().unwrap_or_default()
    }
}
