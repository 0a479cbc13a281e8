//! Ambient configuration (not in spec.md — see SPEC_FULL.md's
//! Configuration section). A `storaged.toml` overlay on top of the same
//! defaults the original daemon hardcodes as compile-time constants, in
//! the style the teacher loads its own install-config overlays.

use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

fn default_sysfs_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/sys")
}

fn default_dev_disk_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/dev/disk")
}

fn default_mount_file_store_path() -> Utf8PathBuf {
    Utf8PathBuf::from("/run/storaged/mounted-fs")
}

fn default_helper_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/libexec/storaged")
}

fn default_scan_interval_secs() -> u64 {
    3
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_md_sync_interval_secs() -> u64 {
    2
}

fn default_spindown_timeout_secs() -> u32 {
    0
}

fn default_dm_name_prefix() -> String {
    "storaged".to_string()
}

/// The loaded configuration (§ "Configuration" in SPEC_FULL.md). Every
/// field has a constant default, so the config file itself is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the sysfs tree the C2 reader and C1 event source scan.
    pub sysfs_root: Utf8PathBuf,
    /// Root of `/dev/disk/{by-id,by-path}` used for symlink resolution.
    pub dev_disk_root: Utf8PathBuf,
    /// Where the C4 Mount-File Store persists its records.
    pub mount_file_store_path: Utf8PathBuf,
    /// Directory searched for `storaged-helper-*` binaries, prepended to
    /// `$PATH` for the Job Engine's spawns.
    pub helper_dir: Utf8PathBuf,
    /// How often the C1 Event Source re-scans sysfs for add/change/remove.
    pub scan_interval_secs: u64,
    /// How often the C12 Poller fires off due `drive-poll-media` runs.
    pub poll_interval_secs: u64,
    /// How often the C12 Poller re-derives MD sync-percentage/speed on
    /// still-syncing arrays (§8 scenario 6).
    pub md_sync_interval_secs: u64,
    /// Default ATA standby timeout (seconds) for drives with no spindown
    /// inhibitor setting one explicitly; `0` disables spindown.
    pub default_spindown_timeout_secs: u32,
    /// The `<prefix>` in the daemon's `<prefix>-uuid-<UUID>-uid<UID>`
    /// device-mapper naming convention (§4.11, §4.12 LUKS Unlock/Lock).
    pub dm_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            dev_disk_root: default_dev_disk_root(),
            mount_file_store_path: default_mount_file_store_path(),
            helper_dir: default_helper_dir(),
            scan_interval_secs: default_scan_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            md_sync_interval_secs: default_md_sync_interval_secs(),
            default_spindown_timeout_secs: default_spindown_timeout_secs(),
            dm_name_prefix: default_dm_name_prefix(),
        }
    }
}

impl Config {
    /// Load `path`, falling back to all-defaults if it doesn't exist.
    #[context("loading config from {path}")]
    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = Config::load(Utf8Path::new("/nonexistent/storaged.toml")).unwrap();
        assert_eq!(cfg.sysfs_root, "/sys");
        assert_eq!(cfg.default_spindown_timeout_secs, 0);
    }

    #[test]
    fn test_partial_overlay_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("storaged.toml")).unwrap();
        std::fs::write(&path, "sysfs_root = \"/test/sys\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.sysfs_root, "/test/sys");
        assert_eq!(cfg.mount_file_store_path, "/run/storaged/mounted-fs");
    }
}
