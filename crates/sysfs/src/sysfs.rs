//! Typed, never-failing reads of sysfs/procfs attributes (C2).
//!
//! Every helper here independently reads one file or symlink under a
//! sysfs-rooted path and never mutates anything. Per the reconciliation
//! design, sysfs attributes legitimately disappear out from under us while
//! a device is being removed concurrently with our own scrape of it, so
//! every read error collapses to the type's neutral zero value plus a
//! debug-level trace rather than propagating as an error callers would
//! have to handle.

use std::os::unix::fs::FileTypeExt;

use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use storaged_utils::ResultExt;

/// A reader rooted at a sysfs mount point (normally `/sys`, but overridable
/// for tests and for namespaced/containerized daemons).
#[derive(Debug, Clone)]
pub struct SysfsReader {
    root: Utf8PathBuf,
}

impl SysfsReader {
    /// Create a reader rooted at `root` (e.g. `/sys`).
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default system sysfs root.
    pub fn system() -> Self {
        Self::new("/sys")
    }

    fn resolve(&self, relpath: &str) -> Utf8PathBuf {
        self.root.join(relpath.trim_start_matches('/'))
    }

    /// True iff `relpath` exists under the root (any file type).
    pub fn exists(&self, relpath: &str) -> bool {
        self.resolve(relpath).exists()
    }

    #[context("Reading sysfs string {relpath}")]
    fn try_read_string(&self, relpath: &str) -> anyhow::Result<String> {
        let p = self.resolve(relpath);
        let s = std::fs::read_to_string(&p)?;
        Ok(s.trim_end_matches('\n').to_string())
    }

    /// Read a string attribute; `""` if unreadable.
    pub fn read_string(&self, relpath: &str) -> String {
        self.try_read_string(relpath).unwrap_or_log_debug(String::new())
    }

    /// Read a signed integer attribute; `0` if unreadable or not a number.
    pub fn read_int(&self, relpath: &str) -> i64 {
        self.try_read_string(relpath)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Read an unsigned 64-bit integer attribute; `0` if unreadable.
    pub fn read_uint64(&self, relpath: &str) -> u64 {
        self.try_read_string(relpath)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// Read a hex-encoded unsigned 64-bit integer attribute (some kernel
    /// attributes, e.g. certain `dev_t`-adjacent ones, are hex-formatted);
    /// `0` if unreadable.
    pub fn read_u64_hex(&self, relpath: &str) -> u64 {
        self.try_read_string(relpath)
            .ok()
            .and_then(|s| u64::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok())
            .unwrap_or(0)
    }

    /// Read a boolean attribute. Kernel convention is `"0"`/`"1"`; anything
    /// else that isn't `"0"` is treated as true. `false` if unreadable.
    pub fn read_bool(&self, relpath: &str) -> bool {
        self.try_read_string(relpath)
            .ok()
            .map(|s| s.trim() != "0" && !s.trim().is_empty())
            .unwrap_or(false)
    }

    #[context("Reading sysfs symlink {relpath}")]
    fn try_read_symlink(&self, relpath: &str) -> anyhow::Result<Utf8PathBuf> {
        let p = self.resolve(relpath);
        let target = std::fs::read_link(&p)?;
        Utf8PathBuf::from_path_buf(target).map_err(|p| anyhow::anyhow!("non-utf8 symlink target {p:?}"))
    }

    /// Resolve a symlink relative to the root; empty path if unreadable.
    pub fn read_symlink(&self, relpath: &str) -> Utf8PathBuf {
        self.try_read_symlink(relpath)
            .unwrap_or_log_debug(Utf8PathBuf::new())
    }

    /// List entries of a directory under the root; empty if unreadable.
    /// Used to enumerate e.g. `<device>/slaves/` and `<device>/holders/`.
    pub fn list_dir(&self, relpath: &str) -> Vec<String> {
        let p = self.resolve(relpath);
        let entries = match std::fs::read_dir(&p) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("listing {p}: {e}");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// The absolute path under the sysfs root for `relpath`.
    pub fn abs_path(&self, relpath: &str) -> Utf8PathBuf {
        self.resolve(relpath)
    }
}

/// Resolve `/dev/disk/by-id` and `/dev/disk/by-path` symlink entries that
/// point at `device_file`, sorted lexicographically, as required by the
/// C6 "device-file, by-id/by-path symlink lists" derivation step.
pub fn resolve_dev_disk_links(dev_disk_root: &Utf8Path, subdir: &str, device_file: &Utf8Path) -> Vec<String> {
    let dir = dev_disk_root.join(subdir);
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(_) => return out,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let link_path = entry.path();
        let Ok(target) = std::fs::read_link(&link_path) else {
            continue;
        };
        let resolved = link_path.parent().unwrap_or(&link_path).join(&target);
        let resolved = std::fs::canonicalize(&resolved).unwrap_or(resolved);
        if resolved == *device_file.as_std_path() {
            out.push(link_path.to_string_lossy().into_owned());
        }
    }
    out.sort();
    out
}

/// True iff `path` is a block special file, as used when the mount monitor
/// falls back to `stat`-ing a pseudo-device's mount source.
pub fn is_block_device(path: &Utf8Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, SysfsReader) {
        let dir = tempfile::tempdir().unwrap();
        let reader = SysfsReader::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        (dir, reader)
    }

    #[test]
    fn test_read_string_missing_is_empty() {
        let (_dir, reader) = fixture();
        assert_eq!(reader.read_string("block/sda/size"), "");
    }

    #[test]
    fn test_read_uint64() {
        let (dir, reader) = fixture();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        std::fs::write(dir.path().join("block/sda/size"), "1048576\n").unwrap();
        assert_eq!(reader.read_uint64("block/sda/size"), 1048576);
        assert_eq!(reader.read_uint64("block/sda/missing"), 0);
    }

    #[test]
    fn test_read_bool() {
        let (dir, reader) = fixture();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        std::fs::write(dir.path().join("block/sda/removable"), "1\n").unwrap();
        assert!(reader.read_bool("block/sda/removable"));
        std::fs::write(dir.path().join("block/sda/removable"), "0\n").unwrap();
        assert!(!reader.read_bool("block/sda/removable"));
    }

    #[test]
    fn test_list_dir_sorted() {
        let (dir, reader) = fixture();
        let slaves = dir.path().join("block/md0/slaves");
        std::fs::create_dir_all(&slaves).unwrap();
        std::fs::write(slaves.join("sdb"), "").unwrap();
        std::fs::write(slaves.join("sda"), "").unwrap();
        assert_eq!(reader.list_dir("block/md0/slaves"), vec!["sda", "sdb"]);
    }

    #[test]
    fn test_exists() {
        let (dir, reader) = fixture();
        std::fs::create_dir_all(dir.path().join("block/sda")).unwrap();
        assert!(reader.exists("block/sda"));
        assert!(!reader.exists("block/sdb"));
    }
}
