//! Mount Monitor (C3): parse `/proc/self/mountinfo`-style records and
//! diff against the previous snapshot to emit added/removed events.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use storaged_sysfs::is_block_device;

/// One row of the mount table: a block device identified by `(major,
/// minor)` mounted at `path`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MountRecord {
    pub mount_path: Utf8PathBuf,
    pub major: u32,
    pub minor: u32,
}

/// The result of diffing two mount-table snapshots.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MountDiff {
    /// Emitted before `added`, per §4.3.
    pub removed: Vec<MountRecord>,
    pub added: Vec<MountRecord>,
}

/// Undo the octal `\NNN` escaping mountinfo applies to whitespace and
/// backslashes in paths.
fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &s[i + 1..i + 4];
            if let Ok(v) = u8::from_str_radix(digits, 8) {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Extract `(major, minor)` from a raw `dev_t`, using the glibc encoding.
fn dev_major_minor(dev: u64) -> (u32, u32) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    (major as u32, minor as u32)
}

/// Parse the contents of `/proc/self/mountinfo` into the set of mounts we
/// care about: only records whose mount root is `/` (whole-filesystem
/// mounts, not bind-mounted subtrees), with `major=0` pseudo-devices
/// (e.g. btrfs) resolved by `stat`-ing the mount source.
pub fn parse_mountinfo(contents: &str) -> Vec<MountRecord> {
    let mut out = Vec::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(_mount_id) = fields.next() else { continue };
        let Some(_parent_id) = fields.next() else { continue };
        let Some(majmin) = fields.next() else { continue };
        let Some(root) = fields.next() else { continue };
        let Some(mount_point) = fields.next() else { continue };

        if root != "/" {
            continue;
        }

        let Some((maj_s, min_s)) = majmin.split_once(':') else {
            tracing::warn!("malformed major:minor field {majmin:?}");
            continue;
        };
        let (Ok(major), Ok(minor)) = (maj_s.parse::<u32>(), min_s.parse::<u32>()) else {
            tracing::warn!("malformed major:minor field {majmin:?}");
            continue;
        };

        let mount_path = unescape_octal(mount_point);

        let (major, minor) = if major == 0 {
            match resolve_pseudo_device(line) {
                Some(mm) => mm,
                None => continue,
            }
        } else {
            (major, minor)
        };

        out.push(MountRecord {
            mount_path: mount_path.into(),
            major,
            minor,
        });
    }
    out
}

/// The workaround for btrfs (and similarly pseudo-keyed filesystems)
/// reporting `major=0`: find the mount source after the `" - "`
/// separator and `stat` it to recover the real device id.
fn resolve_pseudo_device(line: &str) -> Option<(u32, u32)> {
    let (_, rest) = line.split_once(" - ")?;
    let mut fields = rest.split_whitespace();
    let fstype = fields.next()?;
    let mount_source = fields.next()?;

    if fstype != "btrfs" {
        return None;
    }
    if !mount_source.starts_with("/dev/") {
        return None;
    }
    let path = Utf8Path::new(mount_source);
    if !is_block_device(path) {
        tracing::debug!("{mount_source} is not a block device");
        return None;
    }
    let meta = std::fs::metadata(path).ok()?;
    use std::os::unix::fs::MetadataExt;
    Some(dev_major_minor(meta.rdev()))
}

/// Diff two snapshots, returning removed-before-added, ordered the way
/// the original daemon sorts (`mount_path`, then `major`/`minor`).
pub fn diff(old: &[MountRecord], new: &[MountRecord]) -> MountDiff {
    let old_set: BTreeSet<&MountRecord> = old.iter().collect();
    let new_set: BTreeSet<&MountRecord> = new.iter().collect();

    let removed = old_set.difference(&new_set).map(|r| (*r).clone()).collect();
    let added = new_set.difference(&old_set).map(|r| (*r).clone()).collect();
    MountDiff { removed, added }
}

/// In-memory state for the mount monitor: the last parsed snapshot, plus
/// the diff machinery. A caller (the daemon's event loop) owns the actual
/// file-watch and calls [`MountMonitor::refresh`] on each notification.
#[derive(Debug, Default)]
pub struct MountMonitor {
    mounts: Vec<MountRecord>,
}

impl MountMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read `contents` (the current `/proc/self/mountinfo`), returning
    /// the diff against the prior snapshot and updating internal state.
    pub fn refresh(&mut self, contents: &str) -> MountDiff {
        let new_mounts = parse_mountinfo(contents);
        let d = diff(&self.mounts, &new_mounts);
        self.mounts = new_mounts;
        d
    }

    /// All mount paths currently recorded for `(major, minor)`, sorted so
    /// the shortest path comes first (matches
    /// `mount_monitor_get_mounts_for_dev`'s sort).
    pub fn mounts_for_dev(&self, major: u32, minor: u32) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<Utf8PathBuf> = self
            .mounts
            .iter()
            .filter(|m| m.major == major && m.minor == minor)
            .map(|m| m.mount_path.clone())
            .collect();
        paths.sort_by(|a, b| a.as_str().len().cmp(&b.as_str().len()).then_with(|| a.cmp(b)));
        paths
    }

    /// The full current snapshot.
    pub fn snapshot(&self) -> &[MountRecord] {
        &self.mounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_subtree_mounts() {
        let contents = "36 35 98:0 /subtree /mnt/x rw - ext4 /dev/sda1 rw\n";
        assert!(parse_mountinfo(contents).is_empty());
    }

    #[test]
    fn test_parses_whole_mount() {
        let contents = "36 35 98:0 / /mnt/x rw - ext4 /dev/sda1 rw\n";
        let recs = parse_mountinfo(contents);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].major, 98);
        assert_eq!(recs[0].minor, 0);
        assert_eq!(recs[0].mount_path, "/mnt/x");
    }

    #[test]
    fn test_unescapes_octal_space() {
        let contents = "36 35 98:0 / /mnt/my\\040disk rw - ext4 /dev/sda1 rw\n";
        let recs = parse_mountinfo(contents);
        assert_eq!(recs[0].mount_path, "/mnt/my disk");
    }

    #[test]
    fn test_diff_removed_before_added() {
        let old = vec![MountRecord { mount_path: "/mnt/a".into(), major: 8, minor: 1 }];
        let new = vec![MountRecord { mount_path: "/mnt/b".into(), major: 8, minor: 2 }];
        let d = diff(&old, &new);
        assert_eq!(d.removed, old);
        assert_eq!(d.added, new);
    }

    #[test]
    fn test_refresh_is_idempotent_when_unchanged() {
        let mut mon = MountMonitor::new();
        let contents = "36 35 98:0 / /mnt/x rw - ext4 /dev/sda1 rw\n";
        let d1 = mon.refresh(contents);
        assert_eq!(d1.added.len(), 1);
        let d2 = mon.refresh(contents);
        assert!(d2.added.is_empty());
        assert!(d2.removed.is_empty());
    }

    #[test]
    fn test_mounts_for_dev_shortest_first() {
        let mut mon = MountMonitor::new();
        mon.refresh(
            "36 35 98:0 / /mnt/xx rw - ext4 /dev/sda1 rw\n37 35 98:0 / /mnt/x rw - ext4 /dev/sda1 rw\n",
        );
        let paths = mon.mounts_for_dev(98, 0);
        assert_eq!(paths, vec![Utf8PathBuf::from("/mnt/x"), Utf8PathBuf::from("/mnt/xx")]);
    }
}
