//! Mount-File Store (C4): the persisted `device_file -> mount point`
//! records the daemon leaves behind so that a crash or restart can still
//! find (and clean up after) mounts it created itself. Grounded on
//! `mount-file.h`'s four operations.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

/// One entry of the store: everything needed to later unmount and, if
/// appropriate, remove the mount directory we created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFileEntry {
    pub mount_path: Utf8PathBuf,
    pub mounted_by_uid: u32,
    pub remove_dir_on_unmount: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entries: HashMap<Utf8PathBuf, MountFileEntry>,
}

/// A JSON-backed table of `device_file -> MountFileEntry`, persisted at
/// `path` (normally `/run/storaged/mounted-fs`).
#[derive(Debug)]
pub struct MountFileStore {
    path: Utf8PathBuf,
    entries: HashMap<Utf8PathBuf, MountFileEntry>,
}

impl MountFileStore {
    /// Load the store from `path`, treating a missing file as empty.
    #[context("loading mount-file store from {path}")]
    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<StoreFile>(&contents)?.entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: path.to_owned(), entries })
    }

    #[context("saving mount-file store to {}", self.path)]
    fn save(&self) -> anyhow::Result<()> {
        let file = StoreFile { entries: self.entries.clone() };
        let contents = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    /// True if `device_file` has a recorded mount (`mount_file_has_device`).
    pub fn has_device(&self, device_file: &Utf8Path) -> bool {
        self.entries.contains_key(device_file)
    }

    pub fn get(&self, device_file: &Utf8Path) -> Option<&MountFileEntry> {
        self.entries.get(device_file)
    }

    /// Record a mount we performed (`mount_file_add`).
    pub fn add(
        &mut self,
        device_file: &Utf8Path,
        mount_path: &Utf8Path,
        mounted_by_uid: u32,
        remove_dir_on_unmount: bool,
    ) -> anyhow::Result<()> {
        self.entries.insert(
            device_file.to_owned(),
            MountFileEntry {
                mount_path: mount_path.to_owned(),
                mounted_by_uid,
                remove_dir_on_unmount,
            },
        );
        self.save()
    }

    /// Drop the record for `device_file` (`mount_file_remove`). Returns
    /// the removed entry so the caller can act on `remove_dir_on_unmount`.
    pub fn remove(&mut self, device_file: &Utf8Path) -> anyhow::Result<Option<MountFileEntry>> {
        let entry = self.entries.remove(device_file);
        if entry.is_some() {
            self.save()?;
        }
        Ok(entry)
    }

    /// Drop every record whose device is not in `present_device_files`,
    /// returning the stale entries so the caller can unmount/clean up
    /// directories left behind by a daemon restart (`mount_file_clean_stale`).
    pub fn purge_stale(
        &mut self,
        present_device_files: &[Utf8PathBuf],
    ) -> anyhow::Result<Vec<(Utf8PathBuf, MountFileEntry)>> {
        let present: std::collections::HashSet<&Utf8PathBuf> = present_device_files.iter().collect();
        let stale: Vec<Utf8PathBuf> = self
            .entries
            .keys()
            .filter(|k| !present.contains(k))
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for device_file in stale {
            if let Some(entry) = self.entries.remove(&device_file) {
                removed.push((device_file, entry));
            }
        }
        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_has_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        let mut store = MountFileStore::load(&path).unwrap();
        assert!(!store.has_device(Utf8Path::new("/dev/sda1")));
        store.add(Utf8Path::new("/dev/sda1"), Utf8Path::new("/media/sda1"), 1000, true).unwrap();
        assert!(store.has_device(Utf8Path::new("/dev/sda1")));
    }

    #[test]
    fn test_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        {
            let mut store = MountFileStore::load(&path).unwrap();
            store.add(Utf8Path::new("/dev/sda1"), Utf8Path::new("/media/sda1"), 1000, true).unwrap();
        }
        let store = MountFileStore::load(&path).unwrap();
        let entry = store.get(Utf8Path::new("/dev/sda1")).unwrap();
        assert_eq!(entry.mount_path, "/media/sda1");
        assert_eq!(entry.mounted_by_uid, 1000);
        assert!(entry.remove_dir_on_unmount);
    }

    #[test]
    fn test_remove_clears_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        let mut store = MountFileStore::load(&path).unwrap();
        store.add(Utf8Path::new("/dev/sda1"), Utf8Path::new("/media/sda1"), 1000, true).unwrap();
        let removed = store.remove(Utf8Path::new("/dev/sda1")).unwrap();
        assert!(removed.is_some());
        assert!(!store.has_device(Utf8Path::new("/dev/sda1")));
    }

    #[test]
    fn test_purge_stale_keeps_present_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mounted-fs")).unwrap();
        let mut store = MountFileStore::load(&path).unwrap();
        store.add(Utf8Path::new("/dev/sda1"), Utf8Path::new("/media/sda1"), 1000, true).unwrap();
        store.add(Utf8Path::new("/dev/sdb1"), Utf8Path::new("/media/sdb1"), 1000, false).unwrap();

        let removed = store.purge_stale(&[Utf8PathBuf::from("/dev/sda1")]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Utf8PathBuf::from("/dev/sdb1"));
        assert!(store.has_device(Utf8Path::new("/dev/sda1")));
        assert!(!store.has_device(Utf8Path::new("/dev/sdb1")));
    }
}
