//! The Object Registry (C5): per-kind dictionaries keyed by whatever
//! lookup a caller needs, with the invariant that an entity never appears
//! under a stale key (§4.5). Mutated only from the single-threaded event
//! loop in `storaged-daemon`; there is no internal locking here.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use storaged_model::{Adapter, Device, Expander, ObjectId, Port};

/// A plain by-native-path / by-object-id table, shared shape for Adapter,
/// Port and Expander (the original daemon keeps exactly these two indices
/// for each of those three kinds).
#[derive(Debug, Default)]
pub struct SimpleRegistry<E> {
    by_object_id: HashMap<ObjectId, E>,
    by_native_path: HashMap<String, ObjectId>,
}

impl<E> SimpleRegistry<E> {
    pub fn new() -> Self {
        Self {
            by_object_id: HashMap::new(),
            by_native_path: HashMap::new(),
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<&E> {
        self.by_object_id.get(id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut E> {
        self.by_object_id.get_mut(id)
    }

    pub fn get_by_native_path(&self, native_path: &str) -> Option<&E> {
        self.by_native_path
            .get(native_path)
            .and_then(|id| self.by_object_id.get(id))
    }

    pub fn contains_native_path(&self, native_path: &str) -> bool {
        self.by_native_path.contains_key(native_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.by_object_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_object_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_object_id.is_empty()
    }
}

/// Insert/remove keyed by `(object_id, native_path)`; factored out since
/// Adapter/Port/Expander share this exact shape and Device layers more
/// keys on top of it.
pub trait KeyOf {
    fn object_id(&self) -> &ObjectId;
    fn native_path(&self) -> &str;
}

macro_rules! impl_key_of {
    ($t:ty) => {
        impl KeyOf for $t {
            fn object_id(&self) -> &ObjectId {
                &self.object_id
            }
            fn native_path(&self) -> &str {
                &self.native_path
            }
        }
    };
}
impl_key_of!(Adapter);
impl_key_of!(Port);
impl_key_of!(Expander);
impl_key_of!(Device);

impl<E: KeyOf> SimpleRegistry<E> {
    /// Insert `entity` under all of its keys. Per §4.5, callers must have
    /// already removed any stale prior entry for this object id (e.g. via
    /// [`Self::remove`]) before a key-affecting mutation, then call this to
    /// re-insert under the possibly-updated keys.
    pub fn insert(&mut self, entity: E) {
        let id = entity.object_id().clone();
        self.by_native_path.insert(entity.native_path().to_string(), id.clone());
        self.by_object_id.insert(id, entity);
    }

    /// Remove the entity with `id` from every key, returning it.
    pub fn remove(&mut self, id: &ObjectId) -> Option<E> {
        let entity = self.by_object_id.remove(id)?;
        self.by_native_path.remove(entity.native_path());
        Some(entity)
    }
}

/// The Device registry additionally indexes by device-file and by
/// `(major, minor)`, matching the original daemon's four device maps.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    base: SimpleRegistry<Device>,
    by_device_file: HashMap<Utf8PathBuf, ObjectId>,
    by_major_minor: HashMap<(u32, u32), ObjectId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Device> {
        self.base.get(id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut Device> {
        self.base.get_mut(id)
    }

    pub fn get_by_native_path(&self, native_path: &str) -> Option<&Device> {
        self.base.get_by_native_path(native_path)
    }

    pub fn contains_native_path(&self, native_path: &str) -> bool {
        self.base.contains_native_path(native_path)
    }

    pub fn get_by_device_file(&self, device_file: &Utf8PathBuf) -> Option<&Device> {
        self.by_device_file.get(device_file).and_then(|id| self.base.get(id))
    }

    pub fn get_by_major_minor(&self, major: u32, minor: u32) -> Option<&Device> {
        self.by_major_minor.get(&(major, minor)).and_then(|id| self.base.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.base.iter()
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// Insert `device` under all four keys.
    pub fn insert(&mut self, device: Device) {
        let id = device.object_id.clone();
        if !device.identity.device_file.as_str().is_empty() {
            self.by_device_file.insert(device.identity.device_file.clone(), id.clone());
        }
        if device.identity.major != 0 || device.identity.minor != 0 {
            self.by_major_minor
                .insert((device.identity.major, device.identity.minor), id.clone());
        }
        self.base.insert(device);
    }

    /// Remove from all four keys, returning the removed Device.
    pub fn remove(&mut self, id: &ObjectId) -> Option<Device> {
        let device = self.base.remove(id)?;
        self.by_device_file.remove(&device.identity.device_file);
        self.by_major_minor
            .remove(&(device.identity.major, device.identity.minor));
        Some(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storaged_model::Entity as _;

    fn dev(native_path: &str, device_file: &str, maj: u32, min: u32) -> Device {
        let mut d = Device::new(native_path, 0);
        d.identity.device_file = device_file.into();
        d.identity.major = maj;
        d.identity.minor = min;
        d
    }

    #[test]
    fn test_insert_and_lookup_all_keys() {
        let mut reg = DeviceRegistry::new();
        reg.insert(dev("/sys/block/sda", "/dev/sda", 8, 0));
        assert!(reg.get_by_native_path("/sys/block/sda").is_some());
        assert!(reg.get_by_device_file(&"/dev/sda".into()).is_some());
        assert!(reg.get_by_major_minor(8, 0).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_remove_clears_all_keys() {
        let mut reg = DeviceRegistry::new();
        let d = dev("/sys/block/sda", "/dev/sda", 8, 0);
        let id = d.object_id.clone();
        reg.insert(d);
        let removed = reg.remove(&id).unwrap();
        assert_eq!(removed.native_path(), "/sys/block/sda");
        assert!(reg.get_by_native_path("/sys/block/sda").is_none());
        assert!(reg.get_by_device_file(&"/dev/sda".into()).is_none());
        assert!(reg.get_by_major_minor(8, 0).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_rekey_on_device_file_rename() {
        // Simulates the §4.5 remove/mutate/reinsert dance for a kernel
        // "move" uevent that renames the device file.
        let mut reg = DeviceRegistry::new();
        let mut d = dev("/sys/block/sda", "/dev/sda", 8, 0);
        let id = d.object_id.clone();
        reg.insert(d.clone());

        d = reg.remove(&id).unwrap();
        d.identity.device_file = "/dev/sdnew".into();
        reg.insert(d);

        assert!(reg.get_by_device_file(&"/dev/sda".into()).is_none());
        assert!(reg.get_by_device_file(&"/dev/sdnew".into()).is_some());
    }
}

pub type AdapterRegistry = SimpleRegistry<Adapter>;
pub type PortRegistry = SimpleRegistry<Port>;
pub type ExpanderRegistry = SimpleRegistry<Expander>;
