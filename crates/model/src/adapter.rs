use crate::object_id::ObjectId;

/// A storage controller on the system bus, classified from the `pci`
/// kernel subsystem (§3 Adapter).
#[derive(Debug, Clone, Default)]
pub struct Adapter {
    pub native_path: String,
    pub object_id: ObjectId,
    pub detection_time: u64,

    pub vendor: String,
    pub model: String,
    pub driver: String,
    pub num_ports: u32,
    pub fabric: String,

    /// Prefix of `native_path` that a Device's own `native_path` must
    /// start with for this Adapter to be considered its enclosing
    /// adapter (used by Drive's `adapter` derivation, C6 step 5).
    pub native_path_prefix: String,
}

impl Adapter {
    pub fn new(native_path: impl Into<String>, detection_time: u64) -> Self {
        let native_path = native_path.into();
        let object_id = ObjectId::from_native_path(&native_path);
        let native_path_prefix = format!("{native_path}/");
        Self {
            native_path,
            object_id,
            detection_time,
            native_path_prefix,
            ..Default::default()
        }
    }

    /// Does this adapter's bus subtree contain `path`?
    pub fn encloses(&self, path: &str) -> bool {
        path == self.native_path || path.starts_with(&self.native_path_prefix)
    }
}
