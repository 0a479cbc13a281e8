use crate::object_id::ObjectId;

/// A channel attached to an Adapter, classified from the `scsi_host` and
/// `sas_phy` kernel subsystems (§3 Port).
#[derive(Debug, Clone, Default)]
pub struct Port {
    pub native_path: String,
    pub object_id: ObjectId,
    pub detection_time: u64,

    pub adapter: Option<ObjectId>,
    pub number: i32,
    pub connector_type: String,

    native_path_prefix: String,
}

impl Port {
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

    /// Does this port's subtree contain `path`? Used by Drive's `ports`
    /// derivation the same way `Adapter::encloses` is.
    pub fn encloses(&self, path: &str) -> bool {
        path == self.native_path || path.starts_with(&self.native_path_prefix)
    }
}
