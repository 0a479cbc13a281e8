use crate::object_id::ObjectId;

/// A SAS expander, classified from the `sas_expander` kernel subsystem
/// (§3 Expander).
#[derive(Debug, Clone, Default)]
pub struct Expander {
    pub native_path: String,
    pub object_id: ObjectId,
    pub detection_time: u64,

    native_path_prefix: String,
}

impl Expander {
    pub fn new(native_path: impl Into<String>, detection_time: u64) -> Self {
        let native_path = native_path.into();
        let object_id = ObjectId::from_native_path(&native_path);
        let native_path_prefix = format!("{native_path}/");
        Self {
            native_path,
            object_id,
            detection_time,
            native_path_prefix,
        }
    }

    pub fn encloses(&self, path: &str) -> bool {
        path == self.native_path || path.starts_with(&self.native_path_prefix)
    }
}
