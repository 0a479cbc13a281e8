use crate::object_id::ObjectId;
use crate::{Adapter, Device, Expander, Port};

/// Shared identity accessors across the four entity kinds (§9: tagged
/// variants plus small shared traits, replacing an inheritance hierarchy).
pub trait Entity {
    fn native_path(&self) -> &str;
    fn object_id(&self) -> &ObjectId;
    fn detection_time(&self) -> u64;
}

macro_rules! impl_entity {
    ($t:ty) => {
        impl Entity for $t {
            fn native_path(&self) -> &str {
                &self.native_path
            }
            fn object_id(&self) -> &ObjectId {
                &self.object_id
            }
            fn detection_time(&self) -> u64 {
                self.detection_time
            }
        }
    };
}

impl_entity!(Device);
impl_entity!(Adapter);
impl_entity!(Port);
impl_entity!(Expander);

/// Which of the four registries an event's kernel subsystem routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Device,
    Adapter,
    Port,
    Expander,
}
