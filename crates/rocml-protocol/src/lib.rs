mod array;
mod envelope;
mod error;
mod family;
mod object_dict;
mod registry;

pub use array::{register_device_array, DeviceArray, DEVICE_ARRAY_TAG};
pub use envelope::{Frame, WireEnvelope};
pub use error::{Result, SerializationError};
pub use family::SerializationFamily;
pub use object_dict::{Field, ObjectDict, ObjectFields};
pub use registry::{global_registry, hip_family, FamilyRegistry, HIP_FAMILY};
