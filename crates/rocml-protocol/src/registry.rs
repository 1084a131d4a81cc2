use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, info};

use crate::array::register_device_array;
use crate::envelope::{Frame, WireEnvelope};
use crate::error::{Result, SerializationError};
use crate::family::SerializationFamily;

pub const HIP_FAMILY: &str = "hip";

/// Named serialization families, tried in caller-given order on encode
pub struct FamilyRegistry {
    families: RwLock<HashMap<String, Arc<SerializationFamily>>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self {
            families: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_family(&self, family: Arc<SerializationFamily>) {
        info!("Registered serialization family {}", family.name());
        self.families
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(family.name().to_string(), family);
    }

    pub fn family(&self, name: &str) -> Option<Arc<SerializationFamily>> {
        self.families
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Encode with the first listed family that knows the value's type
    pub fn dumps<T: Any>(&self, value: &T, families: &[&str]) -> Result<(WireEnvelope, Vec<Frame>)> {
        for name in families {
            let family = self
                .family(name)
                .ok_or_else(|| SerializationError::UnknownFamily(name.to_string()))?;

            match family.dumps(value) {
                Err(SerializationError::UnimplementedType { .. }) => {
                    debug!("{} cannot encode {}, trying next", name, type_name::<T>());
                }
                result => return result,
            }
        }

        Err(SerializationError::UnimplementedType {
            family: families.join(","),
            type_name: type_name::<T>().to_string(),
        })
    }

    pub fn loads(&self, header: WireEnvelope, frames: Vec<Frame>) -> Result<Box<dyn Any + Send>> {
        let family = self
            .family(&header.serializer)
            .ok_or_else(|| SerializationError::UnknownFamily(header.serializer.clone()))?;
        family.loads(header, frames)
    }

    pub fn loads_as<T: Any>(&self, header: WireEnvelope, frames: Vec<Frame>) -> Result<T> {
        let family = self
            .family(&header.serializer)
            .ok_or_else(|| SerializationError::UnknownFamily(header.serializer.clone()))?;
        family.loads_as(header, frames)
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide "hip" family, created with the device array codec
pub fn hip_family() -> Arc<SerializationFamily> {
    static HIP: OnceLock<Arc<SerializationFamily>> = OnceLock::new();
    HIP.get_or_init(|| {
        let family = SerializationFamily::new(HIP_FAMILY);
        register_device_array(&family);
        Arc::new(family)
    })
    .clone()
}

/// The process-wide registry, with the "hip" family already registered
pub fn global_registry() -> &'static FamilyRegistry {
    static REGISTRY: OnceLock<FamilyRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = FamilyRegistry::new();
        registry.register_family(hip_family());
        registry
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DeviceArray;
    use serde_json::json;

    fn registry() -> FamilyRegistry {
        let registry = FamilyRegistry::new();
        registry.register_family(hip_family());

        let text = SerializationFamily::new("text");
        text.register::<String, _, _>(
            |s| Ok((json!({}), vec![s.clone().into_bytes()])),
            |_, mut frames| {
                String::from_utf8(frames.remove(0))
                    .map_err(|e| SerializationError::Codec(e.to_string()))
            },
        );
        registry.register_family(Arc::new(text));
        registry
    }

    fn array() -> DeviceArray {
        DeviceArray::contiguous(vec![3], "|u1", vec![7, 8, 9]).unwrap()
    }

    #[test]
    fn test_hip_family_is_shared_and_knows_arrays() {
        assert!(Arc::ptr_eq(&hip_family(), &hip_family()));
        assert!(hip_family().is_registered::<DeviceArray>());
        assert!(global_registry().family(HIP_FAMILY).is_some());
    }

    #[test]
    fn test_dumps_falls_through_families() {
        let registry = registry();

        let (header, frames) = registry.dumps(&"hi".to_string(), &["hip", "text"]).unwrap();
        assert_eq!(header.serializer, "text");
        let back: String = registry.loads_as(header, frames).unwrap();
        assert_eq!(back, "hi");

        let (header, frames) = registry.dumps(&array(), &["hip", "text"]).unwrap();
        assert_eq!(header.serializer, "hip");
        let back: DeviceArray = registry.loads_as(header, frames).unwrap();
        assert_eq!(back, array());
    }

    #[test]
    fn test_dumps_with_no_capable_family() {
        let registry = registry();
        assert!(matches!(
            registry.dumps(&1.5f64, &["hip", "text"]),
            Err(SerializationError::UnimplementedType { .. })
        ));
        assert!(matches!(
            registry.dumps(&array(), &["pickle"]),
            Err(SerializationError::UnknownFamily(_))
        ));
    }

    #[test]
    fn test_loads_unknown_family() {
        let registry = registry();
        let (mut header, frames) = registry.dumps(&array(), &["hip"]).unwrap();
        header.serializer = "cuda".into();

        assert!(matches!(
            registry.loads(header, frames),
            Err(SerializationError::UnknownFamily(name)) if name == "cuda"
        ));
    }
}
