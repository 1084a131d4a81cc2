//! Fallback codec for structured objects with named fields
//!
//! Simple fields travel inline in the sub-header as JSON. Complex fields are
//! serialized through the same family and their frames appended in order:
//!
//! ```text
//! {"simple":  {"name": <json>},
//!  "complex": {"name": {"header": <envelope>, "start": i, "stop": j}}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::{type_name, Any};
use std::collections::{BTreeMap, HashMap};

use crate::envelope::{Frame, WireEnvelope};
use crate::error::{Result, SerializationError};
use crate::family::SerializationFamily;

pub enum Field<'a> {
    Simple(Value),
    Complex {
        value: &'a dyn Any,
        type_name: &'static str,
    },
}

impl<'a> Field<'a> {
    pub fn simple<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Field::Simple(serde_json::to_value(value)?))
    }

    /// A field dispatched through the family by its own runtime type
    pub fn complex<T: Any>(value: &'a T) -> Self {
        Field::Complex {
            value,
            type_name: type_name::<T>(),
        }
    }
}

/// A value whose state is a set of named fields
pub trait ObjectDict: Any + Send + Sized {
    fn fields(&self) -> Result<Vec<(&'static str, Field<'_>)>>;

    fn from_fields(fields: ObjectFields) -> Result<Self>;
}

/// Decoded fields handed to [`ObjectDict::from_fields`]
pub struct ObjectFields {
    simple: Map<String, Value>,
    complex: HashMap<String, Box<dyn Any + Send>>,
}

impl ObjectFields {
    pub fn simple<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        let value = self
            .simple
            .remove(name)
            .ok_or_else(|| SerializationError::MissingField(name.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn complex<T: Any>(&mut self, name: &str) -> Result<T> {
        let value = self
            .complex
            .remove(name)
            .ok_or_else(|| SerializationError::MissingField(name.to_string()))?;
        value
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| SerializationError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                found: format!("field {}", name),
            })
    }
}

#[derive(Deserialize)]
struct Layout {
    #[serde(default)]
    simple: Map<String, Value>,
    #[serde(default)]
    complex: BTreeMap<String, Slot>,
}

#[derive(Deserialize)]
struct Slot {
    header: WireEnvelope,
    start: usize,
    stop: usize,
}

pub(crate) fn dump_object<T: ObjectDict>(
    family: &SerializationFamily,
    value: &T,
) -> Result<(Value, Vec<Frame>)> {
    let mut simple = Map::new();
    let mut complex = Map::new();
    let mut frames = Vec::new();

    for (name, field) in value.fields()? {
        match field {
            Field::Simple(v) => {
                simple.insert(name.to_string(), v);
            }
            Field::Complex { value, type_name } => {
                let (header, sub_frames) = family.dumps_dyn(value, type_name)?;
                let start = frames.len();
                frames.extend(sub_frames);
                complex.insert(
                    name.to_string(),
                    json!({
                        "header": serde_json::to_value(&header)?,
                        "start": start,
                        "stop": frames.len(),
                    }),
                );
            }
        }
    }

    Ok((json!({"simple": simple, "complex": complex}), frames))
}

pub(crate) fn load_object<T: ObjectDict>(
    family: &SerializationFamily,
    sub_header: Value,
    frames: Vec<Frame>,
) -> Result<T> {
    let layout: Layout = serde_json::from_value(sub_header)?;
    let mut frames: Vec<Option<Frame>> = frames.into_iter().map(Some).collect();
    let mut complex = HashMap::new();

    for (name, slot) in layout.complex {
        if slot.start > slot.stop || slot.stop > frames.len() {
            return Err(SerializationError::Codec(format!(
                "field {} spans frames {}..{} of {}",
                name,
                slot.start,
                slot.stop,
                frames.len()
            )));
        }
        let sub_frames = frames[slot.start..slot.stop]
            .iter_mut()
            .map(|frame| {
                frame.take().ok_or_else(|| {
                    SerializationError::Codec(format!("field {} reuses a frame", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        complex.insert(name, family.loads(slot.header, sub_frames)?);
    }

    T::from_fields(ObjectFields {
        simple: layout.simple,
        complex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Tensor {
        bytes: Vec<u8>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Shard {
        name: String,
        epoch: u32,
        weights: Tensor,
        bias: Tensor,
    }

    impl ObjectDict for Shard {
        fn fields(&self) -> Result<Vec<(&'static str, Field<'_>)>> {
            Ok(vec![
                ("name", Field::simple(&self.name)?),
                ("epoch", Field::simple(&self.epoch)?),
                ("weights", Field::complex(&self.weights)),
                ("bias", Field::complex(&self.bias)),
            ])
        }

        fn from_fields(mut fields: ObjectFields) -> Result<Self> {
            Ok(Shard {
                name: fields.simple("name")?,
                epoch: fields.simple("epoch")?,
                weights: fields.complex("weights")?,
                bias: fields.complex("bias")?,
            })
        }
    }

    fn family() -> SerializationFamily {
        let family = SerializationFamily::new("hip");
        family.register::<Tensor, _, _>(
            |t| Ok((json!({}), vec![t.bytes.clone()])),
            |_, mut frames| {
                Ok(Tensor {
                    bytes: frames.pop().unwrap_or_default(),
                })
            },
        );
        family.register_object_dict::<Shard>();
        family
    }

    fn shard() -> Shard {
        Shard {
            name: "layer0".into(),
            epoch: 3,
            weights: Tensor {
                bytes: vec![1, 2, 3, 4],
            },
            bias: Tensor { bytes: vec![9] },
        }
    }

    #[test]
    fn test_object_round_trip() {
        let family = family();
        let (header, frames) = family.dumps(&shard()).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(header.compression, vec![false, false]);
        assert_eq!(header.sub_header["simple"]["epoch"], 3);
        assert_eq!(header.sub_header["complex"]["weights"]["start"], 0);
        assert_eq!(header.sub_header["complex"]["bias"]["start"], 1);

        let back: Shard = family.loads_as(header, frames).unwrap();
        assert_eq!(back, shard());
    }

    #[test]
    fn test_exact_registration_wins_over_fallback() {
        let family = family();
        family.register::<Shard, _, _>(
            |s| Ok((json!({"exact": true, "name": s.name}), vec![])),
            |_, _| Ok(shard()),
        );

        let (header, frames) = family.dumps(&shard()).unwrap();
        assert_eq!(header.sub_header["exact"], true);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_unregistered_complex_field_fails() {
        let family = SerializationFamily::new("hip");
        family.register_object_dict::<Shard>();
        assert!(matches!(
            family.dumps(&shard()),
            Err(SerializationError::UnimplementedType { .. })
        ));
    }

    #[test]
    fn test_missing_field() {
        let family = family();
        let (mut header, frames) = family.dumps(&shard()).unwrap();
        header.sub_header["simple"]
            .as_object_mut()
            .unwrap()
            .remove("epoch");

        assert!(matches!(
            family.loads(header, frames),
            Err(SerializationError::MissingField(field)) if field == "epoch"
        ));
    }

    #[test]
    fn test_out_of_range_slot() {
        let family = family();
        let (mut header, frames) = family.dumps(&shard()).unwrap();
        header.sub_header["complex"]["bias"]["stop"] = json!(5);

        assert!(matches!(
            family.loads(header, frames),
            Err(SerializationError::Codec(_))
        ));
    }
}
