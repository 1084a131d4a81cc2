//! Type-dispatched codec registry for one serialization family
//!
//! Dispatch looks up the exact runtime type first and only then the
//! lower-priority object-with-dict table. Registrations are append-only; a
//! later registration for the same type replaces the earlier codec.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use crate::envelope::{Frame, WireEnvelope};
use crate::error::{Result, SerializationError};
use crate::object_dict::{dump_object, load_object, ObjectDict};

type DumpFn = dyn Fn(&SerializationFamily, &dyn Any) -> Result<(Value, Vec<Frame>)> + Send + Sync;
type LoadFn =
    dyn Fn(&SerializationFamily, Value, Vec<Frame>) -> Result<Box<dyn Any + Send>> + Send + Sync;

struct Codec {
    tag: String,
    dumps: Box<DumpFn>,
    loads: Box<LoadFn>,
}

#[derive(Default)]
struct CodecTable {
    by_type: HashMap<TypeId, Arc<Codec>>,
    by_tag: HashMap<String, Arc<Codec>>,
}

impl CodecTable {
    fn insert(&mut self, type_id: TypeId, codec: Codec) {
        let codec = Arc::new(codec);
        if let Some(previous) = self.by_type.insert(type_id, codec.clone()) {
            // The old tag may since have been claimed by another type
            let owns_tag = self
                .by_tag
                .get(&previous.tag)
                .is_some_and(|bound| Arc::ptr_eq(bound, &previous));
            if previous.tag != codec.tag && owns_tag {
                self.by_tag.remove(&previous.tag);
            }
        }
        self.by_tag.insert(codec.tag.clone(), codec);
    }
}

pub struct SerializationFamily {
    name: String,
    exact: RwLock<CodecTable>,
    fallback: RwLock<CodecTable>,
}

impl SerializationFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exact: RwLock::new(CodecTable::default()),
            fallback: RwLock::new(CodecTable::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a codec for `T`, tagged on the wire with its Rust type name
    pub fn register<T, D, L>(&self, dumps: D, loads: L)
    where
        T: Any + Send,
        D: Fn(&T) -> Result<(Value, Vec<Frame>)> + Send + Sync + 'static,
        L: Fn(Value, Vec<Frame>) -> Result<T> + Send + Sync + 'static,
    {
        self.register_as::<T, D, L>(type_name::<T>(), dumps, loads)
    }

    /// Register a codec for `T` under an explicit wire tag. Use this when
    /// sender and receiver are built from different crates.
    pub fn register_as<T, D, L>(&self, tag: impl Into<String>, dumps: D, loads: L)
    where
        T: Any + Send,
        D: Fn(&T) -> Result<(Value, Vec<Frame>)> + Send + Sync + 'static,
        L: Fn(Value, Vec<Frame>) -> Result<T> + Send + Sync + 'static,
    {
        let codec = Codec {
            tag: tag.into(),
            dumps: Box::new(move |_: &SerializationFamily, value: &dyn Any| {
                dumps(downcast::<T>(value)?)
            }),
            loads: Box::new(move |_: &SerializationFamily, sub_header: Value, frames: Vec<Frame>| {
                let value: Box<dyn Any + Send> = Box::new(loads(sub_header, frames)?);
                Ok(value)
            }),
        };
        debug!("{}: registered {} as {:?}", self.name, type_name::<T>(), codec.tag);
        write(&self.exact).insert(TypeId::of::<T>(), codec);
    }

    /// Let `T` travel through the object-with-dict fallback codec
    pub fn register_object_dict<T: ObjectDict>(&self) {
        self.register_object_dict_as::<T>(type_name::<T>())
    }

    pub fn register_object_dict_as<T: ObjectDict>(&self, tag: impl Into<String>) {
        let codec = Codec {
            tag: tag.into(),
            dumps: Box::new(|family: &SerializationFamily, value: &dyn Any| {
                dump_object(family, downcast::<T>(value)?)
            }),
            loads: Box::new(|family: &SerializationFamily, sub_header: Value, frames: Vec<Frame>| {
                let value: Box<dyn Any + Send> = Box::new(load_object::<T>(family, sub_header, frames)?);
                Ok(value)
            }),
        };
        debug!("{}: registered object-dict {} as {:?}", self.name, type_name::<T>(), codec.tag);
        write(&self.fallback).insert(TypeId::of::<T>(), codec);
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.codec_for_type(TypeId::of::<T>()).is_some()
    }

    pub fn dumps<T: Any>(&self, value: &T) -> Result<(WireEnvelope, Vec<Frame>)> {
        self.dumps_dyn(value, type_name::<T>())
    }

    /// Serialize a type-erased value; `type_name` only feeds error messages
    pub fn dumps_dyn(&self, value: &dyn Any, type_name: &str) -> Result<(WireEnvelope, Vec<Frame>)> {
        let codec = self
            .codec_for_type(Any::type_id(value))
            .ok_or_else(|| SerializationError::UnimplementedType {
                family: self.name.clone(),
                type_name: type_name.to_string(),
            })?;

        let (sub_header, frames) = (codec.dumps)(self, value)?;
        // Device payloads are already in their transfer representation
        let header = WireEnvelope::new(&self.name, &codec.tag, sub_header, frames.len());
        Ok((header, frames))
    }

    pub fn loads(&self, header: WireEnvelope, frames: Vec<Frame>) -> Result<Box<dyn Any + Send>> {
        if header.serializer != self.name {
            return Err(SerializationError::FamilyMismatch {
                expected: self.name.clone(),
                found: header.serializer,
            });
        }
        header.check_frames(&frames)?;

        let tag = header.type_tag()?;
        let codec = self
            .codec_for_tag(tag)
            .ok_or_else(|| SerializationError::UnknownTypeOnDecode {
                family: self.name.clone(),
                tag: tag.to_string(),
            })?;

        (codec.loads)(self, header.sub_header, frames)
    }

    pub fn loads_as<T: Any>(&self, header: WireEnvelope, frames: Vec<Frame>) -> Result<T> {
        let tag = header.type_tag()?.to_string();
        self.loads(header, frames)?
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| SerializationError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                found: tag,
            })
    }

    fn codec_for_type(&self, type_id: TypeId) -> Option<Arc<Codec>> {
        if let Some(codec) = read(&self.exact).by_type.get(&type_id) {
            return Some(codec.clone());
        }
        read(&self.fallback).by_type.get(&type_id).cloned()
    }

    fn codec_for_tag(&self, tag: &str) -> Option<Arc<Codec>> {
        if let Some(codec) = read(&self.exact).by_tag.get(tag) {
            return Some(codec.clone());
        }
        read(&self.fallback).by_tag.get(tag).cloned()
    }
}

fn downcast<T: Any>(value: &dyn Any) -> Result<&T> {
    value
        .downcast_ref::<T>()
        .ok_or_else(|| SerializationError::TypeMismatch {
            expected: type_name::<T>().to_string(),
            found: "another type".to_string(),
        })
}

// Tables only ever gain entries, so a poisoned lock still holds usable data
fn read(lock: &RwLock<CodecTable>) -> RwLockReadGuard<'_, CodecTable> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<CodecTable>) -> RwLockWriteGuard<'_, CodecTable> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
