use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SerializationError};

/// One contiguous buffer of a serialized payload
pub type Frame = Vec<u8>;

/// Self-describing header sent ahead of a value's frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Codec-specific, opaque to the transport
    #[serde(rename = "sub-header")]
    pub sub_header: Value,
    /// Wire tag of the runtime type, so the receiver can find its codec
    #[serde(rename = "type-serialized")]
    pub type_serialized: Vec<u8>,
    pub serializer: String,
    /// One flag per frame
    pub compression: Vec<bool>,
}

impl WireEnvelope {
    pub fn new(family: &str, tag: &str, sub_header: Value, frame_count: usize) -> Self {
        Self {
            sub_header,
            type_serialized: tag.as_bytes().to_vec(),
            serializer: family.to_string(),
            compression: vec![false; frame_count],
        }
    }

    pub fn type_tag(&self) -> Result<&str> {
        std::str::from_utf8(&self.type_serialized)
            .map_err(|e| SerializationError::Codec(format!("type tag is not UTF-8: {}", e)))
    }

    pub fn frame_count(&self) -> usize {
        self.compression.len()
    }

    pub fn check_frames(&self, frames: &[Frame]) -> Result<()> {
        if self.compression.len() != frames.len() {
            return Err(SerializationError::FrameCountMismatch {
                flags: self.compression.len(),
                frames: frames.len(),
            });
        }
        Ok(())
    }
}
