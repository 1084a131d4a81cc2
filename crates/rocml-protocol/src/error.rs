use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("No {family} serializer registered for type {type_name}")]
    UnimplementedType { family: String, type_name: String },

    /// Sender and receiver disagree on registrations: a protocol mismatch,
    /// not a transient failure
    #[error("No {family} deserializer registered for type tag {tag:?}")]
    UnknownTypeOnDecode { family: String, tag: String },

    #[error("Unknown serialization family: {0}")]
    UnknownFamily(String),

    #[error("Header names family {found:?}, expected {expected:?}")]
    FamilyMismatch { expected: String, found: String },

    #[error("Header describes {flags} frames but {frames} were received")]
    FrameCountMismatch { flags: usize, frames: usize },

    #[error("Decoded a {found}, caller asked for {expected}")]
    TypeMismatch { expected: String, found: String },

    #[error("Missing field in sub-header: {0}")]
    MissingField(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SerializationError>;
