#![forbid(unsafe_code)]
use serde_json::Value;
use std::rc::Rc;
use thiserror::Error;

/// Describes errors that can occur while serializing and deserializing data,
/// typically while streaming asynchronous values from the server to the
/// client.
#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    /// Errors that occur during serialization.
    #[error("error serializing value: {0}")]
    Serialize(Rc<dyn std::error::Error>),
    /// Errors that occur during deserialization.
    #[error("error deserializing value: {0}")]
    Deserialize(Rc<dyn std::error::Error>),
}

/// Describes an object that can cross the server→client side channel.
///
/// Payloads travel as JSON-compatible [`Value`]s keyed by owner id. This
/// trait is blanket-implemented for anything that supports serde in both
/// directions, so user data rarely needs a manual implementation.
pub trait Serializable
where
    Self: Sized,
{
    /// Serializes the object into a side-channel payload.
    fn to_value(&self) -> Result<Value, SerializationError>;

    /// Deserializes the object from a side-channel payload.
    fn from_value(value: Value) -> Result<Self, SerializationError>;
}

impl<T> Serializable for T
where
    T: serde::de::DeserializeOwned + serde::Serialize,
{
    fn to_value(&self) -> Result<Value, SerializationError> {
        serde_json::to_value(self)
            .map_err(|e| SerializationError::Serialize(Rc::new(e)))
    }

    fn from_value(value: Value) -> Result<Self, SerializationError> {
        serde_json::from_value(value)
            .map_err(|e| SerializationError::Deserialize(Rc::new(e)))
    }
}
