//! Request and reply payloads.
//!
//! The pipeline never inspects concrete payload types. It asks a payload
//! whether it can be put on the wire ([`Payload::as_message`]) and, if so,
//! serializes it through [`WireMessage`]. Anything else is only ever shown
//! through its `Debug` representation.

use std::any::Any;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Upcast helper so boxed payloads can be downcast back to their concrete type.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value that can be serialized to the wire format.
pub trait WireMessage: Send + Sync {
    /// Encode as JSON bytes.
    fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error>;

    /// Encode as a JSON value, for embedding in an envelope.
    fn to_json_value(&self) -> Result<Value, serde_json::Error>;
}

/// Anything that can travel through the pipeline as a request or reply.
pub trait Payload: AsAny + fmt::Debug {
    /// The wire capability of this payload, if it has one.
    fn as_message(&self) -> Option<&dyn WireMessage> {
        None
    }
}

impl dyn Payload {
    /// Recover the concrete payload type.
    pub fn downcast<T: Payload>(self: Box<Self>) -> Result<Box<T>, Box<dyn Any + Send + Sync>> {
        self.into_any().downcast::<T>()
    }

    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A serde-serializable value that the pipeline treats as a structured message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structured<T>(pub T);

impl<T> Structured<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> WireMessage for Structured<T>
where
    T: Serialize + Send + Sync,
{
    fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.0)
    }
}

impl<T> Payload for Structured<T>
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn as_message(&self) -> Option<&dyn WireMessage> {
        Some(self)
    }
}

impl WireMessage for Value {
    fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        Ok(self.clone())
    }
}

impl Payload for Value {
    fn as_message(&self) -> Option<&dyn WireMessage> {
        Some(self)
    }
}

// Plain values: logged via Debug, never put on the wire.
impl Payload for () {}
impl Payload for String {}
impl Payload for &'static str {}
impl Payload for Vec<u8> {}
