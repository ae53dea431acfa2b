//! Response encoding subsystem.
//!
//! # Data Flow
//! ```text
//! handler Ok(reply)  → envelope.rs {code, message, data}
//! handler Err(error) → resolver.rs (code) → envelope.rs {code}
//!     → codec.rs (negotiated from Accept, JSON fallback)
//!     → EncodedResponse (status 200)
//! ```
//!
//! # Design Decisions
//! - Error text never reaches the body, only the resolved code
//! - Encoding never fails: a literal fallback body is written instead
//! - Code mapping is pluggable; no reason-string parsing in the core

pub mod codec;
pub mod envelope;
pub mod resolver;

pub use codec::{Codec, CodecError, CodecRegistry, JsonCodec};
pub use envelope::{EncodedResponse, Envelope, ResponseEncoder, FALLBACK_BODY};
pub use resolver::{ErrorCodeMapper, ErrorCodeResolver, DEFAULT_FALLBACK_CODE};
