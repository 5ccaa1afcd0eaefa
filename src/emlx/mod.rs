//! Apple Mail `.emlx` envelope support
//!
//! An envelope is a decimal byte count on its own line, that many bytes of
//! RFC 5322 message, then a property-list dictionary with Apple's metadata.

pub mod codec;
pub mod headers;
pub mod metadata;

pub use codec::{Envelope, EnvelopeCodec, EnvelopeProbe};
pub use headers::{HeaderBlock, MessageKey};
pub use metadata::EnvelopeMetadata;
