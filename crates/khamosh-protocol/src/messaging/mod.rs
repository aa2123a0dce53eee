//! Initial-handshake and subsequent-message framing on top of X3DH and the
//! Double Ratchet.

pub mod envelope;
mod protocol;
mod receiver;
mod sender;

pub use envelope::{InitialMessage, SubsequentMessage, WireMessage};
pub use protocol::{MessageEnvelopeProtocol, MessageKind, ReceivedMessage};
