pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod messaging;
pub mod serde_b64;
pub mod sessions;
pub mod topic;
pub mod transport;

pub use config::ProtocolConfig;
pub use db::SqliteStore;
pub use directory::{BundleRequest, Directory, MemoryDirectory, PublishedBundle, PublishedOpk};
pub use error::ProtocolError;
pub use messaging::{MessageEnvelopeProtocol, MessageKind, ReceivedMessage, WireMessage};
pub use sessions::{SessionState, SessionStore};
pub use transport::{Delivery, MemoryBus, Transport};
