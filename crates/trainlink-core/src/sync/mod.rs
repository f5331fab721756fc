//! State-sync protocol: message types, binary codec, and sequencing.

pub mod codec;
pub mod discovery;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, encode_message_now, SyncError};
pub use messages::*;
pub use sequence::SequenceCounter;
