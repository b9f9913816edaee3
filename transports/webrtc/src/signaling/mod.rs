//! Signaling messages

pub mod protocol;

pub use protocol::SignalMessage;
