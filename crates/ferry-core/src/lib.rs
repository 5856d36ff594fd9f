//! ferry-core — wire codec, cipher session, and configuration.
//! Both the sender and receiver crates depend on this one.

pub mod codec;
pub mod config;
pub mod crypto;

pub use codec::{FrameHeader, MessageType};
pub use crypto::CipherSession;
