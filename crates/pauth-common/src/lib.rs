//! Shared group parameters, wire codec, message taxonomy, configuration and
//! error types for the pauth workspace.

pub mod config;
pub mod error;
pub mod group;
pub mod wire;

pub use error::ProtocolError;
pub use group::GroupParams;
pub use wire::{Envelope, ErrorKind, MessageKind};
