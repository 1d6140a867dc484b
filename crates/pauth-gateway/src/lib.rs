//! Connection lifecycle, the pending-pair registry, the Schnorr verifier,
//! and the protocol handler state machine (spec.md §4.5–§4.7).

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod schnorr;

pub use connection::{ChannelPhase, ConnectionContext, SessionData, SessionPhase};
pub use protocol::{serve, Gateway};
pub use registry::{PendingPairRegistry, ServerEvent};
