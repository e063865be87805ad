//! # Ratewire Server
//!
//! TCP distribution server for ratewire: accepts client connections,
//! parses the line protocol (`subscribe|SYMBOL` / `unsubscribe|SYMBOL`),
//! maintains the symbol → subscriber-set registry, and broadcasts every
//! rate to the subscribed sessions.
//!
//! Failure isolation: a protocol error is reported to the offending
//! client only; a write failure or full outbound queue tears down that
//! session without affecting the others; a disconnect removes the
//! session from every subscription set.

pub mod protocol;
pub mod registry;
mod session;
pub mod server;

pub use protocol::{Command, ProtocolError, WELCOME};
pub use registry::{SubscribeOutcome, SubscriptionRegistry};
pub use server::{DistributionServer, ServerSink};
