//! DevTools protocol plumbing
//!
//! `transport` moves frames, `client` correlates them, `session` scopes
//! them to a tab and `protocol` types them.

pub mod client;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{CDPClient, EventWaiter};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, SessionId, TargetId};
pub use session::CDPSession;
