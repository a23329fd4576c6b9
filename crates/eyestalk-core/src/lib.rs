//! eyestalk-core: peer identities, stanza helpers and runtime configuration.
//! All other Eyestalk crates depend on this one.

pub mod config;
pub mod jid;
pub mod stanza;

pub use jid::{Jid, JidError};
pub use stanza::{InboundStanza, StanzaError, StanzaKind};
