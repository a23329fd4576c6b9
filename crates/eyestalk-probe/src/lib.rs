//! eyestalk-probe: the probe sequencer.
//!
//! A [`SessionRegistry`] owns one [`Session`] per peer. Each session walks
//! the [`ProbeCatalog`] in order, sending one probe per reply window and
//! reporting any reply that lands inside a window back to the peer.

pub mod catalog;
pub mod connector;
pub mod fixture;
pub mod registry;
pub mod session;
pub mod timer;

pub use catalog::{ProbeCatalog, ProbeError, ProbeKind, DEFAULT_SEQUENCE};
pub use connector::{ChannelConnector, Connector, Outbound, SendError};
pub use fixture::{DirFixtureStore, FixtureError, FixtureStore, MemoryFixtureStore};
pub use registry::{Dispatch, DispatchError, KeyMode, SessionRegistry};
pub use session::{Session, SessionContext, SessionState, BEGIN_NOTICE, DONE_NOTICE};
pub use timer::ProbeTimer;
