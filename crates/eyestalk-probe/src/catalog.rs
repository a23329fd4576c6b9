//! Probe catalog: the fixed, ordered set of probes.
//!
//! Every probe replays a recorded fixture addressed to the peer under
//! test. The order of the catalog is the order in which probes fire.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use eyestalk_core::stanza::readdress;
use eyestalk_core::Jid;

use crate::connector::{Connector, SendError};
use crate::fixture::{FixtureError, FixtureStore};

/// A probe kind. The set is closed; adding one means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// XEP-0217 / XEP-0116 encrypted session negotiation request.
    E2eNegotiation,
    /// Chat message carrying a XEP-0184 delivery receipt request.
    ReceiptRequest,
    /// XEP-0199 client-to-client ping. Defined but not in the default run.
    ClientPing,
}

/// Probes run against every new peer, in order.
pub const DEFAULT_SEQUENCE: &[ProbeKind] = &[ProbeKind::E2eNegotiation, ProbeKind::ReceiptRequest];

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [
        ProbeKind::E2eNegotiation,
        ProbeKind::ReceiptRequest,
        ProbeKind::ClientPing,
    ];

    /// Name reported to the peer when this probe fails.
    pub fn name(self) -> &'static str {
        match self {
            Self::E2eNegotiation => "e2e_negotiation",
            Self::ReceiptRequest => "receipt_request",
            Self::ClientPing => "client_ping",
        }
    }

    /// Fixture replayed by this probe.
    pub fn fixture(self) -> &'static str {
        match self {
            Self::E2eNegotiation => "xep217",
            Self::ReceiptRequest => "receipt_request",
            Self::ClientPing => "xmpp_ping",
        }
    }

    /// Load this probe's fixture and address every stanza in it to `target`.
    pub fn stanzas(self, target: &Jid, fixtures: &dyn FixtureStore) -> Result<Vec<String>, FixtureError> {
        let recorded = fixtures.load(self.fixture())?;
        readdress(&recorded, target).map_err(|source| FixtureError::Malformed {
            name: self.fixture().to_string(),
            source,
        })
    }

    /// Send this probe to `target`. Returns the number of stanzas sent.
    pub fn send(
        self,
        target: &Jid,
        fixtures: &dyn FixtureStore,
        connector: &dyn Connector,
    ) -> Result<usize, ProbeError> {
        let stanzas = self.stanzas(target, fixtures)?;
        for xml in &stanzas {
            connector.send_stanza(target, xml)?;
        }
        Ok(stanzas.len())
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered probe list, shared by every session.
#[derive(Debug, Clone)]
pub struct ProbeCatalog {
    probes: Arc<[ProbeKind]>,
}

impl ProbeCatalog {
    pub fn new(probes: &[ProbeKind]) -> Self {
        Self {
            probes: Arc::from(probes),
        }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProbeKind> + '_ {
        self.probes.iter().copied()
    }

    /// A fresh queue for one session to consume front-to-back.
    pub fn queue(&self) -> VecDeque<ProbeKind> {
        self.iter().collect()
    }
}

impl Default for ProbeCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE)
    }
}
