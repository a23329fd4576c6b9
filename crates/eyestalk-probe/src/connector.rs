//! Outbound side of the connector boundary.
//!
//! Sessions never touch the network. They hand notices and raw probe
//! stanzas to a [`Connector`], which queues them for the transport. Both
//! calls are fire-and-forget: a failure is reported to the caller, never
//! retried.

use eyestalk_core::stanza::{chat_message, StanzaError};
use eyestalk_core::Jid;
use tokio::sync::mpsc;

/// Trait for whatever carries stanzas to the network.
pub trait Connector: Send + Sync {
    /// Send a plain-text chat notice.
    fn send_message(&self, to: &Jid, body: &str) -> Result<(), SendError>;

    /// Send a raw, already addressed protocol element.
    fn send_stanza(&self, to: &Jid, xml: &str) -> Result<(), SendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("could not encode stanza: {0}")]
    Encode(#[from] StanzaError),
}

/// One queued outbound item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message { to: Jid, body: String },
    Stanza { to: Jid, xml: String },
}

impl Outbound {
    pub fn to(&self) -> &Jid {
        match self {
            Self::Message { to, .. } | Self::Stanza { to, .. } => to,
        }
    }

    /// Wire form of this item.
    pub fn into_xml(self) -> Result<String, StanzaError> {
        match self {
            Self::Message { to, body } => chat_message(&to, &body),
            Self::Stanza { xml, .. } => Ok(xml),
        }
    }
}

/// A [`Connector`] that pushes everything onto an unbounded channel.
///
/// The daemon drains the receiver into the XMPP stream; tests drain it to
/// observe exactly what a peer would have been sent.
#[derive(Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, item: Outbound) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Closed)
    }
}

impl Connector for ChannelConnector {
    fn send_message(&self, to: &Jid, body: &str) -> Result<(), SendError> {
        self.push(Outbound::Message {
            to: to.clone(),
            body: body.to_string(),
        })
    }

    fn send_stanza(&self, to: &Jid, xml: &str) -> Result<(), SendError> {
        self.push(Outbound::Stanza {
            to: to.clone(),
            xml: xml.to_string(),
        })
    }
}
