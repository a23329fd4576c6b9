//! Routes stanzas read from the server into the session registry.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use eyestalk_core::{InboundStanza, Jid, StanzaKind};
use eyestalk_probe::{Connector, Dispatch, SessionRegistry};
use tokio::io::AsyncRead;

use crate::xmpp::framing::{Frame, StanzaFramer};

/// What the reader loop should do after one stanza.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The server sent a stream error; the connection is finished.
    StreamError(String),
}

pub struct InboundDispatcher {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
    /// Our server's address; keepalive pings from it are answered here.
    server: Jid,
}

impl InboundDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, connector: Arc<dyn Connector>, server: Jid) -> Self {
        Self {
            registry,
            connector,
            server,
        }
    }

    /// Handle one raw stanza. Per-stanza failures are logged and swallowed.
    pub fn handle(&self, raw: &str) -> Flow {
        let stanza = match InboundStanza::parse(raw) {
            Ok(stanza) => stanza,
            Err(e) => {
                tracing::warn!(stanza = %raw, error = %e, "dropping malformed stanza");
                return Flow::Continue;
            }
        };

        if stanza.kind == StanzaKind::Other("error".into()) {
            return Flow::StreamError(stanza.raw);
        }
        if self.is_server_ping(&stanza) {
            self.answer_ping(&stanza);
            return Flow::Continue;
        }

        let peer = stanza.from.as_ref().map(Jid::to_string).unwrap_or_default();
        match self.registry.dispatch(stanza) {
            Dispatch::Started => tracing::debug!(peer = %peer, "session started"),
            Dispatch::Forwarded => tracing::trace!(peer = %peer, "forwarded to session"),
            Dispatch::Ignored => {}
        }
        Flow::Continue
    }

    fn is_server_ping(&self, stanza: &InboundStanza) -> bool {
        stanza.kind == StanzaKind::Iq
            && stanza.stanza_type.as_deref() == Some("get")
            && stanza.raw.contains("urn:xmpp:ping")
            && stanza.from.as_ref().map_or(true, |from| *from == self.server)
    }

    fn answer_ping(&self, stanza: &InboundStanza) {
        let Some(id) = stanza.id.as_deref() else {
            tracing::debug!(stanza = %stanza.raw, "server ping without id");
            return;
        };
        let reply = format!(
            "<iq type='result' id='{}' to='{}'/>",
            quick_xml::escape::escape(id),
            self.server
        );
        if let Err(e) = self.connector.send_stanza(&self.server, &reply) {
            tracing::warn!(error = %e, "failed to answer server ping");
        }
    }
}

/// Read stanzas until the stream ends. Always returns an error: losing the
/// server connection is fatal.
pub async fn inbound_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    mut framer: StanzaFramer,
    dispatcher: InboundDispatcher,
) -> Result<()> {
    loop {
        let frame = framer
            .read_frame(&mut reader)
            .await
            .context("lost connection to server")?;
        match frame {
            Frame::Stanza(raw) => {
                tracing::trace!(stanza = %raw, "recv");
                if let Flow::StreamError(raw) = dispatcher.handle(&raw) {
                    bail!("stream error from server: {raw}");
                }
            }
            Frame::StreamClose => bail!("server closed the stream"),
            Frame::StreamOpen(header) => {
                tracing::warn!(header = %header, "unexpected stream restart from server");
            }
        }
    }
}
