//! Client-to-server XMPP connection.
//!
//! Connect flow:
//! 1. TCP to `EYESTALK_SERVER`, or the account domain on 5222
//! 2. stream open, STARTTLS, TLS upgrade
//! 3. stream restart, SASL PLAIN
//! 4. stream restart, resource bind (and legacy session if required)
//! 5. initial presence
//!
//! Every server read during negotiation is bounded by the handshake
//! timeout. Any failure here is fatal; there is no reconnect.

pub mod features;
pub mod framing;
pub mod tls;
pub mod writer;

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use eyestalk_core::config::{split_host_port, NetworkConfig, DEFAULT_CLIENT_PORT};
use eyestalk_core::stanza::child_text;
use eyestalk_core::{InboundStanza, Jid, StanzaKind};
use quick_xml::escape::escape;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use features::StreamFeatures;
use framing::{Frame, StanzaFramer};

pub type ReadHalf = tokio::io::ReadHalf<TlsStream<TcpStream>>;
pub type WriteHalf = tokio::io::WriteHalf<TlsStream<TcpStream>>;

const BIND_ID: &str = "bind_1";
const SESSION_ID: &str = "session_1";

/// A negotiated, bound, available connection.
pub struct Connection {
    /// Address the server bound us to.
    pub jid: Jid,
    pub reader: ReadHalf,
    pub writer: WriteHalf,
    /// Holds any bytes read past the end of negotiation.
    pub framer: StanzaFramer,
}

pub async fn connect(account: &Jid, password: &str, net: &NetworkConfig) -> Result<Connection> {
    let domain = account.domain().to_string();
    let (host, port) = match &net.server {
        Some(server) => split_host_port(server, DEFAULT_CLIENT_PORT),
        None => (domain.clone(), DEFAULT_CLIENT_PORT),
    };

    tracing::info!(host = %host, port, "connecting");
    let tcp = timeout(net.connect_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| anyhow!("connect to {host}:{port} timed out"))?
        .with_context(|| format!("connect to {host}:{port} failed"))?;

    let mut plain = Negotiator::new(tcp, &domain, net.handshake_timeout);
    let features = plain.open().await?;
    if !features.starttls {
        bail!("server does not offer STARTTLS");
    }
    plain.send("<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>").await?;
    let reply = plain.stanza("STARTTLS").await?;
    if reply.kind != StanzaKind::Other("proceed".into()) {
        bail!("STARTTLS refused: {}", reply.raw);
    }
    let (tcp, _) = plain.into_parts();

    let tls = timeout(net.handshake_timeout, tls::upgrade(tcp, &domain))
        .await
        .map_err(|_| anyhow!("TLS handshake with {domain} timed out"))??;
    tracing::debug!(domain = %domain, "TLS established");

    let mut secure = Negotiator::new(tls, &domain, net.handshake_timeout);
    let jid = login(&mut secure, account, password, &net.resource).await?;
    secure.send("<presence/>").await?;
    tracing::info!(jid = %jid, "online");

    let (io, framer) = secure.into_parts();
    let (reader, writer) = tokio::io::split(io);
    Ok(Connection {
        jid,
        reader,
        writer,
        framer,
    })
}

/// SASL PLAIN then resource bind over an already secured stream.
/// Returns the bound address.
async fn login<S>(neg: &mut Negotiator<S>, account: &Jid, password: &str, resource: &str) -> Result<Jid>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let features = neg.open().await?;
    if !features.offers("PLAIN") {
        bail!("server does not offer SASL PLAIN (offered: {:?})", features.mechanisms);
    }
    let local = account
        .local()
        .ok_or_else(|| anyhow!("account address {account} has no local part"))?;

    let credentials = STANDARD.encode(format!("\0{local}\0{password}"));
    neg.send(&format!(
        "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{credentials}</auth>"
    ))
    .await?;
    let reply = neg.stanza("SASL result").await?;
    match &reply.kind {
        StanzaKind::Other(name) if name == "success" => tracing::debug!("authenticated"),
        StanzaKind::Other(name) if name == "failure" => bail!("authentication failed: {}", reply.raw),
        _ => bail!("unexpected SASL reply: {}", reply.raw),
    }

    let features = neg.open().await?;
    if !features.bind {
        bail!("server does not offer resource binding");
    }
    let resource = account.resource().unwrap_or(resource);
    neg.send(&format!(
        "<iq type='set' id='{BIND_ID}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>{}</resource></bind></iq>",
        escape(resource)
    ))
    .await?;
    let reply = neg.iq_reply(BIND_ID, "resource bind").await?;
    let jid = match child_text(&reply.raw, "jid")? {
        Some(bound) => Jid::parse(bound.trim()).context("server bound an invalid address")?,
        None => Jid::parse(&format!("{}/{resource}", account.bare()))?,
    };

    if features.session_required {
        neg.send(&format!(
            "<iq type='set' id='{SESSION_ID}'><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></iq>"
        ))
        .await?;
        neg.iq_reply(SESSION_ID, "session establishment").await?;
    }
    Ok(jid)
}

fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>",
        escape(domain)
    )
}

/// Request/response helper for the negotiation phase.
struct Negotiator<S> {
    io: S,
    framer: StanzaFramer,
    domain: String,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Negotiator<S> {
    fn new(io: S, domain: &str, timeout: Duration) -> Self {
        Self {
            io,
            framer: StanzaFramer::new(),
            domain: domain.to_string(),
            timeout,
        }
    }

    fn into_parts(self) -> (S, StanzaFramer) {
        (self.io, self.framer)
    }

    async fn send(&mut self, xml: &str) -> Result<()> {
        timeout(self.timeout, self.io.write_all(xml.as_bytes()))
            .await
            .map_err(|_| anyhow!("timed out writing to server"))?
            .context("write to server failed")?;
        timeout(self.timeout, self.io.flush())
            .await
            .map_err(|_| anyhow!("timed out writing to server"))?
            .context("flush to server failed")
    }

    async fn frame(&mut self, step: &str) -> Result<Frame> {
        let frame = timeout(self.timeout, self.framer.read_frame(&mut self.io))
            .await
            .map_err(|_| anyhow!("timed out waiting for {step}"))?
            .with_context(|| format!("waiting for {step}"))?;
        tracing::trace!(step, ?frame, "recv");
        Ok(frame)
    }

    /// Next top-level element. Stream errors and closes are failures.
    async fn stanza(&mut self, step: &str) -> Result<InboundStanza> {
        match self.frame(step).await? {
            Frame::Stanza(raw) => {
                let stanza = InboundStanza::parse(&raw).with_context(|| format!("malformed {step} reply"))?;
                if stanza.kind == StanzaKind::Other("error".into()) {
                    bail!("stream error during {step}: {raw}");
                }
                Ok(stanza)
            }
            Frame::StreamOpen(_) => bail!("unexpected stream header during {step}"),
            Frame::StreamClose => bail!("server closed the stream during {step}"),
        }
    }

    /// Wait for the iq answering `id`, skipping anything else.
    async fn iq_reply(&mut self, id: &str, step: &str) -> Result<InboundStanza> {
        loop {
            let stanza = self.stanza(step).await?;
            if stanza.kind != StanzaKind::Iq || stanza.id.as_deref() != Some(id) {
                tracing::debug!(step, stanza = %stanza.raw, "skipping unrelated stanza");
                continue;
            }
            return match stanza.stanza_type.as_deref() {
                Some("result") => Ok(stanza),
                _ => Err(anyhow!("{step} rejected: {}", stanza.raw)),
            };
        }
    }

    /// (Re)start the stream and read the server's features.
    async fn open(&mut self) -> Result<StreamFeatures> {
        let header = stream_header(&self.domain);
        self.send(&header).await?;
        match self.frame("stream header").await? {
            Frame::StreamOpen(_) => {}
            Frame::Stanza(raw) => bail!("expected stream header, got {raw}"),
            Frame::StreamClose => bail!("server closed the stream"),
        }
        let features = self.stanza("stream features").await?;
        if features.kind != StanzaKind::Other("features".into()) {
            bail!("expected stream features, got {}", features.raw);
        }
        StreamFeatures::parse(&features.raw).context("malformed stream features")
    }
}
