//! Eyestalk integration test harness.
//!
//! Tests here drive a full `SessionRegistry` the way the daemon does,
//! feeding it raw inbound stanzas and recording everything sessions send,
//! stamped with the (virtual) time it was sent.
//! The clock is paused (`start_paused = true`), so reply windows elapse
//! instantly while timings stay exact.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;

use eyestalk_core::Jid;
use eyestalk_probe::{
    Connector, Dispatch, DirFixtureStore, FixtureStore, KeyMode, Outbound, ProbeCatalog, SendError,
    SessionContext, SessionRegistry,
};

mod peers;
mod probe_run;
mod replies;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WINDOW: Duration = Duration::from_secs(10);
/// Slack allowed when comparing observed send times with expected ones.
pub const TOLERANCE: Duration = Duration::from_millis(50);

pub const ALICE: &str = "alice@example.org/laptop";
pub const BOB: &str = "bob@example.net/phone";

/// The fixtures shipped with the daemon.
pub fn shipped_fixtures() -> DirFixtureStore {
    DirFixtureStore::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/stanzas"))
}

/// One outbound item and when it was sent, relative to harness start.
#[derive(Debug)]
pub struct Sent {
    pub at: Duration,
    pub to: Jid,
    pub item: Outbound,
}

impl Sent {
    /// Notice text, or None for a probe stanza.
    pub fn notice(&self) -> Option<&str> {
        match &self.item {
            Outbound::Message { body, .. } => Some(body),
            Outbound::Stanza { .. } => None,
        }
    }

    /// Probe XML, or None for a notice.
    pub fn probe(&self) -> Option<&str> {
        match &self.item {
            Outbound::Stanza { xml, .. } => Some(xml),
            Outbound::Message { .. } => None,
        }
    }

    pub fn assert_at(&self, expected: Duration) {
        let diff = if self.at > expected { self.at - expected } else { expected - self.at };
        assert!(
            diff <= TOLERANCE,
            "sent at {:?}, expected {:?}: {:?}",
            self.at,
            expected,
            self.item
        );
    }
}

/// Connector that timestamps everything at the moment a session sends it.
struct Recorder {
    tx: mpsc::UnboundedSender<Sent>,
    started: Instant,
}

impl Recorder {
    fn push(&self, item: Outbound) -> Result<(), SendError> {
        let sent = Sent {
            at: Instant::now() - self.started,
            to: item.to().clone(),
            item,
        };
        self.tx.send(sent).map_err(|_| SendError::Closed)
    }
}

impl Connector for Recorder {
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

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    rx: mpsc::UnboundedReceiver<Sent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(shipped_fixtures(), KeyMode::FullJid)
    }

    pub fn with(fixtures: impl FixtureStore + 'static, key_mode: KeyMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder {
            tx,
            started: Instant::now(),
        };
        let ctx = SessionContext {
            connector: Arc::new(recorder),
            fixtures: Arc::new(fixtures),
            catalog: ProbeCatalog::default(),
            window: WINDOW,
        };
        Self {
            registry: SessionRegistry::new(ctx, key_mode),
            rx,
        }
    }

    /// Deliver a chat message from `from`, as the server would.
    pub fn chat(&self, from: &str, body: &str) -> Dispatch {
        let raw = format!("<message from='{from}' type='chat' id='m1'><body>{body}</body></message>");
        self.registry
            .on_inbound(&raw)
            .unwrap_or_else(|e| panic!("dispatch of {raw:?} failed: {e}"))
    }

    /// Deliver any raw stanza.
    pub fn inbound(&self, raw: &str) -> Dispatch {
        self.registry
            .on_inbound(raw)
            .unwrap_or_else(|e| panic!("dispatch of {raw:?} failed: {e}"))
    }

    /// Next outbound item, waiting at most a minute of (virtual) time.
    pub async fn next(&mut self) -> Result<Sent> {
        tokio::time::timeout(Duration::from_secs(60), self.rx.recv())
            .await
            .context("timed out waiting for outbound traffic")?
            .context("outbound channel closed")
    }

    /// Everything queued right now, without advancing time.
    pub fn drain(&mut self) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Ok(sent) = self.rx.try_recv() {
            out.push(sent);
        }
        out
    }

    /// Let spawned session tasks run without moving the clock.
    pub async fn settle(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn shipped_fixtures_load() {
    let store = shipped_fixtures();
    for name in ["xep217", "receipt_request", "xmpp_ping"] {
        let xml = store
            .load(name)
            .unwrap_or_else(|e| panic!("fixture {name} should load: {e}"));
        assert!(xml.trim_start().starts_with('<'), "{name} is not XML");
    }
}
