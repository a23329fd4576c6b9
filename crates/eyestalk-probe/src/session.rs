//! Per-peer probe session.
//!
//! A session walks its probe queue front-to-back. Each probe gets one full
//! reply window; when the window closes the next probe fires, whether or
//! not the peer answered. A reply inside a window is reported back to the
//! peer as a failed probe and changes nothing else.
//!
//! [`Session`] is the synchronous state machine. [`run`] is the task that
//! drives it: it owns the session, its [`ProbeTimer`] and its inbox, and
//! unregisters the session when the queue is exhausted.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use eyestalk_core::{InboundStanza, Jid};
use tokio::sync::mpsc;

use crate::catalog::{ProbeCatalog, ProbeKind};
use crate::connector::Connector;
use crate::fixture::FixtureStore;
use crate::registry::SessionRegistry;
use crate::timer::ProbeTimer;

/// Sent before the first probe.
pub const BEGIN_NOTICE: &str = "beginning tests.";
/// Sent once the last window closes.
pub const DONE_NOTICE: &str = "all tests are done. send another message to start from the beginning.";

/// Everything a session needs from the outside world. Shared by all sessions.
pub struct SessionContext {
    pub connector: Arc<dyn Connector>,
    pub fixtures: Arc<dyn FixtureStore>,
    pub catalog: ProbeCatalog,
    /// Reply window per probe.
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Advancing; no probe outstanding yet.
    Running,
    /// A window is open. Its probe is out unless the send was skipped.
    AwaitingReply,
    /// Queue exhausted. Terminal.
    Completed,
}

pub struct Session {
    target: Jid,
    remaining: VecDeque<ProbeKind>,
    current: Option<ProbeKind>,
    state: SessionState,
    /// Probes the peer answered, in the order they failed.
    failed: Vec<ProbeKind>,
    ctx: Arc<SessionContext>,
}

impl Session {
    pub fn new(target: Jid, ctx: Arc<SessionContext>) -> Self {
        Self {
            target,
            remaining: ctx.catalog.queue(),
            current: None,
            state: SessionState::Running,
            failed: Vec::new(),
            ctx,
        }
    }

    pub fn target(&self) -> &Jid {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_probe(&self) -> Option<ProbeKind> {
        self.current
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    pub fn failed(&self) -> &[ProbeKind] {
        &self.failed
    }

    /// Announce the run and fire the first probe.
    ///
    /// Returns `AwaitingReply` if a window should now be armed, `Completed`
    /// if there was nothing to run.
    pub fn start(&mut self) -> SessionState {
        if self.state != SessionState::Running || self.current.is_some() {
            tracing::warn!(peer = %self.target, state = ?self.state, "session already started");
            return self.state;
        }
        tracing::info!(peer = %self.target, probes = self.remaining.len(), "starting probe run");
        self.notify(BEGIN_NOTICE);
        self.advance()
    }

    /// The peer sent something. Report it against the outstanding probe.
    ///
    /// Never advances the queue and never touches the window.
    pub fn on_reply(&mut self, stanza: &InboundStanza) {
        let probe = match (self.state, self.current) {
            (SessionState::AwaitingReply, Some(probe)) => probe,
            // Covers a skipped probe's window and stanzas drained after completion.
            (state, _) => {
                tracing::info!(
                    peer = %self.target,
                    ?state,
                    stanza = %stanza.raw,
                    "peer sent a stanza with no probe outstanding"
                );
                return;
            }
        };

        tracing::info!(
            peer = %self.target,
            probe = probe.name(),
            kind = ?stanza.kind,
            "peer answered inside probe window"
        );
        if self.failed.last() != Some(&probe) {
            self.failed.push(probe);
        }

        self.notify(&format!("I see you!\nfailed test: {}\n", probe.name()));
        self.notify(&format!("  you sent:\n{}\n", stanza.raw));
    }

    /// The window for the outstanding probe closed.
    pub fn on_timeout(&mut self) -> SessionState {
        if self.state != SessionState::AwaitingReply {
            tracing::warn!(peer = %self.target, state = ?self.state, "timeout with no probe outstanding");
            return self.state;
        }
        self.advance()
    }

    fn advance(&mut self) -> SessionState {
        self.state = SessionState::Running;

        let Some(probe) = self.remaining.pop_front() else {
            self.current = None;
            self.notify(DONE_NOTICE);
            self.state = SessionState::Completed;
            tracing::info!(
                peer = %self.target,
                failed = ?self.failed.iter().map(|p| p.name()).collect::<Vec<_>>(),
                "probe run complete"
            );
            return self.state;
        };

        match probe.send(&self.target, self.ctx.fixtures.as_ref(), self.ctx.connector.as_ref()) {
            Ok(stanzas) => {
                self.current = Some(probe);
                tracing::debug!(peer = %self.target, probe = probe.name(), stanzas, "probe sent");
            }
            // Nothing went out, so nothing can fail. The window still runs
            // so the rest of the queue keeps its schedule.
            Err(e) => {
                self.current = None;
                tracing::warn!(
                    peer = %self.target,
                    probe = probe.name(),
                    error = %e,
                    "probe send failed, skipping"
                );
            }
        }
        self.state = SessionState::AwaitingReply;
        self.state
    }

    fn notify(&self, body: &str) {
        if let Err(e) = self.ctx.connector.send_message(&self.target, body) {
            tracing::warn!(peer = %self.target, error = %e, "failed to send notice");
        }
    }
}

/// Drive `session` to completion.
///
/// `key` and `id` identify the registry entry this task owns; the entry is
/// removed only if it still belongs to this task.
pub(crate) async fn run(
    mut session: Session,
    mut inbox: mpsc::UnboundedReceiver<InboundStanza>,
    registry: Weak<SessionRegistry>,
    key: Jid,
    id: u64,
) {
    let mut timer = ProbeTimer::new(session.ctx.window);
    let mut state = session.start();

    while state == SessionState::AwaitingReply {
        timer.arm();
        loop {
            tokio::select! {
                _ = timer.expired() => break,
                Some(stanza) = inbox.recv() => session.on_reply(&stanza),
            }
        }
        state = session.on_timeout();
    }

    if let Some(registry) = registry.upgrade() {
        registry.remove_session(&key, id);
    }

    // Anything still queued arrived before the entry was removed.
    inbox.close();
    while let Ok(stanza) = inbox.try_recv() {
        session.on_reply(&stanza);
    }
}
