//! Session registry: routes inbound stanzas to per-peer sessions.
//!
//! The first chat message from an unknown peer creates a session and
//! starts its probe run. Everything else that peer sends while the run is
//! in progress goes to that session as a reply. When the run completes the
//! session unregisters itself, so the next message starts over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use eyestalk_core::{InboundStanza, Jid, StanzaError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::session::{self, Session, SessionContext};

/// How a sender address maps to a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    /// Every full address is its own peer.
    #[default]
    FullJid,
    /// All resources of an account share one session.
    BareJid,
}

/// What happened to a dispatched stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A new session was created and its run started.
    Started,
    /// Handed to the peer's running session.
    Forwarded,
    /// No session and not a trigger (no sender, or not a message).
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed stanza: {0}")]
    Malformed(#[from] StanzaError),
}

struct SessionHandle {
    id: u64,
    inbox: mpsc::UnboundedSender<InboundStanza>,
    task: AbortHandle,
}

pub struct SessionRegistry {
    sessions: DashMap<Jid, SessionHandle>,
    next_id: AtomicU64,
    ctx: Arc<SessionContext>,
    key_mode: KeyMode,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext, key_mode: KeyMode) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            ctx: Arc::new(ctx),
            key_mode,
            this: this.clone(),
        })
    }

    /// Connector entry point: parse one raw inbound stanza and dispatch it.
    pub fn on_inbound(&self, raw: &str) -> Result<Dispatch, DispatchError> {
        let stanza = InboundStanza::parse(raw)?;
        Ok(self.dispatch(stanza))
    }

    /// Route a parsed stanza by its sender.
    ///
    /// Must be called from within a tokio runtime; new sessions are spawned
    /// as tasks.
    pub fn dispatch(&self, stanza: InboundStanza) -> Dispatch {
        let Some(from) = stanza.from.clone() else {
            tracing::trace!(stanza = %stanza.raw, "ignoring stanza without sender");
            return Dispatch::Ignored;
        };
        let key = self.key_for(&from);

        // The entry guard is held across send/spawn so a session finishing
        // concurrently cannot remove the entry in between.
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get().inbox.send(stanza) {
                Ok(()) => Dispatch::Forwarded,
                Err(mpsc::error::SendError(stanza)) => {
                    tracing::warn!(peer = %from, "session task is gone, dropping its entry");
                    if !stanza.is_message() {
                        entry.remove();
                        return Dispatch::Ignored;
                    }
                    entry.insert(self.spawn_session(from, key));
                    Dispatch::Started
                }
            },
            Entry::Vacant(entry) => {
                if !stanza.is_message() {
                    tracing::debug!(peer = %from, kind = ?stanza.kind, "ignoring non-message from unknown peer");
                    return Dispatch::Ignored;
                }
                entry.insert(self.spawn_session(from, key));
                Dispatch::Started
            }
        }
    }

    /// Drop the entry for `identity`, whatever session owns it, and stop
    /// its run. Returns false if there was none.
    pub fn remove(&self, identity: &Jid) -> bool {
        match self.sessions.remove(&self.key_for(identity)) {
            Some((key, handle)) => {
                handle.task.abort();
                tracing::debug!(peer = %key, session = handle.id, "session cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `key` only if it still belongs to session `id`.
    pub(crate) fn remove_session(&self, key: &Jid, id: u64) -> bool {
        let removed = self.sessions.remove_if(key, |_, handle| handle.id == id).is_some();
        if removed {
            tracing::debug!(peer = %key, session = id, "session removed");
        }
        removed
    }

    pub fn contains(&self, identity: &Jid) -> bool {
        self.sessions.contains_key(&self.key_for(identity))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Keys of all active sessions.
    pub fn peers(&self) -> Vec<Jid> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    fn key_for(&self, jid: &Jid) -> Jid {
        match self.key_mode {
            KeyMode::FullJid => jid.clone(),
            KeyMode::BareJid => jid.bare(),
        }
    }

    fn spawn_session(&self, target: Jid, key: Jid) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(peer = %target, session = id, "new peer, creating session");

        let session = Session::new(target, self.ctx.clone());
        let task = tokio::spawn(session::run(session, rx, self.this.clone(), key, id));

        SessionHandle {
            id,
            inbox: tx,
            task: task.abort_handle(),
        }
    }
}
