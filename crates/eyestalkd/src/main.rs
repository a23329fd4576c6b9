//! eyestalkd: XMPP presence-leak probe bot.
//!
//! Usage: `eyestalkd <jid> <password>`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinError;

use eyestalk_core::config::EyestalkConfig;
use eyestalk_core::Jid;
use eyestalk_probe::{
    ChannelConnector, Connector, DirFixtureStore, KeyMode, ProbeCatalog, SessionContext,
    SessionRegistry,
};

mod dispatch;
mod xmpp;

use dispatch::InboundDispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(account), Some(password)) = (args.next(), args.next()) else {
        eprintln!("usage: eyestalkd <jid> <password>");
        std::process::exit(2);
    };
    let account = Jid::parse(&account).context("invalid account address")?;

    // Config
    let (config, errors) = EyestalkConfig::from_env();
    for e in errors {
        tracing::warn!(error = %e, "ignoring invalid setting, using default");
    }
    tracing::info!(
        account = %account,
        window_secs = config.probe.window.as_secs(),
        fixtures = %config.probe.fixture_dir.display(),
        bare_jid_sessions = config.probe.bare_jid_sessions,
        "eyestalkd starting"
    );

    let conn = xmpp::connect(&account, &password, &config.network)
        .await
        .context("failed to connect")?;

    // Shared state
    let (connector, outbound_rx) = ChannelConnector::new();
    let connector: Arc<dyn Connector> = Arc::new(connector);
    let ctx = SessionContext {
        connector: connector.clone(),
        fixtures: Arc::new(DirFixtureStore::new(config.probe.fixture_dir.clone())),
        catalog: ProbeCatalog::default(),
        window: config.probe.window,
    };
    let key_mode = if config.probe.bare_jid_sessions {
        KeyMode::BareJid
    } else {
        KeyMode::FullJid
    };
    let registry = SessionRegistry::new(ctx, key_mode);
    let server = Jid::parse(conn.jid.domain())?;

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let writer_task = tokio::spawn(xmpp::writer::writer_loop(conn.writer, outbound_rx));

    let reader_task = tokio::spawn(dispatch::inbound_loop(
        conn.reader,
        conn.framer,
        InboundDispatcher::new(registry.clone(), connector, server),
    ));

    let session_printer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(count = registry.len(), "session table snapshot");
                for peer in registry.peers() {
                    tracing::info!(peer = %peer, "  session");
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("failed to listen for shutdown signal")?;
            tracing::info!(active = registry.len(), "shutting down");
            Ok(())
        }
        r = reader_task => exited("reader", r),
        r = writer_task => exited("writer", r),
        r = session_printer => {
            tracing::error!("session printer exited: {:?}", r);
            Ok(())
        }
    }
}

/// Turn a finished connection task into the process result. These tasks
/// only stop when the server connection is gone.
fn exited(task: &str, result: Result<Result<()>, JoinError>) -> Result<()> {
    let err = match result {
        Ok(Ok(())) => anyhow::anyhow!("{task} task exited"),
        Ok(Err(e)) => e,
        Err(e) => anyhow::Error::new(e).context(format!("{task} task panicked")),
    };
    tracing::error!(error = %format!("{err:#}"), "connection lost");
    Err(err)
}
