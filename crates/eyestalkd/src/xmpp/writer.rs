//! Outbound half of the connection.

use anyhow::{Context, Result};
use eyestalk_probe::Outbound;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Drain queued stanzas onto the wire until every sender is dropped.
pub async fn writer_loop<W: AsyncWrite + Unpin>(
    mut io: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<()> {
    while let Some(item) = rx.recv().await {
        let to = item.to().clone();
        let xml = match item.into_xml() {
            Ok(xml) => xml,
            Err(e) => {
                tracing::warn!(peer = %to, error = %e, "dropping unencodable stanza");
                continue;
            }
        };
        tracing::trace!(peer = %to, stanza = %xml, "send");
        io.write_all(xml.as_bytes()).await.context("write to server failed")?;
        io.flush().await.context("flush to server failed")?;
    }
    tracing::info!("outbound queue closed, ending stream");
    io.write_all(b"</stream:stream>").await.ok();
    io.shutdown().await.ok();
    Ok(())
}
