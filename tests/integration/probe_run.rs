use crate::*;
use eyestalk_probe::{BEGIN_NOTICE, DONE_NOTICE};

/// hello → beginning tests → probe 1 → probe 2 → all tests are done,
/// then a second hello starts again from probe 1.
#[tokio::test(start_paused = true)]
async fn test_full_run_then_restart() -> Result<()> {
    let mut h = Harness::new();
    let alice = Jid::parse(ALICE)?;

    assert_eq!(h.chat(ALICE, "hello"), Dispatch::Started);

    let begin = h.next().await?;
    assert_eq!(begin.notice(), Some(BEGIN_NOTICE));
    assert_eq!(begin.to, alice);
    begin.assert_at(Duration::ZERO);

    let first = h.next().await?;
    let xml = first.probe().context("expected probe stanza")?;
    assert!(xml.contains("esession_1"), "first probe should be e2e negotiation: {xml}");
    assert!(xml.contains(&format!("to=\"{ALICE}\"")), "probe not addressed to peer: {xml}");
    first.assert_at(Duration::ZERO);

    let second = h.next().await?;
    let xml = second.probe().context("expected probe stanza")?;
    assert!(xml.contains("receipt_1"), "second probe should be receipt request: {xml}");
    second.assert_at(WINDOW);

    let done = h.next().await?;
    assert_eq!(done.notice(), Some(DONE_NOTICE));
    done.assert_at(WINDOW * 2);

    h.settle().await;
    assert!(h.registry.is_empty(), "completed session should be removed");

    // Start over.
    assert_eq!(h.chat(ALICE, "hello"), Dispatch::Started);
    let begin = h.next().await?;
    assert_eq!(begin.notice(), Some(BEGIN_NOTICE));
    begin.assert_at(WINDOW * 2);
    let first = h.next().await?;
    assert!(first.probe().is_some_and(|x| x.contains("esession_1")));
    Ok(())
}

/// Presence, iq, or an unaddressed message never start a run.
#[tokio::test(start_paused = true)]
async fn test_only_messages_from_known_senders_start_a_run() -> Result<()> {
    let mut h = Harness::new();

    assert_eq!(h.inbound(&format!("<presence from='{ALICE}'/>")), Dispatch::Ignored);
    assert_eq!(
        h.inbound(&format!("<iq from='{ALICE}' type='get' id='v1'><query xmlns='jabber:iq:version'/></iq>")),
        Dispatch::Ignored
    );
    assert_eq!(h.inbound("<message type='chat'><body>hi</body></message>"), Dispatch::Ignored);

    h.settle().await;
    assert!(h.registry.is_empty());
    assert!(h.drain().is_empty());
    Ok(())
}

/// A fixture that cannot be loaded is skipped; the schedule is unchanged.
#[tokio::test(start_paused = true)]
async fn test_missing_fixture_keeps_schedule() -> Result<()> {
    let fixtures = eyestalk_probe::MemoryFixtureStore::new()
        .with("receipt_request", "<message type='chat' id='rr'><request xmlns='urn:xmpp:receipts'/></message>");
    let mut h = Harness::with(fixtures, KeyMode::FullJid);

    h.chat(ALICE, "hello");
    assert_eq!(h.next().await?.notice(), Some(BEGIN_NOTICE));

    // A reply in the skipped window is not reported against anything.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.chat(ALICE, "hi"), Dispatch::Forwarded);

    // No first probe; the next thing out is probe 2, one window later.
    let second = h.next().await?;
    assert!(second.probe().is_some_and(|x| x.contains("id=\"rr\"")));
    second.assert_at(WINDOW);

    let done = h.next().await?;
    assert_eq!(done.notice(), Some(DONE_NOTICE));
    done.assert_at(WINDOW * 2);
    Ok(())
}
