use crate::*;
use eyestalk_probe::{BEGIN_NOTICE, DONE_NOTICE};

/// hello → probe 1 → hi → failure notice echoing hi → probe 2 still at the
/// original deadline.
#[tokio::test(start_paused = true)]
async fn test_reply_is_reported_and_does_not_move_the_window() -> Result<()> {
    let mut h = Harness::new();

    h.chat(ALICE, "hello");
    assert_eq!(h.next().await?.notice(), Some(BEGIN_NOTICE));
    assert!(h.next().await?.probe().is_some());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.chat(ALICE, "hi"), Dispatch::Forwarded);

    let seen = h.next().await?;
    assert_eq!(seen.notice(), Some("I see you!\nfailed test: e2e_negotiation\n"));
    seen.assert_at(Duration::from_secs(3));

    let echo = h.next().await?;
    let text = echo.notice().context("expected echo notice")?;
    assert!(text.starts_with("  you sent:\n<message"), "{text:?}");
    assert!(text.contains("<body>hi</body>"), "{text:?}");

    let second = h.next().await?;
    assert!(second.probe().is_some_and(|x| x.contains("receipt_1")));
    second.assert_at(WINDOW);
    Ok(())
}

/// Any number of replies inside one window never advance the sequence.
#[tokio::test(start_paused = true)]
async fn test_many_replies_do_not_advance() -> Result<()> {
    let mut h = Harness::new();

    h.chat(ALICE, "hello");
    h.next().await?;
    h.next().await?;

    const REPLIES: usize = 5;
    for i in 0..REPLIES {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.chat(ALICE, &format!("reply {i}"));
    }
    h.settle().await;

    let notices = h.drain();
    assert_eq!(notices.len(), REPLIES * 2);
    assert!(notices.iter().all(|s| s.probe().is_none()), "no probe may fire early");
    assert!(notices
        .iter()
        .step_by(2)
        .all(|s| s.notice() == Some("I see you!\nfailed test: e2e_negotiation\n")));

    let second = h.next().await?;
    assert!(second.probe().is_some_and(|x| x.contains("receipt_1")));
    second.assert_at(WINDOW);

    // A reply in the second window names the second probe.
    h.inbound(&format!("<presence from='{ALICE}' type='unavailable'/>"));
    let seen = h.next().await?;
    assert_eq!(seen.notice(), Some("I see you!\nfailed test: receipt_request\n"));
    let echo = h.next().await?;
    assert!(echo.notice().is_some_and(|t| t.contains("<presence")));

    assert_eq!(h.next().await?.notice(), Some(DONE_NOTICE));
    Ok(())
}
