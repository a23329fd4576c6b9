use crate::*;
use eyestalk_probe::{BEGIN_NOTICE, DONE_NOTICE};

/// Two peers started four seconds apart keep their own schedules.
#[tokio::test(start_paused = true)]
async fn test_sessions_advance_independently() -> Result<()> {
    let mut h = Harness::new();
    let alice = Jid::parse(ALICE)?;
    let bob = Jid::parse(BOB)?;
    let offset = Duration::from_secs(4);

    h.chat(ALICE, "hello");
    h.settle().await;
    tokio::time::sleep(offset).await;
    h.chat(BOB, "hello");
    assert_eq!(h.registry.len(), 2);

    let mut sent = Vec::new();
    for _ in 0..8 {
        sent.push(h.next().await?);
    }

    let for_peer = |peer: &Jid| sent.iter().filter(|s| &s.to == peer).collect::<Vec<_>>();
    for (peer, start) in [(&alice, Duration::ZERO), (&bob, offset)] {
        let own = for_peer(peer);
        assert_eq!(own.len(), 4, "{peer}: {own:?}");
        assert_eq!(own[0].notice(), Some(BEGIN_NOTICE));
        own[0].assert_at(start);
        assert!(own[1].probe().is_some_and(|x| x.contains("esession_1")));
        own[1].assert_at(start);
        assert!(own[2].probe().is_some_and(|x| x.contains("receipt_1")));
        own[2].assert_at(start + WINDOW);
        assert_eq!(own[3].notice(), Some(DONE_NOTICE));
        own[3].assert_at(start + WINDOW * 2);
    }

    h.settle().await;
    assert!(h.registry.is_empty());
    Ok(())
}

/// A reply from one peer is never reported to another.
#[tokio::test(start_paused = true)]
async fn test_replies_stay_with_their_peer() -> Result<()> {
    let mut h = Harness::new();
    let bob = Jid::parse(BOB)?;

    h.chat(ALICE, "hello");
    h.chat(BOB, "hello");
    h.settle().await;
    h.drain();

    h.chat(BOB, "hi");
    h.settle().await;
    let notices = h.drain();
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|s| s.to == bob));
    Ok(())
}

/// Back-to-back first messages from one peer create a single session.
#[tokio::test(start_paused = true)]
async fn test_simultaneous_first_messages_start_one_run() -> Result<()> {
    let mut h = Harness::new();

    assert_eq!(h.chat(ALICE, "one"), Dispatch::Started);
    assert_eq!(h.chat(ALICE, "two"), Dispatch::Forwarded);
    h.settle().await;
    assert_eq!(h.registry.len(), 1);

    let sent = h.drain();
    let begins = sent.iter().filter(|s| s.notice() == Some(BEGIN_NOTICE)).count();
    let probes = sent.iter().filter(|s| s.probe().is_some()).count();
    assert_eq!(begins, 1);
    assert_eq!(probes, 1);
    Ok(())
}

/// First messages for one peer racing on worker threads create a single
/// session.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_messages_start_one_run() -> Result<()> {
    const SENDERS: usize = 16;
    let mut h = Harness::new();
    let barrier = Arc::new(tokio::sync::Barrier::new(SENDERS));

    let tasks: Vec<_> = (0..SENDERS)
        .map(|i| {
            let registry = h.registry.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let raw = format!("<message from='{ALICE}' type='chat'><body>{i}</body></message>");
                registry.on_inbound(&raw)
            })
        })
        .collect();

    let mut started = 0;
    for task in tasks {
        if task.await?? == Dispatch::Started {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(h.registry.len(), 1);

    assert_eq!(h.next().await?.notice(), Some(BEGIN_NOTICE));
    tokio::time::sleep(Duration::from_millis(200)).await;
    let begins = h.drain().iter().filter(|s| s.notice() == Some(BEGIN_NOTICE)).count();
    assert_eq!(begins, 0, "a second run was started");
    Ok(())
}

/// With bare-address keying, a second resource joins the running session
/// and its messages count as replies.
#[tokio::test(start_paused = true)]
async fn test_bare_keying_merges_resources() -> Result<()> {
    let mut h = Harness::with(shipped_fixtures(), KeyMode::BareJid);

    assert_eq!(h.chat(ALICE, "hello"), Dispatch::Started);
    assert_eq!(h.chat("alice@example.org/phone", "hi"), Dispatch::Forwarded);
    h.settle().await;

    let sent = h.drain();
    assert!(sent
        .iter()
        .any(|s| s.notice() == Some("I see you!\nfailed test: e2e_negotiation\n")));
    // Notices go to the address that started the run.
    assert!(sent.iter().all(|s| s.to.as_str() == ALICE));
    Ok(())
}
