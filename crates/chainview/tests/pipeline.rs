//! End-to-end: events through the watcher into ChainState, then consumer queries.

mod common;

use alloy::primitives::U256;
use chainview::{
    Bonus, ChainState, EventSource, InviteCodeRow, Listener, MemoryEventSource, RedemptionError,
    RequestStatus, WatcherConfig,
};
use common::*;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

fn hex(n: u8) -> String {
    addr(n).to_string()
}

fn code(
    code: &str,
    inviter: u8,
    max_uses: u32,
    invitee_bonus: u64,
    inviter_bonus: u64,
) -> InviteCodeRow {
    InviteCodeRow {
        code: code.into(),
        inviter: addr(inviter),
        max_uses,
        use_count: 0,
        bonus_dollars_invitee: invitee_bonus,
        bonus_dollars_inviter: inviter_bonus,
        zupass_email: None,
    }
}

async fn state() -> ChainState {
    ChainState::builder()
        .retry(fast_retry())
        .blacklist(["blacklisted-name".to_string()])
        .build()
        .await
}

#[tokio::test]
async fn events_flow_into_every_component() {
    init_tracing();
    let src = Arc::new(MemoryEventSource::new());
    src.extend([
        invite(1, None, addr(1)),
        name_registered(2, "alice", addr(1)),
        invite(3, Some(addr(1)), addr(2)),
        name_registered(4, "bob", addr(2)),
        invite(5, Some(addr(2)), addr(3)),
        // Rejected: both invitees are already registered.
        invite(6, Some(addr(3)), addr(2)),
        invite(7, Some(addr(3)), addr(1)),
        request_created(8, 1, addr(1), 25),
        request_created(9, 2, addr(1), 10),
        request_fulfilled(10, 1, addr(2)),
        transfer(1, 11),
    ])
    .await
    .unwrap();

    let state = state().await;
    let watcher = state
        .watcher([(1, src.clone() as Arc<dyn EventSource>)])
        .unwrap();
    assert_eq!(
        watcher.listener_names().await,
        vec!["names", "invites", "requests"]
    );
    assert_ok!(watcher.init().await);
    assert_eq!(watcher.watermark(1).await, Some(key(1, 11)));

    assert_eq!(state.resolve_addr("Alice").await.unwrap(), Some(addr(1)));
    assert_eq!(state.resolve_name(&hex(2)).await.unwrap().as_deref(), Some("bob"));
    assert_eq!(state.get_inviter(&hex(2)).await.unwrap(), Some(addr(1)));
    assert_eq!(state.get_inviter(&hex(1)).await.unwrap(), None);
    assert!(state.graph().is_ancestor(&addr(1), &addr(3)).await);
    assert_eq!(state.graph().depth(&addr(3)).await, 2);

    let alice_requests = state.requests_for_recipient_name("alice").await.unwrap();
    assert_eq!(alice_requests.len(), 2);
    assert_eq!(alice_requests[0].status(), RequestStatus::Fulfilled);
    assert_eq!(alice_requests[1].status(), RequestStatus::Pending);
    assert_eq!(state.requests().pending_count().await, 1);
    assert_eq!(
        state.get_request(U256::from(1)).await.unwrap().amount_dollars(),
        "25.00"
    );

    state
        .import_codes([code("alice-a", 1, 5, 10, 10)])
        .await
        .unwrap();
    let stats = state.invite_stats(&hex(1)).await.unwrap();
    assert_eq!(stats.invitees, 1);
    assert_eq!(stats.remaining_uses, 5);
}

#[tokio::test]
async fn asymmetric_bonus_survives_selection_and_redemption() {
    init_tracing();
    let state = state().await;
    state
        .import_codes([code("twenty", 7, 3, 20, 0)])
        .await
        .unwrap();
    let best = state
        .best_invite_code_for_sender(&hex(7))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(best, "twenty");
    assert_eq!(
        state.redeem(&best).await.unwrap(),
        Bonus {
            bonus_dollars_invitee: 20,
            bonus_dollars_inviter: 0
        }
    );
}

#[tokio::test]
async fn no_code_available_is_none() {
    let state = state().await;
    state.import_codes([code("used", 7, 1, 5, 5)]).await.unwrap();
    assert_ok!(state.redeem("used").await);
    assert_eq!(state.best_invite_code_for_sender(&hex(7)).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_never_exceed_max_uses() {
    let state = Arc::new(state().await);
    state.import_codes([code("once", 7, 1, 5, 5)]).await.unwrap();
    let attempts = (0..32).map(|_| {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.redeem("once").await })
    });
    let results: Vec<Result<Bonus, RedemptionError>> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, RedemptionError::CodeExhausted { .. })));
    assert_eq!(state.codes().get("once").await.unwrap().use_count, 1);
}

#[tokio::test]
async fn blacklisted_name_never_resolves_after_registration() {
    init_tracing();
    let src = Arc::new(MemoryEventSource::new());
    src.push(name_registered(1, "blacklisted-name", addr(4)))
        .await
        .unwrap();
    let state = state().await;
    let watcher = state
        .watcher([(1, src as Arc<dyn EventSource>)])
        .unwrap();
    assert_ok!(watcher.init().await);
    assert_eq!(state.resolve_addr("blacklisted-name").await.unwrap(), None);
    assert_eq!(state.resolve_name(&hex(4)).await.unwrap(), None);
}

#[tokio::test]
async fn fulfillment_before_creation_is_ignored() {
    init_tracing();
    let state = state().await;
    let requests = state.requests();
    requests
        .on_event(&request_fulfilled(1, 42, addr(2)))
        .await
        .unwrap();
    assert!(state.get_request(U256::from(42)).await.is_none());

    let created = request_created(2, 42, addr(1), 3);
    requests.on_event(&created).await.unwrap();
    requests.on_event(&created).await.unwrap();
    let r = state.get_request(U256::from(42)).await.unwrap();
    assert_eq!(r.status(), RequestStatus::Pending);
    assert_eq!(r.fulfilled, None);
    assert_eq!(requests.len().await, 1);
}

#[tokio::test]
async fn file_watermarks_survive_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let src = Arc::new(MemoryEventSource::new());
    src.extend([
        name_registered(1, "carol", addr(5)),
        request_created(2, 9, addr(5), 4),
    ])
    .await
    .unwrap();

    let first = ChainState::builder()
        .retry(fast_retry())
        .watermark_dir(dir.path())
        .build()
        .await;
    let watcher = first
        .watcher([(1, src.clone() as Arc<dyn EventSource>)])
        .unwrap();
    assert_ok!(watcher.init().await);
    assert!(dir.path().join("watermark-1.json").exists());

    src.push(request_fulfilled(3, 9, addr(6))).await.unwrap();
    let second = ChainState::builder()
        .retry(fast_retry())
        .watermark_dir(dir.path())
        .build()
        .await;
    let watcher = second
        .watcher([(1, src as Arc<dyn EventSource>)])
        .unwrap();
    assert_ok!(watcher.init().await);
    assert_eq!(watcher.watermark(1).await, Some(key(1, 3)));
    // Only the new event was replayed into the fresh state.
    assert!(second.get_request(U256::from(9)).await.is_none());
    assert_eq!(second.names().cached_addr("carol").await, None);
}

#[tokio::test]
async fn live_loop_wakes_on_push_and_stops_on_close() {
    init_tracing();
    let src = Arc::new(MemoryEventSource::new());
    let watcher = Arc::new(
        ChainState::builder()
            .retry(fast_retry())
            .watcher_config(WatcherConfig {
                batch_size: 100,
                // Long enough that only a push notification can wake the loop in time.
                poll_interval_ms: 60_000,
            })
            .build()
            .await
            .watcher([(1, src.clone() as Arc<dyn EventSource>)])
            .unwrap(),
    );
    let mut applied = watcher.subscribe();
    assert_ok!(watcher.init().await);
    let handle = tokio::spawn(Arc::clone(&watcher).run());

    // Let the loop reach its wait before appending.
    tokio::time::sleep(Duration::from_millis(50)).await;
    src.push(name_registered(1, "dave", addr(8))).await.unwrap();
    let ev = timeout(Duration::from_secs(5), applied.recv())
        .await
        .expect("event applied")
        .unwrap();
    assert_eq!(ev.key, key(1, 1));
    assert_eq!(watcher.watermark(1).await, Some(key(1, 1)));

    watcher.close();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("run returns after close")
        .unwrap();
}
