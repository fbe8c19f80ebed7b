//! Live polling under `run`: halting, resuming, and chains that keep going.

mod common;

use chainview::{
    EventKey, MemoryEventSource, MemoryWatermarkStore, Watcher, WatcherConfig, WatermarkStore,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(5);

fn live_watcher(
    chains: &[u64],
    src: &Arc<MemoryEventSource>,
    store: &Arc<MemoryWatermarkStore>,
    tripwire: &Arc<TripwireListener>,
) -> Arc<Watcher> {
    let mut builder = Watcher::builder()
        .store(store.clone())
        .listener(tripwire.clone())
        .retry(fast_retry())
        .config(WatcherConfig {
            batch_size: 100,
            // Only push notifications and resumes can wake the loops in time.
            poll_interval_ms: 60_000,
        });
    for chain_id in chains {
        builder = builder.source(*chain_id, src.clone());
    }
    Arc::new(builder.build().unwrap())
}

async fn wait_for_halt(watcher: &Watcher, chain_id: u64) -> String {
    timeout(WAIT, async {
        loop {
            if let Some(reason) = watcher.halted(chain_id).await {
                return reason;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("chain halts")
}

async fn wait_for_watermark(watcher: &Watcher, chain_id: u64, want: EventKey) {
    timeout(WAIT, async {
        while watcher.watermark(chain_id).await != Some(want) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watermark reached")
}

#[tokio::test]
async fn resume_wakes_a_halted_polling_loop() {
    init_tracing();
    let src = Arc::new(MemoryEventSource::new());
    let store = Arc::new(MemoryWatermarkStore::new());
    let tripwire = TripwireListener::new(2);
    let watcher = live_watcher(&[1], &src, &store, &tripwire);
    let mut applied = watcher.subscribe();
    assert_ok!(watcher.init().await);
    let handle = tokio::spawn(Arc::clone(&watcher).run());

    sleep(Duration::from_millis(50)).await;
    src.push(transfer(1, 1)).await.unwrap();
    src.push(transfer(1, 2)).await.unwrap();
    let reason = wait_for_halt(&watcher, 1).await;
    assert!(reason.contains("tripwire"), "{reason}");
    assert_eq!(store.load(1).await.unwrap(), Some(key(1, 1)));

    tripwire.disarm();
    assert_ok!(watcher.resume(1).await);
    src.push(transfer(1, 3)).await.unwrap();

    let mut keys = Vec::new();
    while keys.len() < 3 {
        let ev = timeout(WAIT, applied.recv())
            .await
            .expect("event applied")
            .unwrap();
        keys.push(ev.key);
    }
    assert_eq!(keys, vec![key(1, 1), key(1, 2), key(1, 3)]);
    wait_for_watermark(&watcher, 1, key(1, 3)).await;
    assert_eq!(store.load(1).await.unwrap(), Some(key(1, 3)));
    assert!(watcher.halted(1).await.is_none());
    assert!(!handle.is_finished());

    watcher.close();
    timeout(WAIT, handle)
        .await
        .expect("run returns after close")
        .unwrap();
}

#[tokio::test]
async fn halted_chain_does_not_stop_other_live_chains() {
    init_tracing();
    let src = Arc::new(MemoryEventSource::new());
    let store = Arc::new(MemoryWatermarkStore::new());
    let tripwire = TripwireListener::on_chain(1, 2);
    let watcher = live_watcher(&[1, 2], &src, &store, &tripwire);
    assert_ok!(watcher.init().await);
    let handle = tokio::spawn(Arc::clone(&watcher).run());

    sleep(Duration::from_millis(50)).await;
    src.extend([transfer(1, 1), transfer(1, 2), transfer(1, 3)])
        .await
        .unwrap();
    wait_for_halt(&watcher, 1).await;
    assert_eq!(watcher.watermark(1).await, Some(key(1, 1)));

    for block in 1..=4 {
        src.push(transfer(2, block)).await.unwrap();
    }
    wait_for_watermark(&watcher, 2, key(2, 4)).await;
    assert_eq!(store.load(2).await.unwrap(), Some(key(2, 4)));
    // Chain 1 stays parked on its failed event.
    assert!(watcher.halted(1).await.is_some());
    assert_eq!(watcher.watermark(1).await, Some(key(1, 1)));
    assert!(!tripwire.seen().contains(&key(1, 3)));

    watcher.close();
    timeout(WAIT, handle)
        .await
        .expect("run returns after close")
        .unwrap();
}
