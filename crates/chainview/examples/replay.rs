//! Example: replay a JSON-lines event file into ChainState, print derived state, then follow.
//!
//! Usage: cargo run -p chainview --example replay -- [--config config.json] [--events events.jsonl]
//!
//! Each line of the events file is one serialized `Event`. Without `--events` a small demo set is
//! used. After catch-up the watcher keeps polling until Ctrl-C.

use alloy::primitives::{Address, U256};
use chainview::{
    ChainStateBuilder, Config, Event, EventKey, EventKind, EventSource, MemoryEventSource,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn demo_events() -> Vec<Event> {
    let alice = Address::with_last_byte(0xa1);
    let bob = Address::with_last_byte(0xb0);
    let kinds = [
        EventKind::InviteRedeemed {
            inviter: None,
            invitee: alice,
        },
        EventKind::NameRegistered {
            name: "alice".into(),
            addr: alice,
        },
        EventKind::InviteRedeemed {
            inviter: Some(alice),
            invitee: bob,
        },
        EventKind::NameRegistered {
            name: "bob".into(),
            addr: bob,
        },
        EventKind::RequestCreated {
            id: U256::from(1),
            recipient: alice,
            amount: U256::from(12_500_000u64),
            memo: "lunch".into(),
            created_at: 1_700_000_000,
        },
        EventKind::RequestFulfilled {
            id: U256::from(1),
            fulfiller: bob,
            fulfilled_at: 1_700_000_060,
        },
    ];
    kinds
        .into_iter()
        .enumerate()
        .map(|(i, kind)| Event::new(EventKey::new(1, 100 + i as u64, 0, 0), kind))
        .collect()
}

fn load_events(path: &str) -> Result<Vec<Event>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let ev: Event = serde_json::from_str(line).map_err(|e| format!("line {}: {e}", n + 1))?;
        events.push(ev);
    }
    events.sort_by_key(|e| e.key);
    Ok(events)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chainview=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut events_path = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--events" => {
                i += 1;
                events_path = args.get(i).cloned();
            }
            _ => {}
        }
        i += 1;
    }

    let config = match &config_path {
        Some(p) => Config::from_file(p)?,
        None => Config::default(),
    };
    let events = match &events_path {
        Some(p) => load_events(p)?,
        None => demo_events(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let source = Arc::new(MemoryEventSource::new());
        source.extend(events.iter().cloned()).await?;
        let chains: BTreeSet<u64> = events.iter().map(|e| e.key.chain_id).collect();
        if chains.is_empty() {
            eprintln!("no events to replay");
            return Ok(());
        }

        let state = ChainStateBuilder::from_config(&config)?.build().await;
        let sources = chains
            .iter()
            .map(|c| (*c, Arc::clone(&source) as Arc<dyn EventSource>));
        let watcher = Arc::new(state.watcher(sources)?);
        watcher.init().await?;

        for chain_id in &chains {
            println!(
                "chain {chain_id}: watermark {:?}",
                watcher.watermark(*chain_id).await
            );
        }
        let mut addrs: BTreeSet<Address> = BTreeSet::new();
        for ev in &events {
            match &ev.kind {
                EventKind::NameRegistered { addr, .. } => {
                    addrs.insert(*addr);
                }
                EventKind::InviteRedeemed { invitee, .. } => {
                    addrs.insert(*invitee);
                }
                _ => {}
            }
        }
        for addr in &addrs {
            let name = state.names().resolve_name(*addr).await?;
            let inviter = state.graph().get_inviter(addr).await;
            let requests = state.requests().get_requests_by_recipient(addr).await;
            println!(
                "{addr} name={} inviter={} requests={}",
                name.as_deref().unwrap_or("-"),
                inviter.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
                requests.len()
            );
            for r in requests {
                println!(
                    "  request {} ${} {:?} {:?}",
                    r.id,
                    r.amount_dollars(),
                    r.status(),
                    r.memo
                );
            }
        }

        println!("following; Ctrl-C to stop");
        let runner = tokio::spawn(Arc::clone(&watcher).run());
        tokio::signal::ctrl_c().await?;
        watcher.close();
        runner.await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
