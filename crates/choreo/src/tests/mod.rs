use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge::{BridgeConfig, BridgeHandle, LinkConnection, LinkTransport, LinkWriter, PositionStore};
use tokio::sync::mpsc;

use super::*;


/// Always-available link that records every written line. The feeder side of
/// the line channel is parked so the link never reports a close.
#[derive(Clone, Default)]
struct TestLink {
    writes: Arc<Mutex<Vec<String>>>,
    feeders: Arc<Mutex<Vec<mpsc::Sender<String>>>>,
}

impl TestLink {
    /// Move commands written through the bridge, skipping the connect
    /// handshake.
    fn moves(&self) -> Vec<String> {
        self.writes
            .lock()
            .expect("lock")
            .iter()
            .filter(|line| line.starts_with('M'))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LinkTransport for TestLink {
    async fn open(&self) -> anyhow::Result<LinkConnection> {
        let (line_tx, line_rx) = mpsc::channel(16);
        self.feeders.lock().expect("lock").push(line_tx);
        Ok(LinkConnection {
            lines: line_rx,
            writer: Box::new(TestWriter {
                writes: self.writes.clone(),
            }),
        })
    }
}

struct TestWriter {
    writes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LinkWriter for TestWriter {
    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writes.lock().expect("lock").push(line.to_string());
        Ok(())
    }
}

/// Engine wired to a connected mock bridge. Waits for the link so commands
/// submitted right away cannot race the connect.
async fn engine_fixture() -> (ChoreoEngine, TestLink, Arc<PositionStore>, BridgeHandle) {
    let link = TestLink::default();
    let store = Arc::new(PositionStore::new());
    let (handle, _task) = bridge::spawn(
        Arc::new(link.clone()),
        store.clone(),
        BridgeConfig {
            retry_delay: Duration::from_secs(2),
        },
    );

    let mut state = handle.watch_state();
    while !state.borrow_and_update().is_connected() {
        state.changed().await.expect("bridge alive");
    }

    let engine = ChoreoEngine::new(handle.clone(), Duration::from_millis(50));
    (engine, link, store, handle)
}

/// Lets the bridge actor drain its command queue.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
