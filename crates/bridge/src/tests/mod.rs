use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::*;


enum OpenPlan {
    Connect,
    Fail,
}

#[derive(Default)]
struct MockInner {
    plans: VecDeque<OpenPlan>,
    feeders: Vec<mpsc::Sender<String>>,
}

/// Scripted transport: each planned outcome serves one `open` call; with no
/// plan left, `open` pends forever (link stays unavailable).
#[derive(Clone, Default)]
pub(crate) struct MockLink {
    inner: Arc<Mutex<MockInner>>,
    writes: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockLink {
    pub(crate) fn plan_connect(&self) {
        self.locked().plans.push_back(OpenPlan::Connect);
    }

    pub(crate) fn plan_fail(&self) {
        self.locked().plans.push_back(OpenPlan::Fail);
    }

    pub(crate) async fn feed(&self, session: usize, line: &str) {
        let feeder = self.locked().feeders[session].clone();
        feeder.send(line.to_string()).await.expect("link open");
    }

    pub(crate) fn close(&self, session: usize) {
        self.locked().feeders.remove(session);
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.writes.lock().expect("lock").clone()
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().expect("lock")
    }
}

#[async_trait]
impl LinkTransport for MockLink {
    async fn open(&self) -> anyhow::Result<LinkConnection> {
        let plan = self.locked().plans.pop_front();
        match plan {
            None => std::future::pending().await,
            Some(OpenPlan::Fail) => Err(anyhow::anyhow!("mock open failure")),
            Some(OpenPlan::Connect) => {
                let (line_tx, line_rx) = mpsc::channel(16);
                self.locked().feeders.push(line_tx);
                Ok(LinkConnection {
                    lines: line_rx,
                    writer: Box::new(MockWriter {
                        writes: self.writes.clone(),
                        fail: self.fail_writes.clone(),
                    }),
                })
            }
        }
    }
}

struct MockWriter {
    writes: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl LinkWriter for MockWriter {
    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock write failure");
        }
        self.writes.lock().expect("lock").push(line.to_string());
        Ok(())
    }
}

pub(crate) fn spawn_mock(link: &MockLink) -> (BridgeHandle, Arc<PositionStore>) {
    let store = Arc::new(PositionStore::new());
    let (handle, _task) = spawn(
        Arc::new(link.clone()),
        store.clone(),
        BridgeConfig {
            retry_delay: Duration::from_millis(10),
        },
    );
    (handle, store)
}

pub(crate) async fn wait_for_state(handle: &BridgeHandle, target: ConnectionState) {
    let mut state = handle.watch_state();
    loop {
        if *state.borrow_and_update() == target {
            return;
        }
        state.changed().await.expect("bridge alive");
    }
}
