//! Transport bridge between UI sessions and the motor controller.
//!
//! A single actor task owns the physical link and serializes every state
//! transition: link lifecycle events, session commands, and telemetry all
//! pass through one loop. Sessions observe the bridge only through the
//! broadcast event channel and the connection-state watch.

use std::sync::Arc;
use std::time::Duration;

use shared::error::BridgeError;
use shared::protocol::SessionEvent;
use shared::wire::{self, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod link;
pub mod position;

pub use link::{LinkConnection, LinkTransport, LinkWriter, SerialLink};
pub use position::PositionStore;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Fixed delay between reconnection attempts. No jitter, no cap; the
    /// bridge retries a locally attached device forever.
    pub retry_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
        }
    }
}

struct CommandRequest {
    line: String,
    reply: Option<oneshot::Sender<Result<(), BridgeError>>>,
}

/// Cloneable handle to the bridge actor.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<CommandRequest>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<ConnectionState>,
    store: Arc<PositionStore>,
}

impl BridgeHandle {
    /// Submits a command line and waits for the write outcome.
    pub async fn submit(&self, line: impl Into<String>) -> Result<(), BridgeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(CommandRequest {
                line: line.into(),
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| BridgeError::Closed)?;
        reply_rx.await.map_err(|_| BridgeError::Closed)?
    }

    /// Fire-and-forget submission. Failures are logged by the bridge; the
    /// caller never observes them.
    pub fn submit_nowait(&self, line: impl Into<String>) {
        let request = CommandRequest {
            line: line.into(),
            reply: None,
        };
        if let Err(rejected) = self.commands.try_send(request) {
            warn!(
                command = %rejected.into_inner().line,
                "command queue full or bridge gone, dropping command"
            );
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn store(&self) -> Arc<PositionStore> {
        self.store.clone()
    }
}

/// Spawns the bridge actor. The actor exits once every handle is dropped;
/// dropping the handles also cancels a pending reconnection wait.
pub fn spawn(
    transport: Arc<dyn LinkTransport>,
    store: Arc<PositionStore>,
    config: BridgeConfig,
) -> (BridgeHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let actor = Bridge {
        transport,
        store: store.clone(),
        events: event_tx.clone(),
        state: state_tx,
        retry_delay: config.retry_delay,
    };
    let task = tokio::spawn(actor.run(command_rx));

    let handle = BridgeHandle {
        commands: command_tx,
        events: event_tx,
        state: state_rx,
        store,
    };
    (handle, task)
}

struct Bridge {
    transport: Arc<dyn LinkTransport>,
    store: Arc<PositionStore>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    retry_delay: Duration,
}

impl Bridge {
    async fn run(self, mut commands: mpsc::Receiver<CommandRequest>) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let connection = {
                let open = self.transport.open();
                tokio::pin!(open);
                loop {
                    tokio::select! {
                        result = &mut open => break result,
                        request = commands.recv() => match request {
                            Some(request) => reject_unavailable(request),
                            None => return,
                        },
                    }
                }
            };

            match connection {
                Ok(connection) => {
                    info!("physical link connected");
                    self.set_state(ConnectionState::Connected);
                    self.broadcast_status(true);
                    let shutdown = self.drive_link(&mut commands, connection).await;
                    self.set_state(ConnectionState::Disconnected);
                    self.broadcast_status(false);
                    if shutdown {
                        return;
                    }
                    info!(retry_in = ?self.retry_delay, "physical link lost");
                }
                Err(error) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(%error, retry_in = ?self.retry_delay, "failed to open physical link");
                }
            }

            // Fixed-delay retry, forever. Commands arriving while we wait
            // are rejected, not queued for later.
            let sleep = tokio::time::sleep(self.retry_delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    request = commands.recv() => match request {
                        Some(request) => reject_unavailable(request),
                        None => return,
                    },
                }
            }
        }
    }

    /// Services one link session. Returns true when the bridge should shut
    /// down (command channel closed) rather than reconnect.
    async fn drive_link(
        &self,
        commands: &mut mpsc::Receiver<CommandRequest>,
        connection: LinkConnection,
    ) -> bool {
        let LinkConnection {
            mut lines,
            mut writer,
        } = connection;

        // Ask the controller for a state dump so the position store resyncs
        // after every (re)connection.
        if let Err(error) = writer.write_line(&Command::Init.encode()).await {
            error!(%error, "initial handshake write failed");
        }

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => self.handle_telemetry(line),
                    None => return false,
                },
                request = commands.recv() => match request {
                    Some(request) => self.write_command(&mut writer, request).await,
                    None => return true,
                },
            }
        }
    }

    fn handle_telemetry(&self, line: String) {
        if let Some((axis, position)) = wire::decode_telemetry(&line) {
            self.store.set_axis(axis.ordinal(), position);
        }
        // Every line reaches the sessions, matched or not.
        let _ = self.events.send(SessionEvent::Arduino { message: line });
    }

    async fn write_command(&self, writer: &mut Box<dyn LinkWriter>, request: CommandRequest) {
        let result = writer
            .write_line(&request.line)
            .await
            .map_err(|error| BridgeError::WriteFailure(error.to_string()));
        match &result {
            Ok(()) => self.apply_outgoing(&request.line),
            // Best-effort contract: the command is lost, the link stays up.
            Err(error) => error!(%error, command = %request.line, "failed to write command"),
        }
        if let Some(reply) = request.reply {
            let _ = reply.send(result);
        }
    }

    /// Keeps the authoritative store aligned with what was actually sent.
    fn apply_outgoing(&self, line: &str) {
        match Command::parse(line) {
            Some(Command::AbsoluteMove(positions)) => self.store.set_all(positions),
            Some(Command::RelativeMove(deltas)) => self.store.apply_relative_all(deltas),
            Some(Command::Home) => self.store.reset(),
            _ => {}
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn broadcast_status(&self, connected: bool) {
        let _ = self.events.send(SessionEvent::Status { connected });
    }
}

fn reject_unavailable(request: CommandRequest) {
    match request.reply {
        Some(reply) => {
            let _ = reply.send(Err(BridgeError::LinkUnavailable));
        }
        None => warn!(command = %request.line, "link unavailable, dropping command"),
    }
}

#[cfg(test)]
mod tests;
