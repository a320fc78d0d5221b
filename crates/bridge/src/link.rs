//! Physical-link abstraction and the serial-port implementation behind it.

use std::io::Read;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Writes one command line to the link, appending the line terminator.
/// Implementations must not block the calling task.
#[async_trait]
pub trait LinkWriter: Send {
    async fn write_line(&mut self, line: &str) -> anyhow::Result<()>;
}

/// An open physical link. The `lines` channel yields telemetry lines in
/// arrival order and closes when the link drops.
pub struct LinkConnection {
    pub lines: mpsc::Receiver<String>,
    pub writer: Box<dyn LinkWriter>,
}

/// Factory for physical links; each successful `open` is one link session.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    async fn open(&self) -> anyhow::Result<LinkConnection>;
}

/// Serial link to the motor controller.
pub struct SerialLink {
    path: String,
    baud_rate: u32,
}

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const LINE_CHANNEL_CAPACITY: usize = 256;

impl SerialLink {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl LinkTransport for SerialLink {
    async fn open(&self) -> anyhow::Result<LinkConnection> {
        let path = self.path.clone();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&path, baud_rate)
                .timeout(READ_TIMEOUT)
                .open()
                .with_context(|| format!("failed to open serial port '{path}'"))
        })
        .await
        .context("serial open task failed")??;

        let reader = port
            .try_clone()
            .context("failed to clone serial port for reading")?;

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || read_lines(reader, line_tx))
            .context("failed to spawn serial reader thread")?;

        let (write_tx, write_rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("serial-writer".into())
            .spawn(move || write_lines(port, write_rx))
            .context("failed to spawn serial writer thread")?;

        Ok(LinkConnection {
            lines: line_rx,
            writer: Box::new(SerialWriter { requests: write_tx }),
        })
    }
}

type WriteRequest = (String, oneshot::Sender<anyhow::Result<()>>);

struct SerialWriter {
    requests: std::sync::mpsc::Sender<WriteRequest>,
}

#[async_trait]
impl LinkWriter for SerialWriter {
    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send((line.to_string(), reply_tx))
            .map_err(|_| anyhow::anyhow!("serial writer thread has terminated"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("serial writer thread dropped the reply"))?
    }
}

/// Runs on a dedicated thread so serial writes never block the event loop.
fn write_lines(
    mut port: Box<dyn serialport::SerialPort>,
    requests: std::sync::mpsc::Receiver<WriteRequest>,
) {
    while let Ok((line, reply)) = requests.recv() {
        let result = std::io::Write::write_all(&mut port, line.as_bytes())
            .and_then(|_| std::io::Write::write_all(&mut port, b"\n"))
            .and_then(|_| std::io::Write::flush(&mut port))
            .map_err(anyhow::Error::from);
        let _ = reply.send(result);
    }
    debug!("serial writer thread exiting");
}

/// Accumulates raw serial bytes and emits complete `\n`-terminated lines.
/// Read timeouts just poll again; any other error ends the link session.
fn read_lines(mut port: Box<dyn serialport::SerialPort>, lines: mpsc::Sender<String>) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match port.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if lines.blocking_send(line).is_err() {
                        return;
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(error) => {
                warn!(%error, "serial read failed, closing link");
                break;
            }
        }
    }
    debug!("serial reader thread exiting");
}
