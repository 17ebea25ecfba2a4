//! Replay recording of accepted transitions.
//!
//! A replay log is a header followed by one record per accepted action,
//! each written as a 4-byte big-endian length and a bincode body. Recording
//! is fire-and-forget: the match loop hands records to a background task and
//! never waits on disk. Write failures are logged and recording stops; the
//! match itself is unaffected.
//!
//! Payloads and effects are stored as JSON text because the rule engine's
//! documents are schemaless.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub format_version: u32,
    pub build: String,
    pub protocol_version: u32,
    pub session: String,
    pub seed: u64,
    pub scenario: String,
    pub mode: String,
    pub participants: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Sequence number of the state produced by this action.
    pub sequence: u64,
    pub slot: u8,
    pub action_type: String,
    /// JSON text of the action payload.
    pub payload: String,
    pub effects: Vec<String>,
    pub round: u32,
    pub turn: u64,
    pub rng_draws: u64,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayRecord {
    Header(ReplayHeader),
    Transition(Transition),
}

/// Sink for replay records. Implementations must not block.
pub trait ReplayRecorder: Send {
    fn start(&mut self, header: ReplayHeader);
    fn record(&mut self, transition: Transition);
}

/// Discards everything; used when no replay directory is configured.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl ReplayRecorder for NullRecorder {
    fn start(&mut self, _header: ReplayHeader) {}
    fn record(&mut self, _transition: Transition) {}
}

/// Writes records to a file from a background task.
pub struct FileRecorder {
    path: PathBuf,
    tx: mpsc::UnboundedSender<ReplayRecord>,
}

impl FileRecorder {
    /// Spawns the writer task. Must be called from within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let task_path = path.clone();
        tokio::spawn(async move {
            if let Err(e) = write_records(&task_path, rx).await {
                error!("Replay recording to {} failed: {}", task_path.display(), e);
            }
        });
        Self { path, tx }
    }

    /// `<dir>/<session>-<unix seconds>.replay`
    pub fn in_dir(dir: &Path, session: &str) -> Self {
        let stamp = shared::timestamp_ms() / 1000;
        Self::spawn(dir.join(format!("{session}-{stamp}.replay")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn push(&self, record: ReplayRecord) {
        if self.tx.send(record).is_err() {
            debug!("Replay writer for {} has stopped", self.path.display());
        }
    }
}

impl ReplayRecorder for FileRecorder {
    fn start(&mut self, header: ReplayHeader) {
        self.push(ReplayRecord::Header(header));
    }

    fn record(&mut self, transition: Transition) {
        self.push(ReplayRecord::Transition(transition));
    }
}

async fn write_records(
    path: &Path,
    mut rx: mpsc::UnboundedReceiver<ReplayRecord>,
) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(path).await?;
    info!("Recording replay to {}", path.display());

    let mut written = 0usize;
    while let Some(record) = rx.recv().await {
        let body = bincode::serialize(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        file.write_all(&(body.len() as u32).to_be_bytes()).await?;
        file.write_all(&body).await?;
        file.flush().await?;
        written += 1;
    }
    debug!("Replay {} closed after {} record(s)", path.display(), written);
    Ok(())
}

/// Reads a whole replay log back.
pub fn read_log(path: impl AsRef<Path>) -> io::Result<Vec<ReplayRecord>> {
    let mut file = std::fs::File::open(path)?;
    let mut records = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match file.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        file.read_exact(&mut body)?;
        let record = bincode::deserialize(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        records.push(record);
    }
    Ok(records)
}
