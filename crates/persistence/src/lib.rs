#![deny(warnings)]

//! Persistence layer: JSON snapshots and a JSON-lines event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sim_core::{EventSink, SimEvent, SimSnapshot, SinkError};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns the default snapshot location used for local saves.
pub fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./saves/snapshot.json")
}

/// Write `snapshot` atomically: a temporary file is renamed over the target.
pub fn save_snapshot(path: &Path, snapshot: &SimSnapshot) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut w, snapshot)?;
        w.flush()?;
    }
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), tick = snapshot.tick, "snapshot saved");
    Ok(())
}

/// Load a snapshot; `Ok(None)` when nothing has been saved yet.
pub fn load_snapshot(path: &Path) -> Result<Option<SimSnapshot>, PersistError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: SimSnapshot = serde_json::from_reader(BufReader::new(file))?;
    debug!(path = %path.display(), tick = snapshot.tick, "snapshot loaded");
    Ok(Some(snapshot))
}

/// One line of the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SimEvent,
}

/// Appends every published event as one JSON object per line.
pub struct JsonlEventLog<W: Write + Send> {
    out: W,
    written: u64,
}

impl JsonlEventLog<BufWriter<File>> {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn create(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonlEventLog<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), PersistError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for JsonlEventLog<W> {
    fn publish(&mut self, event: &SimEvent) -> Result<(), SinkError> {
        let line = LoggedEvent {
            recorded_at: Utc::now(),
            event: event.clone(),
        };
        serde_json::to_writer(&mut self.out, &line).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }
}

/// Read back a log written by [`JsonlEventLog`]. Blank lines are skipped.
pub fn read_event_log(path: &Path) -> Result<Vec<LoggedEvent>, PersistError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

/// Drain `rx` into `log` on the blocking pool until every sender is gone.
/// The task yields the number of events written.
pub fn spawn_event_writer<W>(
    mut rx: mpsc::Receiver<SimEvent>,
    mut log: JsonlEventLog<W>,
) -> JoinHandle<u64>
where
    W: Write + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        while let Some(event) = rx.blocking_recv() {
            if let Err(e) = log.publish(&event) {
                warn!(tick = event.tick, error = %e, "event log write failed");
            }
        }
        if let Err(e) = log.flush() {
            warn!(error = %e, "event log flush failed");
        }
        info!(written = log.written(), "event writer finished");
        log.written()
    })
}
