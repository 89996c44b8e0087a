//! Persistence adapter: partialize, write, rehydrate, migrate.

use crate::error::Result;
use crate::middleware::Middleware;
use crate::store::{Commit, Snapshot};
use crate::types::Version;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::migrate::Migrations;
use super::storage::DurableStorage;
use super::Partialize;

/// The record written under the store key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord<T> {
    pub state: T,
    pub version: u32,
}

/// When writes reach the medium.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistMode {
    /// Write on every commit.
    #[default]
    Immediate,
    /// Write once commits have been quiet for the window; the last one wins.
    Debounced(Duration),
}

enum Writer {
    Immediate,
    Debounced(DebouncedWriter),
}

/// Persists the partialized view of every commit under one key.
pub struct PersistAdapter<S: Partialize> {
    key: String,
    version: u32,
    storage: Arc<dyn DurableStorage>,
    migrations: Migrations,
    writer: Writer,
    /// Version of the newest snapshot handed to the writer.
    last_written: Mutex<Option<Version>>,
    _state: PhantomData<fn(&S)>,
}

impl<S: Partialize> PersistAdapter<S> {
    pub fn new(
        key: impl Into<String>,
        version: u32,
        storage: Arc<dyn DurableStorage>,
        migrations: Migrations,
        mode: PersistMode,
    ) -> Result<Self> {
        let key = key.into();
        let writer = match mode {
            PersistMode::Immediate => Writer::Immediate,
            PersistMode::Debounced(window) => Writer::Debounced(DebouncedWriter::spawn(
                Arc::clone(&storage),
                key.clone(),
                window,
            )?),
        };

        Ok(Self {
            key,
            version,
            storage,
            migrations,
            writer,
            last_written: Mutex::new(None),
            _state: PhantomData,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Read and migrate the persisted view, if one exists.
    pub fn rehydrate(&self) -> Result<Option<S::View>> {
        let raw = match self.storage.get_item(&self.key)? {
            Some(raw) => raw,
            None => {
                debug!(key = %self.key, "nothing persisted");
                return Ok(None);
            }
        };

        let record: PersistedRecord<serde_json::Value> = serde_json::from_str(&raw)?;
        let migrated = self
            .migrations
            .run(record.state, record.version, self.version)?;
        let view = serde_json::from_value(migrated)?;

        debug!(key = %self.key, stored = record.version, current = self.version, "rehydrated");
        Ok(Some(view))
    }

    /// Rehydrate straight into `state`. Returns whether anything was restored.
    pub fn rehydrate_into(&self, state: &mut S) -> Result<bool> {
        match self.rehydrate()? {
            Some(view) => {
                state.merge(view);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write the partialized view of `snapshot`.
    ///
    /// Snapshots older than the last one written are skipped, so the newest
    /// commit wins even if pipelines finish out of order.
    pub fn persist(&self, snapshot: &Snapshot<S>) -> Result<()> {
        let mut last = self.last_written.lock();
        if matches!(*last, Some(written) if written >= snapshot.version) {
            return Ok(());
        }

        let record = PersistedRecord {
            state: snapshot.state().partialize(),
            version: self.version,
        };
        let json = serde_json::to_string(&record)?;

        match &self.writer {
            Writer::Immediate => self.storage.set_item(&self.key, &json)?,
            Writer::Debounced(writer) => writer.write(json),
        }
        *last = Some(snapshot.version);
        Ok(())
    }

    /// Block until any debounced write has reached the medium.
    pub fn flush(&self) {
        if let Writer::Debounced(writer) = &self.writer {
            writer.flush();
        }
    }

    /// Remove the persisted record.
    pub fn clear(&self) -> Result<()> {
        self.flush();
        self.storage.remove_item(&self.key)
    }
}

impl<S> Middleware<S> for PersistAdapter<S>
where
    S: Partialize + Send + Sync,
{
    fn name(&self) -> &'static str {
        "persist"
    }

    fn on_commit(&self, commit: &Commit<'_, S>) -> Result<()> {
        self.persist(commit.current)
    }
}

// --- Debounced writes ---

enum WriterMsg {
    Write(String),
    Flush(Sender<()>),
}

struct DebouncedWriter {
    sender: Option<Sender<WriterMsg>>,
    worker: Option<JoinHandle<()>>,
}

impl DebouncedWriter {
    fn spawn(storage: Arc<dyn DurableStorage>, key: String, window: Duration) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = thread::Builder::new()
            .name("persist-writer".into())
            .spawn(move || run_writer(receiver, storage, key, window))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn write(&self, json: String) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(WriterMsg::Write(json));
        }
    }

    fn flush(&self) {
        if let Some(sender) = &self.sender {
            let (ack, done) = crossbeam_channel::bounded(1);
            if sender.send(WriterMsg::Flush(ack)).is_ok() {
                let _ = done.recv();
            }
        }
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        // Closing the channel makes the worker write what it holds and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_writer(
    receiver: Receiver<WriterMsg>,
    storage: Arc<dyn DurableStorage>,
    key: String,
    window: Duration,
) {
    let mut pending: Option<String> = None;

    loop {
        let msg = if pending.is_some() {
            match receiver.recv_timeout(window) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => {
                    write_logged(&*storage, &key, pending.take());
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            }
        };

        match msg {
            WriterMsg::Write(json) => pending = Some(json),
            WriterMsg::Flush(ack) => {
                write_logged(&*storage, &key, pending.take());
                let _ = ack.send(());
            }
        }
    }

    write_logged(&*storage, &key, pending.take());
}

fn write_logged(storage: &dyn DurableStorage, key: &str, json: Option<String>) {
    if let Some(json) = json {
        if let Err(e) = storage.set_item(key, &json) {
            warn!(key, error = %e, "debounced persist failed");
        }
    }
}
