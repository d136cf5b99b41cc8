//! In-memory backend that records every call, with injectable faults.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::pak::backend::{ResourceBackend, ResourceReader, UpdateSession};
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceKey, ResourceName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Begin,
    /// Fails the update with this zero-based index.
    Update(usize),
    Commit,
}

#[derive(Debug, Default)]
pub struct Log {
    pub begins: usize,
    pub updates: Vec<ResourceKey>,
    pub deletes: Vec<ResourceKey>,
    pub ends: Vec<bool>,
    pub committed: BTreeMap<ResourceKey, Vec<u8>>,
}

#[derive(Clone)]
pub struct Recorder {
    fault: Fault,
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub fn new(fault: Fault) -> Self {
        Self {
            fault,
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }
}

fn os_error(op: &'static str, code: i32) -> PakError {
    PakError::Native {
        op,
        source: io::Error::from_raw_os_error(code),
    }
}

struct RecordingSession {
    fault: Fault,
    log: Arc<Mutex<Log>>,
    staged: BTreeMap<ResourceKey, Vec<u8>>,
    removed: Vec<ResourceKey>,
    open: bool,
}

impl UpdateSession for RecordingSession {
    fn update(&mut self, key: &ResourceKey, data: &[u8]) -> PakResult<()> {
        if !self.open {
            return Err(PakError::SessionClosed);
        }
        let mut log = self.log.lock().unwrap();
        if self.fault == Fault::Update(log.updates.len()) {
            return Err(os_error("UpdateResourceW", 5));
        }
        log.updates.push(key.clone());
        self.staged.insert(key.clone(), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &ResourceKey) -> PakResult<()> {
        if !self.open {
            return Err(PakError::SessionClosed);
        }
        self.log.lock().unwrap().deletes.push(key.clone());
        self.staged.remove(key);
        self.removed.push(key.clone());
        Ok(())
    }

    fn end(&mut self, discard: bool) -> PakResult<()> {
        if !self.open {
            return Err(PakError::SessionClosed);
        }
        let mut log = self.log.lock().unwrap();
        log.ends.push(discard);
        if discard {
            self.open = false;
            return Ok(());
        }
        if self.fault == Fault::Commit {
            return Err(os_error("EndUpdateResourceW", 112));
        }
        for key in self.removed.drain(..) {
            log.committed.remove(&key);
        }
        log.committed.append(&mut self.staged);
        self.open = false;
        Ok(())
    }
}

struct RecordingReader {
    log: Arc<Mutex<Log>>,
}

impl ResourceReader for RecordingReader {
    fn names(&mut self, kind: &str) -> PakResult<Vec<ResourceName>> {
        let log = self.log.lock().unwrap();
        Ok(log
            .committed
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.name.clone())
            .collect())
    }

    fn load(&mut self, key: &ResourceKey) -> PakResult<Option<Vec<u8>>> {
        Ok(self.log.lock().unwrap().committed.get(key).cloned())
    }
}

impl ResourceBackend for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn begin(&self, _target: &Path) -> PakResult<Box<dyn UpdateSession>> {
        if self.fault == Fault::Begin {
            return Err(os_error("BeginUpdateResourceW", 32));
        }
        self.log.lock().unwrap().begins += 1;
        Ok(Box::new(RecordingSession {
            fault: self.fault,
            log: Arc::clone(&self.log),
            staged: BTreeMap::new(),
            removed: Vec::new(),
            open: true,
        }))
    }

    fn open_reader(&self, _target: &Path) -> PakResult<Box<dyn ResourceReader>> {
        Ok(Box::new(RecordingReader {
            log: Arc::clone(&self.log),
        }))
    }
}
