#![forbid(unsafe_code)]

use rayon::prelude::*;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::debug;

use crate::pak::compress::Compressor;
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceEntry, ResourceKey};
use crate::pak::manifest::Manifest;

/// Totals across every packaged file, updated as workers finish.
#[derive(Debug, Default)]
pub struct PackStats {
    files: AtomicU64,
    raw_bytes: AtomicU64,
    packed_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackTotals {
    pub files: u64,
    pub raw_bytes: u64,
    pub packed_bytes: u64,
}

impl PackStats {
    pub fn record(&self, raw: u64, packed: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.raw_bytes.fetch_add(raw, Ordering::Relaxed);
        self.packed_bytes.fetch_add(packed, Ordering::Relaxed);
    }

    pub fn totals(&self) -> PackTotals {
        PackTotals {
            files: self.files.load(Ordering::Relaxed),
            raw_bytes: self.raw_bytes.load(Ordering::Relaxed),
            packed_bytes: self.packed_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Reads and compresses one file into its resource entry.
pub fn pack_file(
    name: &str,
    physical: &Path,
    compressor: &dyn Compressor,
    stats: &PackStats,
) -> PakResult<ResourceEntry> {
    let mut f = File::open(physical)?;
    let packed = compressor.compress(&mut f)?;
    stats.record(packed.raw_len, packed.data.len() as u64);
    debug!(
        file = %name,
        raw = packed.raw_len,
        packed = packed.data.len(),
        "compressed"
    );
    Ok(ResourceEntry::new(ResourceKey::file(name), packed.data))
}

/// Compresses every manifest file on a pool of `jobs` workers and hands the
/// finished entries, one at a time and in completion order, to `sink` on the
/// calling thread.
///
/// The first error from a worker or from `sink` stops the run and is
/// returned. Entries produced after that are dropped.
pub fn package<F>(
    manifest: &Manifest,
    compressor: &dyn Compressor,
    jobs: usize,
    stats: &PackStats,
    mut sink: F,
) -> PakResult<()>
where
    F: FnMut(ResourceEntry) -> PakResult<()>,
{
    let jobs = jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("respak-pack-{i}"))
        .build()
        .map_err(|e| PakError::Pool(e.to_string()))?;

    let (tx, rx) = mpsc::sync_channel::<ResourceEntry>(jobs * 2);

    thread::scope(|scope| -> PakResult<()> {
        let producer = scope.spawn(move || {
            pool.install(|| {
                manifest
                    .files()
                    .par_iter()
                    .try_for_each_with(tx, |tx, (name, physical)| {
                        let entry = pack_file(name, physical, compressor, stats)?;
                        tx.send(entry).map_err(|_| PakError::Cancelled)
                    })
            })
        });

        let mut consumed: PakResult<()> = Ok(());
        for entry in rx.iter() {
            if let Err(e) = sink(entry) {
                consumed = Err(e);
                break;
            }
        }
        drop(rx);

        let produced = producer
            .join()
            .map_err(|_| PakError::Pool("packaging worker panicked".into()))?;

        consumed?;
        produced
    })
}
