#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

use crate::pak::archive::{is_archive_path, ArchiveBuilder, ZipArchiveBuilder, ARCHIVE_EXTENSIONS};
use crate::pak::backend::{ResourceBackend, ResourceReader};
use crate::pak::compress::{Compressor, Gzip};
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceEntry, ResourceKey, ResourceName, MANIFEST_NAME, PAYLOAD_TYPE};
use crate::pak::manifest::Manifest;
use crate::pak::packager::{package, PackStats};
use crate::pak::path::resolve_under;
use crate::pak::txn::ResourceTransaction;

/// Appended to the target's file name for the pre-update copy.
pub const BACKUP_SUFFIX: &str = ".orig";

/// File name used when extracting a legacy whole-archive payload.
pub const LEGACY_ARCHIVE_FILE: &str = "payload.cab";

/// Everything one `pack` run needs. Built from the command line.
#[derive(Debug, Clone)]
pub struct PackagingJob {
    pub source: PathBuf,
    pub target: PathBuf,
    pub backup: PathBuf,
    /// Archive a source directory first and store it as one legacy payload.
    pub classic: bool,
    pub delete_existing: bool,
    pub jobs: usize,
    pub level: u32,
}

impl PackagingJob {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        Self {
            source: source.into(),
            backup: default_backup_path(&target),
            target,
            classic: false,
            delete_existing: false,
            jobs: default_jobs(),
            level: 9,
        }
    }
}

pub fn default_backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackReport {
    /// Resources committed, manifest included.
    pub resources: usize,
    pub files: u64,
    pub raw_bytes: u64,
    pub packed_bytes: u64,
}

/// What ends up in the target, decided once per run.
enum Payload {
    Archive { bytes: Vec<u8> },
    Directory { manifest: Manifest },
}

impl Payload {
    fn resolve(
        job: &PackagingJob,
        archiver: &dyn ArchiveBuilder,
        scratch: &mut Option<TempDir>,
    ) -> PakResult<Self> {
        let source = &job.source;
        if source.is_file() {
            if !is_archive_path(source) {
                return Err(PakError::usage(format!(
                    "only {} archives are supported: {}",
                    ARCHIVE_EXTENSIONS.join("/"),
                    source.display()
                )));
            }
            return Self::archive(source);
        }
        if !source.is_dir() {
            return Err(PakError::usage(format!(
                "{} must be a directory or an archive file",
                source.display()
            )));
        }

        let manifest = Manifest::scan(source)?;
        if !job.classic {
            return Ok(Payload::Directory { manifest });
        }

        info!(source = %source.display(), "packaging archive");
        let dir = scratch.insert(tempfile::tempdir()?);
        let archive = dir.path().join(format!("payload.{}", archiver.extension()));
        archiver.build(&manifest, &archive)?;
        Self::archive(&archive)
    }

    fn archive(path: &Path) -> PakResult<Self> {
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(PakError::usage(format!("archive is empty: {}", path.display())));
        }
        Ok(Payload::Archive { bytes })
    }
}

/// `backup` may not exist yet; only an existing file can alias the target.
fn same_file(target: &Path, backup: &Path) -> PakResult<bool> {
    if !backup.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(target)? == fs::canonicalize(backup)?)
}

pub fn pack(job: &PackagingJob, backend: &dyn ResourceBackend) -> PakResult<PackReport> {
    pack_with(job, backend, &Gzip::new(job.level), &ZipArchiveBuilder)
}

/// Backs up the target, then stores the payload in it through one
/// transaction. Nothing is written to the target unless every entry was
/// staged and the commit succeeded.
pub fn pack_with(
    job: &PackagingJob,
    backend: &dyn ResourceBackend,
    compressor: &dyn Compressor,
    archiver: &dyn ArchiveBuilder,
) -> PakResult<PackReport> {
    if !job.target.is_file() {
        return Err(PakError::usage(format!(
            "target executable not found: {}",
            job.target.display()
        )));
    }

    if same_file(&job.target, &job.backup)? {
        return Err(PakError::usage(format!(
            "backup path must differ from the target: {}",
            job.backup.display()
        )));
    }

    let mut scratch = None;
    let payload = Payload::resolve(job, archiver, &mut scratch)?;

    info!(backup = %job.backup.display(), "backing up target");
    fs::copy(&job.target, &job.backup)?;

    let stats = PackStats::default();
    let mut tx = ResourceTransaction::begin(backend, &job.target, job.delete_existing)?;

    match payload {
        Payload::Archive { bytes } => {
            let len = bytes.len() as u64;
            info!(bytes = len, "copying archive");
            tx.put(ResourceEntry::new(ResourceKey::legacy_archive(), bytes))?;
            stats.record(len, len);
        }
        Payload::Directory { manifest } => {
            if manifest.is_empty() {
                info!(source = %job.source.display(), "source directory is empty");
            }
            info!(files = manifest.len(), compressor = compressor.name(), "packaging files");
            tx.put(manifest.to_entry(compressor)?)?;
            package(&manifest, compressor, job.jobs, &stats, |entry| tx.put(entry))?;
        }
    }

    tx.drop_unstaged()?;
    let resources = tx.staged();
    tx.commit()?;

    let totals = stats.totals();
    Ok(PackReport {
        resources,
        files: totals.files,
        raw_bytes: totals.raw_bytes,
        packed_bytes: totals.packed_bytes,
    })
}

/// Payload found in a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    Files(Manifest),
    Archive(Vec<u8>),
}

pub fn contents(target: &Path, backend: &dyn ResourceBackend) -> PakResult<Contents> {
    let mut reader = backend.open_reader(target)?;
    if let Some(bytes) = reader.load(&ResourceKey::manifest())? {
        return Ok(Contents::Files(Manifest::from_entry_bytes(&bytes, &Gzip::default())?));
    }
    if let Some(bytes) = reader.load(&ResourceKey::legacy_archive())? {
        return Ok(Contents::Archive(bytes));
    }
    Err(PakError::Invalid(format!(
        "no packaged payload in {}",
        target.display()
    )))
}

pub fn list(target: &Path, backend: &dyn ResourceBackend, verbose: bool) -> PakResult<()> {
    match contents(target, backend)? {
        Contents::Archive(bytes) => {
            println!("{}  archive  {} bytes", ResourceKey::legacy_archive().name, bytes.len());
        }
        Contents::Files(manifest) if verbose => {
            let gz = Gzip::default();
            let mut reader = backend.open_reader(target)?;
            for name in manifest.names() {
                let packed = reader
                    .load(&ResourceKey::file(name))?
                    .ok_or_else(|| PakError::Invalid(format!("missing resource for {name}")))?;
                let raw = gz.decompress(&packed)?;
                println!("{name}  packed={} raw={}", packed.len(), raw.len());
            }
        }
        Contents::Files(manifest) => {
            for name in manifest.names() {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// Writes the packaged files back out under `output`. Returns how many files
/// were written.
pub fn extract(target: &Path, output: &Path, backend: &dyn ResourceBackend) -> PakResult<usize> {
    let manifest = match contents(target, backend)? {
        Contents::Archive(bytes) => {
            fs::create_dir_all(output)?;
            fs::write(output.join(LEGACY_ARCHIVE_FILE), bytes)?;
            return Ok(1);
        }
        Contents::Files(manifest) => manifest,
    };

    let gz = Gzip::default();
    let mut reader = backend.open_reader(target)?;
    fs::create_dir_all(output)?;

    for name in manifest.names() {
        let out_path = resolve_under(output, name)?;
        let packed = reader
            .load(&ResourceKey::file(name))?
            .ok_or_else(|| PakError::Invalid(format!("missing resource for {name}")))?;
        let raw = gz.decompress(&packed)?;
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, &raw)?;
    }

    Ok(manifest.len())
}

/// Checks that the manifest and the file resources describe the same set and
/// that every file resource decompresses.
pub fn verify(target: &Path, backend: &dyn ResourceBackend) -> PakResult<usize> {
    let manifest = match contents(target, backend)? {
        Contents::Archive(_) => return Ok(1),
        Contents::Files(manifest) => manifest,
    };

    let gz = Gzip::default();
    let mut reader = backend.open_reader(target)?;
    for name in manifest.names() {
        let packed = reader
            .load(&ResourceKey::file(name))?
            .ok_or_else(|| PakError::Invalid(format!("missing resource for {name}")))?;
        gz.decompress(&packed)
            .map_err(|e| PakError::Invalid(format!("{name}: {e}")))?;
    }

    let stored = reader
        .names(PAYLOAD_TYPE)?
        .into_iter()
        .filter(|n| matches!(n, ResourceName::Name(s) if !s.eq_ignore_ascii_case(MANIFEST_NAME)))
        .count();
    if stored != manifest.len() {
        return Err(PakError::Invalid(format!(
            "manifest lists {} files but {} file resources are stored",
            manifest.len(),
            stored
        )));
    }

    Ok(manifest.len())
}
