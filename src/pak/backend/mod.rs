//! Resource tables the packager can write into.
//!
//! A backend hands out two things: an [`UpdateSession`], the stateful
//! begin/update/end handle that stages resources and writes them on `end`,
//! and a [`ResourceReader`] to look resources up again afterwards.

mod overlay;
#[cfg(windows)]
mod win32;

use std::path::Path;

use clap::ValueEnum;

use crate::pak::error::PakResult;
use crate::pak::format::{ResourceKey, ResourceName};

pub use overlay::OverlayBackend;
#[cfg(windows)]
pub use win32::NativeBackend;

/// One open update session against a target file.
///
/// Sessions are not reentrant: `update` takes `&mut self`, and callers must
/// funnel every staged resource through the single owner of the session.
pub trait UpdateSession {
    /// Stages `data` under `key`, replacing any resource already there.
    fn update(&mut self, key: &ResourceKey, data: &[u8]) -> PakResult<()>;

    /// Stages removal of the resource under `key`. Removing a key that is
    /// not present is not an error.
    fn delete(&mut self, key: &ResourceKey) -> PakResult<()>;

    /// Writes every staged update (`discard == false`) or drops them.
    /// A failed write may leave the session open, in which case the caller
    /// discards it. Ending a closed session fails with `SessionClosed`.
    fn end(&mut self, discard: bool) -> PakResult<()>;
}

pub trait ResourceReader {
    /// Names of all resources of type `kind` in neutral locale.
    fn names(&mut self, kind: &str) -> PakResult<Vec<ResourceName>>;

    fn load(&mut self, key: &ResourceKey) -> PakResult<Option<Vec<u8>>>;
}

pub trait ResourceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a session that starts from the target's current resources.
    fn begin(&self, target: &Path) -> PakResult<Box<dyn UpdateSession>>;

    fn open_reader(&self, target: &Path) -> PakResult<Box<dyn ResourceReader>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Portable resource table appended to the executable image.
    Overlay,
    /// The Windows resource section, via BeginUpdateResource.
    Native,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(windows) {
            BackendKind::Native
        } else {
            BackendKind::Overlay
        }
    }
}

pub fn backend(kind: BackendKind) -> PakResult<Box<dyn ResourceBackend>> {
    match kind {
        BackendKind::Overlay => Ok(Box::new(OverlayBackend)),
        #[cfg(windows)]
        BackendKind::Native => Ok(Box::new(NativeBackend)),
        #[cfg(not(windows))]
        BackendKind::Native => Err(crate::pak::error::PakError::usage(
            "the native resource backend is only available on Windows; use --backend overlay",
        )),
    }
}
