//! Packs a directory, or a ready-made archive, into the resource table of an
//! executable. Files are gzip-compressed in parallel and listed in an XML
//! manifest stored next to them.

mod archive;
pub mod backend;
mod compress;
mod error;
mod format;
mod io;
mod manifest;
mod ops;
mod packager;
mod path;
mod txn;

#[cfg(test)]
mod testing;

pub use error::{PakError, PakResult};
pub use ops::{extract, list, pack, verify, PackagingJob};
