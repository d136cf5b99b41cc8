#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::pak::error::PakResult;
use crate::pak::manifest::Manifest;

/// File extensions accepted as pre-built whole-archive payloads.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["cab", "zip"];

pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ARCHIVE_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// Turns a directory into a single archive file for classic packaging.
pub trait ArchiveBuilder {
    /// Extension of the files this builder writes.
    fn extension(&self) -> &'static str;

    /// Archives every file of `manifest` into `output`. Returns the number of
    /// files written.
    fn build(&self, manifest: &Manifest, output: &Path) -> PakResult<usize>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiveBuilder;

impl ArchiveBuilder for ZipArchiveBuilder {
    fn extension(&self) -> &'static str {
        "zip"
    }

    fn build(&self, manifest: &Manifest, output: &Path) -> PakResult<usize> {
        let mut zip = ZipWriter::new(BufWriter::new(File::create(output)?));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, physical) in manifest.files() {
            info!("    {name}");
            zip.start_file(name.as_str(), options)?;
            let mut f = File::open(physical)?;
            io::copy(&mut f, &mut zip)?;
        }
        zip.finish()?;
        Ok(manifest.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn archive_extensions_ignore_case() {
        assert!(is_archive_path(Path::new("payload.cab")));
        assert!(is_archive_path(Path::new("dir/PAYLOAD.CAB")));
        assert!(is_archive_path(Path::new("payload.zip")));
        assert!(!is_archive_path(Path::new("payload.txt")));
        assert!(!is_archive_path(Path::new("cab")));
    }

    #[test]
    fn zip_holds_every_manifest_file() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"abcd").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub").join("b.txt"), b"").unwrap();
        let manifest = Manifest::scan(src.path()).unwrap();

        let out = tempdir().unwrap();
        let archive = out.path().join("payload.zip");
        assert_eq!(ZipArchiveBuilder.build(&manifest, &archive).unwrap(), 2);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut text = String::new();
        zip.by_name("a.txt").unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "abcd");
        assert_eq!(zip.by_name("sub/b.txt").unwrap().size(), 0);
    }
}
