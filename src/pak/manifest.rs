#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use xml::common::XmlVersion;
use xml::reader::{EventReader, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, XmlEvent};

use crate::pak::compress::Compressor;
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceEntry, ResourceKey, MANIFEST_NAME};
use crate::pak::path::normalize_rel_path;

const ROOT_ELEMENT: &str = "FileList";
const FILE_ELEMENT: &str = "File";

/// Files found under a source root, in traversal order. Each resource name is
/// kept next to the file it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    files: Vec<(String, PathBuf)>,
}

impl Manifest {
    /// Walks `root`, following symlinks. Siblings are visited by file name.
    pub fn scan(root: &Path) -> PakResult<Self> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for ent in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
        {
            let ent = ent.map_err(|e| {
                let msg = e.to_string();
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, msg));
                PakError::Io(io)
            })?;

            if !ent.file_type().is_file() {
                continue;
            }

            let name = normalize_rel_path(root, ent.path())?;
            if name == MANIFEST_NAME {
                return Err(PakError::ReservedName(
                    ent.path().display().to_string(),
                    MANIFEST_NAME,
                ));
            }
            if let Some(first) = seen.get(&name) {
                return Err(PakError::NameCollision {
                    name,
                    first: first.display().to_string(),
                    second: ent.path().display().to_string(),
                });
            }

            debug!(file = %name, "found");
            seen.insert(name.clone(), ent.path().to_path_buf());
            files.push((name, ent.path().to_path_buf()));
        }

        Ok(Self { files })
    }

    /// A manifest that only knows names, as read back from a target.
    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            files: names.into_iter().map(|n| (n, PathBuf::new())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn files(&self) -> &[(String, PathBuf)] {
        &self.files
    }

    pub fn to_xml(&self) -> PakResult<Vec<u8>> {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(Vec::<u8>::new());

        let xml_err = |e: xml::writer::Error| PakError::Manifest(e.to_string());

        writer
            .write(XmlEvent::StartDocument {
                version: XmlVersion::Version10,
                encoding: Some("utf-8"),
                standalone: None,
            })
            .map_err(xml_err)?;
        writer
            .write(XmlEvent::start_element(ROOT_ELEMENT))
            .map_err(xml_err)?;
        for name in self.names() {
            writer
                .write(XmlEvent::start_element(FILE_ELEMENT))
                .map_err(xml_err)?;
            writer.write(XmlEvent::characters(name)).map_err(xml_err)?;
            writer.write(XmlEvent::end_element()).map_err(xml_err)?;
        }
        writer.write(XmlEvent::end_element()).map_err(xml_err)?;

        Ok(writer.into_inner())
    }

    pub fn from_xml(bytes: &[u8]) -> PakResult<Self> {
        let mut names = Vec::new();
        let mut current: Option<String> = None;
        let mut saw_root = false;

        for event in EventReader::new(bytes) {
            match event.map_err(|e| PakError::Manifest(e.to_string()))? {
                ReadEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ROOT_ELEMENT if !saw_root => saw_root = true,
                    FILE_ELEMENT if saw_root && current.is_none() => current = Some(String::new()),
                    other => {
                        return Err(PakError::Manifest(format!("unexpected element <{other}>")))
                    }
                },
                ReadEvent::Characters(s) | ReadEvent::Whitespace(s) | ReadEvent::CData(s) => {
                    if let Some(text) = current.as_mut() {
                        text.push_str(&s);
                    }
                }
                ReadEvent::EndElement { name } if name.local_name == FILE_ELEMENT => {
                    let text = current
                        .take()
                        .ok_or_else(|| PakError::Manifest("unbalanced </File>".into()))?;
                    names.push(text);
                }
                _ => {}
            }
        }

        if !saw_root {
            return Err(PakError::Manifest(format!("missing <{ROOT_ELEMENT}>")));
        }
        Ok(Self::from_names(names))
    }

    /// Serializes and compresses the listing into its resource entry.
    pub fn to_entry(&self, compressor: &dyn Compressor) -> PakResult<ResourceEntry> {
        let xml = self.to_xml()?;
        let packed = compressor.compress_bytes(&xml)?;
        Ok(ResourceEntry::new(ResourceKey::manifest(), packed.data))
    }

    pub fn from_entry_bytes(bytes: &[u8], compressor: &dyn Compressor) -> PakResult<Self> {
        let xml = compressor.decompress(bytes)?;
        Self::from_xml(&xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pak::compress::Gzip;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_lists_nested_files_relative_to_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"abcd").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let manifest = Manifest::scan(dir.path()).unwrap();
        let names: Vec<&str> = manifest.names().collect();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn scan_of_missing_root_fails() {
        let dir = tempdir().unwrap();
        let err = Manifest::scan(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PakError::Io(_)));
    }

    #[test]
    fn file_named_like_the_manifest_is_refused() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_NAME), b"<x/>").unwrap();
        let err = Manifest::scan(dir.path()).unwrap_err();
        assert!(matches!(err, PakError::ReservedName(_, _)));
    }

    #[cfg(unix)]
    #[test]
    fn separator_style_collision_is_refused() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"1").unwrap();
        fs::write(dir.path().join("sub\\b.txt"), b"2").unwrap();

        match Manifest::scan(dir.path()).unwrap_err() {
            PakError::NameCollision { name, .. } => assert_eq!(name, "sub/b.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn doubled_separator_collides_with_nested_file() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a").join("b"), b"1").unwrap();
        fs::write(dir.path().join("a\\\\b"), b"2").unwrap();

        match Manifest::scan(dir.path()).unwrap_err() {
            PakError::NameCollision { name, .. } => assert_eq!(name, "a/b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_packaged_as_regular_files() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("real.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(outside.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let manifest = Manifest::scan(dir.path()).unwrap();
        assert_eq!(manifest.names().collect::<Vec<_>>(), vec!["link.txt"]);
    }

    #[test]
    fn xml_lists_files_in_order() {
        let manifest = Manifest::from_names(vec!["b.txt".into(), "a & b/<c>.txt".into()]);
        let xml = String::from_utf8(manifest.to_xml().unwrap()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<File>b.txt</File>"));
        assert!(xml.contains("a &amp; b/&lt;c>.txt") || xml.contains("a &amp; b/&lt;c&gt;.txt"));

        let back = Manifest::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn empty_listing_survives_the_resource_encoding() {
        let gz = Gzip::default();
        let entry = Manifest::default().to_entry(&gz).unwrap();
        assert_eq!(entry.key(), &ResourceKey::manifest());
        let back = Manifest::from_entry_bytes(entry.data(), &gz).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn foreign_xml_is_rejected() {
        assert!(Manifest::from_xml(b"<Other><File>a</File></Other>").is_err());
        assert!(Manifest::from_xml(b"not xml").is_err());
    }
}
