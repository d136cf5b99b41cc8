#![forbid(unsafe_code)]

use std::fmt;

/// Resource type shared by every payload resource.
pub const PAYLOAD_TYPE: &str = "CABFILE";

/// Resource name of the compressed file listing.
pub const MANIFEST_NAME: &str = "FileList.xml";

/// Numeric resource id of a legacy whole-archive payload.
pub const LEGACY_ARCHIVE_ID: u16 = 6699;

/// Neutral locale. Payload resources are never localized.
pub const NEUTRAL_LANG: u16 = 0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceName {
    Id(u16),
    Name(String),
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Id(id) => write!(f, "#{id}"),
            ResourceName::Name(name) => f.write_str(name),
        }
    }
}

/// (type, name, locale) triple identifying one resource slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: String,
    pub name: ResourceName,
    pub lang: u16,
}

impl ResourceKey {
    pub fn payload(name: ResourceName) -> Self {
        Self {
            kind: PAYLOAD_TYPE.to_string(),
            name,
            lang: NEUTRAL_LANG,
        }
    }

    /// Key of a packaged file, named by its normalized relative path.
    pub fn file(rel: &str) -> Self {
        Self::payload(ResourceName::Name(rel.to_string()))
    }

    pub fn manifest() -> Self {
        Self::payload(ResourceName::Name(MANIFEST_NAME.to_string()))
    }

    pub fn legacy_archive() -> Self {
        Self::payload(ResourceName::Id(LEGACY_ARCHIVE_ID))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.name, self.lang)
    }
}

/// A key and the bytes stored under it. Built once, then moved into a
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    key: ResourceKey,
    data: Vec<u8>,
}

impl ResourceEntry {
    pub fn new(key: ResourceKey, data: Vec<u8>) -> Self {
        Self { key, data }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
