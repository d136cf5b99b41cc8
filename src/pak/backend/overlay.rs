#![forbid(unsafe_code)]

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::pak::backend::{ResourceBackend, ResourceReader, UpdateSession};
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceKey, ResourceName, NEUTRAL_LANG};
use crate::pak::io::{
    read_exact, read_str, read_u16, read_u32, read_u64, read_u8, short_hash, write_str,
    write_u16, write_u32, write_u64, write_u8,
};

/// Start of the resource table, right after the executable image.
pub const OVERLAY_MAGIC: [u8; 8] = *b"RSPAK\x01\x00\x00";

/// Last 40 bytes of a file that carries a resource table.
pub const FOOTER_MAGIC: [u8; 8] = *b"RSPAKEND";

const FOOTER_LEN: u64 = 8 + 8 + 8 + 8 + 4 + 4;

const NAME_ID: u8 = 0;
const NAME_STR: u8 = 1;

/// Resource table appended to the executable image.
///
/// Layout:
/// - image bytes, untouched
/// - [OVERLAY_MAGIC 8]
/// - resource blobs
/// - index:
///   - [u32 entry_count]
///   - entries...
///     - [u16 type_len][type UTF-8]
///     - [u8 name_kind] then [u16 id] or [u16 name_len][name UTF-8]
///     - [u16 lang]
///     - [u64 offset from overlay start]
///     - [u64 len]
///     - [u8 hash[32]] (blake3 of the blob)
/// - footer:
///   - [FOOTER_MAGIC 8]
///   - [u64 overlay_len] (magic to end of footer)
///   - [u64 index_offset]
///   - [u64 index_len]
///   - [u32 index_hash (blake3 truncated to u32)]
///   - [u32 reserved]
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayBackend;

impl ResourceBackend for OverlayBackend {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn begin(&self, target: &Path) -> PakResult<Box<dyn UpdateSession>> {
        Ok(Box::new(OverlaySession::begin(target)?))
    }

    fn open_reader(&self, target: &Path) -> PakResult<Box<dyn ResourceReader>> {
        Ok(Box::new(OverlayReader::open(target)?))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u64,
    hash: [u8; 32],
}

#[derive(Debug)]
struct Table {
    image_len: u64,
    entries: BTreeMap<ResourceKey, Slot>,
}

fn read_table(file: &mut File) -> PakResult<Table> {
    let size = file.metadata()?.len();
    let bare = |size| Table {
        image_len: size,
        entries: BTreeMap::new(),
    };
    if size < FOOTER_LEN {
        return Ok(bare(size));
    }

    file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
    if read_exact::<8>(file)? != FOOTER_MAGIC {
        return Ok(bare(size));
    }

    let overlay_len = read_u64(file)?;
    let index_offset = read_u64(file)?;
    let index_len = read_u64(file)?;
    let index_hash = read_u32(file)?;
    let _reserved = read_u32(file)?;

    if overlay_len < 8 + FOOTER_LEN || overlay_len > size {
        return Err(PakError::Invalid("overlay length out of range".into()));
    }
    let start = size - overlay_len;
    let index_end = index_offset
        .checked_add(index_len)
        .ok_or_else(|| PakError::Invalid("index outside overlay".into()))?;
    if index_offset < 8 || index_end > overlay_len - FOOTER_LEN {
        return Err(PakError::Invalid("index outside overlay".into()));
    }

    file.seek(SeekFrom::Start(start))?;
    if read_exact::<8>(file)? != OVERLAY_MAGIC {
        return Err(PakError::Invalid("bad overlay magic".into()));
    }

    file.seek(SeekFrom::Start(start + index_offset))?;
    let mut index_buf = vec![0u8; index_len as usize];
    file.read_exact(&mut index_buf)?;
    if short_hash(&index_buf) != index_hash {
        return Err(PakError::Invalid("index hash mismatch".into()));
    }

    let mut cur = std::io::Cursor::new(index_buf);
    let count = read_u32(&mut cur)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let kind = read_str(&mut cur)?;
        let name = match read_u8(&mut cur)? {
            NAME_ID => ResourceName::Id(read_u16(&mut cur)?),
            NAME_STR => ResourceName::Name(read_str(&mut cur)?),
            other => return Err(PakError::Invalid(format!("unknown name kind {other}"))),
        };
        let lang = read_u16(&mut cur)?;
        let offset = read_u64(&mut cur)?;
        let len = read_u64(&mut cur)?;
        let hash = read_exact::<32>(&mut cur)?;

        let key = ResourceKey { kind, name, lang };
        if offset < 8 || offset.checked_add(len).map_or(true, |end| end > index_offset) {
            return Err(PakError::Invalid(format!("blob outside overlay: {key}")));
        }
        let slot = Slot {
            offset: start + offset,
            len,
            hash,
        };
        if entries.insert(key.clone(), slot).is_some() {
            return Err(PakError::Invalid(format!("duplicate resource: {key}")));
        }
    }

    Ok(Table {
        image_len: start,
        entries,
    })
}

fn write_index_entry(out: &mut Vec<u8>, key: &ResourceKey, offset: u64, len: u64, hash: &[u8; 32]) -> PakResult<()> {
    write_str(out, &key.kind)?;
    match &key.name {
        ResourceName::Id(id) => {
            write_u8(out, NAME_ID)?;
            write_u16(out, *id)?;
        }
        ResourceName::Name(name) => {
            write_u8(out, NAME_STR)?;
            write_str(out, name)?;
        }
    }
    write_u16(out, key.lang)?;
    write_u64(out, offset)?;
    write_u64(out, len)?;
    out.extend_from_slice(hash);
    Ok(())
}

#[derive(Debug)]
enum Staged {
    Existing(Slot),
    New { data: Vec<u8>, hash: [u8; 32] },
}

/// Holds an exclusive lock on the target from begin until end.
pub struct OverlaySession {
    target: PathBuf,
    file: Option<File>,
    image_len: u64,
    staged: BTreeMap<ResourceKey, Staged>,
}

impl OverlaySession {
    pub fn begin(target: &Path) -> PakResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(target)?;
        file.try_lock_exclusive()
            .map_err(|_| PakError::Locked(target.display().to_string()))?;

        let table = read_table(&mut file)?;
        let staged = table
            .entries
            .into_iter()
            .map(|(k, slot)| (k, Staged::Existing(slot)))
            .collect();

        Ok(Self {
            target: target.to_path_buf(),
            file: Some(file),
            image_len: table.image_len,
            staged,
        })
    }

    fn write_to(&self, src: &mut File, out: &mut dyn Write) -> PakResult<()> {
        src.seek(SeekFrom::Start(0))?;
        let copied = std::io::copy(&mut Read::by_ref(src).take(self.image_len), out)?;
        if copied != self.image_len {
            return Err(PakError::Invalid("target shrank during update".into()));
        }

        out.write_all(&OVERLAY_MAGIC)?;
        let mut pos: u64 = OVERLAY_MAGIC.len() as u64;

        let mut index: Vec<u8> = Vec::new();
        write_u32(&mut index, self.staged.len() as u32)?;

        for (key, staged) in &self.staged {
            let (len, hash) = match staged {
                Staged::Existing(slot) => {
                    src.seek(SeekFrom::Start(slot.offset))?;
                    let n = std::io::copy(&mut Read::by_ref(src).take(slot.len), out)?;
                    if n != slot.len {
                        return Err(PakError::Invalid(format!("truncated blob: {key}")));
                    }
                    (slot.len, slot.hash)
                }
                Staged::New { data, hash } => {
                    out.write_all(data)?;
                    (data.len() as u64, *hash)
                }
            };
            write_index_entry(&mut index, key, pos, len, &hash)?;
            pos += len;
        }

        let index_offset = pos;
        let index_len = index.len() as u64;
        out.write_all(&index)?;

        out.write_all(&FOOTER_MAGIC)?;
        write_u64(out, index_offset + index_len + FOOTER_LEN)?;
        write_u64(out, index_offset)?;
        write_u64(out, index_len)?;
        write_u32(out, short_hash(&index))?;
        write_u32(out, 0)?;
        Ok(())
    }

    fn commit(&mut self, file: &mut File) -> PakResult<()> {
        let dir = match self.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            self.write_to(file, &mut out)?;
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), file.metadata()?.permissions())?;

        FileExt::unlock(&*file)?;
        tmp.persist(&self.target).map_err(|e| PakError::Io(e.error))?;
        self.staged.clear();
        Ok(())
    }
}

impl UpdateSession for OverlaySession {
    fn update(&mut self, key: &ResourceKey, data: &[u8]) -> PakResult<()> {
        if self.file.is_none() {
            return Err(PakError::SessionClosed);
        }
        let hash: [u8; 32] = blake3::hash(data).into();
        self.staged.insert(
            key.clone(),
            Staged::New {
                data: data.to_vec(),
                hash,
            },
        );
        Ok(())
    }

    fn delete(&mut self, key: &ResourceKey) -> PakResult<()> {
        if self.file.is_none() {
            return Err(PakError::SessionClosed);
        }
        self.staged.remove(key);
        Ok(())
    }

    fn end(&mut self, discard: bool) -> PakResult<()> {
        let mut file = self.file.take().ok_or(PakError::SessionClosed)?;
        if discard {
            self.staged.clear();
            let _ = FileExt::unlock(&file);
            return Ok(());
        }
        match self.commit(&mut file) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.file = Some(file);
                Err(e)
            }
        }
    }
}

pub struct OverlayReader {
    file: File,
    table: Table,
}

impl OverlayReader {
    pub fn open(target: &Path) -> PakResult<Self> {
        let mut file = File::open(target)?;
        let table = read_table(&mut file)?;
        Ok(Self { file, table })
    }
}

impl ResourceReader for OverlayReader {
    fn names(&mut self, kind: &str) -> PakResult<Vec<ResourceName>> {
        Ok(self
            .table
            .entries
            .keys()
            .filter(|k| k.kind == kind && k.lang == NEUTRAL_LANG)
            .map(|k| k.name.clone())
            .collect())
    }

    fn load(&mut self, key: &ResourceKey) -> PakResult<Option<Vec<u8>>> {
        let Some(slot) = self.table.entries.get(key).copied() else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(slot.offset))?;
        let mut data = vec![0u8; slot.len as usize];
        self.file.read_exact(&mut data)?;

        let got: [u8; 32] = blake3::hash(&data).into();
        if got != slot.hash {
            return Err(PakError::Invalid(format!("hash mismatch for {key}")));
        }
        Ok(Some(data))
    }
}
