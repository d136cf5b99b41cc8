#![allow(unsafe_code)]

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::slice;

use winapi::shared::basetsd::LONG_PTR;
use winapi::ctypes::c_void;
use winapi::shared::minwindef::{BOOL, FALSE, HMODULE, TRUE};
use winapi::um::libloaderapi::{
    EnumResourceNamesW, FindResourceExW, FreeLibrary, LoadLibraryExW, LoadResource, LockResource,
    SizeofResource, LOAD_LIBRARY_AS_DATAFILE,
};
use winapi::um::winbase::{BeginUpdateResourceW, EndUpdateResourceW, UpdateResourceW};
use winapi::um::winnt::{HANDLE, LPCWSTR, LPWSTR};

use crate::pak::backend::{ResourceBackend, ResourceReader, UpdateSession};
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceKey, ResourceName};

const ERROR_RESOURCE_DATA_NOT_FOUND: i32 = 1812;
const ERROR_RESOURCE_LANG_NOT_FOUND: i32 = 1815;
const ERROR_RESOURCE_TYPE_NOT_FOUND: i32 = 1813;

/// The PE resource section, through the kernel32 update API.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl ResourceBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn begin(&self, target: &Path) -> PakResult<Box<dyn UpdateSession>> {
        Ok(Box::new(NativeSession::begin(target)?))
    }

    fn open_reader(&self, target: &Path) -> PakResult<Box<dyn ResourceReader>> {
        Ok(Box::new(NativeReader::open(target)?))
    }
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(Some(0)).collect()
}

fn last_error(op: &'static str) -> PakError {
    PakError::Native {
        op,
        source: io::Error::last_os_error(),
    }
}

/// Owns the wide string a `LPCWSTR` name points into.
enum WideName {
    Id(u16),
    Str(Vec<u16>),
}

impl WideName {
    fn new(name: &ResourceName) -> Self {
        match name {
            ResourceName::Id(id) => WideName::Id(*id),
            ResourceName::Name(s) => WideName::Str(wide(OsStr::new(s))),
        }
    }

    /// MAKEINTRESOURCE for ids.
    fn as_ptr(&self) -> LPCWSTR {
        match self {
            WideName::Id(id) => *id as usize as LPCWSTR,
            WideName::Str(s) => s.as_ptr(),
        }
    }
}

pub struct NativeSession {
    handle: HANDLE,
}

impl NativeSession {
    /// Existing resources are kept. Payload resources are removed one by one
    /// through `delete`.
    pub fn begin(target: &Path) -> PakResult<Self> {
        let path = wide(target.as_os_str());
        // SAFETY: `path` is NUL terminated and outlives the call.
        let handle = unsafe { BeginUpdateResourceW(path.as_ptr(), FALSE) };
        if handle.is_null() {
            return Err(last_error("BeginUpdateResourceW"));
        }
        Ok(Self { handle })
    }
}

impl NativeSession {
    /// `data == None` removes the resource.
    fn write(&mut self, key: &ResourceKey, data: Option<&[u8]>) -> PakResult<()> {
        if self.handle.is_null() {
            return Err(PakError::SessionClosed);
        }
        let kind = wide(OsStr::new(&key.kind));
        let name = WideName::new(&key.name);
        let (ptr, len) = match data {
            Some(data) => {
                let len = u32::try_from(data.len())
                    .map_err(|_| PakError::Invalid(format!("resource too large: {key}")))?;
                (data.as_ptr() as *mut c_void, len)
            }
            None => (ptr::null_mut(), 0),
        };

        // SAFETY: the handle is open, both names are NUL terminated or
        // integer resources, and UpdateResourceW copies `data` before returning.
        let ok = unsafe { UpdateResourceW(self.handle, kind.as_ptr(), name.as_ptr(), key.lang, ptr, len) };
        if ok == FALSE {
            return Err(last_error("UpdateResourceW"));
        }
        Ok(())
    }
}

impl UpdateSession for NativeSession {
    fn update(&mut self, key: &ResourceKey, data: &[u8]) -> PakResult<()> {
        self.write(key, Some(data))
    }

    fn delete(&mut self, key: &ResourceKey) -> PakResult<()> {
        self.write(key, None)
    }

    fn end(&mut self, discard: bool) -> PakResult<()> {
        if self.handle.is_null() {
            return Err(PakError::SessionClosed);
        }
        // SAFETY: the handle came from BeginUpdateResourceW and is released
        // here, whether or not the write succeeds.
        let ok = unsafe { EndUpdateResourceW(self.handle, BOOL::from(discard)) };
        self.handle = ptr::null_mut();
        if ok == FALSE {
            return Err(last_error("EndUpdateResourceW"));
        }
        Ok(())
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: still-open handle from BeginUpdateResourceW.
            unsafe { EndUpdateResourceW(self.handle, TRUE) };
        }
    }
}

/// Target mapped as a data file, for resource lookups.
pub struct NativeReader {
    module: HMODULE,
}

impl NativeReader {
    pub fn open(target: &Path) -> PakResult<Self> {
        let path = wide(target.as_os_str());
        // SAFETY: NUL terminated path; a data-file mapping runs no code.
        let module =
            unsafe { LoadLibraryExW(path.as_ptr(), ptr::null_mut(), LOAD_LIBRARY_AS_DATAFILE) };
        if module.is_null() {
            return Err(last_error("LoadLibraryExW"));
        }
        Ok(Self { module })
    }
}

impl Drop for NativeReader {
    fn drop(&mut self) {
        // SAFETY: module came from LoadLibraryExW.
        unsafe { FreeLibrary(self.module) };
    }
}

unsafe extern "system" fn collect_name(
    _module: HMODULE,
    _kind: LPCWSTR,
    name: LPWSTR,
    param: LONG_PTR,
) -> BOOL {
    let names = &mut *(param as *mut Vec<ResourceName>);
    let raw = name as usize;
    if raw >> 16 == 0 {
        names.push(ResourceName::Id(raw as u16));
    } else {
        let mut len = 0;
        while *name.add(len) != 0 {
            len += 1;
        }
        let units = slice::from_raw_parts(name, len);
        names.push(ResourceName::Name(String::from_utf16_lossy(units)));
    }
    TRUE
}

impl ResourceReader for NativeReader {
    fn names(&mut self, kind: &str) -> PakResult<Vec<ResourceName>> {
        let kind = wide(OsStr::new(kind));
        let mut names: Vec<ResourceName> = Vec::new();
        // SAFETY: `names` outlives the enumeration, which is synchronous.
        let ok = unsafe {
            EnumResourceNamesW(
                self.module,
                kind.as_ptr(),
                Some(collect_name),
                &mut names as *mut Vec<ResourceName> as LONG_PTR,
            )
        };
        if ok == FALSE {
            let err = io::Error::last_os_error();
            if let Some(ERROR_RESOURCE_DATA_NOT_FOUND..=ERROR_RESOURCE_TYPE_NOT_FOUND) =
                err.raw_os_error()
            {
                return Ok(Vec::new());
            }
            return Err(PakError::Native {
                op: "EnumResourceNamesW",
                source: err,
            });
        }
        Ok(names)
    }

    fn load(&mut self, key: &ResourceKey) -> PakResult<Option<Vec<u8>>> {
        let kind = wide(OsStr::new(&key.kind));
        let name = WideName::new(&key.name);

        // SAFETY: module is mapped; names are NUL terminated or integer ids.
        let info = unsafe { FindResourceExW(self.module, kind.as_ptr(), name.as_ptr(), key.lang) };
        if info.is_null() {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(ERROR_RESOURCE_DATA_NOT_FOUND..=ERROR_RESOURCE_LANG_NOT_FOUND) => Ok(None),
                _ => Err(PakError::Native {
                    op: "FindResourceExW",
                    source: err,
                }),
            };
        }

        // SAFETY: `info` was found in this module; the locked block stays
        // valid until the module is freed, and is copied out right away.
        unsafe {
            let size = SizeofResource(self.module, info) as usize;
            if size == 0 {
                return Ok(Some(Vec::new()));
            }
            let global = LoadResource(self.module, info);
            if global.is_null() {
                return Err(last_error("LoadResource"));
            }
            let data = LockResource(global) as *const u8;
            if data.is_null() {
                return Err(last_error("LockResource"));
            }
            Ok(Some(slice::from_raw_parts(data, size).to_vec()))
        }
    }
}
