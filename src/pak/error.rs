#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PakError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),

    #[error("invalid resource table: {0}")]
    Invalid(String),

    #[error("path is outside source dir: {0}")]
    Outside(String),

    #[error("file name is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    #[error("resource name collision on {name:?}: {first} and {second}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("{0} uses the reserved resource name {1:?}")]
    ReservedName(String, &'static str),

    #[error("resource {0} was already staged in this update session")]
    DuplicateKey(String),

    #[error("{op} failed: {source}")]
    Native {
        op: &'static str,
        source: std::io::Error,
    },

    #[error("target is locked by another update session: {0}")]
    Locked(String),

    #[error("update session already failed; nothing more can be staged")]
    SessionFailed,

    #[error("update session is closed")]
    SessionClosed,

    #[error("manifest: {0}")]
    Manifest(String),

    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("packaging was cancelled")]
    Cancelled,
}

impl PakError {
    pub fn usage(msg: impl Into<String>) -> Self {
        PakError::Usage(msg.into())
    }

    /// Process exit code for this error: 2 for usage errors, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            PakError::Usage(_) => 2,
            _ => 1,
        }
    }
}

pub type PakResult<T> = Result<T, PakError>;
