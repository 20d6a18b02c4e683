use std::io;
use std::path::PathBuf;

use crate::alphabet::Kind;

pub type Result<T> = std::result::Result<T, Error>;

/// Which of the four database files an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Stub,
    Index,
    Metadata,
    Sequence,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Stub => write!(f, "stub"),
            FileKind::Index => write!(f, "index"),
            FileKind::Metadata => write!(f, "metadata"),
            FileKind::Sequence => write!(f, "sequence"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find or open {kind} file {path}")]
    NotFound { kind: FileKind, path: PathBuf },

    #[error("{kind} file has bad magic {found:#010x}")]
    BadMagic { kind: FileKind, found: u32 },

    #[error("{kind} file is byte-swapped; cross-endian databases are not supported")]
    SwappedMagic { kind: FileKind },

    #[error("{kind} file has bad tag {found:#010x}, doesn't go with stub tag {expected:#010x}")]
    TagMismatch {
        kind: FileKind,
        expected: u32,
        found: u32,
    },

    #[error("{kind} file header truncated")]
    TruncatedHeader { kind: FileKind },

    #[error("stub file has bad format: {0}")]
    BadStub(&'static str),

    #[error("index file has invalid alphabet type {0}")]
    UnknownAlphabet(u32),

    #[error("database uses {found} alphabet; expected {expected} alphabet")]
    AlphabetMismatch { expected: Kind, found: Kind },

    #[error("invalid residue {symbol:?} for {kind} alphabet")]
    InvalidResidue { symbol: char, kind: Kind },

    #[error("sequence {name:?} packs into {packets} packets, over the per-chunk maximum {max}")]
    SeqTooLong {
        name: String,
        packets: usize,
        max: usize,
    },

    #[error("corrupt index: {0}")]
    CorruptIndex(&'static str),

    #[error("truncated database: {kind} file ended mid-chunk")]
    Truncated { kind: FileKind },

    #[error("metadata format error: field runs past the end of the metadata buffer")]
    MalformedMetadata,

    #[error("packet stream ended before end-of-sequence for all expected sequences")]
    MalformedPackets,

    #[error("failed to open {path} for writing")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reader worker failed: {0}")]
    WorkerFailed(String),

    #[error("reader shut down before end of data")]
    Closed,

    #[error("I/O error")]
    Io(#[from] io::Error),
}
