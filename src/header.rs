//! On-disk layout: binary headers, index records, and the stub file.
//!
//! A database `basename` is stored in four files:
//!
//! - `basename`       : a human-readable stub; only the first line is parsed
//! - `basename.dsqi`  : index file, enabling random access and parallel chunking
//! - `basename.dsqm`  : metadata (names, accessions, descriptions, taxonomy)
//! - `basename.dsqs`  : packed sequence data
//!
//! All four carry the same magic and the same per-database random tag, so a
//! mismatched file set is caught at open time. All integers are little-endian.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, FileKind, Result};

/// Current magic number: "DSQ1" in ASCII.
pub const MAGIC: u32 = 0x4453_5131;

/// The magic as seen through a byte-order swap. Reserved for a future
/// cross-endian reading path; currently recognized and rejected.
pub(crate) const MAGIC_SWAPPED: u32 = MAGIC.swap_bytes();

/// Stub file format version.
pub(crate) const STUB_VERSION: u32 = 1;

/// Size of one index record in bytes.
pub(crate) const SIZE_INDEX_RECORD: usize = 16;

pub(crate) fn index_path(basename: &Path) -> PathBuf {
    suffixed(basename, ".dsqi")
}

pub(crate) fn metadata_path(basename: &Path) -> PathBuf {
    suffixed(basename, ".dsqm")
}

pub(crate) fn sequence_path(basename: &Path) -> PathBuf {
    suffixed(basename, ".dsqs")
}

fn suffixed(basename: &Path, suffix: &str) -> PathBuf {
    let mut s = basename.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Map an I/O failure while reading a fixed-size header to the right error.
fn header_err(e: io::Error, kind: FileKind) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::TruncatedHeader { kind }
    } else {
        Error::Io(e)
    }
}

/// Read and validate the leading magic of one of the binary files.
fn read_magic<R: Read>(reader: &mut R, kind: FileKind) -> Result<()> {
    let magic = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| header_err(e, kind))?;
    if magic == MAGIC_SWAPPED {
        return Err(Error::SwappedMagic { kind });
    }
    if magic != MAGIC {
        return Err(Error::BadMagic { kind, found: magic });
    }
    Ok(())
}

/// Header of the index file.
///
/// Layout: magic u32, tag u32, alphatype u32, flags u32, max-namelen u32,
/// max-acclen u32, max-desclen u32, max-seqlen u64, nseq u64, nres u64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Random tag cross-linking the four files of this database.
    pub tag: u32,
    /// On-disk alphabet type code; see [`Kind`](crate::Kind).
    pub alphatype: u32,
    /// Reserved; written as zero, not interpreted on read.
    pub flags: u32,
    pub max_namelen: u32,
    pub max_acclen: u32,
    pub max_desclen: u32,
    pub max_seqlen: u64,
    pub nseq: u64,
    pub nres: u64,
}

impl IndexHeader {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let kind = FileKind::Index;
        read_magic(reader, kind)?;
        let mut u32_field = || -> Result<u32> {
            reader
                .read_u32::<LittleEndian>()
                .map_err(|e| header_err(e, kind))
        };
        let tag = u32_field()?;
        let alphatype = u32_field()?;
        let flags = u32_field()?;
        let max_namelen = u32_field()?;
        let max_acclen = u32_field()?;
        let max_desclen = u32_field()?;
        let max_seqlen = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| header_err(e, kind))?;
        let nseq = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| header_err(e, kind))?;
        let nres = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| header_err(e, kind))?;
        Ok(IndexHeader {
            tag,
            alphatype,
            flags,
            max_namelen,
            max_acclen,
            max_desclen,
            max_seqlen,
            nseq,
            nres,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(MAGIC)?;
        writer.write_u32::<LittleEndian>(self.tag)?;
        writer.write_u32::<LittleEndian>(self.alphatype)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.max_namelen)?;
        writer.write_u32::<LittleEndian>(self.max_acclen)?;
        writer.write_u32::<LittleEndian>(self.max_desclen)?;
        writer.write_u64::<LittleEndian>(self.max_seqlen)?;
        writer.write_u64::<LittleEndian>(self.nseq)?;
        writer.write_u64::<LittleEndian>(self.nres)?;
        Ok(())
    }
}

/// The short header shared by the metadata and sequence files: magic, tag.
///
/// Returns the tag; the caller checks it against the stub's tag.
pub(crate) fn read_tag_header<R: Read>(reader: &mut R, kind: FileKind) -> Result<u32> {
    read_magic(reader, kind)?;
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| header_err(e, kind))
}

pub(crate) fn write_tag_header<W: Write>(writer: &mut W, tag: u32) -> Result<()> {
    writer.write_u32::<LittleEndian>(MAGIC)?;
    writer.write_u32::<LittleEndian>(tag)?;
    Ok(())
}

/// One index record: cumulative end-offsets for a sequence.
///
/// `psq_end` is one past the last packet of the sequence in the sequence
/// file, `metadata_end` one past its last metadata byte, both counted from
/// the start of the data sections and both minus one. Per-sequence extents
/// come from subtracting the previous record; the values "before" record 0
/// are -1, so `psq_end` may itself be -1 if the first sequence is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexRecord {
    pub psq_end: i64,
    pub metadata_end: i64,
}

impl IndexRecord {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i64::<LittleEndian>(self.psq_end)?;
        writer.write_i64::<LittleEndian>(self.metadata_end)?;
        Ok(())
    }

    /// Read the next record, or `None` at a clean end of file. A partial
    /// record is a corrupt index.
    pub fn read_opt<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; SIZE_INDEX_RECORD];
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(None),
            n if n == buf.len() => Ok(Some(IndexRecord {
                psq_end: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
                metadata_end: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
            })),
            _ => Err(Error::CorruptIndex("index file ends mid-record")),
        }
    }
}

/// Write the human-readable stub. Only the first line is formally parsed;
/// the rest is free-form description for the user.
pub(crate) fn write_stub<W: Write>(
    writer: &mut W,
    tag: u32,
    kind: crate::Kind,
    nseq: u64,
    nres: u64,
) -> io::Result<()> {
    writeln!(writer, "Easel dsqdata v{STUB_VERSION} x{tag}")?;
    writeln!(writer)?;
    writeln!(writer, "Type:            {kind}")?;
    writeln!(writer, "Sequences:       {nseq}")?;
    writeln!(writer, "Residues:        {nres}")?;
    Ok(())
}

/// Parse the stub's tag line, `Easel dsqdata v<version> x<tag>`, returning
/// the tag. Tokens are whitespace-separated.
pub(crate) fn parse_stub_tag(line: &str) -> Result<u32> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("Easel") => {}
        Some(_) => return Err(Error::BadStub("tag line does not start with Easel")),
        None => return Err(Error::BadStub("tag line has no data")),
    }
    if tokens.next() != Some("dsqdata") {
        return Err(Error::BadStub("tag line is not a dsqdata tag line"));
    }
    match tokens.next() {
        Some(v) if v.starts_with('v') && v[1..].parse::<u32>().is_ok() => {}
        Some(_) => return Err(Error::BadStub("no version number")),
        None => return Err(Error::BadStub("tag line truncated before version")),
    }
    match tokens.next() {
        Some(x) if x.starts_with('x') => x[1..]
            .parse::<u32>()
            .map_err(|_| Error::BadStub("no integer tag")),
        Some(_) => return Err(Error::BadStub("no x on tag")),
        None => return Err(Error::BadStub("tag line truncated before tag")),
    }
}
