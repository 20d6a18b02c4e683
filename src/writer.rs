//! Creating a database from a digital sequence source.
//!
//! Creation is write-once: two passes over a rewindable [`SeqSource`]. The
//! first pass gathers the counts and maxima that go in the index header.
//! The second pass packs each sequence, appends the packets to the sequence
//! file, the metadata fields to the metadata file, and one cumulative index
//! record per sequence to the index file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use rand::Rng;

use crate::chunk::CHUNK_MAXPACKET;
use crate::codec::{pack2, pack5};
use crate::error::{Error, Result};
use crate::header::{
    index_path, metadata_path, sequence_path, write_stub, write_tag_header, IndexHeader,
    IndexRecord,
};
use crate::source::{DigitalSeq, SeqSource};

fn create(path: std::path::PathBuf) -> Result<BufWriter<File>> {
    match File::create(&path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(source) => Err(Error::CreateFailed { path, source }),
    }
}

/// Create database `basename` from the sequences in `source`.
///
/// Writes the four files `basename`, `basename.dsqi`, `basename.dsqm`, and
/// `basename.dsqs`, cross-linked by a freshly drawn random tag. The source
/// is read twice and must be positioned at its first sequence.
pub fn write_database<S: SeqSource>(source: &mut S, basename: impl AsRef<Path>) -> Result<()> {
    let basename = basename.as_ref();
    let kind = source.alphabet().kind();
    let do_pack5 = !kind.is_nucleic();

    // First pass: statistics for the index header. Taken before any output
    // file is opened, so a parse error leaves nothing behind.
    let mut nseq: u64 = 0;
    let mut nres: u64 = 0;
    let mut max_seqlen: u64 = 0;
    let mut max_namelen: u32 = 0;
    let mut max_acclen: u32 = 0;
    let mut max_desclen: u32 = 0;
    while let Some(sq) = source.next_seq()? {
        nseq += 1;
        nres += sq.len() as u64;
        max_seqlen = max_seqlen.max(sq.len() as u64);
        max_namelen = max_namelen.max(sq.name.len() as u32);
        max_acclen = max_acclen.max(sq.acc.len() as u32);
        max_desclen = max_desclen.max(sq.desc.len() as u32);
    }
    source.rewind()?;

    let tag: u32 = rand::thread_rng().gen();

    let mut ifp = create(index_path(basename))?;
    let mut mfp = create(metadata_path(basename))?;
    let mut sfp = create(sequence_path(basename))?;
    let mut stubfp = create(basename.to_path_buf())?;

    IndexHeader {
        tag,
        alphatype: kind.code(),
        flags: 0,
        max_namelen,
        max_acclen,
        max_desclen,
        max_seqlen,
        nseq,
        nres,
    }
    .write_to(&mut ifp)?;
    write_tag_header(&mut mfp, tag)?;
    write_tag_header(&mut sfp, tag)?;

    // Second pass: pack and append. Offsets are cumulative end positions,
    // minus one; psq_end may be -1 if the first sequence is empty.
    let mut spos: i64 = 0;
    let mut mpos: i64 = 0;
    while let Some(sq) = source.next_seq()? {
        let n = sq.len();
        let DigitalSeq {
            name,
            acc,
            desc,
            taxid,
            mut dsq,
        } = sq;

        let plen = if do_pack5 {
            pack5(&mut dsq, n)
        } else {
            pack2(&mut dsq, n)
        };
        if plen > CHUNK_MAXPACKET {
            return Err(Error::SeqTooLong {
                name,
                packets: plen,
                max: CHUNK_MAXPACKET,
            });
        }
        sfp.write_all(&dsq[..4 * plen])?;
        spos += plen as i64;

        mfp.write_all(name.as_bytes())?;
        mfp.write_all(&[0])?;
        mfp.write_all(acc.as_bytes())?;
        mfp.write_all(&[0])?;
        mfp.write_all(desc.as_bytes())?;
        mfp.write_all(&[0])?;
        mfp.write_i32::<LittleEndian>(taxid)?;
        mpos += (name.len() + acc.len() + desc.len() + 3 + 4) as i64;

        IndexRecord {
            psq_end: spos - 1,
            metadata_end: mpos - 1,
        }
        .write_to(&mut ifp)?;
    }

    write_stub(&mut stubfp, tag, kind, nseq, nres)?;

    ifp.flush()?;
    mfp.flush()?;
    sfp.flush()?;
    stubfp.flush()?;
    Ok(())
}
