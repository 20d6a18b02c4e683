//! # dsqdata
//!
//! A high-throughput reader and writer for predigitized, bit-packed binary
//! databases of biological sequences (protein, DNA, or RNA). The format
//! trades write-once effort for fast reading: residues are packed into
//! 32-bit packets, and input is asynchronous, with a loader thread doing
//! disk reads and an unpacker thread preparing chunks of sequences for any
//! number of consumer threads.
//!
//! A database `basename` is stored in four files:
//!
//! ```text
//! ┌──────────────────┐
//! │ basename         │  human-readable stub; first line carries the tag
//! ├──────────────────┤
//! │ basename.dsqi    │  index: header + one record per sequence
//! ├──────────────────┤
//! │ basename.dsqm    │  metadata: names, accessions, descriptions, taxids
//! ├──────────────────┤
//! │ basename.dsqs    │  sequences, bit-packed into 32-bit packets
//! └──────────────────┘
//! ```
//!
//! All four share a magic number and a random per-database tag, so a
//! mismatched or stale file set fails at open time.
//!
//! ## Usage
//!
//! ```no_run
//! use dsqdata::{Alphabet, DigitalSeq, DsqReader, Kind, VecSource, write_database};
//!
//! // Create a database from digital sequences
//! let abc = Alphabet::new(Kind::Amino);
//! let mut source = VecSource::new(abc.clone());
//! source.push(DigitalSeq::from_text(&abc, "seq1", "", "tiny example", 0, "MKVLA")?);
//! write_database(&mut source, "mydb")?;
//!
//! // Read it back, one chunk of sequences at a time
//! let reader = DsqReader::open("mydb", 1)?;
//! while let Some(chunk) = reader.read()? {
//!     for sq in chunk.iter() {
//!         println!("{}: {} residues", String::from_utf8_lossy(sq.name()), sq.len());
//!     }
//!     reader.recycle(chunk);
//! }
//! reader.close()?;
//! # Ok::<(), dsqdata::Error>(())
//! ```

mod alphabet;
mod chunk;
mod codec;
mod error;
mod header;
mod reader;
mod source;
mod writer;

pub use alphabet::{Alphabet, Kind, DSQ_SENTINEL};
pub use chunk::{ChunkIter, ChunkSeq, SeqChunk, CHUNK_MAXPACKET, CHUNK_MAXSEQ};
pub use error::{Error, FileKind, Result};
pub use header::{IndexHeader, IndexRecord, MAGIC};
pub use reader::DsqReader;
pub use source::{DigitalSeq, SeqSource, VecSource};
pub use writer::write_database;

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    /// (absolute index, name, residue codes, taxid) per sequence.
    type Got = Vec<(u64, Vec<u8>, Vec<u8>, i32)>;

    fn build_db(
        dir: &Path,
        kind: Kind,
        seqs: &[(&str, &str, &str, i32, &str)],
    ) -> Result<PathBuf> {
        let abc = Alphabet::new(kind);
        let mut src = VecSource::new(abc.clone());
        for (name, acc, desc, taxid, text) in seqs {
            src.push(DigitalSeq::from_text(&abc, name, acc, desc, *taxid, text)?);
        }
        let base = dir.join("db");
        write_database(&mut src, &base)?;
        Ok(base)
    }

    fn read_all(reader: &DsqReader) -> crate::Result<Got> {
        let mut got = Vec::new();
        while let Some(chunk) = reader.read()? {
            for sq in chunk.iter() {
                got.push((
                    sq.index(),
                    sq.name().to_vec(),
                    sq.seq().to_vec(),
                    sq.taxid(),
                ));
            }
            reader.recycle(chunk);
        }
        Ok(got)
    }

    #[test]
    fn empty_protein_sequence_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[("x", "", "", 0, "")])?;

        let reader = DsqReader::open(&base, 1)?;
        let chunk = reader.read()?.unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.first_index(), 0);
        assert_eq!(chunk.seq_len(0), 0);
        assert_eq!(chunk.seq(0), b"");
        assert_eq!(chunk.dsq(0), &[DSQ_SENTINEL, DSQ_SENTINEL]);
        assert_eq!(chunk.name(0), b"x");
        assert_eq!(chunk.acc(0), b"");
        assert_eq!(chunk.taxid(0), 0);
        reader.recycle(chunk);
        assert!(reader.read()?.is_none());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn single_packet_protein_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[("p1", "A1", "four residues", 7, "ACDE")])?;

        let reader = DsqReader::open(&base, 1)?;
        assert_eq!(reader.alphabet().kind(), Kind::Amino);
        let chunk = reader.read()?.unwrap();
        assert_eq!(chunk.seq_len(0), 4);
        let expect = reader.alphabet().digital("ACDE")?;
        assert_eq!(chunk.seq(0), &expect[1..5]);
        assert_eq!(chunk.name(0), b"p1");
        assert_eq!(chunk.acc(0), b"A1");
        assert_eq!(chunk.desc(0), b"four residues");
        assert_eq!(chunk.taxid(0), 7);
        reader.recycle(chunk);
        assert!(reader.read()?.is_none());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn canonical_dna_and_degenerate_dna_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let thirty = "ACGTACGTACGTACGACGTACGTACGTACG";
        let degen = "ACGTACGTNNACGTA";
        let base = build_db(
            dir.path(),
            Kind::Dna,
            &[("c30", "", "", 1, thirty), ("deg", "", "", 2, degen)],
        )?;

        let reader = DsqReader::open(&base, 1)?;
        let abc = reader.alphabet().clone();
        let got = read_all(&reader)?;
        reader.close()?;

        assert_eq!(got.len(), 2);
        let want30 = abc.digital(thirty)?;
        assert_eq!(got[0].2, &want30[1..31]);
        let wantdeg = abc.digital(degen)?;
        assert_eq!(got[1].2, &wantdeg[1..16]);
        assert_eq!(abc.textize(&got[1].2).unwrap(), degen);
        Ok(())
    }

    #[test]
    fn header_statistics_survive_the_trip() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(
            dir.path(),
            Kind::Amino,
            &[
                ("a", "ACC1", "first", 1, "MKVLA"),
                ("longname", "", "a longer description", 2, "AC"),
            ],
        )?;

        let reader = DsqReader::open(&base, 2)?;
        assert_eq!(reader.nseq(), 2);
        assert_eq!(reader.nres(), 7);
        assert_eq!(reader.max_seqlen(), 5);
        assert_eq!(reader.max_namelen(), 8);
        assert_eq!(reader.max_acclen(), 4);
        assert_eq!(reader.max_desclen(), 20);
        let got = read_all(&reader)?;
        reader.close()?;
        assert_eq!(got.len(), 2);
        Ok(())
    }

    #[test]
    fn stub_is_parseable_and_human_readable() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Dna, &[("s", "", "", 0, "ACGT")])?;
        let stub = std::fs::read_to_string(&base)?;
        let mut lines = stub.lines();
        let first = lines.next().unwrap();
        assert!(first.starts_with("Easel dsqdata v1 x"));
        assert!(stub.contains("Sequences:"));
        assert!(stub.contains("Residues:"));
        Ok(())
    }

    #[test]
    fn metadata_tag_corruption_is_a_format_error() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[("x", "", "", 0, "ACDE")])?;

        // Byte 4 is the first byte of the metadata file's tag
        let mpath = header::metadata_path(&base);
        let mut bytes = std::fs::read(&mpath)?;
        bytes[4] ^= 0xa5;
        std::fs::write(&mpath, bytes)?;

        let err = DsqReader::open(&base, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::TagMismatch {
                kind: FileKind::Metadata,
                ..
            }
        ));
        assert!(err.to_string().contains("metadata"));
        Ok(())
    }

    #[test]
    fn sequence_tag_corruption_is_a_format_error() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[("x", "", "", 0, "ACDE")])?;

        let spath = header::sequence_path(&base);
        let mut bytes = std::fs::read(&spath)?;
        bytes[6] = bytes[6].wrapping_add(1);
        std::fs::write(&spath, bytes)?;

        let err = DsqReader::open(&base, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::TagMismatch {
                kind: FileKind::Sequence,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn missing_file_reports_not_found() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[("x", "", "", 0, "ACDE")])?;
        std::fs::remove_file(header::metadata_path(&base))?;
        let err = DsqReader::open(&base, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: FileKind::Metadata,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn alphabet_expectation_mismatch_is_incompatible() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Dna, &[("x", "", "", 0, "ACGT")])?;
        let err = DsqReader::open_expecting(&base, Kind::Amino, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::AlphabetMismatch {
                expected: Kind::Amino,
                found: Kind::Dna,
            }
        ));
        // The right expectation opens fine
        DsqReader::open_expecting(&base, Kind::Dna, 1)?.close()?;
        Ok(())
    }

    #[test]
    fn empty_database_reads_straight_to_eof() -> Result<()> {
        let dir = tempdir()?;
        let base = build_db(dir.path(), Kind::Amino, &[])?;
        let reader = DsqReader::open(&base, 2)?;
        assert_eq!(reader.nseq(), 0);
        assert!(reader.read()?.is_none());
        // EOF is sticky
        assert!(reader.read()?.is_none());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn dropping_an_unfinished_reader_is_clean() -> Result<()> {
        let dir = tempdir()?;
        let mut seqs = Vec::new();
        let texts: Vec<String> = (0..50).map(|i| "ACGT".repeat(1 + i % 9)).collect();
        for (i, t) in texts.iter().enumerate() {
            seqs.push((format!("s{i}"), t.clone()));
        }
        let tuples: Vec<(&str, &str, &str, i32, &str)> = seqs
            .iter()
            .map(|(n, t)| (n.as_str(), "", "", 0, t.as_str()))
            .collect();
        let base = build_db(dir.path(), Kind::Dna, &tuples)?;

        let reader = DsqReader::open(&base, 1)?;
        let chunk = reader.read()?.unwrap();
        reader.recycle(chunk);
        drop(reader); // workers must unwind without deadlock
        Ok(())
    }

    /// Deterministic mixed-content DNA: empties, degenerates, varied length.
    fn gen_text(i: usize) -> String {
        let len = (i * 7) % 211;
        (0..len)
            .map(|j| {
                if (i + j * 13) % 17 == 0 {
                    'N'
                } else {
                    b"ACGT"[(i + j) % 4] as char
                }
            })
            .collect()
    }

    fn build_big_db(dir: &Path, nseq: usize) -> Result<(PathBuf, Alphabet)> {
        let abc = Alphabet::new(Kind::Dna);
        let mut src = VecSource::new(abc.clone());
        for i in 0..nseq {
            src.push(DigitalSeq::from_text(
                &abc,
                &format!("s{i}"),
                "",
                "",
                i as i32,
                &gen_text(i),
            )?);
        }
        let base = dir.join("big");
        write_database(&mut src, &base)?;
        Ok((base, abc))
    }

    fn check_coverage(
        abc: &Alphabet,
        nseq: usize,
        mut got: Got,
        mut spans: Vec<(u64, usize)>,
    ) -> Result<()> {
        assert_eq!(got.len(), nseq);
        got.sort_by_key(|&(idx, ..)| idx);
        for (i, (idx, name, seq, taxid)) in got.iter().enumerate() {
            assert_eq!(*idx, i as u64);
            assert_eq!(name, format!("s{i}").as_bytes());
            assert_eq!(*taxid, i as i32);
            let expect = abc.digital(&gen_text(i))?;
            assert_eq!(seq, &expect[1..expect.len() - 1], "sequence {i}");
        }
        // Chunks tile [0, nseq) exactly once
        spans.sort();
        let mut next = 0u64;
        for &(i0, n) in spans.iter() {
            assert_eq!(i0, next);
            next += n as u64;
        }
        assert_eq!(next, nseq as u64);
        Ok(())
    }

    #[test]
    fn multi_consumer_reads_cover_the_database_exactly_once() -> Result<()> {
        const NSEQ: usize = 10_000;
        const NCONSUMERS: usize = 4;
        let dir = tempdir()?;
        let (base, abc) = build_big_db(dir.path(), NSEQ)?;

        let reader = DsqReader::open(&base, NCONSUMERS)?;
        assert_eq!(reader.nseq(), NSEQ as u64);

        let mut got = Vec::new();
        let mut spans = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..NCONSUMERS)
                .map(|_| {
                    let reader = &reader;
                    scope.spawn(move || -> crate::Result<(Got, Vec<(u64, usize)>)> {
                        let mut got = Vec::new();
                        let mut spans = Vec::new();
                        while let Some(chunk) = reader.read()? {
                            spans.push((chunk.first_index(), chunk.len()));
                            for sq in chunk.iter() {
                                got.push((
                                    sq.index(),
                                    sq.name().to_vec(),
                                    sq.seq().to_vec(),
                                    sq.taxid(),
                                ));
                            }
                            reader.recycle(chunk);
                        }
                        Ok((got, spans))
                    })
                })
                .collect();
            for handle in handles {
                let (g, s) = handle.join().unwrap().unwrap();
                got.extend(g);
                spans.extend(s);
            }
        });
        reader.close()?;

        check_coverage(&abc, NSEQ, got, spans)
    }

    #[test]
    fn tiny_chunks_force_recycling_and_window_slides() -> Result<()> {
        const NSEQ: usize = 700;
        let dir = tempdir()?;
        let (base, abc) = build_big_db(dir.path(), NSEQ)?;

        // maxseq 8 and a 64-packet budget produce far more chunks than the
        // loader may allocate, so most loads reuse recycled chunks.
        let reader = DsqReader::open_tuned(&base, 2, 8, 64)?;
        let mut got = Vec::new();
        let mut spans = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let reader = &reader;
                    scope.spawn(move || -> crate::Result<(Got, Vec<(u64, usize)>)> {
                        let mut got = Vec::new();
                        let mut spans = Vec::new();
                        while let Some(chunk) = reader.read()? {
                            spans.push((chunk.first_index(), chunk.len()));
                            for sq in chunk.iter() {
                                got.push((
                                    sq.index(),
                                    sq.name().to_vec(),
                                    sq.seq().to_vec(),
                                    sq.taxid(),
                                ));
                            }
                            reader.recycle(chunk);
                        }
                        Ok((got, spans))
                    })
                })
                .collect();
            for handle in handles {
                let (g, s) = handle.join().unwrap().unwrap();
                got.extend(g);
                spans.extend(s);
            }
        });
        reader.close()?;

        assert!(spans.len() > 8, "expected many small chunks");
        check_coverage(&abc, NSEQ, got, spans)
    }

    #[test]
    fn truncated_sequence_file_poisons_the_pipeline() -> Result<()> {
        let dir = tempdir()?;
        let texts: Vec<String> = (0..40).map(|i| "ACGTN".repeat(4 + i % 5)).collect();
        let tuples: Vec<(String, &str)> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("s{i}"), t.as_str()))
            .collect();
        let refs: Vec<(&str, &str, &str, i32, &str)> = tuples
            .iter()
            .map(|(n, t)| (n.as_str(), "", "", 0, *t))
            .collect();
        let base = build_db(dir.path(), Kind::Dna, &refs)?;

        // Chop the tail off the sequence file
        let spath = header::sequence_path(&base);
        let bytes = std::fs::read(&spath)?;
        std::fs::write(&spath, &bytes[..bytes.len() - 32])?;

        let reader = DsqReader::open(&base, 1)?;
        let mut outcome = Ok(());
        loop {
            match reader.read() {
                Ok(Some(chunk)) => reader.recycle(chunk),
                Ok(None) => break,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        let err = outcome.unwrap_err();
        assert!(matches!(err, Error::WorkerFailed(_)));
        assert!(err.to_string().contains("truncated database"));
        // close reports the original cause
        let close_err = reader.close().unwrap_err();
        assert!(matches!(close_err, Error::Truncated { .. }));
        Ok(())
    }
}
