//! Reading a database: the public reader over the loader/unpacker pipeline.

mod loader;
mod pipeline;
mod unpacker;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::alphabet::{Alphabet, Kind};
use crate::chunk::{SeqChunk, CHUNK_MAXPACKET, CHUNK_MAXSEQ};
use crate::error::{Error, FileKind, Result};
use crate::header::{
    index_path, metadata_path, parse_stub_tag, read_tag_header, sequence_path, IndexHeader,
};

use loader::Loader;
use pipeline::{ConsumerTake, Exchange};
use unpacker::Unpacker;

/// An open digital sequence database, read asynchronously.
///
/// Two internal worker threads keep consumers fed: a loader that reads disk
/// and assembles chunks, and an unpacker that decodes them. Consumers drive
/// progress by calling [`read`](DsqReader::read) and returning each chunk
/// with [`recycle`](DsqReader::recycle); any number of consumer threads may
/// share one reader.
///
/// ```no_run
/// use dsqdata::DsqReader;
///
/// let reader = DsqReader::open("mydb", 1)?;
/// while let Some(chunk) = reader.read()? {
///     for sq in chunk.iter() {
///         println!("{} {}", String::from_utf8_lossy(sq.name()), sq.len());
///     }
///     reader.recycle(chunk);
/// }
/// reader.close()?;
/// # Ok::<(), dsqdata::Error>(())
/// ```
pub struct DsqReader {
    alphabet: Alphabet,
    header: IndexHeader,
    ex: Arc<Exchange>,
    loader: Option<JoinHandle<()>>,
    unpacker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DsqReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsqReader")
            .field("alphabet", &self.alphabet)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl DsqReader {
    /// Open database `basename` for reading with `nconsumers` consumer
    /// threads. The alphabet is taken from the database; inspect it with
    /// [`alphabet`](DsqReader::alphabet).
    pub fn open(basename: impl AsRef<Path>, nconsumers: usize) -> Result<DsqReader> {
        Self::open_impl(basename.as_ref(), None, nconsumers, CHUNK_MAXSEQ, CHUNK_MAXPACKET)
    }

    /// Like [`open`](DsqReader::open), but fail with an incompatibility
    /// error unless the database uses the expected alphabet.
    pub fn open_expecting(
        basename: impl AsRef<Path>,
        expected: Kind,
        nconsumers: usize,
    ) -> Result<DsqReader> {
        Self::open_impl(
            basename.as_ref(),
            Some(expected),
            nconsumers,
            CHUNK_MAXSEQ,
            CHUNK_MAXPACKET,
        )
    }

    /// Open with shrunken chunk bounds, so small test databases exercise
    /// the window slide, the packet budget, and chunk recycling.
    #[cfg(test)]
    pub(crate) fn open_tuned(
        basename: &Path,
        nconsumers: usize,
        maxseq: usize,
        maxpacket: usize,
    ) -> Result<DsqReader> {
        Self::open_impl(basename, None, nconsumers, maxseq, maxpacket)
    }

    fn open_impl(
        basename: &Path,
        expected: Option<Kind>,
        nconsumers: usize,
        maxseq: usize,
        maxpacket: usize,
    ) -> Result<DsqReader> {
        let nconsumers = nconsumers.max(1);

        let ipath = index_path(basename);
        let ifp = File::open(&ipath).map_err(|_| Error::NotFound {
            kind: FileKind::Index,
            path: ipath,
        })?;
        let mpath = metadata_path(basename);
        let mfp = File::open(&mpath).map_err(|_| Error::NotFound {
            kind: FileKind::Metadata,
            path: mpath,
        })?;
        let spath = sequence_path(basename);
        let sfp = File::open(&spath).map_err(|_| Error::NotFound {
            kind: FileKind::Sequence,
            path: spath,
        })?;
        let stubfp = File::open(basename).map_err(|_| Error::NotFound {
            kind: FileKind::Stub,
            path: basename.to_path_buf(),
        })?;

        // The stub is free-form except for its first line, which carries
        // the tag that must match every binary header.
        let mut stub = BufReader::new(stubfp);
        let mut line = String::new();
        stub.read_line(&mut line)?;
        let tag = parse_stub_tag(&line)?;

        let mut ifp = BufReader::new(ifp);
        let header = IndexHeader::read_from(&mut ifp)?;
        if header.tag != tag {
            return Err(Error::TagMismatch {
                kind: FileKind::Index,
                expected: tag,
                found: header.tag,
            });
        }
        let kind =
            Kind::from_code(header.alphatype).ok_or(Error::UnknownAlphabet(header.alphatype))?;
        if let Some(expected) = expected {
            if expected != kind {
                return Err(Error::AlphabetMismatch {
                    expected,
                    found: kind,
                });
            }
        }
        let alphabet = Alphabet::new(kind);

        let mut mfp = BufReader::new(mfp);
        let mtag = read_tag_header(&mut mfp, FileKind::Metadata)?;
        if mtag != tag {
            return Err(Error::TagMismatch {
                kind: FileKind::Metadata,
                expected: tag,
                found: mtag,
            });
        }
        let mut sfp = BufReader::new(sfp);
        let stag = read_tag_header(&mut sfp, FileKind::Sequence)?;
        if stag != tag {
            return Err(Error::TagMismatch {
                kind: FileKind::Sequence,
                expected: tag,
                found: stag,
            });
        }

        let ex = Exchange::new();
        let unpacker = Unpacker { ex: Arc::clone(&ex) };
        let loader = Loader {
            ex: Arc::clone(&ex),
            ifp,
            sfp,
            mfp,
            nconsumers,
            maxseq,
            maxpacket,
            pack5: !kind.is_nucleic(),
        };

        let unpacker_t = thread::Builder::new()
            .name("dsq-unpacker".into())
            .spawn(move || unpacker.run())?;
        let loader_t = match thread::Builder::new()
            .name("dsq-loader".into())
            .spawn(move || loader.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                ex.shutdown();
                let _ = unpacker_t.join();
                return Err(Error::Io(e));
            }
        };

        Ok(DsqReader {
            alphabet,
            header,
            ex,
            loader: Some(loader_t),
            unpacker: Some(unpacker_t),
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Number of sequences in the database.
    pub fn nseq(&self) -> u64 {
        self.header.nseq
    }

    /// Total residue count of the database.
    pub fn nres(&self) -> u64 {
        self.header.nres
    }

    pub fn max_seqlen(&self) -> u64 {
        self.header.max_seqlen
    }

    pub fn max_namelen(&self) -> u32 {
        self.header.max_namelen
    }

    pub fn max_acclen(&self) -> u32 {
        self.header.max_acclen
    }

    pub fn max_desclen(&self) -> u32 {
        self.header.max_desclen
    }

    /// The random tag cross-linking this database's four files.
    pub fn tag(&self) -> u32 {
        self.header.tag
    }

    /// The next chunk of sequence data, or `None` at end of data.
    ///
    /// Threadsafe: any number of consumer threads may call concurrently,
    /// and each receives a distinct chunk. Once one consumer observes end
    /// of data, every further call returns `None` without touching the
    /// pipeline. Each returned chunk must go back via
    /// [`recycle`](DsqReader::recycle).
    pub fn read(&self) -> Result<Option<Box<SeqChunk>>> {
        match self.ex.next_unpacked() {
            ConsumerTake::Chunk(chu) => Ok(Some(chu)),
            ConsumerTake::Terminal(chu) => {
                // The empty chunk still belongs to the loader's accounting;
                // send it home before reporting EOF.
                self.ex.recycle(chu);
                Ok(None)
            }
            ConsumerTake::AtEof => Ok(None),
            ConsumerTake::Stopped => Err(self.ex.observe()),
        }
    }

    /// Give a chunk back for reuse. Constant time; never blocks.
    pub fn recycle(&self, chunk: Box<SeqChunk>) {
        self.ex.recycle(chunk);
    }

    /// Shut the reader down: join both workers, then report any failure
    /// the pipeline recorded. After a normal EOF this returns promptly;
    /// calling it early tears the pipeline down and discards whatever was
    /// in flight.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.ex.saw_eof() {
            self.ex.shutdown();
        }
        let mut panicked = false;
        for handle in [self.loader.take(), self.unpacker.take()].into_iter().flatten() {
            panicked |= handle.join().is_err();
        }
        if panicked {
            return Err(Error::WorkerFailed("worker thread panicked".into()));
        }
        if let Some(err) = self.ex.take_cause() {
            return Err(err);
        }
        debug_assert!(self.ex.is_tripped() || self.ex.is_drained());
        Ok(())
    }
}

impl Drop for DsqReader {
    fn drop(&mut self) {
        if self.loader.is_some() || self.unpacker.is_some() {
            let _ = self.shutdown();
        }
    }
}
