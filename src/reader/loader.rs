//! The loader worker: reads disk, assembles chunks.
//!
//! The loader keeps a sliding window of up to `maxseq` index records. Each
//! iteration it acquires a chunk (allocating up to `nconsumers + 2`, then
//! reusing recycled ones), slides the window past the sequences it
//! dispatched last time, picks the longest prefix that fits the packet
//! budget, and streams the packed bytes and metadata bytes into the chunk.
//! At end of data it sends one empty chunk as the EOF signal, then waits
//! for every chunk it allocated to come home through recycling before it
//! exits, so chunk allocation and destruction stay with one owner.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::sync::Arc;

use crate::chunk::SeqChunk;
use crate::error::{Error, FileKind, Result};
use crate::header::IndexRecord;

use super::pipeline::Exchange;

pub(crate) struct Loader {
    pub(crate) ex: Arc<Exchange>,
    pub(crate) ifp: BufReader<File>,
    pub(crate) sfp: BufReader<File>,
    pub(crate) mfp: BufReader<File>,
    pub(crate) nconsumers: usize,
    pub(crate) maxseq: usize,
    pub(crate) maxpacket: usize,
    pub(crate) pack5: bool,
}

impl Loader {
    pub(crate) fn run(mut self) {
        if let Err(err) = self.drive() {
            self.ex.poison(err);
        }
    }

    fn drive(&mut self) -> Result<()> {
        let mut window: Vec<IndexRecord> = Vec::with_capacity(self.maxseq);
        let mut nchunk = 0; // chunks we created and must see home again
        let mut nload = 0; // sequences dispatched in the previous iteration
        let mut i0: u64 = 0; // absolute index of the window head
        let mut psq_last: i64 = -1; // psq_end at the boundary before the window
        let mut meta_last: i64 = -1;

        loop {
            // Acquire a chunk: allocate under the cap, reuse otherwise.
            let mut chu = if nchunk < self.nconsumers + 2 {
                nchunk += 1;
                SeqChunk::new(self.maxseq, self.maxpacket, self.pack5)
            } else {
                match self.ex.pop_recycled() {
                    Some(chu) => chu,
                    None => return Ok(()),
                }
            };

            // Slide the window and refill its tail from the index file.
            // Near end of data the refill comes up short; an empty window
            // means the input is exhausted.
            window.drain(..nload);
            while window.len() < self.maxseq {
                match IndexRecord::read_opt(&mut self.ifp)? {
                    Some(rec) => window.push(rec),
                    None => break,
                }
            }
            let nidx = window.len();

            if nidx == 0 {
                chu.i0 = i0;
                chu.n = 0;
                chu.pn = 0;
                if !self.ex.put_loaded(chu) {
                    return Ok(());
                }
                break;
            }

            nload = self.choose_nload(&window, psq_last)?;

            // Per-sequence packet extents, for the unpacker. Zero-length
            // sequences contribute no packets, so the stream alone cannot
            // place them; the index can. This also pins down monotonicity.
            chu.extents.clear();
            let mut prev = psq_last;
            for rec in &window[..nload] {
                let extent = rec.psq_end - prev;
                if extent < 0 {
                    return Err(Error::CorruptIndex("packet offsets decrease between records"));
                }
                chu.extents.push(extent as u32);
                prev = rec.psq_end;
            }

            let pn = window[nload - 1].psq_end - psq_last;
            let nmeta = window[nload - 1].metadata_end - meta_last;
            if nmeta < 0 {
                return Err(Error::CorruptIndex("metadata offsets decrease between records"));
            }
            self.fill_chunk(&mut chu, pn as usize, nmeta as usize)?;

            chu.i0 = i0;
            chu.n = nload as u32;
            i0 += nload as u64;
            psq_last = window[nload - 1].psq_end;
            meta_last = window[nload - 1].metadata_end;

            if !self.ex.put_loaded(chu) {
                return Ok(());
            }
        }

        // EOF chunk is downstream. Wait for all our chunks to come back
        // through recycling and drop them here.
        while nchunk > 0 {
            match self.ex.drain_recycled() {
                Some(returned) => nchunk -= returned.len(),
                None => return Ok(()),
            }
        }
        Ok(())
    }

    /// The largest window prefix whose packet extent fits the budget. At
    /// least one sequence always fits, because the writer refuses to emit a
    /// sequence over `maxpacket` packets; a window head that does not fit
    /// is file corruption.
    fn choose_nload(&self, window: &[IndexRecord], psq_last: i64) -> Result<usize> {
        let budget = self.maxpacket as i64;
        if window[0].psq_end - psq_last > budget {
            return Err(Error::CorruptIndex("single sequence exceeds the chunk packet budget"));
        }
        let nidx = window.len();
        if window[nidx - 1].psq_end - psq_last <= budget {
            return Ok(nidx);
        }
        // Binary search for the last fitting prefix.
        let mut nload = 1;
        let mut righti = nidx;
        while righti - nload > 1 {
            let mid = nload + (righti - nload) / 2;
            if window[mid - 1].psq_end - psq_last <= budget {
                nload = mid;
            } else {
                righti = mid;
            }
        }
        Ok(nload)
    }

    fn fill_chunk(&mut self, chu: &mut SeqChunk, pn: usize, nmeta: usize) -> Result<()> {
        chu.pn = pn as u32;
        let psq = &mut chu.smem[chu.psq_off..chu.psq_off + 4 * pn];
        self.sfp
            .read_exact(psq)
            .map_err(|e| short_read(e, FileKind::Sequence))?;

        if nmeta > chu.metadata.len() {
            let grown = nmeta.max(2 * chu.metadata.len());
            chu.metadata.resize(grown, 0);
        }
        self.mfp
            .read_exact(&mut chu.metadata[..nmeta])
            .map_err(|e| short_read(e, FileKind::Metadata))?;
        chu.mdlen = nmeta;
        Ok(())
    }
}

fn short_read(e: io::Error, kind: FileKind) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Truncated { kind }
    } else {
        Error::Io(e)
    }
}
