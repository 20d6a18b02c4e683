//! Input sources for database creation.
//!
//! The writer consumes sequences in digital form through the [`SeqSource`]
//! trait. A source must be rewindable, because creation makes two passes:
//! one to gather statistics for the headers, one to write the data.

use crate::alphabet::Alphabet;
use crate::error::Result;

/// One digital sequence record: metadata plus sentinel-framed residue codes.
#[derive(Debug, Clone)]
pub struct DigitalSeq {
    pub name: String,
    pub acc: String,
    pub desc: String,
    pub taxid: i32,
    /// Residue codes at positions `1..=len`, sentinels at `0` and `len + 1`.
    pub dsq: Vec<u8>,
}

#[allow(clippy::len_without_is_empty)]
impl DigitalSeq {
    /// Digitize a text sequence under `abc`.
    pub fn from_text(
        abc: &Alphabet,
        name: &str,
        acc: &str,
        desc: &str,
        taxid: i32,
        text: &str,
    ) -> Result<DigitalSeq> {
        Ok(DigitalSeq {
            name: name.to_string(),
            acc: acc.to_string(),
            desc: desc.to_string(),
            taxid,
            dsq: abc.digital(text)?,
        })
    }

    /// Residue count, sentinels excluded.
    pub fn len(&self) -> usize {
        self.dsq.len() - 2
    }
}

/// A rewindable source of digital sequences.
pub trait SeqSource {
    fn alphabet(&self) -> &Alphabet;

    /// Reposition at the first sequence.
    fn rewind(&mut self) -> Result<()>;

    /// The next sequence, or `None` when the source is exhausted.
    fn next_seq(&mut self) -> Result<Option<DigitalSeq>>;
}

/// An in-memory source, useful for tests and for callers that assemble
/// their input elsewhere.
pub struct VecSource {
    abc: Alphabet,
    seqs: Vec<DigitalSeq>,
    at: usize,
}

impl VecSource {
    pub fn new(abc: Alphabet) -> VecSource {
        VecSource {
            abc,
            seqs: Vec::new(),
            at: 0,
        }
    }

    pub fn push(&mut self, seq: DigitalSeq) {
        self.seqs.push(seq);
    }
}

impl SeqSource for VecSource {
    fn alphabet(&self) -> &Alphabet {
        &self.abc
    }

    fn rewind(&mut self) -> Result<()> {
        self.at = 0;
        Ok(())
    }

    fn next_seq(&mut self) -> Result<Option<DigitalSeq>> {
        match self.seqs.get(self.at) {
            Some(seq) => {
                self.at += 1;
                Ok(Some(seq.clone()))
            }
            None => Ok(None),
        }
    }
}
