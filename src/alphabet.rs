//! Residue alphabets for digital sequences.
//!
//! A digital sequence stores residues as small integer codes rather than
//! printable characters. Canonical residues come first (codes 0..4 for
//! nucleotides, 0..20 for amino acids), followed by gap, degeneracy, and
//! annotation codes. Every code fits in 5 bits; nucleotide codes 0..4
//! additionally fit in 2 bits, which is what the packet codec exploits.

use crate::error::{Error, Result};

/// Reserved non-residue byte written at both ends of each digital sequence.
pub const DSQ_SENTINEL: u8 = 255;

/// Alphabet kind, with its on-disk type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Rna = 1,
    Dna = 2,
    Amino = 3,
}

impl Kind {
    pub(crate) fn from_code(code: u32) -> Option<Kind> {
        match code {
            1 => Some(Kind::Rna),
            2 => Some(Kind::Dna),
            3 => Some(Kind::Amino),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> u32 {
        self as u32
    }

    /// True for DNA and RNA, which use mixed 2-bit and 5-bit packing.
    pub fn is_nucleic(self) -> bool {
        matches!(self, Kind::Dna | Kind::Rna)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Rna => write!(f, "RNA"),
            Kind::Dna => write!(f, "DNA"),
            Kind::Amino => write!(f, "protein"),
        }
    }
}

const DNA_SYM: &[u8] = b"ACGT-RYMKSWHBVDN*~";
const RNA_SYM: &[u8] = b"ACGU-RYMKSWHBVDN*~";
const AMINO_SYM: &[u8] = b"ACDEFGHIKLMNPQRSTVWY-BJZOUX*~";

/// A residue alphabet: maps between symbols and digital residue codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    kind: Kind,
    sym: &'static [u8],
}

impl Alphabet {
    pub fn new(kind: Kind) -> Self {
        let sym = match kind {
            Kind::Dna => DNA_SYM,
            Kind::Rna => RNA_SYM,
            Kind::Amino => AMINO_SYM,
        };
        Alphabet { kind, sym }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Total number of residue codes, canonical and degenerate.
    pub fn ncodes(&self) -> usize {
        self.sym.len()
    }

    /// The printable symbol for a residue code, or `None` if out of range.
    pub fn symbol(&self, code: u8) -> Option<char> {
        self.sym.get(code as usize).map(|&b| b as char)
    }

    /// The residue code for a symbol. Case-insensitive; `T` and `U` are
    /// interchangeable within the nucleic alphabets.
    pub fn code(&self, symbol: char) -> Option<u8> {
        let mut c = symbol.to_ascii_uppercase();
        match self.kind {
            Kind::Dna if c == 'U' => c = 'T',
            Kind::Rna if c == 'T' => c = 'U',
            _ => {}
        }
        self.sym.iter().position(|&b| b as char == c).map(|i| i as u8)
    }

    /// Digitize a text sequence into a sentinel-framed digital sequence:
    /// residue codes at positions `1..=n`, `DSQ_SENTINEL` at `0` and `n+1`.
    pub fn digital(&self, text: &str) -> Result<Vec<u8>> {
        let mut dsq = Vec::with_capacity(text.len() + 2);
        dsq.push(DSQ_SENTINEL);
        for ch in text.chars() {
            match self.code(ch) {
                Some(code) => dsq.push(code),
                None => {
                    return Err(Error::InvalidResidue {
                        symbol: ch,
                        kind: self.kind,
                    })
                }
            }
        }
        dsq.push(DSQ_SENTINEL);
        Ok(dsq)
    }

    /// Render residue codes back to text. Inverse of [`Alphabet::digital`]
    /// over the codes between the sentinels.
    pub fn textize(&self, codes: &[u8]) -> Option<String> {
        codes.iter().map(|&c| self.symbol(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for kind in [Kind::Rna, Kind::Dna, Kind::Amino] {
            assert_eq!(Kind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(Kind::from_code(0), None);
        assert_eq!(Kind::from_code(7), None);
    }

    #[test]
    fn only_nucleic_kinds_mix_packings() {
        assert!(Kind::Dna.is_nucleic());
        assert!(Kind::Rna.is_nucleic());
        assert!(!Kind::Amino.is_nucleic());
    }

    #[test]
    fn dna_digitization() {
        let abc = Alphabet::new(Kind::Dna);
        let dsq = abc.digital("ACGT").unwrap();
        assert_eq!(dsq, vec![DSQ_SENTINEL, 0, 1, 2, 3, DSQ_SENTINEL]);
        // U folds to T, lowercase accepted
        assert_eq!(abc.digital("acgu").unwrap(), dsq);
    }

    #[test]
    fn dna_degenerates_are_above_canonical() {
        let abc = Alphabet::new(Kind::Dna);
        let n = abc.code('N').unwrap();
        assert!(n > 3);
        assert!(n < 31);
        assert_eq!(abc.symbol(n), Some('N'));
    }

    #[test]
    fn amino_codes_fit_five_bits() {
        let abc = Alphabet::new(Kind::Amino);
        assert!(abc.ncodes() < 31);
        let dsq = abc.digital("ACDE").unwrap();
        assert_eq!(&dsq[1..5], &[0, 1, 2, 3]);
    }

    #[test]
    fn invalid_symbol_is_rejected() {
        let abc = Alphabet::new(Kind::Dna);
        assert!(matches!(
            abc.digital("AC!T"),
            Err(Error::InvalidResidue { symbol: '!', .. })
        ));
    }

    #[test]
    fn textize_round_trips() {
        let abc = Alphabet::new(Kind::Amino);
        let dsq = abc.digital("MKVL").unwrap();
        assert_eq!(abc.textize(&dsq[1..5]).unwrap(), "MKVL");
    }
}
