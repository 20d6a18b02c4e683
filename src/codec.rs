//! The packet codec: bit-packing digital sequences and unpacking chunks.
//!
//! Sequence data are packed bitwise into 32-bit packets. Each packet holds
//! either six 5-bit residues or fifteen 2-bit residues, plus two control
//! bits:
//!
//! ```text
//! [31] [30] [29..25]  [24..20]  [19..15]  [14..10]  [ 9..5 ]  [ 4..0 ]
//!  ^    ^   |------------  6 5-bit packed residues -----------------|
//!  |    |   []  []  []  []  []  []  []  []  []  []  []  []  []  []  []
//!  |    |   |----------- or 15 2-bit packed residues ---------------|
//!  |    packtype: 0 = 2-bit packed, 1 = 5-bit packed
//!  end-of-data: 1 on the last packet of a sequence
//! ```
//!
//! Packets without the end-of-data bit are always full. A 5-bit EOD packet
//! may be partial, with the unused slots set to the in-packet sentinel code
//! 31. A 2-bit EOD packet must be full, because 2-bit coding has no spare
//! value to mark termination; the last packet of a nucleic sequence is
//! therefore usually 5-bit.
//!
//! A protein sequence of length n packs into exactly ceil(n/6) 5-bit
//! packets. A nucleic sequence packs into a mix of 2-bit and 5-bit packets:
//! degenerate residues (codes above 3) must be 5-bit packed, and a 5-bit
//! packet may carry only canonical residues when realignment is needed to
//! get a downstream degenerate in frame. For example, ACGTACGTNNA... must
//! pack as [ACGTAC][GTNNA.]... to place the Ns correctly.

use crate::alphabet::DSQ_SENTINEL;
use crate::chunk::SeqChunk;
use crate::error::{Error, Result};

/// Control bit 31: last packet of its sequence.
pub(crate) const EOD_BIT: u32 = 1 << 31;

/// Control bit 30: packet is 5-bit packed.
pub(crate) const PACK5_BIT: u32 = 1 << 30;

/// In-packet sentinel code for unused 5-bit slots.
const FILL5: u32 = 31;

/// Upper bound on the packet count for a sequence of `n` residues, under
/// either packing mode. Also the exact count for pure 5-bit packing.
pub(crate) fn max_packets(n: usize) -> usize {
    n.div_ceil(6)
}

/// Pack a sentinel-framed digital sequence of length `n` into 5-bit packets,
/// in place. The packet bytes overwrite the sequence from the front, flush
/// left and little-endian; the residues are consumed just ahead of the
/// write cursor, so nothing is lost. Returns the packet count. Callers must
/// not consult the residues after packing.
pub(crate) fn pack5(dsq: &mut Vec<u8>, n: usize) -> usize {
    let need = 4 * max_packets(n);
    if dsq.len() < need {
        dsq.resize(need, 0);
    }

    let mut r = 1; // position in dsq, 1..=n
    let mut pos = 0; // position in the packet array
    while r <= n {
        let mut v = PACK5_BIT;
        let mut b: i32 = 25;
        while b >= 0 && r <= n {
            v |= u32::from(dsq[r]) << b;
            r += 1;
            b -= 5;
        }
        while b >= 0 {
            v |= FILL5 << b;
            b -= 5;
        }
        if r > n {
            v |= EOD_BIT;
        }
        dsq[4 * pos..4 * pos + 4].copy_from_slice(&v.to_le_bytes());
        pos += 1;
    }
    pos
}

/// Pack a sentinel-framed nucleic digital sequence of length `n` into mixed
/// 2-bit and 5-bit packets, in place. Same storage contract as [`pack5`].
///
/// A 15-residue window is 2-bit packed only when every residue in it is
/// canonical (codes 0..=3) and at least 15 residues remain; otherwise one
/// 5-bit packet realigns the stream past the obstacle.
pub(crate) fn pack2(dsq: &mut Vec<u8>, n: usize) -> usize {
    let need = 4 * max_packets(n);
    if dsq.len() < need {
        dsq.resize(need, 0);
    }

    let mut r = 1; // position in dsq, 1..=n
    let mut pos = 0; // position in the packet array
    let mut d = 0; // position of the next degenerate residue; n+1 if none
    while r <= n {
        // Slide the next-degenerate detector
        if d < r {
            d = r;
            while d <= n && dsq[d] <= 3 {
                d += 1;
            }
        }

        let mut v;
        if n - r + 1 >= 15 && d > r + 14 {
            v = 0;
            let mut b: i32 = 28;
            while b >= 0 {
                v |= u32::from(dsq[r]) << b;
                r += 1;
                b -= 2;
            }
        } else {
            v = PACK5_BIT;
            let mut b: i32 = 25;
            while b >= 0 && r <= n {
                v |= u32::from(dsq[r]) << b;
                r += 1;
                b -= 5;
            }
            while b >= 0 {
                v |= FILL5 << b;
                b -= 5;
            }
        }
        if r > n {
            v |= EOD_BIT;
        }
        dsq[4 * pos..4 * pos + 4].copy_from_slice(&v.to_le_bytes());
        pos += 1;
    }
    pos
}

/// Decode a loaded chunk in place: parse its metadata into per-sequence
/// fields, then unpack its packets into the low end of the shared buffer.
pub(crate) fn unpack_chunk(chu: &mut SeqChunk) -> Result<()> {
    unpack_metadata(chu)?;
    unpack_sequences(chu)
}

/// Walk the metadata buffer once per sequence, recording the extent of each
/// null-terminated field and reading the taxonomy id. The bytes are user
/// input, so terminators are never trusted to be where they should be.
fn unpack_metadata(chu: &mut SeqChunk) -> Result<()> {
    let SeqChunk {
        metadata,
        mdlen,
        names,
        accs,
        descs,
        taxids,
        n,
        ..
    } = chu;
    let md = &metadata[..*mdlen];

    names.clear();
    accs.clear();
    descs.clear();
    taxids.clear();

    let mut p = 0;
    for _ in 0..*n {
        names.push(next_field(md, &mut p)?);
        accs.push(next_field(md, &mut p)?);
        descs.push(next_field(md, &mut p)?);
        if p + 4 > md.len() {
            return Err(Error::MalformedMetadata);
        }
        taxids.push(i32::from_le_bytes(md[p..p + 4].try_into().unwrap()));
        p += 4;
    }
    Ok(())
}

fn next_field(md: &[u8], p: &mut usize) -> Result<std::ops::Range<usize>> {
    if *p >= md.len() {
        return Err(Error::MalformedMetadata);
    }
    match md[*p..].iter().position(|&b| b == 0) {
        Some(rel) => {
            let start = *p;
            *p = start + rel + 1;
            Ok(start..start + rel)
        }
        None => Err(Error::MalformedMetadata),
    }
}

/// Unpack the packet region into residues, left to right.
///
/// The packed region sits at the high end of the shared buffer and the
/// write cursor starts at the low end, so for a well-formed chunk the
/// cursor is always at least one packet behind the read position. Each
/// packet is copied into a local before any of its residues are written,
/// which is what makes the in-place overlap sound.
///
/// Sequences are walked by their index extents: exactly the last packet of
/// each extent must carry the end-of-data bit, and a zero-packet extent is
/// a zero-length sequence.
fn unpack_sequences(chu: &mut SeqChunk) -> Result<()> {
    let SeqChunk {
        smem,
        psq_off,
        extents,
        dsq_off,
        lens,
        n,
        pn,
        ..
    } = chu;
    let n = *n as usize;
    let pn = *pn as usize;
    let psq_off = *psq_off;

    dsq_off.clear();
    lens.clear();
    if n == 0 {
        return Ok(());
    }
    debug_assert_eq!(extents.len(), n);

    let mut pos = 0; // position in the packet region
    let mut r = 0; // write position in smem
    smem[r] = DSQ_SENTINEL;
    r += 1;

    for i in 0..n {
        // Leading sentinel of this sequence, shared with the previous
        // sequence's trailing one.
        dsq_off.push(r - 1);
        let pend = pos + extents[i] as usize;
        if pend > pn {
            return Err(Error::MalformedPackets);
        }
        let mut at_eod = extents[i] == 0;

        while pos < pend {
            if at_eod {
                // A packet after this sequence's end-of-data packet
                return Err(Error::MalformedPackets);
            }
            let off = psq_off + 4 * pos;
            let v = u32::from_le_bytes(smem[off..off + 4].try_into().unwrap());
            pos += 1;
            at_eod = v & EOD_BIT != 0;

            // A packet emits at most 15 (2-bit) or 6 (5-bit) residues plus
            // a sentinel. The buffer is sized so well-formed chunks always
            // fit; a stream that would overrun it is corrupt.
            let headroom = if v & PACK5_BIT != 0 { 7 } else { 16 };
            if r + headroom > smem.len() {
                return Err(Error::MalformedPackets);
            }

            if v & PACK5_BIT != 0 {
                // 5-bit; in an EOD packet, stop at the in-packet sentinel.
                let mut b: i32 = 25;
                while b >= 0 {
                    let code = (v >> b) & 31;
                    if at_eod && code == FILL5 {
                        break;
                    }
                    smem[r] = code as u8;
                    r += 1;
                    b -= 5;
                }
            } else {
                // 2-bit packets are always full, EOD or not.
                let mut b: i32 = 28;
                while b >= 0 {
                    smem[r] = ((v >> b) & 3) as u8;
                    r += 1;
                    b -= 2;
                }
            }
        }

        if !at_eod {
            return Err(Error::MalformedPackets);
        }
        lens.push(r - dsq_off[i] - 1);
        smem[r] = DSQ_SENTINEL;
        r += 1;
    }
    Ok(())
}
