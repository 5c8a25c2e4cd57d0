use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::errs::{MsError, MsResult};

pub const MAX_KMER_SIZE: u32 = 31;
pub(crate) const HASHER_MAGIC: [u8; 8] = *b"SQHSHv2\0";

/// Salt-permuted canonical k-mer hasher. Immutable after construction,
/// shared by the modimizer iterators and the modset that embeds it.
///
/// The canonical hash of a 2k-bit k-mer `x` is `(x * factor1) >> shift1`
/// where `factor1` is an odd 64-bit multiplier derived from `seed`, so
/// multiplication permutes the low 2k bits and the shift keeps exactly
/// 2k of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqHasher {
    seed: u64,
    k: u32,
    w: u64,
    mask: u64,
    shift1: u32,
    factor1: u64,
    pattern_rc: [u64; 4],
}

impl SeqHasher {
    pub fn new(k: u32, w: u64, seed: u64) -> MsResult<Self> {
        if k < 1 || k > MAX_KMER_SIZE {
            return Err(MsError::InvalidKmerSize(k));
        }
        if w < 1 {
            return Err(MsError::InvalidWindow(w));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let hi = rng.next_u32() as u64;
        let lo = rng.next_u32() as u64;
        // odd multiplier, bijective on the low 2k bits
        let factor1 = ((hi << 32) | lo) | 1;
        let mask = (1u64 << (2 * k)) - 1;
        let shift1 = 64 - 2 * k;
        let mut pattern_rc = [0u64; 4];
        for b in 0u64..4u64 {
            pattern_rc[b as usize] = (3 - b) << (2 * (k - 1));
        }
        Ok(Self { seed, k, w, mask, shift1, factor1, pattern_rc })
    }

    #[inline]
    pub fn k(&self) -> u32 {
        self.k
    }

    #[inline]
    pub fn w(&self) -> u64 {
        self.w
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    #[inline]
    pub fn factor(&self) -> u64 {
        self.factor1
    }

    #[inline]
    pub(crate) fn pattern_rc(&self, base: u8) -> u64 {
        self.pattern_rc[base as usize]
    }

    /// Hash of a single 2k-bit k-mer in the given orientation.
    #[inline]
    pub fn hash(&self, kmer: u64) -> u64 {
        kmer.wrapping_mul(self.factor1) >> self.shift1
    }

    /// Canonical hash of a k-mer given both orientations, with the
    /// orientation that won. Ties go to the forward strand.
    #[inline]
    pub fn canonical(&self, fwd: u64, rev: u64) -> (u64, bool) {
        let hf = self.hash(fwd);
        let hr = self.hash(rev);
        if hf <= hr {
            (hf, true)
        } else {
            (hr, false)
        }
    }

    /// Reverse complement of a 2k-bit k-mer.
    pub fn revcomp(&self, kmer: u64) -> u64 {
        let mut fwd = kmer;
        let mut rc = 0u64;
        for _ in 0..self.k {
            rc = (rc << 2) | (3 - (fwd & 3));
            fwd >>= 2;
        }
        rc
    }

    /// Decode a 2k-bit k-mer to ACGT text, leftmost base in the high bits.
    pub fn decode(&self, kmer: u64) -> String {
        (0..self.k)
            .rev()
            .map(|i| match (kmer >> (2 * i)) & 3 {
                0 => 'A',
                1 => 'C',
                2 => 'G',
                _ => 'T',
            })
            .collect()
    }

    pub(crate) fn write<W: Write>(&self, out: &mut W) -> MsResult<()> {
        out.write_all(&HASHER_MAGIC)?;
        out.write_u64::<LittleEndian>(self.seed)?;
        out.write_u32::<LittleEndian>(self.k)?;
        out.write_u64::<LittleEndian>(self.w)?;
        out.write_u64::<LittleEndian>(self.mask)?;
        out.write_u32::<LittleEndian>(self.shift1)?;
        out.write_u64::<LittleEndian>(self.factor1)?;
        for p in self.pattern_rc.iter() {
            out.write_u64::<LittleEndian>(*p)?;
        }
        Ok(())
    }

    pub(crate) fn read<R: Read>(inp: &mut R, path: &Path) -> MsResult<Self> {
        let mut magic = [0u8; 8];
        inp.read_exact(&mut magic)?;
        if magic != HASHER_MAGIC {
            return Err(MsError::BadMagic {
                path: path.to_path_buf(),
                expected: HASHER_MAGIC,
                found: magic,
            });
        }
        let seed = inp.read_u64::<LittleEndian>()?;
        let k = inp.read_u32::<LittleEndian>()?;
        let w = inp.read_u64::<LittleEndian>()?;
        let mask = inp.read_u64::<LittleEndian>()?;
        let shift1 = inp.read_u32::<LittleEndian>()?;
        let factor1 = inp.read_u64::<LittleEndian>()?;
        let mut pattern_rc = [0u64; 4];
        for p in pattern_rc.iter_mut() {
            *p = inp.read_u64::<LittleEndian>()?;
        }
        if k < 1 || k > MAX_KMER_SIZE {
            return Err(MsError::CorruptFile {
                path: path.to_path_buf(),
                context: format!("hasher block has illegal k {k}"),
            });
        }
        Ok(Self { seed, k, w, mask, shift1, factor1, pattern_rc })
    }

    /// Compatibility check used by merge, the only non-fatal failure in
    /// the modset lifecycle.
    pub(crate) fn compatible(&self, other: &Self) -> bool {
        self.k == other.k && self.w == other.w && self.factor1 == other.factor1
    }
}
