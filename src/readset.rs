use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use crate::errs::{MsError, MsResult};
use crate::modimizer::ModimizerIter;
use crate::modset::{Modset, DEPTH_SATURATED};
use crate::sequence::SeqRecord;

pub(crate) const READSET_MAGIC: [u8; 8] = *b"RSMSHv2\0";

/// Orientation rides in the top bit of a packed hit, leaving 31 bits
/// for the mod id. Flipping strand is a single XOR.
pub const HIT_FORWARD: u32 = 1 << 31;
pub const MOD_ID_MASK: u32 = HIT_FORWARD - 1;

#[inline]
pub fn pack_hit(mod_id: u32, is_forward: bool) -> u32 {
    if is_forward {
        mod_id | HIT_FORWARD
    } else {
        mod_id
    }
}

#[inline]
pub fn hit_mod(hit: u32) -> u32 {
    hit & MOD_ID_MASK
}

#[inline]
pub fn hit_is_forward(hit: u32) -> bool {
    hit & HIT_FORWARD != 0
}

#[inline]
pub fn flip_hit(hit: u32) -> u32 {
    hit ^ HIT_FORWARD
}

pub const BAD_REPEAT: u32 = 1 << 0;
pub const BAD_ORDER10: u32 = 1 << 1;
pub const BAD_ORDER1: u32 = 1 << 2;
pub const BAD_NO_MATCH: u32 = 1 << 3;
pub const BAD_LOW_HIT: u32 = 1 << 4;
pub const BAD_LOW_COPY1: u32 = 1 << 5;
pub const IS_RDNA: u32 = 1 << 6;

pub const BAD_MASK: u32 = BAD_REPEAT
    | BAD_ORDER10
    | BAD_ORDER1
    | BAD_NO_MATCH
    | BAD_LOW_HIT
    | BAD_LOW_COPY1;

/// A read reduced to its ordered modset hits. `hit[i]` is an
/// orientation-packed mod id, `dx[i]` the gap in basepairs from the
/// previous hit (from position 0 for the first). Absolute positions
/// come back by prefix sum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SketchRead {
    pub len: u64,
    pub n_miss: u32,
    pub contained: u32,
    pub n_copy: [u32; 4],
    pub(crate) flags: u32,
    pub hit: Vec<u32>,
    pub dx: Vec<u16>,
}

impl SketchRead {
    #[inline]
    pub fn n_hit(&self) -> u32 {
        self.hit.len() as u32
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn is_bad(&self) -> bool {
        self.flags & BAD_MASK != 0
    }

    /// Absolute position of each hit, by prefix sum over the gaps.
    pub fn positions(&self) -> Vec<u64> {
        let mut pos = 0u64;
        self.dx
            .iter()
            .map(|dx| {
                pos += *dx as u64;
                pos
            })
            .collect()
    }
}

/// The modset plus every read's hit list, and (after `inv_build`) the
/// inverse index from mod id to the reads containing it. Read id 0 is a
/// burned sentinel; the first real read is id 1.
pub struct ReadSet {
    modset: Modset,
    reads: Vec<SketchRead>,
    total_hit: u64,
    inv_start: Vec<u64>,
    inv_backing: Vec<u32>,
}

impl ReadSet {
    /// Takes ownership of the modset and zeroes its depths: from here
    /// on depth counts read hits, so that after `inv_build` the list
    /// for a non-saturated mod has exactly `depth` entries. Copy
    /// classes assigned before this survive in the info bits.
    pub fn new(mut modset: Modset) -> Self {
        modset.clear_depths();
        Self {
            modset,
            reads: vec![SketchRead::default()],
            total_hit: 0,
            inv_start: Vec::new(),
            inv_backing: Vec::new(),
        }
    }

    #[inline]
    pub fn modset(&self) -> &Modset {
        &self.modset
    }

    #[inline]
    pub fn modset_mut(&mut self) -> &mut Modset {
        &mut self.modset
    }

    #[inline]
    pub fn n_reads(&self) -> u32 {
        self.reads.len() as u32 - 1
    }

    #[inline]
    pub fn total_hit(&self) -> u64 {
        self.total_hit
    }

    #[inline]
    pub fn read(&self, id: u32) -> &SketchRead {
        &self.reads[id as usize]
    }

    #[inline]
    pub fn read_mut(&mut self, id: u32) -> &mut SketchRead {
        &mut self.reads[id as usize]
    }

    pub fn read_ids(&self) -> impl Iterator<Item = u32> {
        1..self.reads.len() as u32
    }

    /// Sketch one sequence record against the modset (find only, never
    /// add) and append it as the next read.
    pub fn add_record(&mut self, rec: &SeqRecord) -> MsResult<u32> {
        let sampled = ModimizerIter::new(self.modset.hasher(), &rec.seq)
            .map(|m| (m.hash, m.pos as u64, m.is_forward))
            .collect::<Vec<(u64, u64, bool)>>();
        self.add_read(&rec.id, rec.len() as u64, &sampled)
    }

    /// Core ingest: `sampled` is the ordered modimizer output
    /// `(hash, pos, is_forward)` over a read of length `len`.
    pub fn add_read(
        &mut self,
        name: &str,
        len: u64,
        sampled: &[(u64, u64, bool)],
    ) -> MsResult<u32> {
        let mut read = SketchRead { len, ..Default::default() };
        let mut last_pos = 0u64;
        for (hash, pos, is_forward) in sampled.iter() {
            match self.modset.find(*hash) {
                None => read.n_miss += 1,
                Some(id) => {
                    let gap = pos - last_pos;
                    if gap > u16::MAX as u64 {
                        return Err(MsError::GapOverflow {
                            read_id: name.to_owned(),
                            gap,
                        });
                    }
                    read.hit.push(pack_hit(id, *is_forward));
                    read.dx.push(gap as u16);
                    last_pos = *pos;
                    self.modset.bump_depth(id);
                }
            }
        }
        read.hit.shrink_to_fit();
        read.dx.shrink_to_fit();
        self.total_hit += read.hit.len() as u64;
        let id = self.reads.len() as u32;
        debug!(
            "read {id} ({name}): {}bp, {} hits, {} misses",
            len,
            read.n_hit(),
            read.n_miss
        );
        self.reads.push(read);
        Ok(id)
    }

    #[inline]
    pub fn is_inv_built(&self) -> bool {
        !self.inv_start.is_empty()
    }

    /// Reads containing `mod_id`, with multiplicity. Empty for
    /// saturated mods, whose lists are suppressed.
    #[inline]
    pub fn inv(&self, mod_id: u32) -> &[u32] {
        let m = mod_id as usize;
        let (lo, hi) = (self.inv_start[m], self.inv_start[m + 1]);
        &self.inv_backing[lo as usize..hi as usize]
    }

    /// Build the inverse index by counting sort over per-mod depths,
    /// and refresh each read's per-copy-class hit counts in the same
    /// pass. Call again after anything changes depths or copy classes.
    pub fn inv_build(&mut self) {
        let n_mods = self.modset.max() as usize;
        let mut start = vec![0u64; n_mods + 2];
        for m in 1..=n_mods as u32 {
            let d = self.modset.depth(m);
            let count = if d == DEPTH_SATURATED { 0 } else { d as u64 };
            start[m as usize + 1] = count;
        }
        for m in 1..start.len() {
            start[m] += start[m - 1];
        }
        let mut backing = vec![0u32; start[n_mods + 1] as usize];
        let mut cursor = start.clone();
        for rid in 1..self.reads.len() {
            let read = &mut self.reads[rid];
            read.n_copy = [0u32; 4];
            for hit in read.hit.iter() {
                let m = hit_mod(*hit);
                read.n_copy[self.modset.copy_class(m) as usize] += 1;
                if self.modset.depth(m) == DEPTH_SATURATED {
                    continue;
                }
                backing[cursor[m as usize] as usize] = rid as u32;
                cursor[m as usize] += 1;
            }
        }
        self.inv_start = start;
        self.inv_backing = backing;
        info!(
            "inverse index over {} mods, {} placements",
            n_mods,
            self.inv_backing.len()
        );
    }

    pub(crate) fn mod_path(root: &Path) -> PathBuf {
        PathBuf::from(format!("{}.mod", root.display()))
    }

    pub(crate) fn readset_path(root: &Path) -> PathBuf {
        PathBuf::from(format!("{}.readset", root.display()))
    }

    /// Persist as `<root>.mod` plus `<root>.readset`.
    pub fn write_files(&self, root: &Path) -> MsResult<()> {
        self.modset.write_file(&Self::mod_path(root))?;
        let readset_fp = Self::readset_path(root);
        let mut out = BufWriter::new(File::create(&readset_fp)?);
        self.write(&mut out)?;
        out.flush()?;
        info!(
            "wrote read set with {} reads to {}",
            self.n_reads(),
            readset_fp.display()
        );
        Ok(())
    }

    pub(crate) fn write<W: Write>(&self, out: &mut W) -> MsResult<()> {
        out.write_all(&READSET_MAGIC)?;
        out.write_u64::<LittleEndian>(self.total_hit)?;
        out.write_u64::<LittleEndian>(self.n_reads() as u64)?;
        for read in self.reads.iter().skip(1) {
            out.write_u64::<LittleEndian>(read.len)?;
            out.write_u32::<LittleEndian>(read.flags)?;
            out.write_u32::<LittleEndian>(read.n_hit())?;
            out.write_u32::<LittleEndian>(read.n_miss)?;
            out.write_u32::<LittleEndian>(read.contained)?;
            for c in read.n_copy.iter() {
                out.write_u32::<LittleEndian>(*c)?;
            }
        }
        for read in self.reads.iter().skip(1) {
            for hit in read.hit.iter() {
                out.write_u32::<LittleEndian>(*hit)?;
            }
            for dx in read.dx.iter() {
                out.write_u16::<LittleEndian>(*dx)?;
            }
        }
        Ok(())
    }

    /// Load `<root>.mod` + `<root>.readset`. The inverse index is not
    /// stored; call `inv_build` before running queries.
    pub fn read_files(root: &Path) -> MsResult<Self> {
        let modset = Modset::read_file(&Self::mod_path(root))?;
        let readset_fp = Self::readset_path(root);
        let mut inp = BufReader::new(File::open(&readset_fp)?);
        let rs = Self::read_from(&mut inp, &readset_fp, modset)?;
        info!(
            "loaded read set with {} reads from {}",
            rs.n_reads(),
            readset_fp.display()
        );
        Ok(rs)
    }

    pub(crate) fn read_from<R: Read>(
        inp: &mut R,
        path: &Path,
        modset: Modset,
    ) -> MsResult<Self> {
        let mut magic = [0u8; 8];
        inp.read_exact(&mut magic)?;
        if magic != READSET_MAGIC {
            return Err(MsError::BadMagic {
                path: path.to_path_buf(),
                expected: READSET_MAGIC,
                found: magic,
            });
        }
        let total_hit = inp.read_u64::<LittleEndian>()?;
        let n_reads = inp.read_u64::<LittleEndian>()? as usize;
        let mut reads = Vec::with_capacity(n_reads + 1);
        reads.push(SketchRead::default());
        for _ in 0..n_reads {
            let len = inp.read_u64::<LittleEndian>()?;
            let flags = inp.read_u32::<LittleEndian>()?;
            let n_hit = inp.read_u32::<LittleEndian>()?;
            let n_miss = inp.read_u32::<LittleEndian>()?;
            let contained = inp.read_u32::<LittleEndian>()?;
            let mut n_copy = [0u32; 4];
            for c in n_copy.iter_mut() {
                *c = inp.read_u32::<LittleEndian>()?;
            }
            reads.push(SketchRead {
                len,
                n_miss,
                contained,
                n_copy,
                flags,
                hit: vec![0u32; n_hit as usize],
                dx: vec![0u16; n_hit as usize],
            });
        }
        let mut counted = 0u64;
        for read in reads.iter_mut().skip(1) {
            for hit in read.hit.iter_mut() {
                *hit = inp.read_u32::<LittleEndian>()?;
            }
            for dx in read.dx.iter_mut() {
                *dx = inp.read_u16::<LittleEndian>()?;
            }
            counted += read.hit.len() as u64;
        }
        if counted != total_hit {
            return Err(MsError::CorruptFile {
                path: path.to_path_buf(),
                context: format!(
                    "hit arrays held {counted} entries, header said \
                     {total_hit}"
                ),
            });
        }
        Ok(Self {
            modset,
            reads,
            total_hit,
            inv_start: Vec::new(),
            inv_backing: Vec::new(),
        })
    }
}

#[cfg(test)]
mod readset_tests {
    use similar_asserts::assert_eq;

    use crate::hasher::SeqHasher;
    use crate::modset::Modset;

    use super::{flip_hit, hit_is_forward, hit_mod, pack_hit, ReadSet};

    // distinct table keys standing in for canonical hashes
    const HASH_A: u64 = 101;
    const HASH_B: u64 = 202;
    const HASH_C: u64 = 303;

    fn seeded_modset() -> Modset {
        let hasher = SeqHasher::new(3, 4, 1).unwrap();
        let mut ms = Modset::new(hasher, 20).unwrap();
        ms.find_or_add(HASH_A).unwrap();
        ms.find_or_add(HASH_B).unwrap();
        ms.find_or_add(HASH_C).unwrap();
        ms
    }

    fn three_read_set() -> ReadSet {
        let mut rs = ReadSet::new(seeded_modset());
        rs.add_read("r1", 100, &[(HASH_A, 10, true), (HASH_B, 40, true)])
            .unwrap();
        rs.add_read(
            "r2",
            200,
            &[(HASH_A, 5, true), (HASH_C, 80, false), (HASH_A, 150, true)],
        )
        .unwrap();
        rs.add_read("r3", 120, &[(HASH_B, 30, false), (HASH_C, 90, true)])
            .unwrap();
        rs
    }

    #[test]
    fn test_hit_packing() {
        let hit = pack_hit(77, true);
        assert!(hit_is_forward(hit));
        assert_eq!(hit_mod(hit), 77);
        let flipped = flip_hit(hit);
        assert!(!hit_is_forward(flipped));
        assert_eq!(hit_mod(flipped), 77);
    }

    #[test]
    fn test_ingest_gaps_and_misses() {
        let mut rs = ReadSet::new(seeded_modset());
        let id = rs
            .add_read(
                "r1",
                100,
                &[(HASH_A, 10, true), (999, 25, true), (HASH_B, 40, false)],
            )
            .unwrap();
        let read = rs.read(id);
        assert_eq!(read.n_hit(), 2);
        assert_eq!(read.n_miss, 1);
        assert_eq!(read.dx, vec![10, 30]);
        assert_eq!(read.positions(), vec![10, 40]);
        assert!(read.dx.iter().map(|d| *d as u64).sum::<u64>() <= read.len);
    }

    #[test]
    fn test_gap_overflow_rejected() {
        let mut rs = ReadSet::new(seeded_modset());
        let r = rs.add_read(
            "r1",
            200_000,
            &[(HASH_A, 10, true), (HASH_B, 100_000, true)],
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_inverse_index() {
        let mut rs = three_read_set();
        rs.inv_build();
        let a = rs.modset().find(HASH_A).unwrap();
        let b = rs.modset().find(HASH_B).unwrap();
        let c = rs.modset().find(HASH_C).unwrap();
        assert_eq!(rs.inv(a), &[1, 2, 2]);
        assert_eq!(rs.inv(b), &[1, 3]);
        assert_eq!(rs.inv(c), &[2, 3]);
        assert_eq!(rs.modset().depth(a), 3);
        assert_eq!(rs.modset().depth(b), 2);
        assert_eq!(rs.modset().depth(c), 2);
        // every non-saturated list length matches depth
        for m in 1..=rs.modset().max() {
            assert_eq!(rs.inv(m).len() as u16, rs.modset().depth(m));
        }
    }

    #[test]
    fn test_saturated_mod_suppressed() {
        let mut rs = three_read_set();
        let a = rs.modset().find(HASH_A).unwrap();
        rs.modset_mut().add_depth(a, u16::MAX);
        rs.inv_build();
        assert_eq!(rs.inv(a), &[] as &[u32]);
    }

    #[test]
    fn test_n_copy_accounting() {
        let mut rs = three_read_set();
        let a = rs.modset().find(HASH_A).unwrap();
        let b = rs.modset().find(HASH_B).unwrap();
        rs.modset_mut().set_copy_class(a, 1);
        rs.modset_mut().set_copy_class(b, 3);
        rs.inv_build();
        assert_eq!(rs.read(1).n_copy, [0, 1, 0, 1]);
        assert_eq!(rs.read(2).n_copy, [1, 2, 0, 0]);
        assert_eq!(rs.read(3).n_copy, [1, 0, 0, 1]);
    }

    #[test]
    fn test_round_trip() {
        let mut rs = three_read_set();
        rs.read_mut(2).set_flag(super::BAD_REPEAT);
        rs.read_mut(3).contained = 2;
        rs.inv_build();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sample");
        rs.write_files(&root).unwrap();
        let mut recovered = ReadSet::read_files(&root).unwrap();
        assert_eq!(recovered.n_reads(), 3);
        assert_eq!(recovered.total_hit(), rs.total_hit());
        for id in 1..=3u32 {
            assert_eq!(recovered.read(id), rs.read(id));
        }
        recovered.inv_build();
        let a = recovered.modset().find(HASH_A).unwrap();
        assert_eq!(recovered.inv(a), rs.inv(a));
    }
}
