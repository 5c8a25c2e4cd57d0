use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::errs::{MsError, MsResult};
use crate::hasher::SeqHasher;
use crate::modimizer::ModimizerIter;

pub(crate) const MODSET_MAGIC: [u8; 8] = *b"MSHSTv1\0";

pub const MIN_TABLE_BITS: u32 = 20;
pub const MAX_TABLE_BITS: u32 = 34;

/// Depth is a saturating 16-bit count; the saturation value doubles as
/// the "suppress from the inverse index" sentinel.
pub const DEPTH_SATURATED: u16 = u16::MAX;

/// Copy class lives in the low two info bits: 0 likely-error, 1 unique,
/// 2 diploid-unique, 3 multi-copy (M).
pub const COPY_CLASS_MASK: u8 = 0b11;
pub const COPY_ERROR: u8 = 0;
pub const COPY_UNIQUE: u8 = 1;
pub const COPY_DIPLOID: u8 = 2;
pub const COPY_MULTI: u8 = 3;

pub const INFO_MINOR: u8 = 1 << 2;
pub const INFO_REPEAT: u8 = 1 << 3;
pub const INFO_INTERNAL: u8 = 1 << 4;
pub const INFO_RDNA: u8 = 1 << 5;

const INFO_FLAGS_MASK: u8 =
    INFO_MINOR | INFO_REPEAT | INFO_INTERNAL | INFO_RDNA;

/// Open-addressed identity table mapping canonical modimizer hashes to
/// dense ids in `[1, max]`, with per-id depth and annotation bits held
/// in parallel arrays. Id 0 is the null sentinel everywhere.
///
/// Probing is double hashing: the initial slot is the hash masked to
/// the table, the stride is the next `table_bits` bits of the hash
/// forced odd, which is coprime to the power-of-two table and therefore
/// cycles the whole table. Load never exceeds 25%.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modset {
    hasher: SeqHasher,
    table_bits: u32,
    table_size: u64,
    table_mask: u64,
    // id capacity, max strictly below this
    size: u64,
    index: Vec<u32>,
    value: Vec<u64>,
    depth: Vec<u16>,
    info: Vec<u8>,
    max: u32,
}

impl Modset {
    pub fn new(hasher: SeqHasher, table_bits: u32) -> MsResult<Self> {
        // the domain check must run before the shift below can underflow
        if table_bits < MIN_TABLE_BITS || table_bits > MAX_TABLE_BITS {
            return Err(MsError::InvalidTableBits(table_bits));
        }
        Self::with_capacity(hasher, table_bits, 1u64 << (table_bits - 2))
    }

    pub fn with_capacity(
        hasher: SeqHasher,
        table_bits: u32,
        size: u64,
    ) -> MsResult<Self> {
        if table_bits < MIN_TABLE_BITS || table_bits > MAX_TABLE_BITS {
            return Err(MsError::InvalidTableBits(table_bits));
        }
        let table_size = 1u64 << table_bits;
        if size > (table_size >> 2) {
            return Err(MsError::CapacityOverLoadFactor {
                requested: size,
                table_size,
            });
        }
        debug!(
            "allocating modset, table bits {table_bits}, capacity {size} \
             entries"
        );
        Ok(Self {
            hasher,
            table_bits,
            table_size,
            table_mask: table_size - 1,
            size,
            index: vec![0u32; table_size as usize],
            value: vec![0u64],
            depth: vec![0u16],
            info: vec![0u8],
            max: 0,
        })
    }

    #[inline]
    pub fn hasher(&self) -> &SeqHasher {
        &self.hasher
    }

    #[inline]
    pub fn table_bits(&self) -> u32 {
        self.table_bits
    }

    /// Largest dense id currently assigned; ids are contiguous in
    /// `[1, max]`.
    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }

    #[inline]
    pub fn value(&self, id: u32) -> u64 {
        self.value[id as usize]
    }

    #[inline]
    pub fn depth(&self, id: u32) -> u16 {
        self.depth[id as usize]
    }

    #[inline]
    pub fn info(&self, id: u32) -> u8 {
        self.info[id as usize]
    }

    #[inline]
    pub fn copy_class(&self, id: u32) -> u8 {
        self.info[id as usize] & COPY_CLASS_MASK
    }

    pub fn set_copy_class(&mut self, id: u32, class: u8) {
        let cell = &mut self.info[id as usize];
        *cell = (*cell & !COPY_CLASS_MASK) | (class & COPY_CLASS_MASK);
    }

    pub fn set_info_flag(&mut self, id: u32, flag: u8) {
        self.info[id as usize] |= flag & INFO_FLAGS_MASK;
    }

    #[inline]
    pub fn has_info_flag(&self, id: u32, flag: u8) -> bool {
        self.info[id as usize] & flag != 0
    }

    /// Saturating depth bump; a saturated entry stays saturated.
    #[inline]
    pub fn bump_depth(&mut self, id: u32) {
        let cell = &mut self.depth[id as usize];
        *cell = cell.saturating_add(1);
    }

    pub(crate) fn add_depth(&mut self, id: u32, n: u16) {
        let cell = &mut self.depth[id as usize];
        *cell = cell.saturating_add(n);
    }

    pub(crate) fn clear_depths(&mut self) {
        self.depth.iter_mut().for_each(|d| *d = 0);
    }

    #[inline]
    fn first_slot(&self, hash: u64) -> u64 {
        hash & self.table_mask
    }

    #[inline]
    fn stride(&self, hash: u64) -> u64 {
        ((hash >> self.table_bits) & self.table_mask) | 1
    }

    /// Look up a hash without inserting.
    pub fn find(&self, hash: u64) -> Option<u32> {
        let mut offset = self.first_slot(hash);
        let mut stride = 0u64;
        loop {
            let id = self.index[offset as usize];
            if id == 0 {
                return None;
            }
            if self.value[id as usize] == hash {
                return Some(id);
            }
            if stride == 0 {
                stride = self.stride(hash);
            }
            offset = (offset + stride) & self.table_mask;
        }
    }

    /// Look up a hash, assigning the next dense id if absent.
    pub fn find_or_add(&mut self, hash: u64) -> MsResult<u32> {
        let mut offset = self.first_slot(hash);
        let mut stride = 0u64;
        loop {
            let id = self.index[offset as usize];
            if id == 0 {
                if self.max as u64 + 1 >= self.size {
                    return Err(MsError::ModsetFull { max: self.max as u64 });
                }
                self.max += 1;
                self.value.push(hash);
                self.depth.push(0);
                self.info.push(0);
                self.index[offset as usize] = self.max;
                return Ok(self.max);
            }
            if self.value[id as usize] == hash {
                return Ok(id);
            }
            if stride == 0 {
                stride = self.stride(hash);
            }
            offset = (offset + stride) & self.table_mask;
        }
    }

    // Re-insertion used while rebuilding the table during prune; every
    // hash is unique in that pass so the probe always ends on an empty
    // slot.
    fn rehash_insert(&mut self, hash: u64) -> u32 {
        let mut offset = self.first_slot(hash);
        let mut stride = 0u64;
        while self.index[offset as usize] != 0 {
            if stride == 0 {
                stride = self.stride(hash);
            }
            offset = (offset + stride) & self.table_mask;
        }
        self.max += 1;
        self.index[offset as usize] = self.max;
        self.max
    }

    /// Drop every entry whose depth falls outside `[dmin, dmax)` and
    /// recompact the dense ids. `dmax == 0` means unbounded above.
    pub fn prune(&mut self, dmin: u16, dmax: u16) {
        let n = self.max as usize;
        self.index.iter_mut().for_each(|cell| *cell = 0);
        self.max = 0;
        for i in 1..=n {
            let d = self.depth[i];
            if d < dmin || (dmax != 0 && d >= dmax) {
                continue;
            }
            // the new id is <= i, so the source cells are read before
            // anything overwrites them
            let j = self.rehash_insert(self.value[i]) as usize;
            self.value[j] = self.value[i];
            self.depth[j] = d;
            self.info[j] = self.info[i];
        }
        let len = self.max as usize + 1;
        self.value.truncate(len);
        self.depth.truncate(len);
        self.info.truncate(len);
        info!("pruned modset to {} entries in depth [{dmin},{dmax})", self.max);
    }

    /// Trim the parallel arrays to `max + 1` entries. Further
    /// insertions fail after packing; a packed modset grows only by
    /// merging into a fresh one.
    pub fn pack(&mut self) {
        let len = self.max as usize + 1;
        self.value.truncate(len);
        self.depth.truncate(len);
        self.info.truncate(len);
        self.value.shrink_to_fit();
        self.depth.shrink_to_fit();
        self.info.shrink_to_fit();
        self.size = len as u64;
    }

    /// Fold `other` into `self`: depths add (saturating), copy classes
    /// combine as `min(a + b, 3)`, annotation flags union. The target
    /// is untouched when the hashers are incompatible.
    pub fn merge(&mut self, other: &Modset) -> MsResult<()> {
        if !self.hasher.compatible(&other.hasher) {
            return Err(MsError::IncompatibleMerge);
        }
        let wanted = self.max as u64 + other.max as u64 + 1;
        self.size = wanted.min(self.table_size >> 2).max(self.size);
        self.value.reserve(other.max as usize);
        self.depth.reserve(other.max as usize);
        self.info.reserve(other.max as usize);
        for i in 1..=other.max {
            let id = self.find_or_add(other.value(i))?;
            self.add_depth(id, other.depth(i));
            let combined_class = (self.copy_class(id) + other.copy_class(i))
                .min(COPY_MULTI);
            self.set_copy_class(id, combined_class);
            self.info[id as usize] |= other.info(i) & INFO_FLAGS_MASK;
        }
        info!("merged {} entries, target now holds {}", other.max, self.max);
        Ok(())
    }

    /// Sample a 2-bit encoded sequence into the table, bumping depths.
    /// Returns the number of modimizers seen.
    pub fn add_sequence(&mut self, seq: &[u8]) -> MsResult<usize> {
        // clone the (small) hasher so the scan can run while the table
        // mutates
        let hasher = self.hasher.clone();
        let mut n_sampled = 0usize;
        for m in ModimizerIter::new(&hasher, seq) {
            let id = self.find_or_add(m.hash)?;
            self.bump_depth(id);
            n_sampled += 1;
        }
        Ok(n_sampled)
    }

    /// Assign copy classes from depth bands: `< t0` error, `< t1`
    /// unique, `< t2` diploid, else multi.
    pub fn assign_copy_classes(&mut self, t0: u16, t1: u16, t2: u16) {
        let mut counts = [0u64; 4];
        for i in 1..=self.max {
            let d = self.depth[i as usize];
            let class = if d < t0 {
                COPY_ERROR
            } else if d < t1 {
                COPY_UNIQUE
            } else if d < t2 {
                COPY_DIPLOID
            } else {
                COPY_MULTI
            };
            self.set_copy_class(i, class);
            counts[class as usize] += 1;
        }
        info!(
            "assigned copy classes: {} error, {} unique, {} diploid, {} multi",
            counts[0], counts[1], counts[2], counts[3]
        );
    }

    /// Depth spectrum as (depth, entry count), ascending by depth.
    pub fn depth_counts(&self) -> Vec<(u16, u64)> {
        let mut counts = FxHashMap::<u16, u64>::default();
        for i in 1..=self.max {
            *counts.entry(self.depth[i as usize]).or_insert(0) += 1;
        }
        let mut out = counts.into_iter().collect::<Vec<(u16, u64)>>();
        out.sort_unstable();
        out
    }

    pub fn write_file(&self, path: &Path) -> MsResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        info!(
            "wrote modset with {} entries to {}",
            self.max,
            path.display()
        );
        Ok(())
    }

    pub(crate) fn write<W: Write>(&self, out: &mut W) -> MsResult<()> {
        out.write_all(&MODSET_MAGIC)?;
        out.write_i32::<LittleEndian>(self.table_bits as i32)?;
        let size = self.max + 1;
        out.write_u32::<LittleEndian>(size)?;
        self.hasher.write(out)?;
        for cell in self.index.iter() {
            out.write_u32::<LittleEndian>(*cell)?;
        }
        for i in 0..size as usize {
            out.write_u64::<LittleEndian>(self.value[i])?;
        }
        for i in 0..size as usize {
            out.write_u16::<LittleEndian>(self.depth[i])?;
        }
        for i in 0..size as usize {
            out.write_u8(self.info[i])?;
        }
        Ok(())
    }

    pub fn read_file(path: &Path) -> MsResult<Self> {
        let mut inp = BufReader::new(File::open(path)?);
        let ms = Self::read(&mut inp, path)?;
        info!(
            "loaded modset with {} entries from {}",
            ms.max,
            path.display()
        );
        Ok(ms)
    }

    pub(crate) fn read<R: Read>(inp: &mut R, path: &Path) -> MsResult<Self> {
        let mut magic = [0u8; 8];
        inp.read_exact(&mut magic)?;
        if magic != MODSET_MAGIC {
            return Err(MsError::BadMagic {
                path: path.to_path_buf(),
                expected: MODSET_MAGIC,
                found: magic,
            });
        }
        let table_bits = inp.read_i32::<LittleEndian>()? as u32;
        if table_bits < MIN_TABLE_BITS || table_bits > MAX_TABLE_BITS {
            return Err(MsError::CorruptFile {
                path: path.to_path_buf(),
                context: format!("illegal table bits {table_bits}"),
            });
        }
        let size = inp.read_u32::<LittleEndian>()? as u64;
        let table_size = 1u64 << table_bits;
        if size == 0 || size > (table_size >> 2) {
            return Err(MsError::CorruptFile {
                path: path.to_path_buf(),
                context: format!("illegal entry count {size}"),
            });
        }
        let hasher = SeqHasher::read(inp, path)?;
        let mut index = vec![0u32; table_size as usize];
        for cell in index.iter_mut() {
            *cell = inp.read_u32::<LittleEndian>()?;
        }
        let mut value = vec![0u64; size as usize];
        for v in value.iter_mut() {
            *v = inp.read_u64::<LittleEndian>()?;
        }
        let mut depth = vec![0u16; size as usize];
        for d in depth.iter_mut() {
            *d = inp.read_u16::<LittleEndian>()?;
        }
        let mut info = vec![0u8; size as usize];
        inp.read_exact(&mut info)?;
        Ok(Self {
            hasher,
            table_bits,
            table_size,
            table_mask: table_size - 1,
            size,
            index,
            value,
            depth,
            info,
            max: size as u32 - 1,
        })
    }
}
