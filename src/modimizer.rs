use std::collections::VecDeque;

use crate::hasher::SeqHasher;

/// One sampled k-mer. `kmer` is the 2k-bit k-mer in canonical
/// orientation, `hash` its canonical hash, `pos` the 0-based index of
/// the k-mer's first base in the input sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Modimizer {
    pub kmer: u64,
    pub hash: u64,
    pub pos: usize,
    pub is_forward: bool,
}

/// Rolling canonical modimizer scan: emits every k-mer whose canonical
/// hash is 0 mod `w`. Lazy, finite, non-restartable. The sequence is
/// borrowed 2-bit codes (one base per byte, values 0..=3) and must
/// outlive the iterator.
pub struct ModimizerIter<'a> {
    hasher: &'a SeqHasher,
    seq: &'a [u8],
    h: u64,
    h_rc: u64,
    // exclusive end of the current window, 0 until primed
    end: usize,
    advance: bool,
}

impl<'a> ModimizerIter<'a> {
    pub fn new(hasher: &'a SeqHasher, seq: &'a [u8]) -> Self {
        Self { hasher, seq, h: 0, h_rc: 0, end: 0, advance: false }
    }

    #[inline]
    fn push_base(&mut self, base: u8) {
        debug_assert!(base < 4, "sequence must be 2-bit encoded");
        self.h = ((self.h << 2) & self.hasher.mask()) | base as u64;
        self.h_rc = (self.h_rc >> 2) | self.hasher.pattern_rc(base);
    }
}

impl<'a> Iterator for ModimizerIter<'a> {
    type Item = Modimizer;

    fn next(&mut self) -> Option<Self::Item> {
        let k = self.hasher.k() as usize;
        if self.seq.len() < k {
            return None;
        }
        if self.end == 0 {
            for i in 0..k {
                let base = self.seq[i];
                self.push_base(base);
            }
            self.end = k;
            self.advance = false;
        }
        loop {
            if self.advance {
                if self.end >= self.seq.len() {
                    return None;
                }
                let base = self.seq[self.end];
                self.push_base(base);
                self.end += 1;
                self.advance = false;
            }
            let (hash, is_forward) = self.hasher.canonical(self.h, self.h_rc);
            self.advance = true;
            if hash % self.hasher.w() == 0 {
                let kmer = if is_forward { self.h } else { self.h_rc };
                return Some(Modimizer {
                    kmer,
                    hash,
                    pos: self.end - k,
                    is_forward,
                });
            }
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct WindowEntry {
    kmer: u64,
    hash: u64,
    pos: usize,
    is_forward: bool,
}

/// Windowed minimizer scan: emits the leftmost minimum-canonical-hash
/// k-mer of every window of `w` consecutive k-mers, once per distinct
/// selection. Used by the reference-mapping path; the modimizer scan is
/// the primary sampler.
pub struct MinimizerIter<'a> {
    hasher: &'a SeqHasher,
    seq: &'a [u8],
    h: u64,
    h_rc: u64,
    // index of the next k-mer to fold in
    next_kmer: usize,
    window: VecDeque<WindowEntry>,
    last_emitted: Option<usize>,
}

impl<'a> MinimizerIter<'a> {
    pub fn new(hasher: &'a SeqHasher, seq: &'a [u8]) -> Self {
        Self {
            hasher,
            seq,
            h: 0,
            h_rc: 0,
            next_kmer: 0,
            window: VecDeque::with_capacity(hasher.w() as usize + 1),
            last_emitted: None,
        }
    }

    fn fold_kmer_at(&mut self, j: usize) -> WindowEntry {
        let k = self.hasher.k() as usize;
        if j == 0 {
            for i in 0..k {
                let base = self.seq[i];
                self.h = ((self.h << 2) & self.hasher.mask()) | base as u64;
                self.h_rc = (self.h_rc >> 2) | self.hasher.pattern_rc(base);
            }
        } else {
            let base = self.seq[j + k - 1];
            self.h = ((self.h << 2) & self.hasher.mask()) | base as u64;
            self.h_rc = (self.h_rc >> 2) | self.hasher.pattern_rc(base);
        }
        let (hash, is_forward) = self.hasher.canonical(self.h, self.h_rc);
        let kmer = if is_forward { self.h } else { self.h_rc };
        WindowEntry { kmer, hash, pos: j, is_forward }
    }
}

impl<'a> Iterator for MinimizerIter<'a> {
    type Item = Modimizer;

    fn next(&mut self) -> Option<Self::Item> {
        let k = self.hasher.k() as usize;
        let w = self.hasher.w() as usize;
        if self.seq.len() < k {
            return None;
        }
        let n_kmers = self.seq.len() - k + 1;
        while self.next_kmer < n_kmers {
            let j = self.next_kmer;
            let entry = self.fold_kmer_at(j);
            self.next_kmer += 1;
            // strictly-greater pop keeps the leftmost entry on ties
            while self
                .window
                .back()
                .map(|b| b.hash > entry.hash)
                .unwrap_or(false)
            {
                self.window.pop_back();
            }
            self.window.push_back(entry);
            // the live window is [j + 1 - w, j]
            while self
                .window
                .front()
                .map(|f| f.pos + w <= j)
                .unwrap_or(false)
            {
                self.window.pop_front();
            }
            if j + 1 >= w {
                let front = *self.window.front().expect("window is non-empty");
                if self.last_emitted != Some(front.pos) {
                    self.last_emitted = Some(front.pos);
                    return Some(Modimizer {
                        kmer: front.kmer,
                        hash: front.hash,
                        pos: front.pos,
                        is_forward: front.is_forward,
                    });
                }
            }
        }
        None
    }
}
