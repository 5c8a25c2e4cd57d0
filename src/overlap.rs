use derive_new::new;
use log::debug;
use rustc_hash::FxHashMap;

use crate::modset::COPY_UNIQUE;
use crate::readset::{
    hit_is_forward, hit_mod, ReadSet, BAD_LOW_COPY1, BAD_LOW_HIT,
    BAD_NO_MATCH, BAD_REPEAT,
};

/// Candidates need at least this many shared copy-1 hits to classify.
pub const MIN_SHARED_HITS: u32 = 3;
const LOW_HIT_THRESHOLD: u32 = 10;

/// Classification of one candidate read against the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlap {
    pub read: u32,
    pub n_shared: u32,
    pub is_plus: bool,
    pub is_contained: bool,
    pub n_bad_order: u32,
    pub n_bad_flip: u32,
}

/// Overlap query engine. The scratch maps are sized once to the read
/// set's dimensions and reused across queries; per-query allocation
/// would dominate the runtime. One engine per thread, none shared.
pub struct OverlapEngine {
    // read id -> 1 + index into olap, 0 = unseen
    omap: Vec<u32>,
    // mod id -> 1-based hit index in the query, 0 = not a copy-1 hit
    hmap: Vec<u32>,
    touched_mods: Vec<u32>,
    xpos: Vec<u64>,
    xhit: Vec<u32>,
    olap: Vec<Overlap>,
}

impl OverlapEngine {
    pub fn new(rs: &ReadSet) -> Self {
        Self {
            omap: vec![0u32; rs.n_reads() as usize + 1],
            hmap: vec![0u32; rs.modset().max() as usize + 1],
            touched_mods: Vec::new(),
            xpos: Vec::new(),
            xhit: Vec::new(),
            olap: Vec::new(),
        }
    }

    fn clear_scratch(&mut self) {
        for m in self.touched_mods.drain(..) {
            self.hmap[m as usize] = 0;
        }
        self.olap.clear();
        self.xpos.clear();
        self.xhit.clear();
    }

    /// Find and classify every read overlapping `x_id` through shared
    /// copy-1 mods. Requires a built inverse index. Sets
    /// `BAD_REPEAT` / `BAD_NO_MATCH` / `BAD_LOW_*` flags on the query
    /// read as side effects. The returned slice holds the candidates
    /// with at least `MIN_SHARED_HITS` shared hits, best first.
    pub fn find_overlaps(
        &mut self,
        rs: &mut ReadSet,
        x_id: u32,
    ) -> &[Overlap] {
        debug_assert!(rs.is_inv_built(), "inverse index required");
        self.clear_scratch();

        let mut x_bad_repeat = false;
        let x_len;
        {
            let x = rs.read(x_id);
            x_len = x.len as i64;
            self.xhit.extend_from_slice(&x.hit);
            let mut pos = 0u64;
            for dx in x.dx.iter() {
                pos += *dx as u64;
                self.xpos.push(pos);
            }
        }
        for j in 0..self.xhit.len() {
            let m = hit_mod(self.xhit[j]);
            if rs.modset().copy_class(m) != COPY_UNIQUE {
                continue;
            }
            if self.hmap[m as usize] != 0 {
                x_bad_repeat = true;
                continue;
            }
            self.hmap[m as usize] = j as u32 + 1;
            self.touched_mods.push(m);
            for y in rs.inv(m).iter() {
                if *y == x_id {
                    continue;
                }
                let slot = self.omap[*y as usize];
                if slot == 0 {
                    self.olap.push(Overlap {
                        read: *y,
                        n_shared: 1,
                        ..Default::default()
                    });
                    self.omap[*y as usize] = self.olap.len() as u32;
                } else {
                    self.olap[slot as usize - 1].n_shared += 1;
                }
            }
        }
        // omap is only needed during accumulation
        for o in self.olap.iter() {
            self.omap[o.read as usize] = 0;
        }
        self.olap.sort_unstable_by(|a, b| b.n_shared.cmp(&a.n_shared));

        for oi in 0..self.olap.len() {
            let cand = self.olap[oi];
            if cand.n_shared < MIN_SHARED_HITS {
                break;
            }
            if rs.read(cand.read).is_bad() {
                continue;
            }
            self.olap[oi] = self.classify(rs, cand, x_len);
        }
        let keep = self
            .olap
            .iter()
            .take_while(|o| o.n_shared >= MIN_SHARED_HITS)
            .count();
        self.olap.truncate(keep);

        let x = rs.read_mut(x_id);
        if x_bad_repeat {
            x.set_flag(BAD_REPEAT);
        }
        if keep == 0 {
            x.set_flag(BAD_NO_MATCH);
            if x.n_hit() < LOW_HIT_THRESHOLD {
                x.set_flag(BAD_LOW_HIT);
            }
            if x.n_copy[COPY_UNIQUE as usize] < LOW_HIT_THRESHOLD {
                x.set_flag(BAD_LOW_COPY1);
            }
            debug!("read {x_id} has no overlap candidates");
        }
        &self.olap
    }

    // Orientation vote then the ordered walk of y's hits: order
    // violations, provisional containment from a negative offset, and
    // the end-overhang rollback.
    fn classify(&self, rs: &ReadSet, cand: Overlap, x_len: i64) -> Overlap {
        let y = rs.read(cand.read);
        let mut n_plus = 0u32;
        let mut n_minus = 0u32;
        for hy in y.hit.iter() {
            let ih = self.hmap[hit_mod(*hy) as usize];
            if ih == 0 {
                continue;
            }
            let hx = self.xhit[ih as usize - 1];
            if hit_is_forward(hx) == hit_is_forward(*hy) {
                n_plus += 1;
            } else {
                n_minus += 1;
            }
        }
        let is_plus = n_plus >= n_minus;

        let mut n_bad_order = 0u32;
        let mut contained = false;
        let mut seen_first = false;
        let mut last_diff = 0i64;
        let mut last_ihx = 0i64;
        let mut y_pos = 0i64;
        for (hy, dy) in y.hit.iter().zip(y.dx.iter()) {
            y_pos += *dy as i64;
            let ih = self.hmap[hit_mod(*hy) as usize];
            if ih == 0 {
                continue;
            }
            let ihx = ih as i64 - 1;
            let xp = self.xpos[ihx as usize] as i64;
            last_diff =
                if is_plus { xp - y_pos } else { x_len - xp - y_pos };
            if last_diff < 0 {
                contained = true;
            }
            if seen_first {
                let out_of_order = if is_plus {
                    ihx < last_ihx
                } else {
                    ihx > last_ihx
                };
                if out_of_order {
                    n_bad_order += 1;
                    if is_plus {
                        n_plus = n_plus.saturating_sub(1);
                    } else {
                        n_minus = n_minus.saturating_sub(1);
                    }
                }
            }
            seen_first = true;
            last_ihx = ihx;
        }
        // x runs past y's end, so it only starts inside y
        if x_len - last_diff > y.len as i64 {
            contained = false;
        }
        Overlap {
            read: cand.read,
            n_shared: cand.n_shared,
            is_plus,
            is_contained: contained,
            n_bad_order,
            n_bad_flip: if is_plus { n_minus } else { n_plus },
        }
    }
}

/// One shared copy-1 mod between a fixed pair of reads, with its
/// position and orientation in each. Diagnostics only.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedHit {
    pub mod_id: u32,
    pub x_pos: u64,
    pub y_pos: u64,
    pub x_forward: bool,
    pub y_forward: bool,
}

/// Walk both hit lists and report every shared copy-1 mod. Multiple
/// occurrences in `y` each pair with the first occurrence in `x`.
pub fn shared_hits(rs: &ReadSet, ix: u32, iy: u32) -> Vec<SharedHit> {
    let x = rs.read(ix);
    let mut in_x: FxHashMap<u32, (u64, bool)> = FxHashMap::default();
    let mut pos = 0u64;
    for (hit, dx) in x.hit.iter().zip(x.dx.iter()) {
        pos += *dx as u64;
        let m = hit_mod(*hit);
        if rs.modset().copy_class(m) != COPY_UNIQUE {
            continue;
        }
        in_x.entry(m).or_insert((pos, hit_is_forward(*hit)));
    }
    let y = rs.read(iy);
    let mut out = Vec::new();
    let mut y_pos = 0u64;
    for (hit, dy) in y.hit.iter().zip(y.dx.iter()) {
        y_pos += *dy as u64;
        let m = hit_mod(*hit);
        if let Some((x_pos, x_forward)) = in_x.get(&m) {
            out.push(SharedHit::new(
                m,
                *x_pos,
                y_pos,
                *x_forward,
                hit_is_forward(*hit),
            ));
        }
    }
    out
}
