use derive_new::new;
use itertools::Itertools;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::modset::COPY_UNIQUE;
use crate::readset::{flip_hit, hit_is_forward, hit_mod, pack_hit, ReadSet};

// reads whose step disagrees with the consensus by more than this are
// reported but still advanced by their own step
const AGREEMENT_BAND: i64 = 10;

/// One link between successive annotated hits of a read. `to == 0`
/// marks a read boundary; `pos` is the coordinate of `to` in the
/// traversal frame set by `from`'s orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Link {
    from: u32,
    to: u32,
    read: u32,
    pos: i64,
}

/// Placement of one read in the layout coordinate frame.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRead {
    pub read: u32,
    pub start: i64,
    pub end: i64,
    pub n_hit: u32,
}

// hits with a non-error copy class, with forward-frame positions
fn oriented_hits(rs: &ReadSet, rid: u32) -> Vec<(u32, i64)> {
    let read = rs.read(rid);
    let mut pos = 0i64;
    let mut out = Vec::with_capacity(read.hit.len());
    for (hit, dx) in read.hit.iter().zip(read.dx.iter()) {
        pos += *dx as i64;
        if rs.modset().copy_class(hit_mod(*hit)) != 0 {
            out.push((*hit, pos));
        }
    }
    out
}

// Forward links follow the read left to right; the reversed
// counterparts flip every orientation bit and measure positions from
// the read's right end, so a traversal entering on the other strand
// walks the same chain backwards. Boundary sentinels carry `to == 0`
// with the frame coordinates 0 and len.
fn read_links(rs: &ReadSet, rid: u32, links: &mut Vec<Link>) {
    let hits = oriented_hits(rs, rid);
    if hits.is_empty() {
        return;
    }
    let len = rs.read(rid).len as i64;
    for ((a, _), (b, pos_b)) in hits.iter().tuple_windows() {
        links.push(Link { from: *a, to: *b, read: rid, pos: *pos_b });
    }
    for ((a, pos_a), (b, _)) in hits.iter().tuple_windows() {
        links.push(Link {
            from: flip_hit(*b),
            to: flip_hit(*a),
            read: rid,
            pos: len - *pos_a,
        });
    }
    let (first, _) = hits[0];
    let (last, _) = hits[hits.len() - 1];
    links.push(Link { from: first, to: 0, read: rid, pos: 0 });
    links.push(Link { from: last, to: 0, read: rid, pos: len });
    links.push(Link { from: flip_hit(last), to: 0, read: rid, pos: 0 });
    links.push(Link { from: flip_hit(first), to: 0, read: rid, pos: len });
}

// contiguous slice of the sorted link array for each `from`
fn link_ranges(links: &[Link]) -> FxHashMap<u32, (usize, usize)> {
    let mut ranges = FxHashMap::default();
    let mut i = 0;
    while i < links.len() {
        let from = links[i].from;
        let mut j = i + 1;
        while j < links.len() && links[j].from == from {
            j += 1;
        }
        ranges.insert(from, (i, j));
        i = j;
    }
    ranges
}

// position of the seed in the traversal frame of each read holding it
fn seed_positions(rs: &ReadSet, seed: u32) -> Vec<(u32, i64)> {
    rs.inv(seed)
        .iter()
        .unique()
        .filter_map(|rid| {
            let len = rs.read(*rid).len as i64;
            oriented_hits(rs, *rid).iter().find_map(|(hit, pos)| {
                if hit_mod(*hit) != seed {
                    None
                } else if hit_is_forward(*hit) {
                    Some((*rid, *pos))
                } else {
                    Some((*rid, len - *pos))
                }
            })
        })
        .collect()
}

/// Mod-driven traversal. Starting from `seed_mod` (anchored at layout
/// coordinate `anchor`) repeatedly pick the successor mod supported by
/// a strict majority of the active reads with the smallest minimum
/// step, advance every read, recruit reads joining at copy-1 mods, and
/// drop reads that run past their end. Extends in one direction; the
/// other direction is a traversal seeded on the flipped orientation.
pub fn layout_from_seed(
    rs: &ReadSet,
    seed_mod: u32,
    anchor: i64,
) -> Vec<LayoutRead> {
    debug_assert!(rs.is_inv_built(), "inverse index required");
    let seeds = seed_positions(rs, seed_mod);
    if seeds.is_empty() {
        info!("no reads contain seed mod {seed_mod}");
        return Vec::new();
    }
    let mut links: Vec<Link> = Vec::new();
    for (rid, _) in seeds.iter() {
        read_links(rs, *rid, &mut links);
    }
    links.sort_unstable();
    let ranges = link_ranges(&links);

    let mut entries: Vec<LayoutRead> = Vec::new();
    let mut entry_ix: FxHashMap<u32, usize> = FxHashMap::default();
    let mut active: FxHashMap<u32, i64> = FxHashMap::default();
    let join = |entries: &mut Vec<LayoutRead>,
                    entry_ix: &mut FxHashMap<u32, usize>,
                    active: &mut FxHashMap<u32, i64>,
                    rid: u32,
                    x: i64,
                    coord: i64,
                    len: i64| {
        entry_ix.insert(rid, entries.len());
        entries.push(LayoutRead::new(rid, coord - x, coord - x + len, 1));
        active.insert(rid, x);
    };
    for (rid, x) in seeds.iter() {
        let len = rs.read(*rid).len as i64;
        join(&mut entries, &mut entry_ix, &mut active, *rid, *x, anchor, len);
    }

    let mut from = pack_hit(seed_mod, true);
    let mut offset = anchor;
    // repeat structures can revisit a from-mod, bound the walk
    let max_steps = links.len() as u64 + 64;
    let mut steps = 0u64;
    while steps < max_steps {
        steps += 1;
        let Some((lo, hi)) = ranges.get(&from).copied() else {
            break;
        };
        let mut tally: FxHashMap<u32, Vec<(u32, i64)>> = FxHashMap::default();
        for link in links[lo..hi].iter() {
            if link.to == 0 {
                continue;
            }
            if let Some(x) = active.get(&link.read) {
                tally
                    .entry(link.to)
                    .or_default()
                    .push((link.read, link.pos - x));
            }
        }
        let n_active = active.len();
        let best = tally
            .iter()
            .filter(|(_, ds)| ds.len() * 2 > n_active)
            .min_by_key(|&(to, ds)| {
                (ds.iter().map(|(_, d)| *d).min().unwrap(), *to)
            })
            .map(|(to, _)| *to);
        let Some(to) = best else {
            break;
        };
        let ds = tally.remove(&to).expect("chosen candidate was tallied");

        let all_agree = ds.iter().all(|(_, d)| *d == ds[0].1);
        let d_best = if all_agree {
            ds[0].1
        } else {
            let mut sorted = ds.iter().map(|(_, d)| *d).collect::<Vec<i64>>();
            sorted.sort_unstable();
            sorted[sorted.len() / 2]
        };
        // supporters move by their own measured step, everyone else
        // rides the consensus
        for (rid, d) in ds.iter() {
            if (d - d_best).abs() > AGREEMENT_BAND {
                warn!(
                    "read {rid} steps {d}bp toward mod {} against a \
                     consensus of {d_best}bp",
                    hit_mod(to)
                );
            }
            if let Some(x) = active.get_mut(rid) {
                *x += d;
            }
            entries[entry_ix[rid]].n_hit += 1;
        }
        for (rid, x) in active.iter_mut() {
            if !ds.iter().any(|(r, _)| r == rid) {
                *x += d_best;
            }
        }
        active.retain(|rid, x| *x <= rs.read(*rid).len as i64);
        offset += d_best;
        from = to;
        debug!(
            "layout step {steps}: mod {} at {offset}, {} active reads",
            hit_mod(from),
            active.len()
        );

        if rs.modset().copy_class(hit_mod(to)) == COPY_UNIQUE {
            for link in links[lo..hi].iter() {
                if link.to != to || active.contains_key(&link.read) {
                    continue;
                }
                let len = rs.read(link.read).len as i64;
                join(
                    &mut entries,
                    &mut entry_ix,
                    &mut active,
                    link.read,
                    link.pos,
                    offset,
                    len,
                );
            }
        }
        if active.is_empty() {
            break;
        }
    }
    if steps >= max_steps {
        warn!("layout from mod {seed_mod} stopped at its step limit");
    }

    entries.sort_by_key(|e| (e.start, e.read));
    info!(
        "layout from mod {seed_mod} placed {} reads over {} steps",
        entries.len(),
        steps
    );
    entries
}
