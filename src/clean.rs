use itertools::Itertools;
use log::info;
use rustc_hash::FxHashMap;

use crate::modset::{
    COPY_ERROR, COPY_UNIQUE, INFO_INTERNAL, INFO_MINOR, INFO_REPEAT,
};
use crate::readset::{hit_is_forward, hit_mod, ReadSet};

// neighbors gathered per side of a candidate during the linkage test
const LD_NEIGHBOR_SPAN: usize = 8;
const LD_MAX_SPLIT: u32 = 10;

/// Counts from an annotation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanSummary {
    pub n_repeat: u32,
    pub n_internal: u32,
    pub n_minor: u32,
}

/// One pass over the reads deriving per-mod annotations:
/// `REPEAT` when a mod shows up more than once in a single read,
/// `INTERNAL` when both neighboring gaps are tighter than the sampling
/// window, `MINOR` when a neighbor's depth differs from the mod's by
/// more than a factor of two. Rebuilds the inverse index afterwards.
pub fn annotate_mods(rs: &mut ReadSet) -> CleanSummary {
    let w = rs.modset().hasher().w();
    let mut per_read: FxHashMap<u32, u32> = FxHashMap::default();
    let mut flags: Vec<(u32, u8)> = Vec::new();
    for rid in rs.read_ids().collect::<Vec<u32>>() {
        let read = rs.read(rid);
        per_read.clear();
        for hit in read.hit.iter() {
            *per_read.entry(hit_mod(*hit)).or_insert(0) += 1;
        }
        for j in 0..read.hit.len() {
            let m = hit_mod(read.hit[j]);
            if per_read[&m] > 1 {
                flags.push((m, INFO_REPEAT));
            }
            if j > 0
                && j + 1 < read.hit.len()
                && (read.dx[j] as u64) < w
                && (read.dx[j + 1] as u64) < w
            {
                flags.push((m, INFO_INTERNAL));
            }
            let depth_m = rs.modset().depth(m) as u32;
            for neighbor in
                [j.checked_sub(1), (j + 1 < read.hit.len()).then(|| j + 1)]
            {
                let Some(jn) = neighbor else {
                    continue;
                };
                let depth_n =
                    rs.modset().depth(hit_mod(read.hit[jn])) as u32;
                if depth_n > 2 * depth_m || depth_m > 2 * depth_n {
                    flags.push((m, INFO_MINOR));
                    break;
                }
            }
        }
        for (m, flag) in flags.drain(..) {
            rs.modset_mut().set_info_flag(m, flag);
        }
    }
    let mut summary = CleanSummary::default();
    for m in 1..=rs.modset().max() {
        if rs.modset().has_info_flag(m, INFO_REPEAT) {
            summary.n_repeat += 1;
        }
        if rs.modset().has_info_flag(m, INFO_INTERNAL) {
            summary.n_internal += 1;
        }
        if rs.modset().has_info_flag(m, INFO_MINOR) {
            summary.n_minor += 1;
        }
    }
    info!(
        "annotated mods: {} repeat, {} internal, {} minor",
        summary.n_repeat, summary.n_internal, summary.n_minor
    );
    rs.inv_build();
    summary
}

#[derive(Default)]
struct NeighborStat {
    count: u32,
    seen_left: bool,
    seen_right: bool,
}

/// Linkage test over the depth band `[dmin, dmax)`: a copy-1 mod whose
/// copy-1 neighbors do not co-occur consistently across its reads
/// (neither full linkage nor 80% of its depth, or neighbors flipping
/// sides) is demoted to copy class 0. Returns the number of demotions
/// and rebuilds the inverse index.
pub fn ld_test(rs: &mut ReadSet, dmin: u16, dmax: u16) -> u32 {
    debug_assert!(rs.is_inv_built(), "inverse index required");
    let mut demoted = Vec::new();
    for m in 1..=rs.modset().max() {
        let depth_m = rs.modset().depth(m);
        if rs.modset().copy_class(m) != COPY_UNIQUE
            || depth_m < dmin
            || (dmax != 0 && depth_m >= dmax)
        {
            continue;
        }
        let mut stats: FxHashMap<u32, NeighborStat> = FxHashMap::default();
        let mut n_split = 0u32;
        for rid in rs.inv(m).iter().unique() {
            let read = rs.read(*rid);
            let hits = read
                .hit
                .iter()
                .zip(read.positions())
                .filter(|(h, _)| {
                    rs.modset().copy_class(hit_mod(**h)) == COPY_UNIQUE
                })
                .map(|(h, p)| (*h, p))
                .collect::<Vec<(u32, u64)>>();
            for (jm, (hm, _)) in hits.iter().enumerate() {
                if hit_mod(*hm) != m {
                    continue;
                }
                // left/right is defined in m's own orientation
                let forward = hit_is_forward(*hm);
                let left =
                    hits[..jm].iter().rev().take(LD_NEIGHBOR_SPAN);
                let right =
                    hits[jm + 1..].iter().take(LD_NEIGHBOR_SPAN);
                for (h, _) in left {
                    let stat =
                        stats.entry(hit_mod(*h)).or_default();
                    stat.count += 1;
                    if forward {
                        stat.seen_left = true;
                    } else {
                        stat.seen_right = true;
                    }
                }
                for (h, _) in right {
                    let stat =
                        stats.entry(hit_mod(*h)).or_default();
                    stat.count += 1;
                    if forward {
                        stat.seen_right = true;
                    } else {
                        stat.seen_left = true;
                    }
                }
            }
        }
        let mut n_good = 0u32;
        let mut n_weak = 0u32;
        for (_, stat) in stats.iter() {
            if stat.seen_left && stat.seen_right {
                n_split += 1;
            }
            // full linkage, or at least 80% of the reads carrying m
            if stat.count == depth_m as u32
                || stat.count * 5 >= depth_m as u32 * 4
            {
                n_good += 1;
            } else {
                n_weak += 1;
            }
        }
        if n_good < n_weak || n_split > LD_MAX_SPLIT {
            demoted.push(m);
        }
    }
    for m in demoted.iter() {
        rs.modset_mut().set_copy_class(*m, COPY_ERROR);
    }
    info!(
        "linkage test demoted {} mods in depth band [{dmin},{dmax})",
        demoted.len()
    );
    rs.inv_build();
    demoted.len() as u32
}

#[cfg(test)]
mod clean_tests {
    use similar_asserts::assert_eq;

    use crate::hasher::SeqHasher;
    use crate::modset::{
        Modset, COPY_UNIQUE, INFO_INTERNAL, INFO_MINOR, INFO_REPEAT,
    };
    use crate::readset::ReadSet;

    use super::{annotate_mods, ld_test};

    fn seeded_readset(n_mods: u64) -> (ReadSet, Vec<u64>) {
        let hasher = SeqHasher::new(3, 16, 1).unwrap();
        let mut ms = Modset::new(hasher, 20).unwrap();
        let hashes = (0..n_mods).map(|i| 16 * i + 101).collect::<Vec<u64>>();
        for h in hashes.iter() {
            let id = ms.find_or_add(*h).unwrap();
            ms.set_copy_class(id, COPY_UNIQUE);
        }
        (ReadSet::new(ms), hashes)
    }

    #[test]
    fn test_repeat_annotation() {
        let (mut rs, h) = seeded_readset(2);
        rs.add_read(
            "r",
            200,
            &[(h[0], 20, true), (h[1], 60, true), (h[0], 120, true)],
        )
        .unwrap();
        rs.inv_build();
        annotate_mods(&mut rs);
        let a = rs.modset().find(h[0]).unwrap();
        let b = rs.modset().find(h[1]).unwrap();
        assert!(rs.modset().has_info_flag(a, INFO_REPEAT));
        assert!(!rs.modset().has_info_flag(b, INFO_REPEAT));
    }

    #[test]
    fn test_internal_annotation() {
        // w is 16, the middle mod sits under 16bp from both neighbors
        let (mut rs, h) = seeded_readset(3);
        rs.add_read(
            "r",
            100,
            &[(h[0], 30, true), (h[1], 40, true), (h[2], 50, true)],
        )
        .unwrap();
        rs.inv_build();
        annotate_mods(&mut rs);
        let a = rs.modset().find(h[0]).unwrap();
        let b = rs.modset().find(h[1]).unwrap();
        let c = rs.modset().find(h[2]).unwrap();
        assert!(rs.modset().has_info_flag(b, INFO_INTERNAL));
        assert!(!rs.modset().has_info_flag(a, INFO_INTERNAL));
        assert!(!rs.modset().has_info_flag(c, INFO_INTERNAL));
    }

    #[test]
    fn test_minor_annotation() {
        let (mut rs, h) = seeded_readset(2);
        // five reads carry both mods, three more carry only the first,
        // so its depth more than doubles its neighbor's
        for i in 0..5u64 {
            rs.add_read(
                "both",
                200,
                &[(h[0], 20 + i, true), (h[1], 120 + i, true)],
            )
            .unwrap();
        }
        for i in 0..8u64 {
            rs.add_read("solo", 200, &[(h[0], 20 + i, true)]).unwrap();
        }
        rs.inv_build();
        annotate_mods(&mut rs);
        let a = rs.modset().find(h[0]).unwrap();
        let b = rs.modset().find(h[1]).unwrap();
        // the imbalance marks both ends of the gap
        assert!(rs.modset().has_info_flag(a, INFO_MINOR));
        assert!(rs.modset().has_info_flag(b, INFO_MINOR));
    }

    #[test]
    fn test_ld_consistent_mod_survives() {
        let (mut rs, h) = seeded_readset(3);
        for _ in 0..4 {
            rs.add_read(
                "r",
                200,
                &[(h[0], 20, true), (h[1], 80, true), (h[2], 140, true)],
            )
            .unwrap();
        }
        rs.inv_build();
        let demoted = ld_test(&mut rs, 1, 0);
        assert_eq!(demoted, 0);
        let b = rs.modset().find(h[1]).unwrap();
        assert_eq!(rs.modset().copy_class(b), COPY_UNIQUE);
    }

    #[test]
    fn test_ld_inconsistent_mod_demoted() {
        let (mut rs, h) = seeded_readset(7);
        // the candidate co-occurs with a different partner in every
        // read, no neighbor reaches 80% linkage
        for (i, partner) in [1usize, 2, 3, 4, 5, 6].iter().enumerate() {
            rs.add_read(
                "r",
                200,
                &[(h[0], 20 + i as u64, true), (h[*partner], 120, true)],
            )
            .unwrap();
        }
        rs.inv_build();
        let demoted = ld_test(&mut rs, 2, 0);
        assert_eq!(demoted, 1);
        let a = rs.modset().find(h[0]).unwrap();
        assert_eq!(rs.modset().copy_class(a), 0);
    }
}
