use log::info;

use crate::overlap::OverlapEngine;
use crate::readset::{ReadSet, BAD_ORDER1, BAD_ORDER10};
use crate::util::read_progress_bar;

const MAX_BAD_PARTNERS: usize = 10;
const MANY_BAD_THRESHOLD: u32 = 10;

/// Counts from a badness labeling run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BadnessSummary {
    pub n_order10: u32,
    pub n_order1: u32,
}

/// Three-pass labeling that separates reads with many inconsistent
/// overlaps from reads that merely matched one. Pass over every read
/// collecting bad partners (order or orientation violations), then:
/// reads with 10+ partners are `BAD_ORDER10` and excused from everyone
/// else's lists; reads still holding 2+ partners are `BAD_ORDER1`; any
/// read still holding a surviving partner is `BAD_ORDER1` as well.
/// The last pass deliberately labels both reads of a surviving bad
/// pair.
pub fn mark_bad_reads(rs: &mut ReadSet) -> BadnessSummary {
    let n = rs.n_reads() as usize;
    let mut engine = OverlapEngine::new(rs);
    let mut partners: Vec<Vec<u32>> = vec![Vec::new(); n + 1];
    let mut n_bad = vec![0u32; n + 1];

    let pb = read_progress_bar(n as u64);
    pb.set_message("scanning overlaps");
    for x in 1..=n as u32 {
        for o in engine.find_overlaps(rs, x).iter() {
            if o.n_bad_order == 0 && o.n_bad_flip == 0 {
                continue;
            }
            n_bad[x as usize] += 1;
            if partners[x as usize].len() < MAX_BAD_PARTNERS {
                partners[x as usize].push(o.read);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut summary = BadnessSummary::default();
    for x in 1..=n as u32 {
        if n_bad[x as usize] >= MANY_BAD_THRESHOLD {
            rs.read_mut(x).set_flag(BAD_ORDER10);
            summary.n_order10 += 1;
        }
    }
    for list in partners.iter_mut() {
        list.retain(|p| !rs.read(*p).has_flag(BAD_ORDER10));
    }

    // snapshot sweep so one read's labeling doesn't starve another's
    // count within the same pass
    let order1 = (1..=n as u32)
        .filter(|x| {
            !rs.read(*x).has_flag(BAD_ORDER10)
                && partners[*x as usize].len() >= 2
        })
        .collect::<Vec<u32>>();
    for x in order1.iter() {
        rs.read_mut(*x).set_flag(BAD_ORDER1);
        summary.n_order1 += 1;
    }
    for list in partners.iter_mut() {
        list.retain(|p| !rs.read(*p).has_flag(BAD_ORDER1));
    }

    for x in 1..=n as u32 {
        let read = rs.read(x);
        if read.has_flag(BAD_ORDER10) || read.has_flag(BAD_ORDER1) {
            continue;
        }
        if !partners[x as usize].is_empty() {
            rs.read_mut(x).set_flag(BAD_ORDER1);
            summary.n_order1 += 1;
        }
    }
    info!(
        "marked {} reads badOrder10, {} reads badOrder1",
        summary.n_order10, summary.n_order1
    );
    summary
}

/// For every non-bad read pick the containing candidate with the most
/// shared hits; 0 when nothing contains it.
pub fn find_contained(rs: &mut ReadSet) -> u32 {
    let n = rs.n_reads();
    let mut engine = OverlapEngine::new(rs);
    let mut n_contained = 0u32;
    let pb = read_progress_bar(n as u64);
    pb.set_message("selecting containments");
    for x in 1..=n {
        if rs.read(x).is_bad() {
            rs.read_mut(x).contained = 0;
            pb.inc(1);
            continue;
        }
        // overlaps come back best-first, the first containing hit is
        // the maximal one
        let best = engine
            .find_overlaps(rs, x)
            .iter()
            .find(|o| o.is_contained && o.read != x)
            .map(|o| o.read)
            .unwrap_or(0);
        if best != 0 {
            n_contained += 1;
        }
        rs.read_mut(x).contained = best;
        pb.inc(1);
    }
    pb.finish_and_clear();
    info!("{n_contained} of {n} reads are contained");
    n_contained
}

#[cfg(test)]
mod classify_tests {
    use similar_asserts::assert_eq;

    use crate::hasher::SeqHasher;
    use crate::modset::{Modset, COPY_UNIQUE};
    use crate::readset::{ReadSet, BAD_ORDER1, BAD_ORDER10};

    use super::{find_contained, mark_bad_reads};

    fn seeded_readset(n_mods: u64) -> (ReadSet, Vec<u64>) {
        let hasher = SeqHasher::new(3, 4, 1).unwrap();
        let mut ms = Modset::new(hasher, 20).unwrap();
        let hashes = (0..n_mods).map(|i| 4 * i + 101).collect::<Vec<u64>>();
        for h in hashes.iter() {
            let id = ms.find_or_add(*h).unwrap();
            ms.set_copy_class(id, COPY_UNIQUE);
        }
        (ReadSet::new(ms), hashes)
    }

    // a read sharing three mods with the rogue, the last one flipped,
    // which makes the overlap bad in both directions
    fn add_partner(
        rs: &mut ReadSet,
        h: &[u64],
        group: usize,
    ) -> u32 {
        let g = &h[group * 3..group * 3 + 3];
        rs.add_read(
            "partner",
            100,
            &[(g[0], 10, true), (g[1], 20, true), (g[2], 30, false)],
        )
        .unwrap()
    }

    fn add_rogue(rs: &mut ReadSet, h: &[u64], n_groups: usize) -> u32 {
        let mods = (0..n_groups)
            .flat_map(|g| {
                let base = 100 * g as u64;
                vec![
                    (h[g * 3], base + 10, true),
                    (h[g * 3 + 1], base + 20, true),
                    (h[g * 3 + 2], base + 30, true),
                ]
            })
            .collect::<Vec<(u64, u64, bool)>>();
        rs.add_read("rogue", 100 * n_groups as u64 + 50, &mods).unwrap()
    }

    #[test]
    fn test_many_fault_read_takes_the_blame() {
        let (mut rs, h) = seeded_readset(30);
        let rogue = add_rogue(&mut rs, &h, 10);
        let partners =
            (0..10).map(|g| add_partner(&mut rs, &h, g)).collect::<Vec<u32>>();
        rs.inv_build();
        let summary = mark_bad_reads(&mut rs);
        assert_eq!(summary.n_order10, 1);
        assert!(rs.read(rogue).has_flag(BAD_ORDER10));
        // collateral partners are excused once the rogue is labeled
        for p in partners {
            assert!(!rs.read(p).is_bad(), "partner {p} wrongly labeled");
        }
    }

    #[test]
    fn test_surviving_pair_labeled_symmetrically() {
        let (mut rs, h) = seeded_readset(3);
        let a = add_rogue(&mut rs, &h, 1);
        let b = add_partner(&mut rs, &h, 0);
        rs.inv_build();
        mark_bad_reads(&mut rs);
        // neither side dominates, pass 3 labels both
        assert!(rs.read(a).has_flag(BAD_ORDER1));
        assert!(rs.read(b).has_flag(BAD_ORDER1));
    }

    #[test]
    fn test_two_partner_read_clears_its_partners() {
        let (mut rs, h) = seeded_readset(6);
        let q = add_rogue(&mut rs, &h, 2);
        let p1 = add_partner(&mut rs, &h, 0);
        let p2 = add_partner(&mut rs, &h, 1);
        rs.inv_build();
        mark_bad_reads(&mut rs);
        assert!(rs.read(q).has_flag(BAD_ORDER1));
        assert!(!rs.read(q).has_flag(BAD_ORDER10));
        assert!(!rs.read(p1).is_bad());
        assert!(!rs.read(p2).is_bad());
    }

    #[test]
    fn test_containment_selection() {
        let (mut rs, h) = seeded_readset(4);
        // the long read carries all four mods, the short one sits inside
        rs.add_read(
            "long",
            400,
            &[
                (h[0], 100, true),
                (h[1], 150, true),
                (h[2], 200, true),
                (h[3], 250, true),
            ],
        )
        .unwrap();
        rs.add_read(
            "short",
            120,
            &[(h[0], 10, true), (h[1], 60, true), (h[2], 110, true)],
        )
        .unwrap();
        rs.inv_build();
        let n = find_contained(&mut rs);
        assert_eq!(n, 1);
        assert_eq!(rs.read(2).contained, 1);
        assert_eq!(rs.read(1).contained, 0);
    }
}
