use mod_sketch::modset::DEPTH_SATURATED;
use mod_sketch::overlap::OverlapEngine;
use mod_sketch::readset::ReadSet;

use crate::common::{
    reverse_complement, run_modsketch, synthetic_sequence, write_fasta,
};

mod common;

// genome of 600bp sampled by four overlapping reads, one of them
// reverse-complemented and one fully contained
fn build_readset_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let genome = synthetic_sequence(47, 600);
    let reads_fp = dir.join("reads.fa");
    let mod_fp = dir.join("genome.mod");
    let root = dir.join("sample");
    write_fasta(
        &reads_fp,
        &[
            ("read1", &genome[0..400]),
            ("read2", &genome[200..600]),
            ("read3_rc", &reverse_complement(&genome[100..500])),
            ("read4", &genome[150..350]),
        ],
    )
    .unwrap();

    run_modsketch(&[
        "create",
        mod_fp.to_str().unwrap(),
        "-B",
        "20",
        "--kmer",
        "15",
        "--window",
        "3",
        "--seed",
        "7",
    ])
    .unwrap();
    run_modsketch(&[
        "add",
        mod_fp.to_str().unwrap(),
        reads_fp.to_str().unwrap(),
    ])
    .unwrap();
    // depths run 1..=4, everything real is haploid-unique here
    run_modsketch(&[
        "classify",
        mod_fp.to_str().unwrap(),
        "--min-real",
        "1",
        "--max-unique",
        "100",
        "--max-diploid",
        "200",
    ])
    .unwrap();
    run_modsketch(&[
        "build-reads",
        mod_fp.to_str().unwrap(),
        reads_fp.to_str().unwrap(),
        "--out",
        root.to_str().unwrap(),
    ])
    .unwrap();
    root
}

#[test]
fn test_build_reads_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let root = build_readset_fixture(dir.path());

    let mut rs = ReadSet::read_files(&root).unwrap();
    assert_eq!(rs.n_reads(), 4);
    rs.inv_build();
    let mut total = 0u64;
    for rid in 1..=rs.n_reads() {
        let read = rs.read(rid);
        assert!(read.n_hit() > 0, "read {rid} sampled nothing");
        assert!(
            read.dx.iter().map(|d| *d as u64).sum::<u64>() <= read.len
        );
        assert_eq!(read.hit.len(), read.dx.len());
        total += read.n_hit() as u64;
    }
    assert_eq!(total, rs.total_hit());
    // the inverse index agrees with the recounted depths
    for m in 1..=rs.modset().max() {
        let d = rs.modset().depth(m);
        if d != DEPTH_SATURATED {
            assert_eq!(rs.inv(m).len(), d as usize, "mod {m}");
        }
    }
}

#[test]
fn test_overlap_pipeline_via_binary() {
    let dir = tempfile::tempdir().unwrap();
    let root = build_readset_fixture(dir.path());

    run_modsketch(&["stats", root.to_str().unwrap()]).unwrap();
    run_modsketch(&["overlaps", root.to_str().unwrap()]).unwrap();
    run_modsketch(&[
        "overlaps",
        root.to_str().unwrap(),
        "--pair",
        "1",
        "2",
    ])
    .unwrap();
    run_modsketch(&["mark-bad", root.to_str().unwrap()]).unwrap();
    run_modsketch(&["contain", root.to_str().unwrap()]).unwrap();

    let mut rs = ReadSet::read_files(&root).unwrap();
    rs.inv_build();
    let mut engine = OverlapEngine::new(&rs);
    // read1 and read3 share 300bp, read2 another 200bp
    let olaps = engine.find_overlaps(&mut rs, 1).to_vec();
    assert!(!olaps.is_empty(), "read1 found no overlaps");
    let to_read3 = olaps.iter().find(|o| o.read == 3);
    if let Some(o) = to_read3 {
        assert!(!o.is_plus, "read3 is the reverse strand");
    }
    // read4 sits wholly inside reads 1, 2 and 3
    let r4 = rs.read(4);
    if !r4.is_bad() {
        assert_ne!(r4.contained, 0, "read4 should be contained");
    }
}

#[test]
fn test_clean_and_ld_commands() {
    let dir = tempfile::tempdir().unwrap();
    let root = build_readset_fixture(dir.path());
    run_modsketch(&["clean", root.to_str().unwrap()]).unwrap();
    run_modsketch(&[
        "ld-test",
        root.to_str().unwrap(),
        "--min-depth",
        "2",
    ])
    .unwrap();
    let mut rs = ReadSet::read_files(&root).unwrap();
    rs.inv_build();
    assert_eq!(rs.n_reads(), 4);
}

#[test]
fn test_layout_command() {
    let dir = tempfile::tempdir().unwrap();
    let root = build_readset_fixture(dir.path());
    let rs = {
        let mut rs = ReadSet::read_files(&root).unwrap();
        rs.inv_build();
        rs
    };
    // seed on a mod carried by the first read
    let seed = rs
        .read(1)
        .hit
        .first()
        .map(|h| mod_sketch::readset::hit_mod(*h))
        .unwrap();
    run_modsketch(&[
        "layout",
        root.to_str().unwrap(),
        "--seed-mod",
        &seed.to_string(),
    ])
    .unwrap();
}
