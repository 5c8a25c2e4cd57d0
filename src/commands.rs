use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Args, Subcommand};
use log::info;
use prettytable::row;

use crate::classify::{find_contained, mark_bad_reads};
use crate::clean::{annotate_mods, ld_test};
use crate::errs::MsError;
use crate::hasher::SeqHasher;
use crate::layout::layout_from_seed;
use crate::modset::Modset;
use crate::overlap::{shared_hits, OverlapEngine};
use crate::readset::{
    ReadSet, BAD_NO_MATCH, BAD_ORDER1, BAD_ORDER10, BAD_REPEAT,
};
use crate::sequence::SequenceFileReader;
use crate::util::{
    ensure_parent_dir, report_table, sequence_ticker, thousands,
};

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty modset with the given sketching parameters.
    Create(EntryCreate),
    /// Sample sequence files into a modset, accumulating depths.
    Add(EntryAdd),
    /// Merge another modset into this one.
    Merge(EntryMerge),
    /// Drop modset entries outside a depth band and renumber the rest.
    Prune(EntryPrune),
    /// Assign copy classes from depth thresholds.
    Classify(EntryClassify),
    /// Print the depth spectrum of a modset.
    Hist(EntryHist),
    /// Report per-entry depths across several modsets.
    Depths(EntryDepths),
    /// Sketch reads against a modset and build a read set.
    BuildReads(EntryBuildReads),
    /// Summarize a read set.
    Stats(EntryStats),
    /// Report overlaps for one read, every read, or a debug pair.
    Overlaps(EntryOverlaps),
    /// Label inconsistently overlapping reads.
    MarkBad(EntryMarkBad),
    /// Select the maximal containing read for every read.
    Contain(EntryContain),
    /// Lay out the reads around a seed mod.
    Layout(EntryLayout),
    /// Annotate mods with repeat/internal/minor flags from read context.
    Clean(EntryClean),
    /// Demote mods whose neighbors fail the linkage test.
    LdTest(EntryLdTest),
}

impl Commands {
    pub fn run(&self) -> anyhow::Result<()> {
        match self {
            Self::Create(x) => x.run(),
            Self::Add(x) => x.run(),
            Self::Merge(x) => x.run(),
            Self::Prune(x) => x.run(),
            Self::Classify(x) => x.run(),
            Self::Hist(x) => x.run(),
            Self::Depths(x) => x.run(),
            Self::BuildReads(x) => x.run(),
            Self::Stats(x) => x.run(),
            Self::Overlaps(x) => x.run(),
            Self::MarkBad(x) => x.run(),
            Self::Contain(x) => x.run(),
            Self::Layout(x) => x.run(),
            Self::Clean(x) => x.run(),
            Self::LdTest(x) => x.run(),
        }
    }
}

#[derive(Args)]
pub struct EntryCreate {
    /// Output modset file.
    out: PathBuf,
    /// log2 of the hash table size.
    #[arg(short = 'B', long, default_value_t = 24)]
    table_bits: u32,
    /// k-mer size, at most 31.
    #[arg(short, long, default_value_t = 16)]
    kmer: u32,
    /// Modimizer window: k-mers are kept when their canonical hash is
    /// divisible by this.
    #[arg(short, long, default_value_t = 10)]
    window: u64,
    /// Salt for the hash multiplier.
    #[arg(short, long, default_value_t = 17)]
    seed: u64,
}

impl EntryCreate {
    pub fn run(&self) -> anyhow::Result<()> {
        let hasher = SeqHasher::new(self.kmer, self.window, self.seed)?;
        let modset = Modset::new(hasher, self.table_bits)?;
        ensure_parent_dir(&self.out)?;
        modset.write_file(&self.out)?;
        Ok(())
    }
}

fn add_sequences(
    modset: &mut Modset,
    seq_files: &[PathBuf],
) -> anyhow::Result<u64> {
    let mut n_sampled = 0u64;
    for fp in seq_files {
        let ticker =
            sequence_ticker(&format!("sequences from {}", fp.display()));
        for rec in SequenceFileReader::open(fp)? {
            let rec = rec?;
            n_sampled += modset.add_sequence(&rec.seq)? as u64;
            ticker.inc(1);
        }
        ticker.finish_and_clear();
    }
    info!("sampled {n_sampled} modimizers");
    Ok(n_sampled)
}

#[derive(Args)]
pub struct EntryAdd {
    /// Modset to accumulate into.
    mod_file: PathBuf,
    /// FASTA/FASTQ files to sample.
    #[arg(required = true)]
    seq_files: Vec<PathBuf>,
    /// Write here instead of updating in place.
    #[arg(long)]
    out: Option<PathBuf>,
}

impl EntryAdd {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut modset = Modset::read_file(&self.mod_file)?;
        add_sequences(&mut modset, &self.seq_files)?;
        modset.write_file(self.out.as_ref().unwrap_or(&self.mod_file))?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryMerge {
    /// Merge target, updated in place unless --out is given.
    dest: PathBuf,
    /// Modset folded into the target.
    other: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
}

impl EntryMerge {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut dest = Modset::read_file(&self.dest)?;
        let other = Modset::read_file(&self.other)?;
        dest.merge(&other).with_context(|| {
            format!(
                "cannot merge {} into {}",
                self.other.display(),
                self.dest.display()
            )
        })?;
        dest.write_file(self.out.as_ref().unwrap_or(&self.dest))?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryPrune {
    mod_file: PathBuf,
    /// Keep entries with at least this depth.
    #[arg(long, default_value_t = 2)]
    min_depth: u16,
    /// Keep entries below this depth; 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    max_depth: u16,
    #[arg(long)]
    out: Option<PathBuf>,
}

impl EntryPrune {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut modset = Modset::read_file(&self.mod_file)?;
        modset.prune(self.min_depth, self.max_depth);
        modset.pack();
        modset.write_file(self.out.as_ref().unwrap_or(&self.mod_file))?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryClassify {
    mod_file: PathBuf,
    /// Depths below this are likely errors (class 0).
    #[arg(long, default_value_t = 3)]
    min_real: u16,
    /// Depths below this are haploid-unique (class 1).
    #[arg(long)]
    max_unique: u16,
    /// Depths below this are diploid-unique (class 2), the rest
    /// multi-copy.
    #[arg(long)]
    max_diploid: u16,
    #[arg(long)]
    out: Option<PathBuf>,
}

impl EntryClassify {
    pub fn run(&self) -> anyhow::Result<()> {
        if self.min_real > self.max_unique
            || self.max_unique > self.max_diploid
        {
            bail!(
                "thresholds must be ordered, got {} <= {} <= {}",
                self.min_real,
                self.max_unique,
                self.max_diploid
            );
        }
        let mut modset = Modset::read_file(&self.mod_file)?;
        modset.assign_copy_classes(
            self.min_real,
            self.max_unique,
            self.max_diploid,
        );
        modset.write_file(self.out.as_ref().unwrap_or(&self.mod_file))?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryHist {
    mod_file: PathBuf,
}

impl EntryHist {
    pub fn run(&self) -> anyhow::Result<()> {
        let modset = Modset::read_file(&self.mod_file)?;
        let counts = modset.depth_counts();
        let mut tab = report_table();
        tab.set_titles(row!["depth", "mods", "cumulative"]);
        let mut cumulative = 0u64;
        for (depth, count) in counts {
            cumulative += count;
            tab.add_row(row![
                depth,
                thousands(count),
                thousands(cumulative)
            ]);
        }
        tab.printstd();
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryDepths {
    /// The modset whose entries are reported.
    mod_file: PathBuf,
    /// Additional modsets looked up per entry.
    #[arg(required = true)]
    others: Vec<PathBuf>,
    /// TSV output path, stdout when absent.
    #[arg(long)]
    out: Option<PathBuf>,
}

impl EntryDepths {
    pub fn run(&self) -> anyhow::Result<()> {
        let primary = Modset::read_file(&self.mod_file)?;
        let others = self
            .others
            .iter()
            .map(|fp| Modset::read_file(fp).map_err(|e| anyhow!(e)))
            .collect::<anyhow::Result<Vec<Modset>>>()?;
        let mut out: Box<dyn Write> = match &self.out {
            Some(fp) => {
                ensure_parent_dir(fp)?;
                Box::new(BufWriter::new(std::fs::File::create(fp)?))
            }
            None => Box::new(BufWriter::new(std::io::stdout())),
        };
        write!(out, "hash\tdepth")?;
        for fp in self.others.iter() {
            write!(out, "\t{}", fp.display())?;
        }
        writeln!(out)?;
        for id in 1..=primary.max() {
            write!(
                out,
                "{:016x}\t{}",
                primary.value(id),
                primary.depth(id)
            )?;
            for other in others.iter() {
                let d = other
                    .find(primary.value(id))
                    .map(|i| other.depth(i))
                    .unwrap_or(0);
                write!(out, "\t{d}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryBuildReads {
    /// Modset the reads are sketched against; not modified on disk.
    mod_file: PathBuf,
    /// FASTA/FASTQ read files.
    #[arg(required = true)]
    seq_files: Vec<PathBuf>,
    /// Output root, producing <root>.mod and <root>.readset.
    #[arg(long)]
    out: PathBuf,
}

impl EntryBuildReads {
    pub fn run(&self) -> anyhow::Result<()> {
        let modset = Modset::read_file(&self.mod_file)?;
        let mut rs = ReadSet::new(modset);
        for fp in self.seq_files.iter() {
            let ticker =
                sequence_ticker(&format!("reads from {}", fp.display()));
            for rec in SequenceFileReader::open(fp)? {
                let rec = rec?;
                rs.add_record(&rec)?;
                ticker.inc(1);
            }
            ticker.finish_and_clear();
        }
        rs.inv_build();
        ensure_parent_dir(&self.out)?;
        rs.write_files(&self.out)?;
        print_readset_stats(&rs);
        Ok(())
    }
}

fn print_readset_stats(rs: &ReadSet) {
    let mut tab = report_table();
    tab.set_titles(row!["metric", "value"]);
    let n_miss =
        rs.read_ids().map(|r| rs.read(r).n_miss as u64).sum::<u64>();
    let n_bad = rs.read_ids().filter(|r| rs.read(*r).is_bad()).count();
    let n_contained =
        rs.read_ids().filter(|r| rs.read(*r).contained != 0).count();
    let mut n_copy = [0u64; 4];
    for r in rs.read_ids() {
        for (i, c) in rs.read(r).n_copy.iter().enumerate() {
            n_copy[i] += *c as u64;
        }
    }
    tab.add_row(row!["reads", thousands(rs.n_reads() as u64)]);
    tab.add_row(row!["hits", thousands(rs.total_hit())]);
    tab.add_row(row!["misses", thousands(n_miss)]);
    for (i, label) in
        ["copy-0 hits", "copy-1 hits", "copy-2 hits", "copy-M hits"]
            .iter()
            .enumerate()
    {
        tab.add_row(row![label, thousands(n_copy[i])]);
    }
    tab.add_row(row!["bad reads", thousands(n_bad as u64)]);
    tab.add_row(row!["contained reads", thousands(n_contained as u64)]);
    tab.printstd();
}

#[derive(Args)]
pub struct EntryStats {
    /// Read set root (expects <root>.mod and <root>.readset).
    root: PathBuf,
}

impl EntryStats {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        print_readset_stats(&rs);
        let mut tab = report_table();
        tab.set_titles(row!["flag", "reads"]);
        for (flag, label) in [
            (BAD_REPEAT, "badRepeat"),
            (BAD_ORDER10, "badOrder10"),
            (BAD_ORDER1, "badOrder1"),
            (BAD_NO_MATCH, "badNoMatch"),
        ] {
            let n =
                rs.read_ids().filter(|r| rs.read(*r).has_flag(flag)).count();
            tab.add_row(row![label, thousands(n as u64)]);
        }
        tab.printstd();
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryOverlaps {
    root: PathBuf,
    /// Query a single read id instead of every read.
    #[arg(long, conflicts_with = "pair")]
    read: Option<u32>,
    /// Report the shared hits of exactly these two reads.
    #[arg(long, num_args = 2)]
    pair: Option<Vec<u32>>,
}

impl EntryOverlaps {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        let check = |id: u32| {
            if id == 0 || id > rs.n_reads() {
                Err(MsError::InvalidReadId(id))
            } else {
                Ok(id)
            }
        };
        if let Some(pair) = &self.pair {
            let ix = check(pair[0])?;
            let iy = check(pair[1])?;
            let mut tab = report_table();
            tab.set_titles(row![
                "mod", "x_pos", "y_pos", "x_strand", "y_strand"
            ]);
            for s in shared_hits(&rs, ix, iy) {
                tab.add_row(row![
                    s.mod_id,
                    s.x_pos,
                    s.y_pos,
                    if s.x_forward { '+' } else { '-' },
                    if s.y_forward { '+' } else { '-' }
                ]);
            }
            tab.printstd();
            return Ok(());
        }
        let queries = match self.read {
            Some(id) => vec![check(id)?],
            None => rs.read_ids().collect(),
        };
        let mut engine = OverlapEngine::new(&rs);
        let stdout = std::io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        writeln!(
            out,
            "read\ttarget\tshared\torient\tcontained\tbad_order\tbad_flip"
        )?;
        for x in queries {
            for o in engine.find_overlaps(&mut rs, x).iter() {
                writeln!(
                    out,
                    "{x}\t{}\t{}\t{}\t{}\t{}\t{}",
                    o.read,
                    o.n_shared,
                    if o.is_plus { '+' } else { '-' },
                    if o.is_contained { 'y' } else { 'n' },
                    o.n_bad_order,
                    o.n_bad_flip
                )?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryMarkBad {
    root: PathBuf,
}

impl EntryMarkBad {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        let summary = mark_bad_reads(&mut rs);
        info!(
            "badOrder10: {}, badOrder1: {}",
            summary.n_order10, summary.n_order1
        );
        rs.write_files(&self.root)?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryContain {
    root: PathBuf,
}

impl EntryContain {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        find_contained(&mut rs);
        rs.write_files(&self.root)?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryLayout {
    root: PathBuf,
    /// Copy-1 mod id the traversal starts from.
    #[arg(long)]
    seed_mod: u32,
    /// Layout coordinate assigned to the seed.
    #[arg(long, default_value_t = 0)]
    anchor: i64,
}

impl EntryLayout {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        if self.seed_mod == 0 || self.seed_mod > rs.modset().max() {
            bail!("seed mod {} is not in the modset", self.seed_mod);
        }
        let placed = layout_from_seed(&rs, self.seed_mod, self.anchor);
        let mut tab = report_table();
        tab.set_titles(row!["read", "start", "end", "hits"]);
        for e in placed {
            tab.add_row(row![e.read, e.start, e.end, e.n_hit]);
        }
        tab.printstd();
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryClean {
    root: PathBuf,
}

impl EntryClean {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        annotate_mods(&mut rs);
        rs.write_files(&self.root)?;
        Ok(())
    }
}

#[derive(Args)]
pub struct EntryLdTest {
    root: PathBuf,
    /// Depth band lower bound for candidates.
    #[arg(long, default_value_t = 2)]
    min_depth: u16,
    /// Depth band upper bound, 0 for unbounded.
    #[arg(long, default_value_t = 0)]
    max_depth: u16,
}

impl EntryLdTest {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut rs = ReadSet::read_files(&self.root)?;
        rs.inv_build();
        let n = ld_test(&mut rs, self.min_depth, self.max_depth);
        info!("demoted {n} mods");
        rs.write_files(&self.root)?;
        Ok(())
    }
}
