use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{anyhow, Result as AnyhowResult};

pub fn run_modsketch(args: &[&str]) -> AnyhowResult<Output> {
    let exe = Path::new(env!("CARGO_BIN_EXE_modsketch"));
    assert!(exe.exists());

    let output = std::process::Command::new(exe)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?
        .wait_with_output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(anyhow!("failed to run {:?}", args.join(" ")))
    }
}

/// Deterministic pseudo-random DNA so test inputs are reproducible
/// without checked-in fixtures.
pub fn synthetic_sequence(seed: u64, len: usize) -> String {
    let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15) | 1;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            match (state >> 33) & 3 {
                0 => 'A',
                1 => 'C',
                2 => 'G',
                _ => 'T',
            }
        })
        .collect()
}

pub fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            'T' => 'A',
            x => x,
        })
        .collect()
}

pub fn write_fasta(
    path: &PathBuf,
    records: &[(&str, &str)],
) -> AnyhowResult<()> {
    let mut fh = std::fs::File::create(path)?;
    for (id, seq) in records {
        writeln!(fh, ">{id}")?;
        writeln!(fh, "{seq}")?;
    }
    Ok(())
}
