use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use crate::errs::MsResult;

/// Make the parent directory of an output artifact if it is missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> MsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("creating output directory {parent:?}");
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Spinner counting records streaming through an ingest pass, where the
/// total is unknown until the file ends.
pub(crate) fn sequence_ticker(label: &str) -> ProgressBar {
    let ticker = ProgressBar::new_spinner();
    ticker.set_style(
        ProgressStyle::with_template("{spinner:.green} {pos} {msg}").unwrap(),
    );
    ticker.set_message(label.to_owned());
    ticker
}

/// Bar for whole-read-set passes, one tick per read queried.
pub(crate) fn read_progress_bar(n_reads: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{elapsed_precise} {bar:32.cyan} {pos}/{len} reads {msg}",
    )
    .unwrap()
    .progress_chars("=>-");
    ProgressBar::new(n_reads).with_style(style)
}

/// Borderless table for the histogram and stats reports.
pub(crate) fn report_table() -> prettytable::Table {
    let mut tab = prettytable::Table::new();
    tab.set_format(*prettytable::format::consts::FORMAT_CLEAN);
    tab
}

/// Group a count into thousands for the report tables.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod util_tests {
    use similar_asserts::assert_eq;

    use super::thousands;

    #[test]
    fn test_thousands_grouping() {
        assert_eq!(thousands(0), "0".to_string());
        assert_eq!(thousands(999), "999".to_string());
        assert_eq!(thousands(52_700), "52,700".to_string());
        assert_eq!(thousands(3_000_000_000), "3,000,000,000".to_string());
    }
}
