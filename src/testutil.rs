// ==============================================================================
// testutil.rs - Shared Test Fixtures
// ==============================================================================

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

/// Header row of the raw input format, in the fixed positional column order.
pub const INPUT_HEADER: &str = "chromosome,position,snp,allele_reference,allele_alternate,\
p_value,p_value_r,odds_ratio,odds_ratio_r,n,q,i";

/// Writes an input CSV (header plus the given rows) into `dir`.
pub fn write_input(dir: &TempDir, rows: &[&str]) -> PathBuf {
    let path = dir.path().join("input.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", INPUT_HEADER).unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    path
}
