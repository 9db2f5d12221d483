// ==============================================================================
// stage.rs - Staging Loader
// ==============================================================================
// Description: Per-run SQLite staging database and bulk prestage load
// ==============================================================================

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::chromosome::CHROMOSOME_RANGES;
use crate::error::PipelineError;

/// The per-run staging database.
///
/// Created fresh next to the input file; a leftover database from an earlier
/// run is deleted with a warning, never reused. Holds the static
/// `chromosome_range` reference table, the unindexed `prestage` table the
/// input file is bulk-loaded into, and the `stage` table the transform
/// materializes in p-value order.
pub struct StagingDb {
    conn: Connection,
}

impl StagingDb {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        if path.exists() {
            warn!("{} already exists and will be deleted", path.display());
            std::fs::remove_file(path)?;
        }

        let conn = Connection::open(path)?;
        rusqlite::vtab::csvtab::load_module(&conn)?;
        register_math_functions(&conn)?;

        // Bulk-insert tuning: the database is rebuilt from scratch on every
        // run, so durability of intermediate state does not matter.
        conn.execute_batch(
            "PRAGMA journal_mode = OFF;
             PRAGMA synchronous = OFF;
             PRAGMA temp_store = MEMORY;",
        )?;

        conn.execute_batch(
            "CREATE TABLE chromosome_range (
                chromosome              VARCHAR(2),
                position_min            BIGINT NOT NULL,
                position_max            BIGINT NOT NULL,
                position_min_abs        BIGINT NOT NULL,
                position_max_abs        BIGINT NOT NULL
            );

            CREATE TABLE prestage (
                chromosome              VARCHAR(2),
                position                BIGINT,
                snp                     VARCHAR(200),
                allele_reference        VARCHAR(200),
                allele_alternate        VARCHAR(200),
                p_value                 DOUBLE,
                p_value_r               DOUBLE,
                odds_ratio              DOUBLE,
                odds_ratio_r            DOUBLE,
                n                       BIGINT,
                q                       DOUBLE,
                i                       DOUBLE
            );

            CREATE TABLE stage (
                chromosome              VARCHAR(2),
                position                BIGINT,
                position_abs_aggregate  BIGINT,
                snp                     VARCHAR(200),
                allele_reference        VARCHAR(200),
                allele_alternate        VARCHAR(200),
                p_value                 DOUBLE,
                p_value_nlog            DOUBLE, -- negative log10(P)
                p_value_nlog_aggregate  DOUBLE, -- -log10(p) grouped by 1e-2
                p_value_nlog_expected   DOUBLE, -- expected negative log10(P)
                p_value_r               DOUBLE,
                odds_ratio              DOUBLE,
                odds_ratio_r            DOUBLE,
                n                       BIGINT,
                q                       DOUBLE,
                i                       DOUBLE,
                show_qq_plot            BOOLEAN
            );",
        )?;

        // Insertion order fixes chromosome_range.rowid as the genome-order
        // sort key used by every export.
        {
            let mut stmt = conn.prepare(
                "INSERT INTO chromosome_range (
                    chromosome, position_min, position_max,
                    position_min_abs, position_max_abs
                ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in &CHROMOSOME_RANGES {
                stmt.execute(rusqlite::params![
                    r.chromosome,
                    r.position_min,
                    r.position_max,
                    r.position_min_abs,
                    r.position_max_abs,
                ])?;
            }
        }

        Ok(Self { conn })
    }

    /// Bulk-loads the raw input file into `prestage` through the CSV virtual
    /// table, preserving input row order. The header row is skipped; a row
    /// with a differing column count fails the whole statement, which is
    /// treated as a fatal input error rather than a per-row skip.
    pub fn load_prestage(&mut self, input_file: &Path) -> Result<u64, PipelineError> {
        let filename = input_file.to_string_lossy().replace('\'', "''");
        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE raw_input USING csv(filename='{filename}', header=yes)"
        ))?;

        let loaded = self
            .conn
            .execute("INSERT INTO prestage SELECT * FROM raw_input", [])?;
        self.conn.execute_batch("DROP TABLE raw_input")?;

        info!(
            "Loaded {} rows from {} into prestage",
            loaded,
            input_file.display()
        );
        Ok(loaded as u64)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// SQLite lacks LOG10/POW unless compiled with its optional math extension,
/// so the transform's functions are registered on the connection instead.
fn register_math_functions(conn: &Connection) -> Result<(), rusqlite::Error> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("LOG10", 1, flags, |ctx| {
        let value: f64 = ctx.get(0)?;
        Ok(value.log10())
    })?;

    conn.create_scalar_function("POW", 2, flags, |ctx| {
        let base: f64 = ctx.get(0)?;
        let exponent: f64 = ctx.get(1)?;
        Ok(base.powf(exponent))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_input;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_prestage_preserves_rows_and_skips_header() {
        let dir = TempDir::new().unwrap();
        let input = write_input(
            &dir,
            &[
                "1,10000,rs1,A,G,0.5,,1.01,,1000,,",
                "1,20000,rs2,C,T,0.001,,0.98,,1000,,",
                "2,30000,rs3,G,A,0.2,,1.10,,1000,,",
            ],
        );

        let mut db = StagingDb::create(&dir.path().join("export.1.db")).unwrap();
        let loaded = db.load_prestage(&input).unwrap();
        assert_eq!(loaded, 3);

        // input order preserved, no implicit sort or dedup
        let first: (String, f64) = db
            .connection()
            .query_row(
                "SELECT chromosome, p_value FROM prestage ORDER BY rowid LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(first.0, "1");
        assert_eq!(first.1, 0.5);
    }

    #[test]
    fn test_existing_staging_db_is_replaced() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("export.1.db");
        std::fs::write(&db_path, b"stale").unwrap();

        let db = StagingDb::create(&db_path).unwrap();
        let ranges: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM chromosome_range", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ranges, 24);
    }

    #[test]
    fn test_column_count_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "chromosome,position,snp").unwrap();
        writeln!(file, "1,10000,rs1").unwrap();

        let mut db = StagingDb::create(&dir.path().join("export.1.db")).unwrap();
        assert!(db.load_prestage(&path).is_err());
    }

    #[test]
    fn test_registered_math_functions() {
        let dir = TempDir::new().unwrap();
        let db = StagingDb::create(&dir.path().join("export.1.db")).unwrap();

        let nlog: f64 = db
            .connection()
            .query_row("SELECT -LOG10(0.001)", [], |row| row.get(0))
            .unwrap();
        assert!((nlog - 3.0).abs() < 1e-12);

        let squared: f64 = db
            .connection()
            .query_row("SELECT POW(0.5, 2)", [], |row| row.get(0))
            .unwrap();
        assert!((squared - 0.25).abs() < 1e-12);
    }
}
