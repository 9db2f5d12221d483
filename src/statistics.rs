// ==============================================================================
// statistics.rs - Statistics Engine
// ==============================================================================
// Description: Materializes the stage table in p-value rank order and computes
//              lambda-GC, QQ-plot expectations, and plot-sampling flags
// ==============================================================================

use rusqlite::params_from_iter;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::stage::StagingDb;

/// Number of ranked rows eligible for the QQ-plot sampling flag.
pub const QQ_PLOT_POINTS: i64 = 5000;

/// Median of the chi-squared distribution with one degree of freedom.
const CHI_SQUARED_MEDIAN_1DF: f64 = 0.4549364231195724;

/// Summary produced by the transform pass, later exported as the
/// chromosome="all" metadata row.
#[derive(Debug, Clone, Copy)]
pub struct StageStatistics {
    /// Rows materialized into the stage table.
    pub count: i64,
    /// Rows excluded by the transform (unmapped chromosome or p outside (0, 1]).
    pub dropped: i64,
    /// Genomic inflation factor.
    pub lambda_gc: f64,
    /// Median p-value the inflation factor was derived from.
    pub median_p_value: f64,
}

/// Runs the transform over the staged rows inside a single transaction.
///
/// The stage table is filled in ascending p-value order, so SQLite's rowid is
/// the 1-based significance rank; the QQ expectation and sampling flag are
/// both functions of that rank and are assigned at insert time, never
/// recomputed later. On success the consumed prestage table is dropped.
pub fn transform(db: &mut StagingDb) -> Result<StageStatistics, PipelineError> {
    let tx = db.connection_mut().transaction()?;

    let prestage_count: i64 =
        tx.query_row("SELECT COUNT(*) FROM prestage", [], |row| row.get(0))?;

    // Rows whose chromosome has no entry in chromosome_range fall out of the
    // inner join; rows with p outside (0, 1] are excluded by the WHERE clause
    // since -log10 is undefined or meaningless there (p = 0 would otherwise
    // poison the median and every exported nlog value). Both kinds are
    // counted and logged, not fatal.
    //
    // The CSV virtual table delivers every field as TEXT and an empty
    // optional field cannot coerce through REAL/INTEGER affinity, so the
    // nullable columns are nulled and cast explicitly.
    tx.execute(
        "INSERT INTO stage (
            chromosome,
            position,
            position_abs_aggregate,
            snp,
            allele_reference,
            allele_alternate,
            p_value,
            p_value_nlog,
            p_value_nlog_aggregate,
            p_value_r,
            odds_ratio,
            odds_ratio_r,
            n,
            q,
            i
        )
        SELECT
            p.chromosome,
            p.position,
            1e6 * CAST(1e-6 * (p.position + cr.position_min_abs) AS INT),
            p.snp,
            p.allele_reference,
            p.allele_alternate,
            p.p_value,
            -LOG10(p.p_value),
            1e-2 * CAST(1e2 * -LOG10(p.p_value) AS INT),
            CAST(NULLIF(p.p_value_r, '') AS DOUBLE),
            CAST(NULLIF(p.odds_ratio, '') AS DOUBLE),
            CAST(NULLIF(p.odds_ratio_r, '') AS DOUBLE),
            CAST(NULLIF(p.n, '') AS BIGINT),
            CAST(NULLIF(p.q, '') AS DOUBLE),
            CAST(NULLIF(p.i, '') AS DOUBLE)
        FROM prestage p
        INNER JOIN chromosome_range cr ON cr.chromosome = p.chromosome
        WHERE p.p_value > 0 AND p.p_value <= 1
        ORDER BY p.p_value",
        [],
    )?;

    let count: i64 = tx.query_row("SELECT COUNT(*) FROM stage", [], |row| row.get(0))?;
    if count == 0 {
        return Err(PipelineError::EmptyStage);
    }

    let dropped = prestage_count - count;
    if dropped > 0 {
        warn!(
            "Dropped {} of {} rows (unmapped chromosome or p-value outside (0, 1])",
            dropped, prestage_count
        );
    }

    // Median p-value from the middle rank(s); order-invariant because the
    // stage table is already sorted by p-value.
    let median_rowids = median_rowids(count);
    let placeholders = vec!["?"; median_rowids.len()].join(",");
    let median_p_value: f64 = tx.query_row(
        &format!("SELECT AVG(p_value) FROM stage WHERE rowid IN ({placeholders})"),
        params_from_iter(median_rowids.iter()),
        |row| row.get(0),
    )?;

    let lambda_gc = lambda_gc(median_p_value)?;
    info!(
        "Staged {} rows, median p-value {:.6}, lambda-GC {:.4}",
        count, median_p_value, lambda_gc
    );

    // Sample QQ-plot points with quadratic density decay over the first
    // QQ_PLOT_POINTS ranks, concentrating fidelity in the significant tail.
    // The formula is a fixed rendering contract; reproduce it exactly.
    tx.execute(
        &format!(
            "WITH ids AS (
                SELECT {count} - ROUND({count} * (1 - POW(CAST(rowid AS DOUBLE) / {points} - 1, 2)))
                FROM stage WHERE rowid <= {points}
            )
            UPDATE stage SET show_qq_plot = 1 WHERE rowid IN (SELECT * FROM ids)",
            points = QQ_PLOT_POINTS,
        ),
        [],
    )?;

    // Expected -log10(p) under the null for every rank (ppoints estimator)
    tx.execute(
        &format!("UPDATE stage SET p_value_nlog_expected = -LOG10((rowid - 0.5) / {count})"),
        [],
    )?;

    // prestage has been consumed; the stage table is the durable output
    tx.execute_batch("DROP TABLE prestage")?;
    tx.commit()?;

    Ok(StageStatistics {
        count,
        dropped,
        lambda_gc,
        median_p_value,
    })
}

/// 1-based rowids of the middle rank(s): one for odd row counts, the two
/// straddling ranks for even counts.
fn median_rowids(count: i64) -> Vec<i64> {
    if count % 2 == 0 {
        vec![count / 2, count / 2 + 1]
    } else {
        vec![(count + 1) / 2]
    }
}

/// Genomic inflation factor: the chi-squared statistic of the observed median
/// p-value over the chi-squared median under the null (1 df).
///
/// The one-df chi-squared quantile is the squared normal quantile,
/// qchisq(1 - p, 1) = qnorm(1 - p / 2)^2, so it is computed through the
/// closed-form normal inverse CDF.
pub fn lambda_gc(median_p_value: f64) -> Result<f64, PipelineError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| PipelineError::Stats(e.to_string()))?;
    let chi_squared = normal.inverse_cdf(1.0 - median_p_value / 2.0).powi(2);
    Ok(chi_squared / CHI_SQUARED_MEDIAN_1DF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_input;
    use tempfile::TempDir;

    fn staged(rows: &[&str]) -> (TempDir, StagingDb, StageStatistics) {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, rows);
        let mut db = StagingDb::create(&dir.path().join("export.1.db")).unwrap();
        db.load_prestage(&input).unwrap();
        let stats = transform(&mut db).unwrap();
        (dir, db, stats)
    }

    #[test]
    fn test_stage_is_ordered_by_p_value() {
        let (_dir, db, stats) = staged(&[
            "1,10000,rs1,A,G,0.5,,,,100,,",
            "1,20000,rs2,C,T,0.001,,,,100,,",
            "1,30000,rs3,G,A,0.2,,,,100,,",
            "1,40000,rs4,T,C,0.9,,,,100,,",
        ]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.dropped, 0);

        let mut stmt = db
            .connection()
            .prepare("SELECT rowid, p_value FROM stage ORDER BY rowid")
            .unwrap();
        let rows: Vec<(i64, f64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            rows,
            vec![(1, 0.001), (2, 0.2), (3, 0.5), (4, 0.9)]
        );
    }

    #[test]
    fn test_expected_nlog_follows_ppoints() {
        let (_dir, db, _stats) = staged(&[
            "1,10000,rs1,A,G,0.5,,,,100,,",
            "1,20000,rs2,C,T,0.001,,,,100,,",
            "1,30000,rs3,G,A,0.2,,,,100,,",
            "1,40000,rs4,T,C,0.9,,,,100,,",
        ]);

        let expected: Vec<f64> = db
            .connection()
            .prepare("SELECT p_value_nlog_expected FROM stage ORDER BY rowid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();

        // rank 1 of 4: -log10(0.5 / 4) = -log10(0.125)
        assert!((expected[0] - 0.125f64.log10().abs()).abs() < 1e-9);
        assert!((expected[0] - 0.9030899869919435).abs() < 1e-9);
        // monotonically decreasing with rank
        for pair in expected.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_derived_bucket_fields() {
        // chromosome 2 starts at absolute offset 249698942
        let (_dir, db, _stats) = staged(&["2,1500000,rs1,A,G,0.004,,,,100,,"]);

        let (position_abs, nlog, nlog_aggregate): (i64, f64, f64) = db
            .connection()
            .query_row(
                "SELECT position_abs_aggregate, p_value_nlog, p_value_nlog_aggregate FROM stage",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();

        // floor((1500000 + 249698942) / 1e6) * 1e6
        assert_eq!(position_abs, 251_000_000);
        assert!((nlog - 2.3979400086720375).abs() < 1e-9);
        assert!((nlog_aggregate - 2.39).abs() < 1e-9);
    }

    #[test]
    fn test_unmapped_chromosome_and_zero_p_are_dropped() {
        let (_dir, db, stats) = staged(&[
            "1,10000,rs1,A,G,0.5,,,,100,,",
            "MT,500,rs2,C,T,0.001,,,,100,,",
            "1,20000,rs3,G,A,0,,,,100,,",
        ]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dropped, 2);

        let snp: String = db
            .connection()
            .query_row("SELECT snp FROM stage", [], |row| row.get(0))
            .unwrap();
        assert_eq!(snp, "rs1");
    }

    #[test]
    fn test_lambda_gc_is_order_invariant() {
        let forward = [
            "1,10000,rs1,A,G,0.5,,,,100,,",
            "1,20000,rs2,C,T,0.001,,,,100,,",
            "1,30000,rs3,G,A,0.2,,,,100,,",
            "1,40000,rs4,T,C,0.9,,,,100,,",
        ];
        let mut reversed = forward;
        reversed.reverse();

        let (_d1, _db1, a) = staged(&forward);
        let (_d2, _db2, b) = staged(&reversed);
        assert_eq!(a.lambda_gc, b.lambda_gc);
        assert_eq!(a.median_p_value, b.median_p_value);

        // even count: average of ranks 2 and 3 (0.2 and 0.5)
        assert!((a.median_p_value - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_gc_at_null_median_is_one() {
        // median p of 0.5 means the observed chi-squared median equals the
        // null median, so inflation is exactly 1
        let lambda = lambda_gc(0.5).unwrap();
        assert!((lambda - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_optional_fields_stage_as_null() {
        // empty CSV fields arrive as TEXT '' through the virtual table and
        // must land as SQL NULL in the typed stage columns
        let (_dir, db, stats) = staged(&["1,10000,rs1,A,G,0.5,,,,,,"]);
        assert_eq!(stats.count, 1);

        let types: (String, String, String) = db
            .connection()
            .query_row(
                "SELECT typeof(p_value_r), typeof(n), typeof(i) FROM stage",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(types, ("null".into(), "null".into(), "null".into()));

        // populated optionals still stage as numbers
        let (_d2, db2, _s) = staged(&["1,10000,rs1,A,G,0.5,0.4,1.2,1.1,100,0.3,45.0"]);
        let (p_value_r, n): (f64, i64) = db2
            .connection()
            .query_row("SELECT p_value_r, n FROM stage", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert!((p_value_r - 0.4).abs() < 1e-12);
        assert_eq!(n, 100);
    }

    #[test]
    fn test_show_qq_plot_sampling_is_deterministic() {
        let rows = [
            "1,10000,rs1,A,G,0.5,,,,100,,",
            "1,20000,rs2,C,T,0.001,,,,100,,",
            "1,30000,rs3,G,A,0.2,,,,100,,",
            "1,40000,rs4,T,C,0.9,,,,100,,",
        ];
        // with count=4 the quadratic decay formula maps every eligible rank
        // to 4, so exactly the last-ranked row is flagged
        let (_dir, db, _stats) = staged(&rows);
        let flagged: Vec<i64> = db
            .connection()
            .prepare("SELECT rowid FROM stage WHERE show_qq_plot = 1 ORDER BY rowid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(flagged, vec![4]);

        // identical staged input yields identical assignments
        let (_dir2, db2, _stats2) = staged(&rows);
        let flagged2: Vec<i64> = db2
            .connection()
            .prepare("SELECT rowid FROM stage WHERE show_qq_plot = 1 ORDER BY rowid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(flagged, flagged2);
    }

    #[test]
    fn test_median_rowids_parity() {
        assert_eq!(median_rowids(1), vec![1]);
        assert_eq!(median_rowids(4), vec![2, 3]);
        assert_eq!(median_rowids(5), vec![3]);
    }

    #[test]
    fn test_empty_stage_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, &["MT,500,rs1,C,T,0.001,,,,100,,"]);
        let mut db = StagingDb::create(&dir.path().join("export.1.db")).unwrap();
        db.load_prestage(&input).unwrap();
        assert!(matches!(
            transform(&mut db),
            Err(PipelineError::EmptyStage)
        ));
    }
}
