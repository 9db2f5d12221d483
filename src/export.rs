// ==============================================================================
// export.rs - Ordered CSV Export
// ==============================================================================
// Description: Emits the per-variant, per-aggregate-bucket, and per-chromosome
//              metadata files from the staging database
// ==============================================================================

use std::path::Path;

use tracing::info;

use crate::error::PipelineError;
use crate::models::{
    AggregateOutputRecord, MetadataRecord, PhenotypeIdentity, Sex, VariantOutputRecord,
};
use crate::stage::StagingDb;
use crate::statistics::StageStatistics;

/// Row counts of the three generated files.
#[derive(Debug, Clone, Copy)]
pub struct ExportCounts {
    pub variants: u64,
    pub aggregates: u64,
    pub metadata: u64,
}

/// Writes the three export files. All three sort chromosomes by genome order
/// (the chromosome_range insertion order), never lexicographically.
pub fn export_all(
    db: &StagingDb,
    phenotype: &PhenotypeIdentity,
    sex: Sex,
    stats: &StageStatistics,
    variant_path: &Path,
    aggregate_path: &Path,
    metadata_path: &Path,
) -> Result<ExportCounts, PipelineError> {
    let variants = export_variants(db, phenotype, sex, variant_path)?;
    info!("Exported {} variants to {}", variants, variant_path.display());

    let aggregates = export_aggregates(db, phenotype, sex, aggregate_path)?;
    info!(
        "Exported {} aggregate buckets to {}",
        aggregates,
        aggregate_path.display()
    );

    let metadata = export_metadata(db, phenotype, sex, stats, metadata_path)?;
    info!(
        "Exported {} metadata rows to {}",
        metadata,
        metadata_path.display()
    );

    Ok(ExportCounts {
        variants,
        aggregates,
        metadata,
    })
}

/// Every transformed row, ordered by chromosome genome order then ascending
/// p-value. Ids are the sex/phenotype prefix concatenated with the row number
/// assigned over that ordering.
fn export_variants(
    db: &StagingDb,
    phenotype: &PhenotypeIdentity,
    sex: Sex,
    path: &Path,
) -> Result<u64, PipelineError> {
    let id_prefix = sex.id_prefix(phenotype.id);
    let mut writer = csv::Writer::from_path(path)?;

    let mut stmt = db.connection().prepare(
        "SELECT
            s.chromosome,
            s.position,
            s.snp,
            s.allele_reference,
            s.allele_alternate,
            s.p_value,
            s.p_value_nlog,
            s.p_value_nlog_expected,
            s.p_value_r,
            s.odds_ratio,
            s.odds_ratio_r,
            s.n,
            s.q,
            s.i,
            s.show_qq_plot
        FROM stage s
        JOIN chromosome_range cr ON s.chromosome = cr.chromosome
        ORDER BY cr.rowid, s.p_value",
    )?;

    let mut rows = stmt.query([])?;
    let mut row_number: u64 = 0;
    while let Some(row) = rows.next()? {
        row_number += 1;
        writer.serialize(VariantOutputRecord {
            id: format!("{id_prefix}{row_number}"),
            phenotype_id: phenotype.id,
            sex: sex.as_str().to_string(),
            chromosome: row.get(0)?,
            position: row.get(1)?,
            snp: row.get(2)?,
            allele_reference: row.get(3)?,
            allele_alternate: row.get(4)?,
            p_value: row.get(5)?,
            p_value_nlog: row.get(6)?,
            p_value_nlog_expected: row.get(7)?,
            p_value_r: row.get(8)?,
            odds_ratio: row.get(9)?,
            odds_ratio_r: row.get(10)?,
            n: row.get(11)?,
            q: row.get(12)?,
            i: row.get(13)?,
            show_qq_plot: row.get::<_, Option<i64>>(14)?.map(|_| 1),
        })?;
    }
    writer.flush()?;

    Ok(row_number)
}

/// Distinct (chromosome, position bucket, -log10(p) bucket) cells, genome
/// order then bucket value.
///
/// A position bucket emits one row per distinct nlog bucket observed in it;
/// rows are not collapsed further to a single per-position value. The
/// overview plot renders every surviving cell, including the vertical spread
/// within a position bucket.
fn export_aggregates(
    db: &StagingDb,
    phenotype: &PhenotypeIdentity,
    sex: Sex,
    path: &Path,
) -> Result<u64, PipelineError> {
    let id_prefix = sex.id_prefix(phenotype.id);
    let mut writer = csv::Writer::from_path(path)?;

    // cr.rowid is selected so the DISTINCT query may order by it; it is 1:1
    // with the chromosome label and does not widen the distinct tuple
    let mut stmt = db.connection().prepare(
        "SELECT DISTINCT
            cr.rowid AS genome_order,
            s.chromosome,
            s.position_abs_aggregate AS position_abs,
            s.p_value_nlog_aggregate AS p_value_nlog
        FROM stage s
        JOIN chromosome_range cr ON s.chromosome = cr.chromosome
        ORDER BY cr.rowid, s.p_value_nlog_aggregate",
    )?;

    let mut rows = stmt.query([])?;
    let mut row_number: u64 = 0;
    while let Some(row) = rows.next()? {
        row_number += 1;
        writer.serialize(AggregateOutputRecord {
            id: format!("{id_prefix}{row_number}"),
            phenotype_id: phenotype.id,
            sex: sex.as_str().to_string(),
            chromosome: row.get(1)?,
            position_abs: row.get(2)?,
            p_value_nlog: row.get(3)?,
        })?;
    }
    writer.flush()?;

    Ok(row_number)
}

/// The chromosome="all" summary row (lambda-GC plus total count) followed by
/// one per-chromosome count row, in genome order.
fn export_metadata(
    db: &StagingDb,
    phenotype: &PhenotypeIdentity,
    sex: Sex,
    stats: &StageStatistics,
    path: &Path,
) -> Result<u64, PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.serialize(MetadataRecord {
        phenotype_id: phenotype.id,
        sex: sex.as_str().to_string(),
        chromosome: "all".to_string(),
        lambda_gc: Some(stats.lambda_gc),
        count: stats.count,
    })?;
    let mut rows_written: u64 = 1;

    let mut stmt = db.connection().prepare(
        "SELECT s.chromosome, COUNT(*)
        FROM stage s
        JOIN chromosome_range cr ON s.chromosome = cr.chromosome
        GROUP BY s.chromosome
        ORDER BY cr.rowid",
    )?;

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        rows_written += 1;
        writer.serialize(MetadataRecord {
            phenotype_id: phenotype.id,
            sex: sex.as_str().to_string(),
            chromosome: row.get(0)?,
            lambda_gc: None,
            count: row.get(1)?,
        })?;
    }
    writer.flush()?;

    Ok(rows_written)
}
