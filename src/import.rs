// ==============================================================================
// import.rs - Destination Partition Loader
// ==============================================================================
// Description: Ensures the per-phenotype partitions exist, then bulk-loads the
//              exported files into MySQL inside one transaction
// ==============================================================================

use std::path::Path;

use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::info;

use crate::error::PipelineError;
use crate::models::{AggregateOutputRecord, MetadataRecord, Sex, VariantOutputRecord};

const VARIANT_TABLE: &str = "phenotype_variant";
const AGGREGATE_TABLE: &str = "phenotype_aggregate";

/// One partition per phenotype, three sex subpartitions per table.
const EXPECTED_SUBPARTITIONS: i64 = 6;

/// Rows bound per INSERT statement; 18 columns per row stays well under
/// MySQL's placeholder limit.
const INSERT_CHUNK_ROWS: usize = 500;

/// Loads the exported files into the destination store.
///
/// Idempotent and re-runnable: partitions are (re)created when `reset` is
/// requested or the expected partition set is incomplete, metadata rows are
/// upserted, and all DML runs inside a single transaction so a failure leaves
/// the destination in its pre-import state. Partition DDL necessarily runs
/// before the transaction since MySQL DDL commits implicitly.
pub struct PartitionLoader<'a> {
    pool: &'a MySqlPool,
    phenotype_id: i64,
    sex: Sex,
}

impl<'a> PartitionLoader<'a> {
    pub fn new(pool: &'a MySqlPool, phenotype_id: i64, sex: Sex) -> Self {
        Self {
            pool,
            phenotype_id,
            sex,
        }
    }

    pub async fn import(
        &self,
        variant_path: &Path,
        aggregate_path: &Path,
        metadata_path: &Path,
        reset: bool,
    ) -> Result<(), PipelineError> {
        self.ensure_partitions(reset).await?;

        let mut tx = self.pool.begin().await?;

        let variants = self.load_variants(&mut tx, variant_path).await?;
        info!("Loaded {} rows into {}", variants, VARIANT_TABLE);

        let aggregates = self.load_aggregates(&mut tx, aggregate_path).await?;
        info!("Loaded {} rows into {}", aggregates, AGGREGATE_TABLE);

        let metadata = self.upsert_metadata(&mut tx, metadata_path).await?;
        info!("Upserted {} phenotype_metadata rows", metadata);

        self.update_import_log(&mut tx).await?;

        tx.commit().await?;
        info!("Import committed for phenotype {} ({})", self.phenotype_id, self.sex);
        Ok(())
    }

    /// Recreates the phenotype's partition (with its three sex subpartitions)
    /// on both wide tables when requested or when the existing set is absent
    /// or incomplete. Dropping is destructive and only happens on those
    /// explicit conditions.
    async fn ensure_partitions(&self, reset: bool) -> Result<(), PipelineError> {
        let partition_name = self.phenotype_id.to_string();

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.PARTITIONS
            WHERE TABLE_NAME IN ('phenotype_variant', 'phenotype_aggregate')
            AND PARTITION_NAME = ?",
        )
        .bind(&partition_name)
        .fetch_one(self.pool)
        .await?;

        if !reset && total == EXPECTED_SUBPARTITIONS {
            return Ok(());
        }

        let partition = quote_identifier(&partition_name)?;
        for table in [VARIANT_TABLE, AGGREGATE_TABLE] {
            let existing: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.PARTITIONS
                WHERE TABLE_NAME = ? AND PARTITION_NAME = ?",
            )
            .bind(table)
            .bind(&partition_name)
            .fetch_one(self.pool)
            .await?;

            if existing > 0 {
                info!("Dropping partition {} on {}", partition, table);
                sqlx::query(&format!("ALTER TABLE {table} DROP PARTITION {partition}"))
                    .execute(self.pool)
                    .await?;
            }

            info!("Creating partition {} on {}", partition, table);
            sqlx::query(&add_partition_sql(table, self.phenotype_id)?)
                .execute(self.pool)
                .await?;
        }

        Ok(())
    }

    fn subpartition(&self) -> Result<String, PipelineError> {
        subpartition_name(self.phenotype_id, self.sex)
    }

    async fn load_variants(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
        path: &Path,
    ) -> Result<u64, PipelineError> {
        let subpartition = self.subpartition()?;
        let head = format!(
            "INSERT INTO {VARIANT_TABLE} PARTITION ({subpartition}) (
                id, phenotype_id, sex, chromosome, position, snp,
                allele_reference, allele_alternate, p_value, p_value_nlog,
                p_value_nlog_expected, p_value_r, odds_ratio, odds_ratio_r,
                n, q, i, show_qq_plot
            ) "
        );

        let mut reader = csv::Reader::from_path(path)?;
        let mut loaded: u64 = 0;
        let mut chunk: Vec<VariantOutputRecord> = Vec::with_capacity(INSERT_CHUNK_ROWS);

        for record in reader.deserialize() {
            chunk.push(record?);
            if chunk.len() == INSERT_CHUNK_ROWS {
                loaded += self.insert_variant_chunk(tx, &head, &chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            loaded += self.insert_variant_chunk(tx, &head, &chunk).await?;
        }

        Ok(loaded)
    }

    async fn insert_variant_chunk(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
        head: &str,
        chunk: &[VariantOutputRecord],
    ) -> Result<u64, PipelineError> {
        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(head);
        builder.push_values(chunk, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.phenotype_id)
                .push_bind(r.sex.as_str())
                .push_bind(r.chromosome.as_str())
                .push_bind(r.position)
                .push_bind(r.snp.as_deref())
                .push_bind(r.allele_reference.as_deref())
                .push_bind(r.allele_alternate.as_deref())
                .push_bind(r.p_value)
                .push_bind(r.p_value_nlog)
                .push_bind(r.p_value_nlog_expected)
                .push_bind(r.p_value_r)
                .push_bind(r.odds_ratio)
                .push_bind(r.odds_ratio_r)
                .push_bind(r.n)
                .push_bind(r.q)
                .push_bind(r.i)
                .push_bind(r.show_qq_plot.unwrap_or(0));
        });

        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn load_aggregates(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
        path: &Path,
    ) -> Result<u64, PipelineError> {
        let subpartition = self.subpartition()?;
        let head = format!(
            "INSERT INTO {AGGREGATE_TABLE} PARTITION ({subpartition}) (
                id, phenotype_id, sex, chromosome, position_abs, p_value_nlog
            ) "
        );

        let mut reader = csv::Reader::from_path(path)?;
        let mut loaded: u64 = 0;
        let mut chunk: Vec<AggregateOutputRecord> = Vec::with_capacity(INSERT_CHUNK_ROWS);

        for record in reader.deserialize() {
            chunk.push(record?);
            if chunk.len() == INSERT_CHUNK_ROWS {
                loaded += self.insert_aggregate_chunk(tx, &head, &chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            loaded += self.insert_aggregate_chunk(tx, &head, &chunk).await?;
        }

        Ok(loaded)
    }

    async fn insert_aggregate_chunk(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
        head: &str,
        chunk: &[AggregateOutputRecord],
    ) -> Result<u64, PipelineError> {
        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(head);
        builder.push_values(chunk, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.phenotype_id)
                .push_bind(r.sex.as_str())
                .push_bind(r.chromosome.as_str())
                .push_bind(r.position_abs)
                .push_bind(r.p_value_nlog);
        });

        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    /// Insert-or-update keyed on (phenotype_id, sex, chromosome).
    async fn upsert_metadata(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
        path: &Path,
    ) -> Result<u64, PipelineError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut upserted: u64 = 0;

        for record in reader.deserialize() {
            let record: MetadataRecord = record?;
            sqlx::query(
                "INSERT INTO phenotype_metadata
                    (phenotype_id, sex, chromosome, lambda_gc, count)
                VALUES (?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    lambda_gc = VALUES(lambda_gc),
                    count = VALUES(count)",
            )
            .bind(record.phenotype_id)
            .bind(record.sex.as_str())
            .bind(record.chromosome.as_str())
            .bind(record.lambda_gc)
            .bind(record.count)
            .execute(&mut **tx)
            .await?;
            upserted += 1;
        }

        Ok(upserted)
    }

    /// Stamps the phenotype's last-import summary from the chromosome="all"
    /// metadata row.
    async fn update_import_log(
        &self,
        tx: &mut sqlx::Transaction<'_, MySql>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE phenotype SET
                import_count = (
                    SELECT count FROM phenotype_metadata
                    WHERE phenotype_id = ? AND sex = ? AND chromosome = 'all'
                ),
                import_date = NOW()
            WHERE id = ?",
        )
        .bind(self.phenotype_id)
        .bind(self.sex.as_str())
        .bind(self.phenotype_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn add_partition_sql(table: &str, phenotype_id: i64) -> Result<String, PipelineError> {
    let partition = quote_identifier(&phenotype_id.to_string())?;
    let all = quote_identifier(&format!("{phenotype_id}_all"))?;
    let female = quote_identifier(&format!("{phenotype_id}_female"))?;
    let male = quote_identifier(&format!("{phenotype_id}_male"))?;
    Ok(format!(
        "ALTER TABLE {table} ADD PARTITION (PARTITION {partition} VALUES IN ({phenotype_id}) (
            SUBPARTITION {all},
            SUBPARTITION {female},
            SUBPARTITION {male}
        ))"
    ))
}

fn subpartition_name(phenotype_id: i64, sex: Sex) -> Result<String, PipelineError> {
    quote_identifier(&format!("{phenotype_id}_{}", sex.as_str()))
}

/// Identifiers cannot be bound as statement parameters, so every interpolated
/// partition or subpartition name passes through this allow-list before it
/// reaches a DDL or DML string.
fn quote_identifier(raw: &str) -> Result<String, PipelineError> {
    if raw.is_empty()
        || !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(PipelineError::InvalidIdentifier(raw.to_string()));
    }
    Ok(format!("`{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier_allow_list() {
        assert_eq!(quote_identifier("10002_all").unwrap(), "`10002_all`");
        assert_eq!(quote_identifier("10002").unwrap(), "`10002`");

        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("10002`; DROP TABLE phenotype; --").is_err());
        assert!(quote_identifier("10002 all").is_err());
        assert!(quote_identifier("10002-all").is_err());
    }

    #[test]
    fn test_add_partition_sql() {
        let sql = add_partition_sql(VARIANT_TABLE, 10002).unwrap();
        assert!(sql.contains("ALTER TABLE phenotype_variant ADD PARTITION"));
        assert!(sql.contains("PARTITION `10002` VALUES IN (10002)"));
        assert!(sql.contains("SUBPARTITION `10002_all`"));
        assert!(sql.contains("SUBPARTITION `10002_female`"));
        assert!(sql.contains("SUBPARTITION `10002_male`"));
    }

    #[test]
    fn test_subpartition_name_per_sex() {
        assert_eq!(
            subpartition_name(10002, Sex::Female).unwrap(),
            "`10002_female`"
        );
        assert_eq!(subpartition_name(10002, Sex::All).unwrap(), "`10002_all`");
    }
}
