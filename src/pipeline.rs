// ==============================================================================
// pipeline.rs - Pipeline Orchestration
// ==============================================================================
// Description: Drives the staged variant pipeline: staging load, transform,
//              export, and optional destination import
// ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use sqlx::MySqlPool;
use tracing::{info, warn};

use crate::export;
use crate::import::PartitionLoader;
use crate::models::{PhenotypeIdentity, Sex};
use crate::stage::StagingDb;
use crate::statistics;

/// Deterministic per-run file paths, derived from the phenotype id and placed
/// next to the input file. Kept on disk after a successful run so every stage
/// boundary stays inspectable; only the in-database prestage table is dropped
/// once consumed.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub staging_db: PathBuf,
    pub variant: PathBuf,
    pub aggregate: PathBuf,
    pub metadata: PathBuf,
}

impl PipelinePaths {
    pub fn new(input_file: &Path, phenotype_id: i64) -> Self {
        let dir = input_file.parent().unwrap_or_else(|| Path::new("."));
        Self {
            staging_db: dir.join(format!("export.{phenotype_id}.db")),
            variant: dir.join(format!("export-variant.{phenotype_id}.csv")),
            aggregate: dir.join(format!("export-aggregate.{phenotype_id}.csv")),
            metadata: dir.join(format!("export-metadata.{phenotype_id}.csv")),
        }
    }

    /// Leftover outputs from an earlier run are deleted with a warning, never
    /// reused, so re-runs stay idempotent.
    pub fn remove_existing(&self) -> std::io::Result<()> {
        for path in [&self.staging_db, &self.variant, &self.aggregate, &self.metadata] {
            if path.exists() {
                warn!("{} already exists and will be deleted", path.display());
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// One pipeline invocation: a single phenotype/sex combination processed as a
/// bounded batch job. Stages hand off through durable outputs (staging tables
/// and export files), not in-memory structures.
pub struct VariantPipeline {
    phenotype: PhenotypeIdentity,
    sex: Sex,
    input_file: PathBuf,
    pool: MySqlPool,
    reset: bool,
    import: bool,
}

impl VariantPipeline {
    pub fn new(
        phenotype: PhenotypeIdentity,
        sex: Sex,
        input_file: PathBuf,
        pool: MySqlPool,
        reset: bool,
        import: bool,
    ) -> Self {
        Self {
            phenotype,
            sex,
            input_file,
            pool,
            reset,
            import,
        }
    }

    pub async fn run(&self) -> Result<PipelinePaths> {
        let mut timer = StageTimer::new();
        info!(
            "Processing phenotype {} ({}), sex {}",
            self.phenotype.id, self.phenotype.name, self.sex
        );

        let paths = PipelinePaths::new(&self.input_file, self.phenotype.id);
        paths
            .remove_existing()
            .context("Failed to remove leftover output files")?;

        let mut db = StagingDb::create(&paths.staging_db)
            .context("Failed to create staging database")?;
        timer.log_step("Created staging database");

        db.load_prestage(&self.input_file)
            .context("Failed to bulk-load input file into prestage")?;
        timer.log_step("Loaded input file into prestage");

        let stats = statistics::transform(&mut db)
            .context("Failed to transform staged variants")?;
        timer.log_step("Filtered, ordered, and transformed variants");

        let counts = export::export_all(
            &db,
            &self.phenotype,
            self.sex,
            &stats,
            &paths.variant,
            &paths.aggregate,
            &paths.metadata,
        )
        .context("Failed to export variant files")?;
        timer.log_step("Exported variant, aggregate, and metadata files");

        if self.import {
            let loader = PartitionLoader::new(&self.pool, self.phenotype.id, self.sex);
            loader
                .import(&paths.variant, &paths.aggregate, &paths.metadata, self.reset)
                .await
                .context("Failed to import exported files into destination")?;
            timer.log_step("Imported variants into destination");
        }

        info!(
            "Done: {} variants, {} aggregate buckets, {} dropped rows, lambda-GC {:.4}",
            counts.variants, counts.aggregates, stats.dropped, stats.lambda_gc
        );
        Ok(paths)
    }
}

/// Per-stage progress timing: total elapsed plus elapsed since the previous
/// step, mirrored in every stage log line.
struct StageTimer {
    start: Instant,
    previous: Instant,
}

impl StageTimer {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            previous: now,
        }
    }

    fn log_step(&mut self, message: &str) {
        let now = Instant::now();
        info!(
            "[{:.1} s, +{:.1} s] {}",
            now.duration_since(self.start).as_secs_f64(),
            now.duration_since(self.previous).as_secs_f64(),
            message
        );
        self.previous = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derived_from_phenotype_id() {
        let paths = PipelinePaths::new(Path::new("/data/input/melanoma.csv"), 10002);
        assert_eq!(
            paths.staging_db,
            Path::new("/data/input/export.10002.db")
        );
        assert_eq!(
            paths.variant,
            Path::new("/data/input/export-variant.10002.csv")
        );
        assert_eq!(
            paths.aggregate,
            Path::new("/data/input/export-aggregate.10002.csv")
        );
        assert_eq!(
            paths.metadata,
            Path::new("/data/input/export-metadata.10002.csv")
        );
    }

    #[test]
    fn test_remove_existing_clears_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("input.csv");
        let paths = PipelinePaths::new(&input, 7);

        std::fs::write(&paths.variant, b"stale").unwrap();
        std::fs::write(&paths.metadata, b"stale").unwrap();

        paths.remove_existing().unwrap();
        assert!(!paths.variant.exists());
        assert!(!paths.metadata.exists());
    }
}
