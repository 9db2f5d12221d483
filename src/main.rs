// ==============================================================================
// main.rs - GWAS Variant Pipeline Entry Point
// ==============================================================================
// Description: CLI entry point for the variant import/export pipeline
// ==============================================================================

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gwas_variant_pipeline::error::PipelineError;
use gwas_variant_pipeline::models::Sex;
use gwas_variant_pipeline::pipeline::VariantPipeline;
use gwas_variant_pipeline::resolver;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file of variant summary statistics (CSV with header)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Phenotype name or numeric id, e.g. "test_melanoma" or 10002
    #[arg(short, long)]
    phenotype: Option<String>,

    /// Sex stratification: all, female, or male
    #[arg(short, long)]
    sex: Option<String>,

    /// Drop and recreate the phenotype's partitions before importing
    #[arg(long)]
    reset: bool,

    /// Also import the exported files into the destination database
    #[arg(long)]
    import: bool,

    /// Database URL (or use DATABASE_URL_FILE env var)
    #[arg(long, env)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gwas_variant_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Missing required arguments show usage and exit cleanly
    let (Some(file), Some(phenotype), Some(sex)) = (&args.file, &args.phenotype, &args.sex)
    else {
        Args::command().print_help()?;
        return Ok(());
    };

    // Validation runs before any expensive work: sex, then input file, then
    // phenotype resolution; each failure exits non-zero.
    let sex: Sex = sex.parse()?;

    if !file.exists() {
        return Err(PipelineError::InputNotFound(file.clone()).into());
    }

    let database_url = if let Some(url) = args.database_url.clone() {
        url
    } else if let Ok(file_path) = std::env::var("DATABASE_URL_FILE") {
        std::fs::read_to_string(&file_path)
            .map_err(|e| anyhow::anyhow!("Failed to read DATABASE_URL_FILE: {}", e))?
            .trim()
            .to_string()
    } else {
        anyhow::bail!("DATABASE_URL or DATABASE_URL_FILE must be provided");
    };

    // The destination connection is scoped to this invocation: acquired here,
    // closed before exit on every path.
    let pool = sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    info!("Connected to destination database");

    let result = run(&args, phenotype, sex, file.clone(), pool.clone()).await;
    pool.close().await;
    result
}

async fn run(
    args: &Args,
    phenotype: &str,
    sex: Sex,
    file: PathBuf,
    pool: sqlx::MySqlPool,
) -> Result<()> {
    let identity = resolver::resolve_phenotype(&pool, phenotype).await?;

    let pipeline = VariantPipeline::new(identity, sex, file, pool, args.reset, args.import);
    let paths = pipeline.run().await?;

    info!(
        "Generated files: {}, {}, {}",
        paths.variant.display(),
        paths.aggregate.display(),
        paths.metadata.display()
    );
    Ok(())
}
