// ==============================================================================
// error.rs - Pipeline Error Taxonomy
// ==============================================================================
// Description: Typed errors for the variant import/export pipeline
// ==============================================================================

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the pipeline stages.
///
/// Validation errors (`InvalidSex`, `InputNotFound`, phenotype resolution)
/// are checked before any expensive work starts. Destination-side errors are
/// never absorbed: they abort the run and roll back the import transaction.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sex must be all, female, or male (got {0:?})")]
    InvalidSex(String),

    #[error("input file does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("phenotype does not exist: {0}")]
    PhenotypeNotFound(String),

    #[error("more than one phenotype was found with the name {0:?}; specify the phenotype id instead")]
    AmbiguousPhenotype(String),

    #[error("stage table is empty; summary statistics are undefined")]
    EmptyStage,

    #[error("identifier contains characters outside [A-Za-z0-9_]: {0:?}")]
    InvalidIdentifier(String),

    #[error("statistics error: {0}")]
    Stats(String),

    #[error("staging database error: {0}")]
    Staging(#[from] rusqlite::Error),

    #[error("destination database error: {0}")]
    Destination(#[from] sqlx::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
