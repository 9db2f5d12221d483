// ==============================================================================
// lib.rs - GWAS Variant Pipeline Library
// ==============================================================================
// Description: Library interface for the variant import/export pipeline
// ==============================================================================

pub mod chromosome;
pub mod error;
pub mod export;
pub mod import;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod stage;
pub mod statistics;

#[cfg(test)]
pub(crate) mod testutil;
