// ==============================================================================
// models.rs - Pipeline Data Models
// ==============================================================================
// Description: Data structures shared by the variant pipeline stages
// ==============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Canonical phenotype identity, resolved from a caller-supplied name or id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PhenotypeIdentity {
    pub id: i64,
    pub name: String,
}

/// Sex stratification of a GWAS run. One pipeline invocation covers exactly
/// one phenotype/sex combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    All,
    Female,
    Male,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::All => "all",
            Sex::Female => "female",
            Sex::Male => "male",
        }
    }

    /// 1-based index used as the leading digit of exported record ids.
    fn index(&self) -> u8 {
        match self {
            Sex::All => 1,
            Sex::Female => 2,
            Sex::Male => 3,
        }
    }

    /// Prefix for globally unique exported ids: the sex index concatenated
    /// with the phenotype id zero-padded to five digits. For example
    /// sex=all, phenotype 10002 yields "110002"; appending the per-file row
    /// number produces ids like "1100021", "1100022", ...
    pub fn id_prefix(&self, phenotype_id: i64) -> String {
        format!("{}{:05}", self.index(), phenotype_id)
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sex {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Sex::All),
            "female" => Ok(Sex::Female),
            "male" => Ok(Sex::Male),
            other => Err(PipelineError::InvalidSex(other.to_string())),
        }
    }
}

/// One row of the exported per-variant file. Field order matches the column
/// order of the destination `phenotype_variant` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantOutputRecord {
    pub id: String,
    pub phenotype_id: i64,
    pub sex: String,
    pub chromosome: String,
    pub position: i64,
    pub snp: Option<String>,
    pub allele_reference: Option<String>,
    pub allele_alternate: Option<String>,
    pub p_value: f64,
    pub p_value_nlog: f64,
    pub p_value_nlog_expected: f64,
    pub p_value_r: Option<f64>,
    pub odds_ratio: Option<f64>,
    pub odds_ratio_r: Option<f64>,
    pub n: Option<i64>,
    pub q: Option<f64>,
    pub i: Option<f64>,
    pub show_qq_plot: Option<u8>,
}

/// One row of the exported aggregate file: a (chromosome, 1 Mbp position
/// bucket, 0.01 -log10(p) bucket) cell for Manhattan-plot rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateOutputRecord {
    pub id: String,
    pub phenotype_id: i64,
    pub sex: String,
    pub chromosome: String,
    pub position_abs: i64,
    pub p_value_nlog: f64,
}

/// One row of the exported metadata file. `lambda_gc` is only populated for
/// the chromosome="all" summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub phenotype_id: i64,
    pub sex: String,
    pub chromosome: String,
    pub lambda_gc: Option<f64>,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sex_from_str() {
        assert_eq!("all".parse::<Sex>().unwrap(), Sex::All);
        assert_eq!("female".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("male".parse::<Sex>().unwrap(), Sex::Male);

        // "both" is not a valid stratification
        assert!(matches!(
            "both".parse::<Sex>(),
            Err(PipelineError::InvalidSex(_))
        ));
        assert!(matches!(
            "ALL".parse::<Sex>(),
            Err(PipelineError::InvalidSex(_))
        ));
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(Sex::All.id_prefix(10002), "110002");
        assert_eq!(Sex::Female.id_prefix(10002), "210002");
        assert_eq!(Sex::Male.id_prefix(10002), "310002");

        // ids shorter than five digits are zero-padded
        assert_eq!(Sex::All.id_prefix(7), "100007");
        // ids longer than five digits are kept as-is
        assert_eq!(Sex::All.id_prefix(123456), "1123456");
    }
}
