// ==============================================================================
// resolver.rs - Phenotype Resolution
// ==============================================================================
// Description: Resolves a caller-supplied phenotype name or id to a canonical
//              phenotype record in the destination store
// ==============================================================================

use sqlx::MySqlPool;
use tracing::info;

use crate::error::PipelineError;
use crate::models::PhenotypeIdentity;

/// Resolves a phenotype token to its canonical record.
///
/// A purely numeric token is looked up by id, anything else by name. Zero
/// matches and name collisions are both fatal; this runs before any file I/O
/// so invalid invocations fail fast.
pub async fn resolve_phenotype(
    pool: &MySqlPool,
    token: &str,
) -> Result<PhenotypeIdentity, PipelineError> {
    let phenotypes = if is_numeric(token) {
        let id: i64 = token
            .parse()
            .map_err(|_| PipelineError::PhenotypeNotFound(token.to_string()))?;
        sqlx::query_as::<_, PhenotypeIdentity>("SELECT id, name FROM phenotype WHERE id = ?")
            .bind(id)
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query_as::<_, PhenotypeIdentity>("SELECT id, name FROM phenotype WHERE name = ?")
            .bind(token)
            .fetch_all(pool)
            .await?
    };

    let mut phenotypes = phenotypes.into_iter();
    match (phenotypes.next(), phenotypes.next()) {
        (None, _) => Err(PipelineError::PhenotypeNotFound(token.to_string())),
        (Some(phenotype), None) => {
            info!(
                "Resolved phenotype {:?} to id {} ({})",
                token, phenotype.id, phenotype.name
            );
            Ok(phenotype)
        }
        // ids are unique, so only a name lookup can land here
        (Some(_), Some(_)) => Err(PipelineError::AmbiguousPhenotype(token.to_string())),
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}
