use std::sync::OnceLock;

use regex::Regex;
use sqlx::{PgConnection, Row};

use crate::error::StoreError;

/// An OAI set: a colon-delimited hierarchical spec plus a human-readable
/// name. `a:b:c` implies membership in `a` and `a:b` too, but the store
/// itself does not infer that; see `reconciler::update_sets` for where
/// ancestors get synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    pub spec: String,
    pub name: String,
}

/// The set-spec pattern from the OAI-PMH XML schema: one or more
/// URL-unreserved-character segments joined by `:`.
fn spec_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9\-_.!~*'()]+(:[A-Za-z0-9\-_.!~*'()]+)*$").unwrap()
    })
}

pub fn validate_spec(spec: &str) -> Result<(), StoreError> {
    if spec_pattern().is_match(spec) {
        Ok(())
    } else {
        Err(StoreError::InvalidSetSpec(spec.to_string()))
    }
}

pub async fn list(conn: &mut PgConnection) -> Result<Vec<Set>, StoreError> {
    let rows = sqlx::query("SELECT spec, name FROM sets ORDER BY spec")
        .fetch_all(conn)
        .await?;
    rows.into_iter()
        .map(|row| {
            Ok(Set {
                spec: row.try_get("spec")?,
                name: row.try_get("name")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()
        .map_err(StoreError::from)
}

pub async fn create_or_update(
    conn: &mut PgConnection,
    spec: &str,
    name: &str,
) -> Result<Set, StoreError> {
    validate_spec(spec)?;
    sqlx::query(
        "INSERT INTO sets (spec, name) VALUES ($1, $2) \
         ON CONFLICT (spec) DO UPDATE SET name = $2",
    )
    .bind(spec)
    .bind(name)
    .execute(conn)
    .await?;
    Ok(Set {
        spec: spec.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hierarchical_specs() {
        assert!(validate_spec("a").is_ok());
        assert!(validate_spec("a:b:c").is_ok());
        assert!(validate_spec("music:classical.romantic").is_ok());
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(validate_spec("").is_err());
        assert!(validate_spec(":a").is_err());
        assert!(validate_spec("a::b").is_err());
        assert!(validate_spec("a b").is_err());
    }
}
