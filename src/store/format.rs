use std::sync::OnceLock;

use regex::Regex;
use sqlx::{PgConnection, Row};

use crate::error::StoreError;

use super::record;

/// A supported metadata format: a prefix (e.g. `oai_dc`) together with the
/// namespace and schema location records in that format must declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub prefix: String,
    pub namespace: String,
    pub schema: String,
    pub deleted: bool,
}

/// Characters outside the URL-unreserved set are illegal in a metadata
/// prefix (mirrors the format used for set specs, minus the `:` separator).
fn invalid_prefix_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\-_.!~*'()]").unwrap())
}

fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
    if prefix.is_empty() || invalid_prefix_chars().is_match(prefix) {
        return Err(StoreError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

fn from_row(row: &sqlx::postgres::PgRow) -> Result<Format, sqlx::Error> {
    Ok(Format {
        prefix: row.try_get("prefix")?,
        namespace: row.try_get("namespace")?,
        schema: row.try_get("schema")?,
        deleted: row.try_get("deleted")?,
    })
}

pub async fn exists(
    conn: &mut PgConnection,
    prefix: &str,
    ignore_deleted: bool,
) -> Result<bool, StoreError> {
    let sql = if ignore_deleted {
        "SELECT 1 FROM formats WHERE prefix = $1 AND NOT deleted"
    } else {
        "SELECT 1 FROM formats WHERE prefix = $1"
    };
    let row = sqlx::query(sql).bind(prefix).fetch_optional(conn).await?;
    Ok(row.is_some())
}

/// Return the available metadata formats. If `identifier` is given,
/// restrict to formats that have at least one record (respecting
/// `ignore_deleted` on that record) for that item.
pub async fn list(
    conn: &mut PgConnection,
    identifier: Option<&str>,
    ignore_deleted: bool,
) -> Result<Vec<Format>, StoreError> {
    let rows = match identifier {
        Some(identifier) => {
            let sql = if ignore_deleted {
                "SELECT f.* FROM formats f WHERE EXISTS (
                    SELECT 1 FROM records r
                    WHERE r.prefix = f.prefix AND r.identifier = $1 AND NOT r.deleted
                ) AND NOT f.deleted"
            } else {
                "SELECT f.* FROM formats f WHERE EXISTS (
                    SELECT 1 FROM records r WHERE r.prefix = f.prefix AND r.identifier = $1
                )"
            };
            sqlx::query(sql).bind(identifier).fetch_all(conn).await?
        }
        None => {
            let sql = if ignore_deleted {
                "SELECT * FROM formats WHERE NOT deleted"
            } else {
                "SELECT * FROM formats"
            };
            sqlx::query(sql).fetch_all(conn).await?
        }
    };

    rows.iter().map(from_row).map(|r| r.map_err(StoreError::from)).collect()
}

/// Insert a format, or update an existing one's namespace/schema. If the
/// namespace or schema changed, the previously-indexed records under this
/// prefix are no longer trustworthy and are marked deleted first — same
/// cascade the reconciler relies on when a provider redefines a format.
pub async fn create_or_update(
    conn: &mut PgConnection,
    prefix: &str,
    namespace: &str,
    schema: &str,
) -> Result<Format, StoreError> {
    validate_prefix(prefix)?;

    let existing = sqlx::query("SELECT * FROM formats WHERE prefix = $1")
        .bind(prefix)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO formats (prefix, namespace, schema, deleted) VALUES ($1, $2, $3, FALSE)",
            )
            .bind(prefix)
            .bind(namespace)
            .bind(schema)
            .execute(&mut *conn)
            .await?;
        }
        Some(row) => {
            let current = from_row(&row)?;
            if current.namespace != namespace || current.schema != schema {
                record::mark_deleted(conn, None, Some(prefix)).await?;
            }
            sqlx::query("UPDATE formats SET namespace = $2, schema = $3, deleted = FALSE WHERE prefix = $1")
                .bind(prefix)
                .bind(namespace)
                .bind(schema)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(Format {
        prefix: prefix.to_string(),
        namespace: namespace.to_string(),
        schema: schema.to_string(),
        deleted: false,
    })
}

/// Soft-delete a format and cascade to every record under its prefix.
pub async fn mark_deleted(conn: &mut PgConnection, prefix: &str) -> Result<(), StoreError> {
    record::mark_deleted(conn, None, Some(prefix)).await?;
    sqlx::query("UPDATE formats SET deleted = TRUE WHERE prefix = $1")
        .bind(prefix)
        .execute(conn)
        .await?;
    Ok(())
}
