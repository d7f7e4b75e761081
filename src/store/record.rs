use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};

use crate::error::StoreError;
use crate::xml;

use super::datestamp;

/// A single (identifier, prefix) metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub identifier: String,
    pub prefix: String,
    pub datestamp: DateTime<Utc>,
    pub xml: Option<String>,
    pub deleted: bool,
}

/// Filters accepted by [`list`]. Grouped into a struct the way the
/// teacher's `FetchRecordsParams` groups query parameters.
#[derive(Debug, Default)]
pub struct ListParams<'a> {
    pub identifier: Option<&'a str>,
    pub prefix: Option<&'a str>,
    pub from_date: Option<DateTime<Utc>>,
    pub until_date: Option<DateTime<Utc>>,
    pub set: Option<&'a str>,
    pub ignore_deleted: bool,
    pub offset: Option<&'a str>,
    pub limit: Option<i64>,
}

fn from_row(row: &sqlx::postgres::PgRow) -> Result<Record, sqlx::Error> {
    Ok(Record {
        identifier: row.try_get("identifier")?,
        prefix: row.try_get("prefix")?,
        datestamp: row.try_get("datestamp")?,
        xml: row.try_get("xml")?,
        deleted: row.try_get("deleted")?,
    })
}

pub async fn earliest_datestamp(
    conn: &mut PgConnection,
    ignore_deleted: bool,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let sql = if ignore_deleted {
        "SELECT datestamp FROM records WHERE NOT deleted ORDER BY datestamp LIMIT 1"
    } else {
        "SELECT datestamp FROM records ORDER BY datestamp LIMIT 1"
    };
    let row = sqlx::query(sql).fetch_optional(conn).await?;
    Ok(match row {
        Some(row) => Some(row.try_get("datestamp")?),
        None => None,
    })
}

/// Fetch matching records ordered by identifier. `params.offset` is
/// interpreted as `identifier >= offset`; a negative `limit` is rejected.
pub async fn list(conn: &mut PgConnection, params: ListParams<'_>) -> Result<Vec<Record>, StoreError> {
    if let Some(limit) = params.limit
        && limit < 0
    {
        return Err(StoreError::InvalidLimit(limit));
    }

    let mut sql = String::from(
        "SELECT r.identifier, r.prefix, r.datestamp, r.xml, r.deleted FROM records r",
    );
    if params.set.is_some() {
        sql.push_str(
            " JOIN item_set_links l ON l.item_identifier = r.identifier \
               JOIN sets s ON s.spec = l.set_spec",
        );
    }
    sql.push_str(" WHERE 1 = 1");

    let mut clauses = Vec::new();
    let mut bind_index = 1;
    macro_rules! next_param {
        () => {{
            let n = bind_index;
            bind_index += 1;
            n
        }};
    }

    if params.identifier.is_some() {
        clauses.push(format!(" AND r.identifier = ${}", next_param!()));
    }
    if params.prefix.is_some() {
        clauses.push(format!(" AND r.prefix = ${}", next_param!()));
    }
    if params.from_date.is_some() {
        clauses.push(format!(" AND r.datestamp >= ${}", next_param!()));
    }
    if params.until_date.is_some() {
        clauses.push(format!(" AND r.datestamp <= ${}", next_param!()));
    }
    if params.ignore_deleted {
        clauses.push(" AND NOT r.deleted".to_string());
    }
    if params.set.is_some() {
        clauses.push(format!(" AND s.spec = ${}", next_param!()));
    }
    if params.offset.is_some() {
        clauses.push(format!(" AND r.identifier >= ${}", next_param!()));
    }
    for clause in &clauses {
        sql.push_str(clause);
    }
    sql.push_str(" ORDER BY r.identifier");
    if let Some(limit) = params.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut query = sqlx::query(&sql);
    if let Some(identifier) = params.identifier {
        query = query.bind(identifier);
    }
    if let Some(prefix) = params.prefix {
        query = query.bind(prefix);
    }
    if let Some(from_date) = params.from_date {
        query = query.bind(from_date);
    }
    if let Some(until_date) = params.until_date {
        query = query.bind(until_date);
    }
    if let Some(set) = params.set {
        query = query.bind(set);
    }
    if let Some(offset) = params.offset {
        query = query.bind(offset);
    }

    let rows = query.fetch_all(conn).await?;
    rows.iter().map(from_row).map(|r| r.map_err(StoreError::from)).collect()
}

/// Insert a record, or update an existing one's XML. A no-op update (not
/// currently deleted, and the XML is unchanged) leaves `datestamp`, and
/// therefore the global datestamp, untouched.
pub async fn create_or_update(
    conn: &mut PgConnection,
    identifier: &str,
    prefix: &str,
    xml_text: &str,
) -> Result<Record, StoreError> {
    let format_row = sqlx::query("SELECT namespace, schema FROM formats WHERE prefix = $1")
        .bind(prefix)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::UnknownFormat(prefix.to_string()))?;
    let namespace: String = format_row.try_get("namespace")?;
    let schema: String = format_row.try_get("schema")?;

    let item_exists = sqlx::query("SELECT 1 FROM items WHERE identifier = $1")
        .bind(identifier)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    if !item_exists {
        return Err(StoreError::UnknownIdentifier(identifier.to_string()));
    }

    xml::validate(xml_text, &namespace, &schema)?;

    let existing = sqlx::query("SELECT xml, deleted FROM records WHERE identifier = $1 AND prefix = $2")
        .bind(identifier)
        .bind(prefix)
        .fetch_optional(&mut *conn)
        .await?;

    let now = crate::datecodec::now();

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO records (identifier, prefix, datestamp, xml, deleted) \
                 VALUES ($1, $2, $3, $4, FALSE)",
            )
            .bind(identifier)
            .bind(prefix)
            .bind(now)
            .bind(xml_text)
            .execute(&mut *conn)
            .await?;
            datestamp::bump(conn).await?;
        }
        Some(row) => {
            let current_xml: Option<String> = row.try_get("xml")?;
            let deleted: bool = row.try_get("deleted")?;
            if deleted || current_xml.as_deref() != Some(xml_text) {
                sqlx::query(
                    "UPDATE records SET xml = $3, deleted = FALSE, datestamp = $4 \
                     WHERE identifier = $1 AND prefix = $2",
                )
                .bind(identifier)
                .bind(prefix)
                .bind(xml_text)
                .bind(now)
                .execute(&mut *conn)
                .await?;
                datestamp::bump(conn).await?;
            }
        }
    }

    Ok(Record {
        identifier: identifier.to_string(),
        prefix: prefix.to_string(),
        datestamp: now,
        xml: Some(xml_text.to_string()),
        deleted: false,
    })
}

/// Mark every non-deleted record matching `identifier`/`prefix` (either may
/// be omitted to widen the match) as deleted, bumping the global datestamp
/// iff at least one row changed.
pub async fn mark_deleted(
    conn: &mut PgConnection,
    identifier: Option<&str>,
    prefix: Option<&str>,
) -> Result<u64, StoreError> {
    let now = crate::datecodec::now();
    let result = match (identifier, prefix) {
        (Some(identifier), Some(prefix)) => {
            sqlx::query(
                "UPDATE records SET deleted = TRUE, xml = NULL, datestamp = $3 \
                 WHERE identifier = $1 AND prefix = $2 AND NOT deleted",
            )
            .bind(identifier)
            .bind(prefix)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        (Some(identifier), None) => {
            sqlx::query(
                "UPDATE records SET deleted = TRUE, xml = NULL, datestamp = $2 \
                 WHERE identifier = $1 AND NOT deleted",
            )
            .bind(identifier)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        (None, Some(prefix)) => {
            sqlx::query(
                "UPDATE records SET deleted = TRUE, xml = NULL, datestamp = $2 \
                 WHERE prefix = $1 AND NOT deleted",
            )
            .bind(prefix)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        (None, None) => {
            sqlx::query(
                "UPDATE records SET deleted = TRUE, xml = NULL, datestamp = $1 WHERE NOT deleted",
            )
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
    };

    let changed = result.rows_affected();
    if changed > 0 {
        datestamp::bump(conn).await?;
    }
    Ok(changed)
}

/// The antichain of set specs containing `identifier`: sets whose subsets
/// also contain the record are excluded, so a record in `a:b:c` reports
/// only `a:b:c`, not `a` or `a:b`.
pub async fn set_specs(conn: &mut PgConnection, identifier: &str) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(
        "SELECT s.spec FROM sets s \
         JOIN item_set_links l ON l.set_spec = s.spec \
         WHERE l.item_identifier = $1",
    )
    .bind(identifier)
    .fetch_all(conn)
    .await?;

    let mut specs: Vec<String> = rows
        .iter()
        .map(|row| row.try_get::<String, _>("spec"))
        .collect::<Result<_, _>>()?;

    specs.sort_by_key(|spec| std::cmp::Reverse(spec.matches(':').count()));

    let mut processed = std::collections::HashSet::new();
    let mut result = Vec::new();
    for spec in specs {
        if processed.contains(&spec) {
            continue;
        }
        result.push(spec.clone());
        let mut start = 0;
        while let Some(i) = spec[start..].find(':') {
            let end = start + i;
            processed.insert(spec[..end].to_string());
            start = end + 1;
        }
    }
    Ok(result)
}
