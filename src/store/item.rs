use sqlx::{PgConnection, Row};

use crate::error::StoreError;

use super::record;

/// An OAI item: the thing an identifier names, independent of any
/// particular metadata format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub identifier: String,
    pub deleted: bool,
}

pub async fn get(conn: &mut PgConnection, identifier: &str) -> Result<Option<Item>, StoreError> {
    let row = sqlx::query("SELECT identifier, deleted FROM items WHERE identifier = $1")
        .bind(identifier)
        .fetch_optional(conn)
        .await?;
    Ok(match row {
        Some(row) => Some(Item {
            identifier: row.try_get("identifier")?,
            deleted: row.try_get("deleted")?,
        }),
        None => None,
    })
}

pub async fn exists(
    conn: &mut PgConnection,
    identifier: &str,
    ignore_deleted: bool,
) -> Result<bool, StoreError> {
    let sql = if ignore_deleted {
        "SELECT 1 FROM items WHERE identifier = $1 AND NOT deleted"
    } else {
        "SELECT 1 FROM items WHERE identifier = $1"
    };
    let row = sqlx::query(sql).bind(identifier).fetch_optional(conn).await?;
    Ok(row.is_some())
}

pub async fn list(conn: &mut PgConnection, ignore_deleted: bool) -> Result<Vec<Item>, StoreError> {
    let sql = if ignore_deleted {
        "SELECT identifier, deleted FROM items WHERE NOT deleted"
    } else {
        "SELECT identifier, deleted FROM items"
    };
    let rows = sqlx::query(sql).fetch_all(conn).await?;
    rows.into_iter()
        .map(|row| {
            Ok(Item {
                identifier: row.try_get("identifier")?,
                deleted: row.try_get("deleted")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()
        .map_err(StoreError::from)
}

/// Insert an item, or undelete an existing one.
pub async fn create_or_update(conn: &mut PgConnection, identifier: &str) -> Result<Item, StoreError> {
    sqlx::query(
        "INSERT INTO items (identifier, deleted) VALUES ($1, FALSE) \
         ON CONFLICT (identifier) DO UPDATE SET deleted = FALSE",
    )
    .bind(identifier)
    .execute(conn)
    .await?;
    Ok(Item {
        identifier: identifier.to_string(),
        deleted: false,
    })
}

/// Soft-delete an item and cascade to every record that names it.
pub async fn mark_deleted(conn: &mut PgConnection, identifier: &str) -> Result<(), StoreError> {
    record::mark_deleted(conn, Some(identifier), None).await?;
    sqlx::query("UPDATE items SET deleted = TRUE WHERE identifier = $1")
        .bind(identifier)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn clear_sets(conn: &mut PgConnection, identifier: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM item_set_links WHERE item_identifier = $1")
        .bind(identifier)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn add_to_set(
    conn: &mut PgConnection,
    identifier: &str,
    set_spec: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO item_set_links (item_identifier, set_spec) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(identifier)
    .bind(set_spec)
    .execute(conn)
    .await?;
    Ok(())
}
