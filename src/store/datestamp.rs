use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use tracing::warn;

/// Fetch the database's latest-modification time, or `None` if it has
/// never been modified.
pub async fn get(conn: &mut PgConnection) -> Result<Option<DateTime<Utc>>, crate::error::StoreError> {
    let row = sqlx::query("SELECT t FROM datestamp LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;
    Ok(match row {
        Some(row) => Some(row.try_get("t")?),
        None => None,
    })
}

/// Set the database datestamp to now. Repairs the singleton invariant if
/// more than one row has ever been observed.
pub async fn bump(conn: &mut PgConnection) -> Result<(), crate::error::StoreError> {
    let now = crate::datecodec::now();
    let rows = sqlx::query("SELECT COUNT(*) AS n FROM datestamp")
        .fetch_one(&mut *conn)
        .await?;
    let count: i64 = rows.try_get("n")?;

    if count > 1 {
        warn!(count, "multiple datestamp rows found, repairing");
        sqlx::query("DELETE FROM datestamp").execute(&mut *conn).await?;
        sqlx::query("INSERT INTO datestamp (t) VALUES ($1)")
            .bind(now)
            .execute(&mut *conn)
            .await?;
    } else if count == 1 {
        sqlx::query("UPDATE datestamp SET t = $1").bind(now).execute(&mut *conn).await?;
    } else {
        sqlx::query("INSERT INTO datestamp (t) VALUES ($1)")
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
