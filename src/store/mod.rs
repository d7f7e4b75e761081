pub mod datestamp;
pub mod format;
pub mod item;
pub mod record;
pub mod set;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

pub use format::Format;
pub use item::Item;
pub use record::Record;
pub use set::Set;

use crate::error::StoreError;

/// Handle to the persistent store. Holds the connection pool; callers
/// obtain a transaction per unit of work and pass the connection through
/// to the per-entity operations below.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Add the `oai_dc` format if it is not already present. Required by
    /// every deployment since OAI-PMH mandates Dublin Core support.
    pub async fn ensure_oai_dc_exists(&self) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        if !format::exists(&mut tx, "oai_dc", false).await? {
            format::create_or_update(
                &mut tx,
                "oai_dc",
                "http://www.openarchives.org/OAI/2.0/oai_dc/",
                "http://www.openarchives.org/OAI/2.0/oai_dc.xsd",
            )
            .await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Hard-remove every soft-deleted Record, Format and Item, in that
    /// order (records first, so no foreign key ever dangles mid-purge),
    /// and bump the global datestamp iff any row was actually removed.
    pub async fn purge_deleted(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        let records = sqlx::query("DELETE FROM records WHERE deleted")
            .execute(&mut *conn)
            .await?;
        let formats = sqlx::query("DELETE FROM formats WHERE deleted")
            .execute(&mut *conn)
            .await?;
        let items = sqlx::query("DELETE FROM items WHERE deleted")
            .execute(&mut *conn)
            .await?;
        let purged = records.rows_affected() + formats.rows_affected() + items.rows_affected();
        if purged > 0 {
            datestamp::bump(conn).await?;
        }
        Ok(())
    }
}

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
