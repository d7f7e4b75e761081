#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::sync::{Once, OnceLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use kuha_oai::provider::MetadataProvider;
use kuha_oai::store::Store;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

static MIGRATOR: Migrator = sqlx::migrate!();

pub const OAI_DC_PREFIX: &str = "oai_dc";
pub const OAI_DC_NAMESPACE: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";
pub const OAI_DC_SCHEMA: &str = "http://www.openarchives.org/OAI/2.0/oai_dc.xsd";

/// A well-formed `oai_dc` record body with the given title, valid against
/// `xml::validate` for the bootstrap format.
pub fn oai_dc_xml(title: &str) -> String {
    format!(
        r#"<oai_dc:dc xmlns:oai_dc="{OAI_DC_NAMESPACE}"
                   xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
                   xmlns:dc="http://purl.org/dc/elements/1.1/"
                   xsi:schemaLocation="{OAI_DC_NAMESPACE} {OAI_DC_SCHEMA}">
            <dc:title>{title}</dc:title>
        </oai_dc:dc>"#
    )
}

/// A configurable [`MetadataProvider`] test double: every method reads
/// from plain fields set up by the test, no network or filesystem access.
#[derive(Clone, Default)]
pub struct StubProvider {
    pub formats: Vec<(String, String, String)>,
    pub identifiers: Vec<String>,
    pub changed: HashMap<String, bool>,
    pub sets: HashMap<String, Vec<(String, String)>>,
    pub records: HashMap<(String, String), Option<String>>,
}

impl StubProvider {
    pub fn with_oai_dc() -> Self {
        Self {
            formats: vec![(
                OAI_DC_PREFIX.to_string(),
                OAI_DC_NAMESPACE.to_string(),
                OAI_DC_SCHEMA.to_string(),
            )],
            ..Default::default()
        }
    }

    pub fn with_record(mut self, identifier: &str, title: &str) -> Self {
        self.identifiers.push(identifier.to_string());
        self.records.insert(
            (identifier.to_string(), OAI_DC_PREFIX.to_string()),
            Some(oai_dc_xml(title)),
        );
        self
    }

    pub fn with_sets(mut self, identifier: &str, sets: &[(&str, &str)]) -> Self {
        self.sets.insert(
            identifier.to_string(),
            sets.iter()
                .map(|(spec, name)| (spec.to_string(), name.to_string()))
                .collect(),
        );
        self
    }
}

impl MetadataProvider for StubProvider {
    fn formats(&self) -> BoxFuture<'_, anyhow::Result<Vec<(String, String, String)>>> {
        let formats = self.formats.clone();
        Box::pin(async move { Ok(formats) })
    }

    fn identifiers(&self) -> BoxFuture<'_, anyhow::Result<Vec<String>>> {
        let identifiers = self.identifiers.clone();
        Box::pin(async move { Ok(identifiers) })
    }

    fn has_changed<'a>(
        &'a self,
        identifier: &'a str,
        _since: DateTime<Utc>,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        let changed = self.changed.get(identifier).copied().unwrap_or(true);
        Box::pin(async move { Ok(changed) })
    }

    fn get_sets<'a>(
        &'a self,
        identifier: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<(String, String)>>> {
        let sets = self.sets.get(identifier).cloned().unwrap_or_default();
        Box::pin(async move { Ok(sets) })
    }

    fn get_record<'a>(
        &'a self,
        identifier: &'a str,
        prefix: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        let xml = self
            .records
            .get(&(identifier.to_string(), prefix.to_string()))
            .cloned()
            .flatten();
        Box::pin(async move { Ok(xml) })
    }
}

/// Serializes integration tests against the same database, the way a
/// single shared schema requires when tests run concurrently.
pub async fn acquire_test_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().await
}

pub async fn setup_test_store() -> anyhow::Result<Store> {
    Ok(Store::new(setup_test_pool().await?))
}

pub async fn setup_test_pool() -> anyhow::Result<PgPool> {
    load_test_env();
    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL was not found; expected .env.test")?;

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(error) if error.to_string().contains("does not exist") => {
            ensure_test_database_exists(&database_url).await?;
            PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?
        }
        Err(error) => return Err(error.into()),
    };

    reset_test_database(&pool).await?;
    Ok(pool)
}

fn load_test_env() {
    static LOAD_ENV: Once = Once::new();
    LOAD_ENV.call_once(|| {
        let _ = dotenvy::from_filename_override(".env.test");
    });
}

async fn ensure_test_database_exists(database_url: &str) -> anyhow::Result<()> {
    let connect_options: PgConnectOptions = database_url.parse()?;
    let database_name = connect_options
        .get_database()
        .context("DATABASE_URL is missing a database name")?
        .to_string();
    let admin_options = connect_options.database("postgres");
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(admin_options)
        .await?;

    let create_database_query =
        format!("CREATE DATABASE \"{}\"", database_name.replace('"', "\"\""));

    match sqlx::query(&create_database_query)
        .execute(&admin_pool)
        .await
    {
        Ok(_) => Ok(()),
        Err(error) => {
            if let Some(database_error) = error.as_database_error()
                && database_error.code().as_deref() == Some("42P04")
            {
                return Ok(());
            }
            Err(error.into())
        }
    }
}

async fn reset_test_database(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.undo(pool, 0).await?;
    MIGRATOR.run(pool).await?;
    Ok(())
}
