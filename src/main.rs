use std::path::Path;

use chrono::{DateTime, Utc};
use clap::Parser;
use kuha_oai::config::{Cli, ImporterConfig, ProviderRegistry};
use kuha_oai::reconciler::Reconciler;
use kuha_oai::store::{Store, create_pool};
use kuha_oai::{datecodec, init_tracing};
use tracing::{error, info, warn};

/// Read the last successful harvest time. A missing or malformed file is
/// treated as "no prior harvest" rather than an error, so a first run or a
/// hand-edited file never blocks the importer.
fn read_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let contents = std::fs::read_to_string(path).ok()?;
    match datecodec::parse_date(contents.trim(), datecodec::start_of_day()) {
        Ok((at, _)) => Some(at),
        Err(reason) => {
            warn!(path = %path.display(), %reason, "ignoring unreadable timestamp file");
            None
        }
    }
}

fn write_timestamp(path: &Path, at: DateTime<Utc>) -> std::io::Result<()> {
    std::fs::write(path, datecodec::format_datestamp(at))
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    cli.apply_env()?;
    let config = ImporterConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    let store = Store::new(pool);
    store.ensure_oai_dc_exists().await?;

    let since = if config.force_update {
        None
    } else {
        config.timestamp_file.as_deref().and_then(read_timestamp)
    };

    // Captured before the harvest starts, not after: anything modified by
    // the provider while this run is in progress is picked up next time.
    let pre_harvest = datecodec::now();

    let registry = ProviderRegistry::with_default();
    let provider = registry.build(&config.metadata_provider_name, &config.metadata_provider_args)?;

    let reconciler = Reconciler::new(store);
    reconciler
        .run(provider.as_ref(), since, config.deleted_records.purge(), false)
        .await?;

    if let Some(path) = &config.timestamp_file {
        write_timestamp(path, pre_harvest)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => info!("harvest complete"),
        Err(error) => {
            error!(%error, "harvest failed");
            std::process::exit(1);
        }
    }
}
