use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::HarvestError;
use crate::provider::MetadataProvider;
use crate::store::{Store, item, record, set};

/// Reconciles a [`MetadataProvider`] against the store: formats, then
/// items, then per-item sets and records, each phase its own commit unit.
pub struct Reconciler {
    store: Store,
}

impl Reconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Run a full reconciliation pass. `since`, when given, skips items the
    /// provider reports as unchanged. `purge` hard-removes soft-deleted
    /// rows after each phase (set when `deleted_records = no`). `dry_run`
    /// performs every read but commits nothing.
    pub async fn run(
        &self,
        provider: &dyn MetadataProvider,
        since: Option<DateTime<Utc>>,
        purge: bool,
        dry_run: bool,
    ) -> Result<(), HarvestError> {
        let prefixes = self.update_formats(provider, purge, dry_run).await?;
        let identifiers = self.update_items(provider, purge, dry_run).await?;
        self.update_records(provider, &identifiers, &prefixes, since, dry_run)
            .await;
        Ok(())
    }

    pub async fn update_formats(
        &self,
        provider: &dyn MetadataProvider,
        purge: bool,
        dry_run: bool,
    ) -> Result<Vec<String>, HarvestError> {
        debug!("updating metadata formats");
        let new_formats = provider
            .formats()
            .await
            .map_err(|e| HarvestError::Provider(e.to_string()))?;
        if new_formats.is_empty() {
            return Err(HarvestError::NoFormats);
        }

        let run = async {
            let mut tx = self.store.begin().await?;
            let old_formats = crate::store::format::list(&mut tx, None, true).await?;
            let new_prefixes: HashSet<&str> =
                new_formats.iter().map(|(prefix, _, _)| prefix.as_str()).collect();

            let mut removed = 0;
            for old in &old_formats {
                if !new_prefixes.contains(old.prefix.as_str()) {
                    if !dry_run {
                        crate::store::format::mark_deleted(&mut tx, &old.prefix).await?;
                    }
                    removed += 1;
                }
            }

            let old_prefixes: HashSet<&str> =
                old_formats.iter().map(|f| f.prefix.as_str()).collect();
            let mut added = 0;
            for (prefix, namespace, schema) in &new_formats {
                if !dry_run {
                    crate::store::format::create_or_update(&mut tx, prefix, namespace, schema)
                        .await?;
                }
                if !old_prefixes.contains(prefix.as_str()) {
                    added += 1;
                }
            }

            if purge && !dry_run {
                self.store.purge_deleted(&mut tx).await?;
            }

            if dry_run {
                tx.rollback().await?;
            } else {
                tx.commit().await.map_err(crate::error::StoreError::from)?;
            }

            Ok::<(usize, usize), crate::error::StoreError>((removed, added))
        };

        let (removed, added) = run.await?;
        info!(removed, added, "reconciled metadata formats");
        Ok(new_formats.into_iter().map(|(prefix, _, _)| prefix).collect())
    }

    pub async fn update_items(
        &self,
        provider: &dyn MetadataProvider,
        purge: bool,
        dry_run: bool,
    ) -> Result<Vec<String>, HarvestError> {
        debug!("looking for added and removed items");
        let identifiers = provider
            .identifiers()
            .await
            .map_err(|e| HarvestError::Provider(e.to_string()))?;
        let new_identifiers: HashSet<String> = identifiers.into_iter().collect();

        let run = async {
            let mut tx = self.store.begin().await?;
            let old_items = item::list(&mut tx, true).await?;

            let mut removed = 0;
            for old in &old_items {
                if !new_identifiers.contains(&old.identifier) {
                    if !dry_run {
                        item::mark_deleted(&mut tx, &old.identifier).await?;
                    }
                    debug!(identifier = %old.identifier, "item removed");
                    removed += 1;
                }
            }

            let old_identifiers: HashSet<&str> =
                old_items.iter().map(|i| i.identifier.as_str()).collect();
            let mut added = 0;
            for identifier in &new_identifiers {
                if !dry_run {
                    item::create_or_update(&mut tx, identifier).await?;
                }
                if !old_identifiers.contains(identifier.as_str()) {
                    debug!(identifier = %identifier, "item added");
                    added += 1;
                }
            }

            if purge && !dry_run {
                self.store.purge_deleted(&mut tx).await?;
            }

            if dry_run {
                tx.rollback().await?;
            } else {
                tx.commit().await.map_err(crate::error::StoreError::from)?;
            }

            Ok::<(usize, usize), crate::error::StoreError>((removed, added))
        };

        let (removed, added) = run.await?;
        info!(removed, added, "reconciled items");
        Ok(new_identifiers.into_iter().collect())
    }

    /// Refresh the sets an item belongs to. Ancestors the provider omits
    /// (e.g. it reports `a:b:c` but not `a` or `a:b`) are synthesized using
    /// the ancestor's own set spec as its name, so every reported set has a
    /// complete chain of ancestors in the store even when the provider is
    /// sloppy about hierarchy.
    async fn update_sets(
        &self,
        provider: &dyn MetadataProvider,
        identifier: &str,
        dry_run: bool,
    ) -> Result<(), HarvestError> {
        let mut sets = provider
            .get_sets(identifier)
            .await
            .map_err(|e| HarvestError::Provider(e.to_string()))?;
        if sets.is_empty() {
            return Ok(());
        }

        let mut seen: HashSet<String> = sets.iter().map(|(spec, _)| spec.clone()).collect();
        let mut synthesized = Vec::new();
        for (spec, _) in &sets {
            let mut start = 0;
            while let Some(i) = spec[start..].find(':') {
                let end = start + i;
                let ancestor = &spec[..end];
                if !seen.contains(ancestor) {
                    seen.insert(ancestor.to_string());
                    synthesized.push((ancestor.to_string(), ancestor.to_string()));
                }
                start = end + 1;
            }
        }
        sets.extend(synthesized);
        sets.sort_by_key(|(spec, _)| spec.matches(':').count());

        if dry_run {
            return Ok(());
        }

        let mut tx = self.store.begin().await?;
        item::clear_sets(&mut tx, identifier).await?;
        for (spec, name) in &sets {
            set::create_or_update(&mut tx, spec, name).await?;
            item::add_to_set(&mut tx, identifier, spec).await?;
        }
        tx.commit()
            .await
            .map_err(|e| HarvestError::Store(e.into()))?;
        Ok(())
    }

    /// Per-identifier, per-prefix record refresh. Each (identifier,
    /// prefix) is its own commit unit so a failure on one record cannot
    /// roll back records already written, matching the reference
    /// importer's per-record commit discipline.
    pub async fn update_records(
        &self,
        provider: &dyn MetadataProvider,
        identifiers: &[String],
        prefixes: &[String],
        since: Option<DateTime<Utc>>,
        dry_run: bool,
    ) {
        match since {
            Some(since) => info!(%since, "updating records modified since"),
            None => info!("updating all records"),
        }

        let mut updated = 0usize;
        for identifier in identifiers {
            if let Some(since) = since {
                match provider.has_changed(identifier, since).await {
                    Ok(false) => {
                        debug!(%identifier, "skipping unchanged item");
                        continue;
                    }
                    Ok(true) => {}
                    Err(error) => {
                        warn!(%identifier, %error, "failed to check item for changes");
                        continue;
                    }
                }
            }
            debug!(%identifier, "updating item");

            if let Err(error) = self.update_sets(provider, identifier, dry_run).await {
                warn!(%identifier, %error, "failed to update sets for item");
                continue;
            }

            for prefix in prefixes {
                let outcome = self.update_one_record(provider, identifier, prefix, dry_run).await;
                match outcome {
                    Ok(changed) => {
                        if changed {
                            updated += 1;
                        }
                        debug!(%identifier, %prefix, "processed item");
                    }
                    Err(error) => {
                        warn!(%identifier, %prefix, %error, "failed to disseminate format for item");
                    }
                }
            }
        }

        info!(updated, "updated records");
    }

    async fn update_one_record(
        &self,
        provider: &dyn MetadataProvider,
        identifier: &str,
        prefix: &str,
        dry_run: bool,
    ) -> Result<bool, HarvestError> {
        let xml = provider
            .get_record(identifier, prefix)
            .await
            .map_err(|e| HarvestError::Provider(e.to_string()))?;

        if dry_run {
            return Ok(xml.is_some());
        }

        let mut tx = self.store.begin().await?;
        let changed = match xml {
            None => {
                record::mark_deleted(&mut tx, Some(identifier), Some(prefix)).await?;
                false
            }
            Some(xml) => {
                record::create_or_update(&mut tx, identifier, prefix, &xml).await?;
                true
            }
        };
        tx.commit()
            .await
            .map_err(|e| HarvestError::Store(e.into()))?;
        Ok(changed)
    }
}
