use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// The contract an external metadata source implements so the reconciler
/// can harvest it into the store. Object-safe (boxed futures, the way the
/// teacher's `Indexer` trait stays object-safe over async methods) so a
/// provider can be selected at runtime from the registry in `config.rs`.
pub trait MetadataProvider: Send + Sync {
    /// Supported metadata formats: prefix -> (namespace, schema location).
    /// Must be non-empty.
    fn formats(&self) -> BoxFuture<'_, anyhow::Result<Vec<(String, String, String)>>>;

    /// All known identifiers. May contain duplicates; the reconciler
    /// deduplicates before diffing against the store.
    fn identifiers(&self) -> BoxFuture<'_, anyhow::Result<Vec<String>>>;

    /// Whether the item has changed since `since`. Only consulted for
    /// incremental harvests.
    fn has_changed<'a>(
        &'a self,
        identifier: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, anyhow::Result<bool>>;

    /// Sets containing the item, as (spec, name) pairs. Hierarchical sets
    /// should include every ancestor spec, but the reconciler tolerates a
    /// provider that omits them (see `reconciler::update_sets`).
    fn get_sets<'a>(
        &'a self,
        identifier: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<(String, String)>>>;

    /// The item's metadata in the given format, or `None` if unavailable
    /// (the reconciler turns that into a tombstone).
    fn get_record<'a>(
        &'a self,
        identifier: &'a str,
        prefix: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
}

/// A minimal, always-available provider returning a single static record.
/// Useful as a smoke-test default and as a worked example of the trait.
pub struct SkeletonProvider;

impl MetadataProvider for SkeletonProvider {
    fn formats(&self) -> BoxFuture<'_, anyhow::Result<Vec<(String, String, String)>>> {
        Box::pin(async {
            Ok(vec![(
                "oai_dc".to_string(),
                "http://www.openarchives.org/OAI/2.0/oai_dc/".to_string(),
                "http://www.openarchives.org/OAI/2.0/oai_dc.xsd".to_string(),
            )])
        })
    }

    fn identifiers(&self) -> BoxFuture<'_, anyhow::Result<Vec<String>>> {
        Box::pin(async { Ok(vec!["oai:example.org:123".to_string()]) })
    }

    fn has_changed<'a>(
        &'a self,
        _identifier: &'a str,
        _since: DateTime<Utc>,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn get_sets<'a>(
        &'a self,
        _identifier: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<(String, String)>>> {
        Box::pin(async {
            Ok(vec![
                ("example".to_string(), "Example Set".to_string()),
                ("example:example".to_string(), "Example Subset".to_string()),
            ])
        })
    }

    fn get_record<'a>(
        &'a self,
        _identifier: &'a str,
        _prefix: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(async {
            Ok(Some(
                r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                           xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
                           xmlns:dc="http://purl.org/dc/elements/1.1/"
                           xsi:schemaLocation="http://www.openarchives.org/OAI/2.0/oai_dc/ http://www.openarchives.org/OAI/2.0/oai_dc.xsd">
                    <dc:title>Example Record</dc:title>
                </oai_dc:dc>"#
                    .to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skeleton_provider_returns_oai_dc() {
        let provider = SkeletonProvider;
        let formats = provider.formats().await.unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].0, "oai_dc");

        let identifiers = provider.identifiers().await.unwrap();
        assert_eq!(identifiers, vec!["oai:example.org:123".to_string()]);

        let record = provider
            .get_record("oai:example.org:123", "oai_dc")
            .await
            .unwrap();
        assert!(record.unwrap().contains("Example Record"));
    }
}
