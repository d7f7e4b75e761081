use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::Parser;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;

use crate::error::ConfigError;
use crate::provider::{MetadataProvider, SkeletonProvider};

/// The repository's policy on deleted records: whether tombstones are
/// kept at all, and if so, whether they are kept forever or only until
/// the next resumption-token window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedRecordsPolicy {
    No,
    Transient,
    Persistent,
}

impl DeletedRecordsPolicy {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "no" => Ok(Self::No),
            "transient" => Ok(Self::Transient),
            "persistent" => Ok(Self::Persistent),
            other => Err(ConfigError::Invalid {
                name: "deleted_records".to_string(),
                reason: format!(
                    "must be one of \"no\", \"transient\", \"persistent\", got {other:?}"
                ),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Transient => "transient",
            Self::Persistent => "persistent",
        }
    }

    /// Tombstones are never exposed and soft-deleted rows should be purged.
    pub fn ignore_deleted(&self) -> bool {
        matches!(self, Self::No)
    }

    pub fn purge(&self) -> bool {
        matches!(self, Self::No)
    }
}

fn admin_email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The email pattern defined in the OAI-PMH XML schema.
    RE.get_or_init(|| Regex::new(r"^\S+@(\S+\.)+\S+$").unwrap())
}

fn clean_admin_emails(value: &str) -> Result<Vec<String>, String> {
    let emails: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if emails.is_empty() {
        return Err("no emails".to_string());
    }
    for email in &emails {
        if !admin_email_pattern().is_match(email) {
            return Err(format!("invalid email address: {email:?}"));
        }
    }
    Ok(emails)
}

fn clean_item_list_limit(value: &str) -> Result<u32, String> {
    let parsed: i64 = value.parse().map_err(|_| "not an integer".to_string())?;
    if parsed <= 0 {
        return Err("item_list_limit must be positive".to_string());
    }
    u32::try_from(parsed).map_err(|_| "item_list_limit out of range".to_string())
}

/// Load and validate a repository description XML fragment: it must be
/// well-formed and declare an `xsi:schemaLocation` on its root element.
fn load_repository_description(path: &Path) -> Result<String, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut reader = Reader::from_str(&contents);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(tag) | Event::Empty(tag) => {
                let has_schema_location = tag
                    .attributes()
                    .flatten()
                    .any(|attr| attr.key.as_ref().ends_with(b"schemaLocation"));
                if !has_schema_location {
                    return Err("no schema location".to_string());
                }
                return Ok(contents);
            }
            Event::Eof => return Err("ill-formed XML: no root element".to_string()),
            _ => continue,
        }
    }
}

fn clean_repository_descriptions(value: &str) -> Result<Vec<String>, String> {
    value
        .split_whitespace()
        .map(|path| {
            load_repository_description(Path::new(path))
                .map_err(|reason| format!("repository description {path:?}: {reason}"))
        })
        .collect()
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name.to_string()))
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason,
    }
}

/// Settings the protocol engine needs to answer requests.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub repository_name: String,
    pub admin_emails: Vec<String>,
    pub deleted_records: DeletedRecordsPolicy,
    pub item_list_limit: u32,
    pub database_url: String,
    pub repository_descriptions: Vec<String>,
}

impl RepositoryConfig {
    /// Load every required setting from the process environment, the way
    /// `clean_oai_settings` validates a settings dict key by key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let repository_name = require_env("repository_name")?;
        let admin_emails = clean_admin_emails(&require_env("admin_emails")?)
            .map_err(|reason| invalid("admin_emails", reason))?;
        let deleted_records = DeletedRecordsPolicy::parse(&require_env("deleted_records")?)?;
        let item_list_limit = clean_item_list_limit(&require_env("item_list_limit")?)
            .map_err(|reason| invalid("item_list_limit", reason))?;
        let database_url = require_env("database_url")?;
        let repository_descriptions =
            clean_repository_descriptions(&env::var("repository_descriptions").unwrap_or_default())
                .map_err(|reason| invalid("repository_descriptions", reason))?;

        Ok(Self {
            repository_name,
            admin_emails,
            deleted_records,
            item_list_limit,
            database_url,
            repository_descriptions,
        })
    }
}

/// Settings the importer CLI needs for one harvest run.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub database_url: String,
    pub deleted_records: DeletedRecordsPolicy,
    pub force_update: bool,
    pub timestamp_file: Option<PathBuf>,
    pub metadata_provider_name: String,
    pub metadata_provider_args: Vec<String>,
}

impl ImporterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require_env("database_url")?;
        let deleted_records = DeletedRecordsPolicy::parse(&require_env("deleted_records")?)?;
        let force_update = env::var("force_update")
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let timestamp_file = env::var("timestamp_file").ok().map(PathBuf::from);
        let metadata_provider_name = require_env("metadata_provider_name")?;
        let metadata_provider_args = env::var("metadata_provider_args")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            deleted_records,
            force_update,
            timestamp_file,
            metadata_provider_name,
            metadata_provider_args,
        })
    }
}

/// `importer <config> [VAR=value...]`: loads `config` as a `.env`-style
/// file, then applies positional `VAR=value` overrides on top of it.
#[derive(Parser, Debug)]
#[command(name = "importer", about = "Update the repository's metadata store")]
pub struct Cli {
    /// Path to a .env-style configuration file.
    pub config: PathBuf,

    /// Additional `VAR=value` overrides, applied after the config file.
    pub overrides: Vec<String>,
}

impl Cli {
    /// Load the config file and apply CLI overrides into the process
    /// environment, ready for `ImporterConfig::from_env`.
    pub fn apply_env(&self) -> Result<(), ConfigError> {
        dotenvy::from_path_override(&self.config).map_err(|e| {
            ConfigError::Invalid {
                name: "config".to_string(),
                reason: e.to_string(),
            }
        })?;
        for pair in &self.overrides {
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::Invalid {
                name: "overrides".to_string(),
                reason: format!("expected VAR=value, got {pair:?}"),
            })?;
            // SAFETY: single-threaded at startup, before any spawned tasks.
            unsafe {
                env::set_var(key, value);
            }
        }
        Ok(())
    }
}

type ProviderFactory = fn(&[String]) -> Box<dyn MetadataProvider>;

/// Maps a configured `metadata_provider_name` to a constructor. Providers
/// register themselves here instead of being resolved by name at runtime.
pub struct ProviderRegistry {
    factories: HashMap<&'static str, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn with_default() -> Self {
        let mut factories: HashMap<&'static str, ProviderFactory> = HashMap::new();
        factories.insert("skeleton", |_args| Box::new(SkeletonProvider));
        Self { factories }
    }

    pub fn register(&mut self, name: &'static str, factory: ProviderFactory) {
        self.factories.insert(name, factory);
    }

    pub fn build(
        &self,
        name: &str,
        args: &[String],
    ) -> Result<Box<dyn MetadataProvider>, ConfigError> {
        let factory = self.factories.get(name).ok_or_else(|| ConfigError::Invalid {
            name: "metadata_provider_name".to_string(),
            reason: format!("unknown provider {name:?}"),
        })?;
        Ok(factory(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deleted_records_policy() {
        assert_eq!(DeletedRecordsPolicy::parse("no").unwrap(), DeletedRecordsPolicy::No);
        assert!(DeletedRecordsPolicy::parse("sometimes").is_err());
    }

    #[test]
    fn validates_admin_emails() {
        assert_eq!(
            clean_admin_emails("a@example.org b@example.org").unwrap(),
            vec!["a@example.org".to_string(), "b@example.org".to_string()]
        );
        assert!(clean_admin_emails("").is_err());
        assert!(clean_admin_emails("not-an-email").is_err());
    }

    #[test]
    fn rejects_non_positive_item_list_limit() {
        assert!(clean_item_list_limit("0").is_err());
        assert!(clean_item_list_limit("-5").is_err());
        assert_eq!(clean_item_list_limit("50").unwrap(), 50);
    }

    #[test]
    fn registry_builds_the_skeleton_provider() {
        let registry = ProviderRegistry::with_default();
        assert!(registry.build("skeleton", &[]).is_ok());
        assert!(registry.build("nonexistent", &[]).is_err());
    }
}
