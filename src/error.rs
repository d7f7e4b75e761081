use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Ranges illegal in XML 1.0 character data (<https://www.w3.org/TR/REC-xml/#charsets>).
fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("[\u{0}-\u{8}\u{b}-\u{c}\u{e}-\u{1f}\u{fffe}-\u{ffff}]").unwrap()
    })
}

/// Strip characters that cannot appear in an XML document, so error
/// messages built from arbitrary request input are safe to embed verbatim.
pub fn filter_illegal_chars(text: &str) -> String {
    illegal_chars().replace_all(text, "").into_owned()
}

/// A protocol-level OAI-PMH error, one of the nine `<error code>` values.
#[derive(Debug, Error)]
pub enum OaiError {
    #[error("Missing verb")]
    MissingVerb,
    #[error("Invalid verb")]
    InvalidVerb,
    #[error("Repeated verb")]
    RepeatedVerb,
    #[error("{0}")]
    BadArgument(String),
    #[error("Metadata format \"{0}\" is not supported by this repository.")]
    UnsupportedMetadataFormat(String),
    #[error("Metadata format \"{0}\" is not available for item \"{1}\".")]
    UnavailableMetadataFormat(String, String),
    #[error("Identifier \"{0}\" does not exist.")]
    IdDoesNotExist(String),
    #[error("No matching records found.")]
    NoRecordsMatch,
    #[error("No metadata formats available for item \"{0}\".")]
    NoMetadataFormats(String),
    #[error("This repository does not support sets.")]
    NoSetHierarchy,
    #[error("Invalid resumption token")]
    InvalidResumptionToken,
    #[error("Resumption token has expired.")]
    ExpiredResumptionToken,
    /// Not an OAI-PMH error code; the HTTP adapter should map this to a 5xx.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OaiError {
    /// The `code` attribute of the `<error>` element, or `"internal"` for
    /// faults that should never reach a client as a well-formed response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingVerb | Self::InvalidVerb | Self::RepeatedVerb => "badVerb",
            Self::BadArgument(_) => "badArgument",
            Self::UnsupportedMetadataFormat(_) | Self::UnavailableMetadataFormat(_, _) => {
                "cannotDisseminateFormat"
            }
            Self::IdDoesNotExist(_) => "idDoesNotExist",
            Self::NoRecordsMatch => "noRecordsMatch",
            Self::NoMetadataFormats(_) => "noMetadataFormats",
            Self::NoSetHierarchy => "noSetHierarchy",
            Self::InvalidResumptionToken | Self::ExpiredResumptionToken => "badResumptionToken",
            Self::Store(_) => "internal",
        }
    }

    pub fn message(&self) -> String {
        filter_illegal_chars(&self.to_string())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Faults raised by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid metadata prefix: {0}")]
    InvalidPrefix(String),
    #[error("invalid set spec: {0}")]
    InvalidSetSpec(String),
    #[error("non-existent metadata prefix: {0}")]
    UnknownFormat(String),
    #[error("non-existent identifier: {0}")]
    UnknownIdentifier(String),
    #[error("invalid record xml: {0}")]
    XmlInvalid(String),
    #[error("negative limit: {0}")]
    InvalidLimit(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Raised by the reconciler; never surfaced as an OAI-PMH error, only
/// logged and turned into an importer exit code.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("metadata provider returned no formats")]
    NoFormats,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("metadata provider error: {0}")]
    Provider(String),
}

/// Raised while loading and validating configuration; aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing setting {0}")]
    Missing(String),
    #[error("invalid {name} setting: {reason}")]
    Invalid { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_control_characters() {
        let text = "legal\u{0}\u{1}text\u{1f}end";
        assert_eq!(filter_illegal_chars(text), "legaltextend");
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        let text = "Identifier \"oai:example.org:1\" does not exist.";
        assert_eq!(filter_illegal_chars(text), text);
    }

    #[test]
    fn codes_match_oai_pmh_taxonomy() {
        assert_eq!(OaiError::MissingVerb.code(), "badVerb");
        assert_eq!(OaiError::NoSetHierarchy.code(), "noSetHierarchy");
        assert_eq!(
            OaiError::UnavailableMetadataFormat("oai_dc".into(), "x".into()).code(),
            "cannotDisseminateFormat"
        );
        assert_eq!(OaiError::ExpiredResumptionToken.code(), "badResumptionToken");
    }
}
