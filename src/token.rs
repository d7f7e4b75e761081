use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datecodec::{self, Granularity};
use crate::error::OaiError;

/// The payload of a resumption token: the verb plus the query parameters
/// that must be replayed, the next offset, and the moment it was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumptionToken {
    pub verb: String,
    #[serde(rename = "metadataPrefix")]
    pub metadata_prefix: String,
    pub offset: String,
    pub date: String,
    pub from: Option<String>,
    pub until: Option<String>,
    pub set: Option<String>,
}

impl ResumptionToken {
    pub fn new(
        verb: &str,
        metadata_prefix: &str,
        offset: &str,
        issued_at: DateTime<Utc>,
        from: Option<String>,
        until: Option<String>,
        set: Option<String>,
    ) -> Self {
        Self {
            verb: verb.to_string(),
            metadata_prefix: metadata_prefix.to_string(),
            offset: offset.to_string(),
            date: datecodec::format_datestamp(issued_at),
            from,
            until,
            set,
        }
    }

    /// Opaque, URL-safe, round-trip-exact encoding.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("ResumptionToken always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode and validate a resumption token presented by a client.
    ///
    /// `verb` is the verb of the *current* request; a mismatch, a parse
    /// failure, or a non-string/non-null field all collapse to
    /// `InvalidResumptionToken`. `current_datestamp` is the database's
    /// latest-modification time (`Datestamp.get()`); if it is at or after
    /// the token's issuance time the token is `ExpiredResumptionToken`.
    pub fn decode(
        raw: &str,
        verb: &str,
        current_datestamp: Option<DateTime<Utc>>,
    ) -> Result<Self, OaiError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| OaiError::InvalidResumptionToken)?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|_| OaiError::InvalidResumptionToken)?;
        let object = value.as_object().ok_or(OaiError::InvalidResumptionToken)?;
        for value in object.values() {
            if !value.is_string() && !value.is_null() {
                return Err(OaiError::InvalidResumptionToken);
            }
        }

        let token: ResumptionToken =
            serde_json::from_value(value).map_err(|_| OaiError::InvalidResumptionToken)?;

        if token.verb != verb {
            return Err(OaiError::InvalidResumptionToken);
        }

        let (issued_at, _granularity): (DateTime<Utc>, Granularity) =
            datecodec::parse_date(&token.date, datecodec::start_of_day())
                .map_err(|_| OaiError::InvalidResumptionToken)?;

        if let Some(latest) = current_datestamp
            && latest >= issued_at
        {
            return Err(OaiError::ExpiredResumptionToken);
        }

        Ok(token)
    }
}
