pub mod response;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

pub use response::{EngineResponse, IdentifyResponse, RecordsPage, ResponseBody};

use crate::config::RepositoryConfig;
use crate::datecodec;
use crate::error::{OaiError, StoreError};
use crate::store::record::ListParams;
use crate::store::{Record, Store, datestamp, format, item, record, set};
use crate::token::ResumptionToken;

/// Request parameters as the HTTP adapter collects them: each name may
/// legally appear once. A name with more than one value is a repeated
/// parameter and is rejected before it reaches a verb handler.
pub type Params = HashMap<String, Vec<String>>;

struct ListQuery {
    metadata_prefix: String,
    offset: Option<String>,
    from: Option<String>,
    until: Option<String>,
    set: Option<String>,
}

fn single<'p>(params: &'p Params, name: &str) -> Result<Option<&'p str>, OaiError> {
    match params.get(name) {
        None => Ok(None),
        Some(values) if values.len() == 1 => Ok(Some(values[0].as_str())),
        Some(_) => Err(OaiError::BadArgument(format!(
            "parameter \"{name}\" may not be repeated"
        ))),
    }
}

fn check_allowed(params: &Params, required: &[&str], allowed: &[&str]) -> Result<(), OaiError> {
    for key in params.keys() {
        if key == "verb" {
            continue;
        }
        if !required.contains(&key.as_str()) && !allowed.contains(&key.as_str()) {
            return Err(OaiError::BadArgument(format!(
                "parameter \"{key}\" is not valid for this verb"
            )));
        }
    }
    for name in required.iter().chain(allowed.iter()) {
        single(params, name)?;
    }
    for name in required {
        if params.get(*name).is_none() {
            return Err(OaiError::BadArgument(format!(
                "missing required parameter \"{name}\""
            )));
        }
    }
    Ok(())
}

/// Errors raised while re-validating resumption-token-derived parameters
/// collapse to `InvalidResumptionToken`, except a token that was already
/// found to be expired.
fn translate_continuation_error(error: OaiError) -> OaiError {
    match error {
        OaiError::BadArgument(_)
        | OaiError::UnsupportedMetadataFormat(_)
        | OaiError::NoSetHierarchy
        | OaiError::NoRecordsMatch => OaiError::InvalidResumptionToken,
        other => other,
    }
}

/// Verb dispatch and per-verb request handling. Holds no mutable state of
/// its own; every call opens its own transaction against the store for a
/// consistent snapshot and rolls it back when done (the engine only reads).
pub struct ProtocolEngine<'a> {
    store: &'a Store,
    config: &'a RepositoryConfig,
}

impl<'a> ProtocolEngine<'a> {
    pub fn new(store: &'a Store, config: &'a RepositoryConfig) -> Self {
        Self { store, config }
    }

    pub async fn dispatch(&self, params: &Params) -> Result<EngineResponse, OaiError> {
        let response_time = datecodec::now();

        let verb = match params.get("verb") {
            None => return Err(OaiError::MissingVerb),
            Some(values) if values.len() > 1 => return Err(OaiError::RepeatedVerb),
            Some(values) if values[0].is_empty() => return Err(OaiError::MissingVerb),
            Some(values) => values[0].clone(),
        };

        let mut tx = self.store.begin().await.map_err(OaiError::Store)?;

        let body = match verb.as_str() {
            "Identify" => self.identify(&mut tx, response_time, params).await?,
            "ListMetadataFormats" => self.list_metadata_formats(&mut tx, params).await?,
            "ListSets" => self.list_sets(&mut tx, params).await?,
            "GetRecord" => self.get_record(&mut tx, params).await?,
            "ListIdentifiers" => ResponseBody::ListIdentifiers(
                self.list_records_or_identifiers("ListIdentifiers", &mut tx, params)
                    .await?,
            ),
            "ListRecords" => ResponseBody::ListRecords(
                self.list_records_or_identifiers("ListRecords", &mut tx, params)
                    .await?,
            ),
            _ => return Err(OaiError::InvalidVerb),
        };

        tx.rollback()
            .await
            .map_err(|e| OaiError::Store(StoreError::from(e)))?;
        Ok(EngineResponse { response_time, body })
    }

    async fn identify(
        &self,
        conn: &mut PgConnection,
        response_time: DateTime<Utc>,
        params: &Params,
    ) -> Result<ResponseBody, OaiError> {
        check_allowed(params, &[], &[])?;
        let ignore_deleted = self.config.deleted_records.ignore_deleted();
        let earliest = record::earliest_datestamp(conn, ignore_deleted)
            .await
            .map_err(OaiError::Store)?
            .unwrap_or(response_time);

        Ok(ResponseBody::Identify(IdentifyResponse {
            repository_name: self.config.repository_name.clone(),
            admin_emails: self.config.admin_emails.clone(),
            deleted_record: self.config.deleted_records,
            protocol_version: "2.0",
            earliest_datestamp: earliest,
            repository_descriptions: self.config.repository_descriptions.clone(),
        }))
    }

    async fn list_metadata_formats(
        &self,
        conn: &mut PgConnection,
        params: &Params,
    ) -> Result<ResponseBody, OaiError> {
        check_allowed(params, &[], &["identifier"])?;
        let identifier = single(params, "identifier")?;
        let ignore_deleted = self.config.deleted_records.ignore_deleted();

        if let Some(id) = identifier
            && !item::exists(conn, id, ignore_deleted)
                .await
                .map_err(OaiError::Store)?
        {
            return Err(OaiError::IdDoesNotExist(id.to_string()));
        }

        let formats = format::list(conn, identifier, ignore_deleted)
            .await
            .map_err(OaiError::Store)?;
        if formats.is_empty()
            && let Some(id) = identifier
        {
            return Err(OaiError::NoMetadataFormats(id.to_string()));
        }

        Ok(ResponseBody::ListMetadataFormats(formats))
    }

    async fn list_sets(
        &self,
        conn: &mut PgConnection,
        params: &Params,
    ) -> Result<ResponseBody, OaiError> {
        // Even an expired token is reported as Invalid here: ListSets never
        // continues, so there is nothing to distinguish "expired" from.
        if params.contains_key("resumptionToken") {
            return Err(OaiError::InvalidResumptionToken);
        }
        check_allowed(params, &[], &[])?;

        let sets = set::list(conn).await.map_err(OaiError::Store)?;
        if sets.is_empty() {
            return Err(OaiError::NoSetHierarchy);
        }
        Ok(ResponseBody::ListSets(sets))
    }

    async fn get_record(
        &self,
        conn: &mut PgConnection,
        params: &Params,
    ) -> Result<ResponseBody, OaiError> {
        check_allowed(params, &["identifier", "metadataPrefix"], &[])?;
        let identifier = single(params, "identifier")?.unwrap();
        let prefix = single(params, "metadataPrefix")?.unwrap();
        let ignore_deleted = self.config.deleted_records.ignore_deleted();

        if !item::exists(conn, identifier, ignore_deleted)
            .await
            .map_err(OaiError::Store)?
        {
            return Err(OaiError::IdDoesNotExist(identifier.to_string()));
        }
        if !format::exists(conn, prefix, ignore_deleted)
            .await
            .map_err(OaiError::Store)?
        {
            return Err(OaiError::UnsupportedMetadataFormat(prefix.to_string()));
        }

        let records = record::list(
            conn,
            ListParams {
                identifier: Some(identifier),
                prefix: Some(prefix),
                ignore_deleted,
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .map_err(OaiError::Store)?;

        records.into_iter().next().map(ResponseBody::GetRecord).ok_or_else(|| {
            OaiError::UnavailableMetadataFormat(prefix.to_string(), identifier.to_string())
        })
    }

    async fn build_list_query(
        &self,
        verb: &str,
        conn: &mut PgConnection,
        params: &Params,
    ) -> Result<(ListQuery, bool), OaiError> {
        if let Some(raw) = single(params, "resumptionToken")? {
            check_allowed(params, &[], &["resumptionToken"])?;
            let current_datestamp = datestamp::get(conn).await.map_err(OaiError::Store)?;
            let token = ResumptionToken::decode(raw, verb, current_datestamp)?;
            Ok((
                ListQuery {
                    metadata_prefix: token.metadata_prefix,
                    offset: Some(token.offset),
                    from: token.from,
                    until: token.until,
                    set: token.set,
                },
                true,
            ))
        } else {
            check_allowed(params, &["metadataPrefix"], &["from", "until", "set"])?;
            Ok((
                ListQuery {
                    metadata_prefix: single(params, "metadataPrefix")?.unwrap().to_string(),
                    offset: None,
                    from: single(params, "from")?.map(str::to_string),
                    until: single(params, "until")?.map(str::to_string),
                    set: single(params, "set")?.map(str::to_string),
                },
                false,
            ))
        }
    }

    async fn get_records_page(
        &self,
        conn: &mut PgConnection,
        query: &ListQuery,
    ) -> Result<(Vec<Record>, Option<String>), OaiError> {
        let ignore_deleted = self.config.deleted_records.ignore_deleted();

        if !format::exists(conn, &query.metadata_prefix, ignore_deleted)
            .await
            .map_err(OaiError::Store)?
        {
            return Err(OaiError::UnsupportedMetadataFormat(query.metadata_prefix.clone()));
        }

        let from_date = query
            .from
            .as_deref()
            .map(|s| datecodec::parse_date(s, datecodec::start_of_day()))
            .transpose()
            .map_err(OaiError::BadArgument)?;
        let until_date = query
            .until
            .as_deref()
            .map(|s| datecodec::parse_date(s, datecodec::end_of_day()))
            .transpose()
            .map_err(OaiError::BadArgument)?;

        if let (Some((from, from_granularity)), Some((until, until_granularity))) =
            (&from_date, &until_date)
        {
            if from_granularity != until_granularity {
                return Err(OaiError::BadArgument(
                    "from and until must share the same granularity".to_string(),
                ));
            }
            if from > until {
                return Err(OaiError::BadArgument(
                    "from must not be later than until".to_string(),
                ));
            }
        }

        if query.set.is_some() {
            let sets = set::list(conn).await.map_err(OaiError::Store)?;
            if sets.is_empty() {
                return Err(OaiError::NoSetHierarchy);
            }
        }

        let limit = self.config.item_list_limit as i64;
        let mut records = record::list(
            conn,
            ListParams {
                identifier: None,
                prefix: Some(&query.metadata_prefix),
                from_date: from_date.map(|(d, _)| d),
                until_date: until_date.map(|(d, _)| d),
                set: query.set.as_deref(),
                ignore_deleted,
                offset: query.offset.as_deref(),
                limit: Some(limit + 1),
            },
        )
        .await
        .map_err(OaiError::Store)?;

        if records.is_empty() {
            return Err(OaiError::NoRecordsMatch);
        }

        let next_offset = if records.len() as i64 == limit + 1 {
            records.pop().map(|r| r.identifier)
        } else {
            None
        };

        Ok((records, next_offset))
    }

    async fn list_records_or_identifiers(
        &self,
        verb: &str,
        conn: &mut PgConnection,
        params: &Params,
    ) -> Result<RecordsPage, OaiError> {
        let (query, is_continuation) = self.build_list_query(verb, conn, params).await?;

        let outcome = self.get_records_page(conn, &query).await;
        let (records, next_offset) = if is_continuation {
            outcome.map_err(translate_continuation_error)?
        } else {
            outcome?
        };

        let resumption_token = if let Some(offset) = next_offset {
            let issued_at = datecodec::now();
            Some(
                ResumptionToken::new(
                    verb,
                    &query.metadata_prefix,
                    &offset,
                    issued_at,
                    query.from.clone(),
                    query.until.clone(),
                    query.set.clone(),
                )
                .encode(),
            )
        } else if is_continuation {
            Some(String::new())
        } else {
            None
        };

        Ok(RecordsPage { records, resumption_token })
    }
}
