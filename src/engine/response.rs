use chrono::{DateTime, Utc};

use crate::config::DeletedRecordsPolicy;
use crate::store::{Format, Record, Set};

/// Everything a verb handler needs rendered; XML templating is left to
/// the caller.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub response_time: DateTime<Utc>,
    pub body: ResponseBody,
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
    Identify(IdentifyResponse),
    ListMetadataFormats(Vec<Format>),
    ListSets(Vec<Set>),
    ListIdentifiers(RecordsPage),
    ListRecords(RecordsPage),
    GetRecord(Record),
}

#[derive(Debug, Clone)]
pub struct IdentifyResponse {
    pub repository_name: String,
    pub admin_emails: Vec<String>,
    pub deleted_record: DeletedRecordsPolicy,
    pub protocol_version: &'static str,
    pub earliest_datestamp: DateTime<Utc>,
    pub repository_descriptions: Vec<String>,
}

/// A page of a list response. `resumption_token` is `None` when the whole
/// result fit in one page and the request was not itself a continuation;
/// `Some("")` signals the terminal page of a continuation sequence.
#[derive(Debug, Clone)]
pub struct RecordsPage {
    pub records: Vec<Record>,
    pub resumption_token: Option<String>,
}
