use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// The precision a datestamp was expressed at. `from`/`until` comparisons
/// across differing granularities are a `BadArgument` in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Second,
}

/// Current time at second granularity, matching the precision records and
/// the global datestamp are stored at.
pub fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap()
}

/// Render a datestamp in the one format OAI-PMH ever emits.
pub fn format_datestamp(datestamp: DateTime<Utc>) -> String {
    datestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse either `YYYY-MM-DD` (day granularity) or `YYYY-MM-DDTHH:MM:SSZ`
/// (second granularity). `default_time` supplies the time-of-day used when
/// only a day is given (callers pass midnight for `from`, end-of-day for
/// `until`).
pub fn parse_date(
    text: &str,
    default_time: NaiveTime,
) -> Result<(DateTime<Utc>, Granularity), String> {
    const SECOND_LEN: usize = "YYYY-MM-DDTHH:MM:SSZ".len();
    const DAY_LEN: usize = "YYYY-MM-DD".len();

    if text.len() == SECOND_LEN {
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%SZ")
            .map_err(|e| e.to_string())?;
        Ok((naive.and_utc(), Granularity::Second))
    } else if text.len() == DAY_LEN {
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| e.to_string())?;
        let dt = date
            .and_time(default_time)
            .and_local_timezone(Utc)
            .single()
            .ok_or_else(|| "ambiguous local time".to_string())?;
        Ok((dt, Granularity::Day))
    } else {
        Err("unsupported date format".to_string())
    }
}

/// Midnight, for `from` datestamps given at day granularity.
pub fn start_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 0, 0).unwrap()
}

/// End of day, for `until` datestamps given at day granularity.
pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap()
}
