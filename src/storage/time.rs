use crate::error::BillingError;
use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    SecondsFormat, TimeZone, Utc,
};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed offset of the billing zone; out-of-range offsets fall back to UTC.
pub fn billing_offset(utc_offset_hours: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix())
}

/// Fixed-width UTC form used for every stored timestamp, so text columns
/// order and compare the same way the instants do.
pub fn to_db_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn to_iso8601_utc_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored timestamp: RFC3339 first, then `YYYY-MM-DD HH:mm:ss` as UTC.
pub fn parse_db_string(s: &str) -> crate::error::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map_err(|e| BillingError::TimeParse(format!("{s}: {e}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn local_to_utc(offset: &FixedOffset, naive: NaiveDateTime) -> DateTime<Utc> {
    // Fixed offsets have exactly one mapping for every local time.
    match offset.from_local_datetime(&naive).single() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// `[first instant of the month containing now, first instant of the next month)`
/// in the given zone.
pub fn month_bounds(now: DateTime<Utc>, offset: &FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(offset);
    let start = first_of_month(local.year(), local.month());
    let next = start.checked_add_months(Months::new(1)).unwrap_or(start);
    (
        local_to_utc(offset, start.and_time(NaiveTime::MIN)),
        local_to_utc(offset, next.and_time(NaiveTime::MIN)),
    )
}

/// The instant `months` after the month containing `now`, keeping the
/// day-of-month and time of day of `anchor`. Days past the end of the target
/// month are clamped to its last day.
pub fn same_day_months_after(
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    months: u32,
    offset: &FixedOffset,
) -> DateTime<Utc> {
    let anchor_local = anchor.with_timezone(offset);
    let now_local = now.with_timezone(offset);
    let month_start = first_of_month(now_local.year(), now_local.month());
    let target_start = month_start
        .checked_add_months(Months::new(months))
        .unwrap_or(month_start);
    let last_day = target_start
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28);
    let day = anchor_local.day().min(last_day);
    let date = target_start.with_day(day).unwrap_or(target_start);
    local_to_utc(offset, date.and_time(anchor_local.time()))
}

// tracing_subscriber timer printing the billing zone's local time
pub struct BillingTimer {
    offset: FixedOffset,
}

impl BillingTimer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl tracing_subscriber::fmt::time::FormatTime for BillingTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&self.offset);
        write!(w, "{}", now.format(DATETIME_FORMAT))
    }
}
