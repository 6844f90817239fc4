//! Local-day arithmetic over absolute instants.
//!
//! Every instant is stored and compared in UTC. The operating timezone is
//! only consulted to find calendar-day boundaries and to place the
//! configured wall-clock publish time on a given day.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Instants within this many seconds of the grid count as on it.
pub const GRID_TOLERANCE_SECS: i64 = 60;

/// Local calendar date of `at` in `tz`.
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// `date` shifted forward by `days`, saturating at the calendar's end.
pub fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDate::MAX)
}

/// The absolute instant of local `time` on local `date`.
///
/// An ambiguous local time (clocks going back) resolves to its earlier
/// occurrence; a skipped local time (clocks going forward) moves one hour
/// later.
pub fn combine(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) => at.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// Half-open absolute bounds `[start, end)` of local `date`.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        combine(date, NaiveTime::MIN, tz),
        combine(add_days(date, 1), NaiveTime::MIN, tz),
    )
}

/// Whether `at` sits on the local `time` grid of its own local day.
pub fn is_on_grid(at: DateTime<Utc>, time: NaiveTime, tz: Tz) -> bool {
    let target = combine(local_date(at, tz), time, tz);
    (at - target).num_seconds().abs() <= GRID_TOLERANCE_SECS
}

/// Next instant an account should publish at.
///
/// Today's slot when it is still ahead and unclaimed, tomorrow's otherwise.
pub fn next_schedule_instant(
    time: NaiveTime,
    now: DateTime<Utc>,
    has_upload_today: bool,
    tz: Tz,
) -> DateTime<Utc> {
    let today = local_date(now, tz);
    let target_today = combine(today, time, tz);

    if !has_upload_today && now < target_today {
        target_today
    } else {
        combine(add_days(today, 1), time, tz)
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_publish_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}
