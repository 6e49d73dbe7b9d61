use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};

/// Where a week ends. The quota reset and the weekly dashboard disagree on
/// this: the dashboard treats Sunday as the last day of the week, the quota
/// check rolls Sunday classes into the previous week. Both conventions are
/// kept as explicit policies until product settles on one; do not fold them
/// together silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekPolicy {
    /// Monday 00:00:00.000 through Sunday 23:59:59.999 (7 days, inclusive).
    DashboardWeek,
    /// Monday 00:00:00.000 through Saturday 23:59:59.000 (6 days; Sunday
    /// belongs to the previous week).
    QuotaWeek,
}

/// Inclusive [start, end] bounds of the week containing `reference` shifted
/// by `offset_weeks` whole weeks, in UTC. Pure and deterministic.
pub fn week_bounds(
    reference: DateTime<Utc>,
    offset_weeks: i64,
    policy: WeekPolicy,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let shifted = reference + Duration::weeks(offset_weeks);
    let back = shifted.weekday().num_days_from_monday() as i64;
    let monday = shifted.date_naive() - Duration::days(back);

    let start = Utc.from_utc_datetime(
        &monday.and_time(NaiveTime::from_hms_milli_opt(0, 0, 0, 0).unwrap()),
    );
    let end = match policy {
        WeekPolicy::DashboardWeek => Utc.from_utc_datetime(
            &(monday + Duration::days(6))
                .and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap()),
        ),
        WeekPolicy::QuotaWeek => Utc.from_utc_datetime(
            &(monday + Duration::days(5))
                .and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 0).unwrap()),
        ),
    };
    (start, end)
}

pub fn in_window(instant: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    instant >= start && instant <= end
}
