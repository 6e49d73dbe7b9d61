use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashMap;

pub const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// The slice of a class-session row the aggregation cares about. A class
/// with no `date_time` is unscheduled: it is excluded from day/hour
/// bucketing but still participates in per-class and per-level totals.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub id: String,
    pub date_time: Option<DateTime<Utc>>,
    pub level: Option<String>,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttendanceSnapshot {
    pub class_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTotals {
    pub class_count: u64,
    pub attendance_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelCount {
    pub level: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourCount {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentCount {
    pub student_id: String,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    /// Attendance count per class id; every class appears, zero included.
    pub per_class: HashMap<String, u64>,
    /// Indexed in `DAYS` order (Mon..Sun).
    pub per_day: [DayTotals; 7],
    pub per_level: Vec<LevelCount>,
    pub popular_times: Vec<HourCount>,
    pub top_students: Vec<StudentCount>,
}

pub fn weekday_name(day: Weekday) -> &'static str {
    DAYS[day.num_days_from_monday() as usize]
}

/// Attendance count per class. Records pointing at classes outside the
/// given set are dropped; classes with no records map to 0.
pub fn per_class_counts(
    classes: &[ClassSnapshot],
    attendance: &[AttendanceSnapshot],
) -> HashMap<String, u64> {
    let mut counts: HashMap<String, u64> =
        classes.iter().map(|c| (c.id.clone(), 0)).collect();
    for a in attendance {
        if let Some(n) = counts.get_mut(&a.class_id) {
            *n += 1;
        }
    }
    counts
}

/// Buckets every dated class (and its whole attendance count) into the UTC
/// weekday of its start instant.
pub fn per_day_totals(
    classes: &[ClassSnapshot],
    per_class: &HashMap<String, u64>,
) -> [DayTotals; 7] {
    let mut days = [DayTotals::default(); 7];
    for c in classes {
        let Some(dt) = c.date_time else { continue };
        let idx = dt.weekday().num_days_from_monday() as usize;
        days[idx].class_count += 1;
        days[idx].attendance_count += per_class.get(&c.id).copied().unwrap_or(0);
    }
    days
}

/// Class counts grouped by level, "Unspecified" for empty/missing, sorted
/// by count descending then level ascending.
pub fn per_level_counts(classes: &[ClassSnapshot]) -> Vec<LevelCount> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for c in classes {
        let label = match c.level.as_deref() {
            Some(l) if !l.trim().is_empty() => l.to_string(),
            _ => "Unspecified".to_string(),
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut out: Vec<LevelCount> = counts
        .into_iter()
        .map(|(level, count)| LevelCount { level, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.level.cmp(&b.level)));
    out
}

/// Hour-of-day histogram over dated classes: count descending, ties by hour
/// ascending, zero hours dropped, top 10.
pub fn popular_times(classes: &[ClassSnapshot]) -> Vec<HourCount> {
    let mut by_hour = [0u64; 24];
    for c in classes {
        if let Some(dt) = c.date_time {
            by_hour[dt.hour() as usize] += 1;
        }
    }
    let mut out: Vec<HourCount> = by_hour
        .iter()
        .enumerate()
        .filter(|(_, n)| **n > 0)
        .map(|(hour, n)| HourCount {
            hour: hour as u32,
            count: *n,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.hour.cmp(&b.hour)));
    out.truncate(10);
    out
}

/// Per-student attendance counts, descending, ties kept in order of first
/// appearance, top 15. Only counts records for the given class set.
pub fn top_students(
    classes: &[ClassSnapshot],
    attendance: &[AttendanceSnapshot],
) -> Vec<StudentCount> {
    let class_ids: HashMap<&str, ()> = classes.iter().map(|c| (c.id.as_str(), ())).collect();
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for a in attendance {
        if !class_ids.contains_key(a.class_id.as_str()) {
            continue;
        }
        let n = counts.entry(a.student_id.clone()).or_insert_with(|| {
            order.push(a.student_id.clone());
            0
        });
        *n += 1;
    }
    let mut out: Vec<StudentCount> = order
        .into_iter()
        .map(|student_id| {
            let count = counts[&student_id];
            StudentCount { student_id, count }
        })
        .collect();
    // Stable sort keeps first-appearance order among equal counts.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out.truncate(15);
    out
}

pub fn aggregate(classes: &[ClassSnapshot], attendance: &[AttendanceSnapshot]) -> Aggregate {
    let per_class = per_class_counts(classes, attendance);
    let per_day = per_day_totals(classes, &per_class);
    Aggregate {
        per_day,
        per_level: per_level_counts(classes),
        popular_times: popular_times(classes),
        top_students: top_students(classes, attendance),
        per_class,
    }
}
