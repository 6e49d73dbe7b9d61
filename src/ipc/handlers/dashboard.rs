use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;

use crate::aggregate::{self, AttendanceSnapshot, ClassSnapshot, DAYS};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    load_attendance_for_classes, load_teacher, optional_instant, required_str, to_rfc3339,
    visible_classes, workspace, ClassRow, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::week::{in_window, week_bounds, WeekPolicy};

/// Furthest the weekly view can navigate in either direction (100 years).
/// Anything past that is a malformed request, and unchecked offsets would
/// overflow the date arithmetic.
const MAX_WEEK_OFFSET: i64 = 5200;

fn week_offset(req: &Request) -> Result<i64, HandlerErr> {
    let offset = match req.params.get("weekOffset") {
        None => 0,
        Some(v) if v.is_null() => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("weekOffset must be an integer"))?,
    };
    if !(-MAX_WEEK_OFFSET..=MAX_WEEK_OFFSET).contains(&offset) {
        return Err(HandlerErr::bad_params(format!(
            "weekOffset must be between -{} and {}",
            MAX_WEEK_OFFSET, MAX_WEEK_OFFSET
        )));
    }
    Ok(offset)
}

fn snapshots(classes: &[ClassRow]) -> Vec<ClassSnapshot> {
    classes.iter().map(ClassRow::snapshot).collect()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Teacher-id to display-name map for Manager views. Lookup failure is
/// logged and swallowed; the dashboard renders without names.
fn teacher_names(ws: &crate::db::Workspace) -> Option<HashMap<String, String>> {
    let loaded = ws
        .conn
        .prepare("SELECT id, name, email FROM teachers")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                let id: String = r.get(0)?;
                let name: Option<String> = r.get(1)?;
                let email: String = r.get(2)?;
                Ok((id, name.unwrap_or(email)))
            })
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        });
    match loaded {
        Ok(map) => Some(map),
        Err(e) => {
            log::warn!("teacher name lookup failed, dashboard continues without: {}", e);
            None
        }
    }
}

fn handle_weekly(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let teacher = match load_teacher(ws, &teacher_id) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let offset = match week_offset(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let reference = match optional_instant(req, "reference") {
        Ok(v) => v.unwrap_or_else(Utc::now),
        Err(e) => return e.response(&req.id),
    };

    let all = match visible_classes(ws, &teacher) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let (start, end) = week_bounds(reference, offset, WeekPolicy::DashboardWeek);

    let mut week_classes: Vec<(DateTime<Utc>, ClassRow)> = all
        .into_iter()
        .filter_map(|c| c.instant().map(|dt| (dt, c)))
        .filter(|(dt, _)| in_window(*dt, start, end))
        .collect();
    week_classes.sort_by_key(|(dt, _)| *dt);

    let class_ids: Vec<String> = week_classes.iter().map(|(_, c)| c.id.clone()).collect();
    let attendance = match load_attendance_for_classes(ws, &class_ids) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let class_snaps: Vec<ClassSnapshot> = week_classes.iter().map(|(_, c)| c.snapshot()).collect();
    let att_snaps: Vec<AttendanceSnapshot> = attendance
        .iter()
        .map(|a| AttendanceSnapshot {
            class_id: a.class_id.clone(),
            student_id: a.student_id.clone(),
        })
        .collect();
    let per_class = aggregate::per_class_counts(&class_snaps, &att_snaps);

    // Already sorted by instant, so each day's list is in time-of-day order.
    let mut day_classes: [Vec<serde_json::Value>; 7] = Default::default();
    let mut day_totals = [(0u64, 0u64); 7];
    for (dt, c) in &week_classes {
        let idx = dt.weekday().num_days_from_monday() as usize;
        let count = per_class.get(&c.id).copied().unwrap_or(0);
        let mut v = c.to_json();
        v["attendanceCount"] = json!(count);
        day_classes[idx].push(v);
        day_totals[idx].0 += 1;
        day_totals[idx].1 += count;
    }

    let total_attendance: u64 = per_class.values().sum();
    let classes_this_week = week_classes.len() as u64;
    let avg_per_class = if classes_this_week > 0 {
        Some(round1(total_attendance as f64 / classes_this_week as f64))
    } else {
        None
    };
    let days_with_classes = day_totals.iter().filter(|(n, _)| *n > 0).count() as u64;

    let days: Vec<serde_json::Value> = DAYS
        .iter()
        .zip(day_classes.iter())
        .zip(day_totals.iter())
        .map(|((day, classes), (class_count, attendance_count))| {
            json!({
                "day": day,
                "classes": classes,
                "classCount": class_count,
                "attendanceCount": attendance_count,
            })
        })
        .collect();

    let mut result = json!({
        "week": {
            "start": to_rfc3339(start),
            "end": to_rfc3339(end),
            "offset": offset,
        },
        "days": days,
        "summary": {
            "classesThisWeek": classes_this_week,
            "totalAttendance": total_attendance,
            "avgPerClass": avg_per_class,
            "daysWithClasses": days_with_classes,
        },
    });
    if teacher.is_manager() {
        if let Some(names) = teacher_names(ws) {
            result["teacherNames"] = json!(names);
        }
    }
    ok(&req.id, result)
}

fn handle_insights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let teacher = match load_teacher(ws, &teacher_id) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let reference = match optional_instant(req, "reference") {
        Ok(v) => v.unwrap_or_else(Utc::now),
        Err(e) => return e.response(&req.id),
    };

    let classes = match visible_classes(ws, &teacher) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let class_ids: Vec<String> = classes.iter().map(|c| c.id.clone()).collect();
    let attendance = match load_attendance_for_classes(ws, &class_ids) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };

    let class_snaps = snapshots(&classes);
    let att_snaps: Vec<AttendanceSnapshot> = attendance
        .iter()
        .map(|a| AttendanceSnapshot {
            class_id: a.class_id.clone(),
            student_id: a.student_id.clone(),
        })
        .collect();
    let agg = aggregate::aggregate(&class_snaps, &att_snaps);

    let total_classes = classes.len() as u64;
    let mut past_classes = 0u64;
    let mut future_classes = 0u64;
    let mut past_attendance = 0u64;
    for c in &classes {
        match c.instant() {
            Some(dt) if dt <= reference => {
                past_classes += 1;
                past_attendance += agg.per_class.get(&c.id).copied().unwrap_or(0);
            }
            Some(_) => future_classes += 1,
            None => {}
        }
    }
    let total_attendance: u64 = agg.per_class.values().sum();
    let unique_students = att_snaps
        .iter()
        .map(|a| a.student_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;
    let avg_past = if past_classes > 0 {
        Some(round1(past_attendance as f64 / past_classes as f64))
    } else {
        None
    };

    // Dated classes ranked by attendance; stable sort keeps schedule order
    // among ties.
    let mut ranked: Vec<&ClassRow> = classes.iter().filter(|c| c.instant().is_some()).collect();
    ranked.sort_by(|a, b| {
        let na = agg.per_class.get(&a.id).copied().unwrap_or(0);
        let nb = agg.per_class.get(&b.id).copied().unwrap_or(0);
        nb.cmp(&na)
    });
    let popular_classes: Vec<serde_json::Value> = ranked
        .iter()
        .take(10)
        .map(|c| {
            let mut v = c.to_json();
            v["attendanceCount"] = json!(agg.per_class.get(&c.id).copied().unwrap_or(0));
            v
        })
        .collect();

    let student_info = student_details(ws, &agg.top_students);
    let top_students: Vec<serde_json::Value> = agg
        .top_students
        .iter()
        .map(|s| {
            let (name, email, weekly) = student_info
                .get(&s.student_id)
                .cloned()
                .unwrap_or((None, None, None));
            json!({
                "studentId": s.student_id,
                "count": s.count,
                "name": name,
                "email": email,
                "weeklyClasses": weekly,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "summary": {
                "totalClasses": total_classes,
                "pastClasses": past_classes,
                "futureClasses": future_classes,
                "totalAttendance": total_attendance,
                "uniqueStudents": unique_students,
                "avgAttendancePerPastClass": avg_past,
            },
            "popularClasses": popular_classes,
            "popularTimes": agg.popular_times.iter().map(|t| json!({
                "hour": t.hour,
                "count": t.count,
            })).collect::<Vec<_>>(),
            "topStudents": top_students,
            "popularLevels": agg.per_level.iter().take(6).map(|l| json!({
                "level": l.level,
                "count": l.count,
            })).collect::<Vec<_>>(),
            "perDay": DAYS.iter().zip(agg.per_day.iter()).map(|(day, t)| json!({
                "day": day,
                "classCount": t.class_count,
                "attendanceCount": t.attendance_count,
            })).collect::<Vec<_>>(),
        }),
    )
}

type StudentDetail = (Option<String>, Option<String>, Option<i64>);

/// Best-effort name/email/quota lookup for the top-students list.
fn student_details(
    ws: &crate::db::Workspace,
    tops: &[aggregate::StudentCount],
) -> HashMap<String, StudentDetail> {
    if tops.is_empty() {
        return HashMap::new();
    }
    let ids: Vec<&str> = tops.iter().map(|s| s.student_id.as_str()).collect();
    let placeholders = vec!["?"; ids.len()].join(", ");
    let loaded = ws
        .conn
        .prepare(&format!(
            "SELECT id, name, email, weekly_classes FROM students WHERE id IN ({})",
            placeholders
        ))
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params_from_iter(ids.iter()), |r| {
                let id: String = r.get(0)?;
                Ok((id, (r.get(1)?, r.get(2)?, r.get(3)?)))
            })
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        });
    match loaded {
        Ok(map) => map,
        Err(e) => {
            log::warn!("student detail lookup failed, insights continue without: {}", e);
            HashMap::new()
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.weekly" => Some(handle_weekly(state, req)),
        "dashboard.insights" => Some(handle_insights(state, req)),
        _ => None,
    }
}
