use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_liveclassd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn liveclassd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method, "params": params }))
        .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

// Quota week for this reference: Monday 2024-06-03 00:00:00 through
// Saturday 2024-06-08 23:59:59.
const REFERENCE: &str = "2024-06-05T12:00:00Z";

#[test]
fn quota_week_counts_monday_to_saturday_and_enforcement_is_off_by_default() {
    let workspace = temp_dir("liveclass-quota");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = rusqlite::Connection::open(workspace.join("liveclass.sqlite3"))
        .expect("open workspace db");
    conn.execute(
        "INSERT INTO teachers(id, email, name, role) VALUES('t-1', 't@example.com', 'T', NULL)",
        [],
    )
    .expect("seed teacher");
    drop(conn);

    let carla = request(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "name": "Carla", "email": "carla@example.com", "weeklyClasses": 2 }),
    );
    let carla_id = carla["result"]["student"]["id"].as_str().expect("id").to_string();
    let dana = request(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "name": "Dana", "email": "dana@example.com" }),
    );
    let dana_id = dana["result"]["student"]["id"].as_str().expect("id").to_string();

    // Monday, Tuesday and Sunday of the reference week.
    let mut class_ids = Vec::new();
    for (i, dt) in [
        "2024-06-03T10:00:00Z",
        "2024-06-04T10:00:00Z",
        "2024-06-09T10:00:00Z",
    ]
    .iter()
    .enumerate()
    {
        let created = request(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "classes.create",
            json!({ "teacherId": "t-1", "dateTime": dt }),
        );
        class_ids.push(created["result"]["class"]["id"].as_str().expect("id").to_string());
    }
    for (i, class_id) in class_ids.iter().enumerate() {
        for student in [&carla_id, &dana_id] {
            let added = request(
                &mut stdin,
                &mut reader,
                &format!("a{}-{}", i, student),
                "attendance.add",
                json!({ "classId": class_id, "studentId": student }),
            );
            assert_eq!(added["ok"], true);
        }
    }

    // Carla attended three classes, but the Sunday one falls outside the
    // quota week: 2 of 2, at limit, still allowed.
    let carla_check = request(
        &mut stdin,
        &mut reader,
        "q1",
        "access.check",
        json!({ "email": "CARLA@example.com", "reference": REFERENCE }),
    );
    assert_eq!(carla_check["ok"], true);
    let r = &carla_check["result"];
    assert_eq!(r["weeklyLimit"], 2);
    assert_eq!(r["attendedThisWeek"], 2);
    assert_eq!(r["atLimit"], true);
    assert_eq!(r["allowed"], true);
    assert_eq!(r["enforced"], false);
    assert_eq!(r["weekStart"], "2024-06-03T00:00:00.000Z");
    assert_eq!(r["weekEnd"], "2024-06-08T23:59:59.000Z");

    // No limit set means unlimited.
    let dana_check = request(
        &mut stdin,
        &mut reader,
        "q2",
        "access.check",
        json!({ "email": "dana@example.com", "reference": REFERENCE }),
    );
    assert!(dana_check["result"]["weeklyLimit"].is_null());
    assert_eq!(dana_check["result"]["atLimit"], false);
    assert_eq!(dana_check["result"]["allowed"], true);

    // Turning enforcement on flips the at-limit student to blocked.
    let _ = request(
        &mut stdin,
        &mut reader,
        "set",
        "settings.set",
        json!({ "key": "quota.enforce", "value": "true" }),
    );
    let enforced = request(
        &mut stdin,
        &mut reader,
        "q3",
        "access.check",
        json!({ "email": "carla@example.com", "reference": REFERENCE }),
    );
    assert_eq!(enforced["result"]["enforced"], true);
    assert_eq!(enforced["result"]["allowed"], false);
    // The unlimited student stays allowed under enforcement.
    let dana_enforced = request(
        &mut stdin,
        &mut reader,
        "q4",
        "access.check",
        json!({ "email": "dana@example.com", "reference": REFERENCE }),
    );
    assert_eq!(dana_enforced["result"]["allowed"], true);

    let ghost = request(
        &mut stdin,
        &mut reader,
        "q5",
        "access.check",
        json!({ "email": "ghost@example.com" }),
    );
    assert_eq!(ghost["ok"], false);
    assert_eq!(ghost["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
