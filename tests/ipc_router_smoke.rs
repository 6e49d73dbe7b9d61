use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn seed_teacher(workspace: &Path, id: &str, email: &str, name: &str, role: Option<&str>) {
    let conn = rusqlite::Connection::open(workspace.join("liveclass.sqlite3"))
        .expect("open workspace db");
    conn.execute(
        "INSERT INTO teachers(id, email, name, role) VALUES(?, ?, ?, ?)",
        (id, email, name, role),
    )
    .expect("seed teacher");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("liveclass-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_daemon();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert_eq!(selected["result"]["classTable"], "classes");

    seed_teacher(&workspace, "t-1", "smoke@example.com", "Smoke Teacher", None);
    let login = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "email": "smoke@example.com" }),
    );
    assert_eq!(login["ok"], true);
    assert_eq!(login["result"]["teacher"]["id"], "t-1");

    let created_student = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "name": "Smoke Student", "email": "student@example.com" }),
    );
    assert_eq!(created_student["ok"], true);
    let student_id = created_student["result"]["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "5", "students.list", json!({}));

    let created_class = request(
        &mut stdin,
        &mut reader,
        "6",
        "classes.create",
        json!({
            "teacherId": "t-1",
            "dateTime": "2024-06-03T15:00:00Z",
            "level": "Basic"
        }),
    );
    assert_eq!(created_class["ok"], true);
    let class_id = created_class["result"]["class"]["id"]
        .as_str()
        .expect("class id")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "7", "classes.list", json!({}));

    let added = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.add",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    assert_eq!(added["ok"], true);
    assert_eq!(added["result"]["alreadyPresent"], false);

    let listed = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed["result"]["records"].as_array().map(Vec::len), Some(1));

    let weekly = request(
        &mut stdin,
        &mut reader,
        "10",
        "dashboard.weekly",
        json!({
            "teacherId": "t-1",
            "reference": "2024-06-05T12:00:00Z"
        }),
    );
    assert_eq!(weekly["ok"], true);
    assert_eq!(weekly["result"]["summary"]["classesThisWeek"], 1);

    let insights = request(
        &mut stdin,
        &mut reader,
        "11",
        "dashboard.insights",
        json!({ "teacherId": "t-1" }),
    );
    assert_eq!(insights["ok"], true);
    assert_eq!(insights["result"]["summary"]["totalClasses"], 1);

    let access = request(
        &mut stdin,
        &mut reader,
        "12",
        "access.check",
        json!({ "email": "student@example.com" }),
    );
    assert_eq!(access["ok"], true);

    let hook = request(
        &mut stdin,
        &mut reader,
        "13",
        "webhook.ingest",
        json!({ "payload": { "customer": { "email": "hook@example.com", "name": "Hooked" } } }),
    );
    assert_eq!(hook["ok"], true);

    let setting = request(
        &mut stdin,
        &mut reader,
        "14",
        "settings.set",
        json!({ "key": "quota.enforce", "value": "false" }),
    );
    assert_eq!(setting["ok"], true);
    let fetched = request(
        &mut stdin,
        &mut reader,
        "15",
        "settings.get",
        json!({ "key": "quota.enforce" }),
    );
    assert_eq!(fetched["result"]["value"], "false");

    // No calendar endpoint configured in the smoke environment.
    let cal = request(
        &mut stdin,
        &mut reader,
        "16",
        "calendar.createEvent",
        json!({
            "summary": "Smoke event",
            "startTime": "2024-06-03T15:00:00Z",
            "endTime": "2024-06-03T16:00:00Z"
        }),
    );
    assert_eq!(cal["ok"], false);
    assert_eq!(cal["error"]["code"], "no_calendar_endpoint");

    let unknown = request(&mut stdin, &mut reader, "17", "nope.nothing", json!({}));
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    let removed = request(
        &mut stdin,
        &mut reader,
        "18",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    assert_eq!(removed["ok"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn requests_before_workspace_selection_are_refused() {
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let resp = request(&mut stdin, &mut reader, "1", "students.list", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");
    drop(stdin);
    let _ = child.wait();
}
