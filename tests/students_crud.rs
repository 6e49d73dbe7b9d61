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

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    workspace: PathBuf,
    next_id: u32,
}

impl Harness {
    fn new(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, mut stdin, mut reader) = spawn_daemon();
        let selected = request(
            &mut stdin,
            &mut reader,
            "ws",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        assert_eq!(selected["ok"], true);
        Harness {
            child,
            stdin,
            reader,
            workspace,
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn finish(self) {
        drop(self.stdin);
        let mut child = self.child;
        let _ = child.wait();
        let _ = std::fs::remove_dir_all(self.workspace);
    }
}

#[test]
fn create_rejects_duplicate_name_and_email() {
    let mut h = Harness::new("liveclass-students-dup");

    let first = h.call(
        "students.create",
        json!({ "name": "Maria", "email": "maria@example.com" }),
    );
    assert_eq!(first["ok"], true);

    let same_name = h.call("students.create", json!({ "name": "Maria" }));
    assert_eq!(same_name["ok"], false);
    assert_eq!(same_name["error"]["code"], "conflict");

    let same_email = h.call(
        "students.create",
        json!({ "name": "Maria B", "email": "MARIA@example.com" }),
    );
    assert_eq!(same_email["ok"], false);
    assert_eq!(same_email["error"]["code"], "conflict");

    h.finish();
}

#[test]
fn list_orders_by_name_then_email_and_filters_by_search() {
    let mut h = Harness::new("liveclass-students-list");

    for (name, email) in [
        ("Zoe", "zoe@example.com"),
        ("Alba", "alba@example.com"),
        ("Mona", "mona@other.org"),
    ] {
        let created = h.call("students.create", json!({ "name": name, "email": email }));
        assert_eq!(created["ok"], true, "create {}", name);
    }

    let listed = h.call("students.list", json!({}));
    let names: Vec<&str> = listed["result"]["students"]
        .as_array()
        .expect("students array")
        .iter()
        .map(|s| s["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["Alba", "Mona", "Zoe"]);

    let searched = h.call("students.list", json!({ "search": "OTHER" }));
    let hits = searched["result"]["students"].as_array().expect("array");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "Mona");

    h.finish();
}

#[test]
fn update_patches_fields_and_validates_quota() {
    let mut h = Harness::new("liveclass-students-update");

    let created = h.call(
        "students.create",
        json!({ "name": "Iris", "email": "iris@example.com", "weeklyClasses": 2 }),
    );
    let id = created["result"]["student"]["id"].as_str().expect("id").to_string();

    let updated = h.call(
        "students.update",
        json!({ "studentId": id, "patch": { "email": "Iris.New@Example.com", "weeklyClasses": null } }),
    );
    assert_eq!(updated["ok"], true);
    assert_eq!(updated["result"]["student"]["email"], "iris.new@example.com");
    assert!(updated["result"]["student"]["weeklyClasses"].is_null());
    assert_eq!(updated["result"]["student"]["name"], "Iris");

    let bad = h.call(
        "students.update",
        json!({ "studentId": id, "patch": { "weeklyClasses": -1 } }),
    );
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_params");

    let ghost = h.call(
        "students.update",
        json!({ "studentId": "missing", "patch": { "name": "X" } }),
    );
    assert_eq!(ghost["error"]["code"], "not_found");

    h.finish();
}

#[test]
fn delete_removes_student_and_their_attendance() {
    let mut h = Harness::new("liveclass-students-delete");

    let conn = rusqlite::Connection::open(h.workspace.join("liveclass.sqlite3"))
        .expect("open workspace db");
    conn.execute(
        "INSERT INTO teachers(id, email, name, role) VALUES('t-1', 't@example.com', 'T', NULL)",
        [],
    )
    .expect("seed teacher");
    drop(conn);

    let student = h.call("students.create", json!({ "name": "Leo" }));
    let student_id = student["result"]["student"]["id"].as_str().expect("id").to_string();
    let class = h.call(
        "classes.create",
        json!({ "teacherId": "t-1", "dateTime": "2024-06-03T10:00:00Z" }),
    );
    let class_id = class["result"]["class"]["id"].as_str().expect("id").to_string();
    let added = h.call(
        "attendance.add",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    assert_eq!(added["ok"], true);

    let deleted = h.call("students.delete", json!({ "studentId": student_id }));
    assert_eq!(deleted["ok"], true);

    let records = h.call("attendance.list", json!({ "classId": class_id }));
    assert_eq!(records["result"]["records"].as_array().map(Vec::len), Some(0));

    let again = h.call("students.delete", json!({ "studentId": student_id }));
    assert_eq!(again["error"]["code"], "not_found");

    h.finish();
}
