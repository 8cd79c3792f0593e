mod common;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;

use common::{RemoteFixture, TestWorkspace};

const ENV_KEYS: &[&str] = &[
    "TRIP_REPORTS_DATABASE",
    "DATA_REFRESH_ENABLED",
    "DATA_REFRESH_TIME",
    "DATA_REFRESH_PROFILE",
    "DATA_REFRESH_CHUNK_SIZE",
    "DATA_REFRESH_MIN_DATE",
    "DATA_REFRESH_MIN_RITDATUM",
];

struct Harness {
    workspace: TestWorkspace,
    remote: RemoteFixture,
}

impl Harness {
    fn new() -> Self {
        let workspace = TestWorkspace::new();
        let remote = RemoteFixture::create(&workspace);
        remote.insert(&[("ritdatum", "2024-05-01 08:00:00"), ("ritnummer", "3"), ("status", "done")]);
        remote.insert(&[
            ("ritdatum", "2024-05-01 09:00:00"),
            ("ritnummer", "4"),
            ("status", "cancelled"),
            ("afstand", "n.v.t."),
        ]);
        remote.insert(&[("ritdatum", "2024-05-02 10:00:00"), ("ritnummer", "9"), ("status", "done")]);
        let config = format!(
            "database: \"{local}\"\n\
             profiles:\n  \
               - name: Historie\n    \
                 backend: sqlite\n    \
                 database: \"{remote}\"\n    \
                 source_table: RGRitten\n",
            local = workspace.path().join("local.db").display(),
            remote = remote.path().display(),
        );
        workspace.write("config.yaml", &config);
        Self { workspace, remote }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("trip-reports").expect("binary exists");
        for key in ENV_KEYS {
            cmd.env_remove(key);
        }
        cmd.arg("--config").arg(self.workspace.path().join("config.yaml"));
        cmd
    }
}

#[test]
fn init_creates_the_local_store() {
    let harness = Harness::new();
    let database = harness.workspace.path().join("other.db");
    harness
        .command()
        .arg("--database")
        .arg(&database)
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Initialized local store at"));
    assert!(database.exists());
}

#[test]
fn sync_then_render_saved_report() {
    let harness = Harness::new();

    harness
        .command()
        .args(["sync", "--chunk-size", "2"])
        .assert()
        .success()
        .stdout(contains("Synced 3 rows (ritnummer 0 -> 9)"));
    harness
        .command()
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("Synced 0 rows (ritnummer 9 -> 9)"));

    let definition = harness.workspace.write(
        "done.json",
        r#"{
            "name": "Done trips",
            "include_fields": ["ritnummer", "status"],
            "filter_fields": [{"field": "status", "op": "=", "value": "done"}],
            "sort_fields": [{"field": "ritnummer", "dir": "desc"}]
        }"#,
    );
    harness
        .command()
        .arg("reports")
        .arg("--import")
        .arg(&definition)
        .assert()
        .success()
        .stdout(contains("Created report 1 (Done trips)"));

    harness
        .command()
        .args(["report", "1", "--format", "csv"])
        .assert()
        .success()
        .stdout("ritnummer,status\n9,done\n3,done\n");

    harness
        .command()
        .args(["report", "1", "--param", "rt_val_status=cancelled"])
        .assert()
        .success()
        .stdout(contains("(0 row(s), limit 1000)"));

    let csv = harness.workspace.path().join("done.csv");
    harness
        .command()
        .args(["report", "1", "--format", "csv", "--output"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(contains("Wrote"));
    assert_eq!(
        fs::read_to_string(&csv).expect("csv written"),
        "ritnummer,status\n9,done\n3,done\n"
    );

    let xlsx = harness.workspace.path().join("done.xlsx");
    harness
        .command()
        .args(["report", "1", "--format", "xlsx", "--output"])
        .arg(&xlsx)
        .assert()
        .success()
        .stdout(contains("Wrote"));
    assert!(fs::read(&xlsx).expect("xlsx written").starts_with(b"PK"));

    harness
        .command()
        .arg("reports")
        .assert()
        .success()
        .stdout(contains("Done trips"));
}

#[test]
fn missing_report_prints_redirect_message() {
    let harness = Harness::new();
    harness
        .command()
        .args(["report", "42"])
        .assert()
        .success()
        .stdout(contains("Report 42 not found"));
}

#[test]
fn diagnose_lists_non_convertible_values() {
    let harness = Harness::new();
    harness
        .command()
        .arg("diagnose")
        .assert()
        .success()
        .stdout(contains(
            "Column afstand has non-convertible value 'n.v.t.' at ritnummer 4",
        ));
    harness
        .command()
        .arg("locate-columns")
        .assert()
        .success()
        .stdout(contains("No offending columns detected."));
    assert!(harness.remote.path().exists());
}

#[test]
fn unknown_profile_fails_with_message() {
    let harness = Harness::new();
    harness
        .command()
        .args(["sync", "--profile", "Archief"])
        .assert()
        .failure()
        .stderr(contains("connection profile 'Archief' not found"));
}
