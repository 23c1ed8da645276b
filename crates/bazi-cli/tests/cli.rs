//! CLI command integration tests.
//! Each test uses a temp directory via BAZI_DATA_DIR for full isolation.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bazi_cmd(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("bazi").unwrap();
    cmd.env("BAZI_DATA_DIR", data_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn extract_stat_value(output: &str, prefix: &str) -> String {
    output
        .lines()
        .find(|l| l.contains(prefix))
        .unwrap_or_else(|| panic!("stat line containing '{prefix}' not found in output:\n{output}"))
        .split_whitespace()
        .last()
        .unwrap()
        .to_string()
}

#[test]
fn stats_fresh_db() {
    let dir = TempDir::new().unwrap();
    bazi_cmd(&dir)
        .args(["stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entries:      0"))
        .stdout(predicate::str::contains("nicknames:    0"))
        .stdout(predicate::str::contains("oldest:       -"));
}

#[test]
fn calc_reference_reading() {
    let dir = TempDir::new().unwrap();
    let json = stdout_json(bazi_cmd(&dir).args([
        "calc",
        "--date",
        "1990-01-01",
        "--time",
        "12:30",
        "--longitude",
        "116.4",
        "--format",
        "chinese",
    ]));
    assert_eq!(json["yearCn"], "己巳");
    assert_eq!(json["monthCn"], "丙子");
    assert_eq!(json["dayCn"], "丙寅");
    assert_eq!(json["hourCn"], "甲午");
    assert_eq!(json["shichenCn"], "午时");
}

#[test]
fn calc_uses_default_time_and_longitude() {
    let dir = TempDir::new().unwrap();
    let json = stdout_json(bazi_cmd(&dir).args(["calc", "--date", "1990-01-01", "--nickname", "me"]));
    assert_eq!(json["meta"]["birth"]["time"], "12:30");
    assert_eq!(json["meta"]["birth"]["longitude"], 116.4);
    assert_eq!(json["validation"]["isValid"], true);

    let stats = bazi_cmd(&dir).args(["stats"]).output().unwrap();
    let stdout = String::from_utf8_lossy(&stats.stdout);
    assert_eq!(extract_stat_value(&stdout, "entries:"), "1");
    assert_eq!(extract_stat_value(&stdout, "nicknames:"), "1");
}

#[test]
fn calc_then_get_by_nickname() {
    let dir = TempDir::new().unwrap();
    bazi_cmd(&dir)
        .args(["calc", "--date", "1990-01-01", "--nickname", "me"])
        .assert()
        .success();

    let json = stdout_json(bazi_cmd(&dir).args(["get", "me", "--format", "legacy"]));
    assert_eq!(json["year"]["ganzhi"], "己巳");
    assert_eq!(json["year"]["gan"], "己");
    assert_eq!(json["year"]["zhi"], "巳");

    let json = stdout_json(bazi_cmd(&dir).args(["get", "1990-01-01_12:30_116.40", "--format", "numeric"]));
    assert_eq!(json["day"], 2);

    bazi_cmd(&dir)
        .args(["get", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no cached reading"));
}

#[test]
fn calc_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    bazi_cmd(&dir)
        .args(["calc", "--date", "1990-02-30"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid birth input"));

    bazi_cmd(&dir)
        .args(["calc", "--date", "1850-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("calculation failed"));

    bazi_cmd(&dir)
        .args(["calc", "--date", "1990-01-01", "--format", "xml"])
        .assert()
        .failure();
}

#[test]
fn warm_sweep_and_clear() {
    let dir = TempDir::new().unwrap();
    let warm_file = dir.path().join("warm.json");
    std::fs::write(
        &warm_file,
        r#"[
            {"date": "1990-01-01", "nickname": "a"},
            {"date": "1984-02-04", "time": "23:10", "longitude": 104.06, "nickname": "b"},
            {"date": "not-a-date"},
            {"date": "1990-05-15", "record": {"year": "庚午", "month": "辛巳", "day": "庚辰", "hour": "癸未"}}
        ]"#,
    )
    .unwrap();

    bazi_cmd(&dir)
        .args(["warm"])
        .arg(&warm_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("applied=3 skipped=0 failed=1"));

    bazi_cmd(&dir)
        .args(["warm"])
        .arg(&warm_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("applied=0 skipped=3 failed=1"));

    bazi_cmd(&dir)
        .args(["sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("evicted 0, 3 remaining"));

    bazi_cmd(&dir)
        .args(["clear", "a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared a"));

    bazi_cmd(&dir)
        .args(["clear", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared 2 entries"));
}

#[test]
fn repair_reports_healthy_cache() {
    let dir = TempDir::new().unwrap();
    bazi_cmd(&dir)
        .args(["calc", "--date", "2000-01-01", "--nickname", "y2k"])
        .assert()
        .success();

    let report = stdout_json(bazi_cmd(&dir).args(["repair"]));
    assert_eq!(report["examined"], 1);
    assert_eq!(report["healthy"], 1);

    let outcome = stdout_json(bazi_cmd(&dir).args(["repair", "y2k"]));
    assert_eq!(outcome, "healthy");
}

#[test]
fn migrate_flat_record_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.json");
    std::fs::write(
        &path,
        r#"{"year": "庚午", "month": "戊寅", "day": "甲子", "hour": "丙寅"}"#,
    )
    .unwrap();

    let json = stdout_json(bazi_cmd(&dir).arg("migrate").arg(&path));
    assert_eq!(json["log"]["detectedVersion"], "1.0.0");
    assert_eq!(json["log"]["success"], true);
    assert_eq!(json["record"]["meta"]["schemaVersion"], "2.0.0");
    assert_eq!(json["record"]["chinese"]["shichenCn"], "寅时");
    assert_eq!(json["record"]["numeric"]["year"], 6);

    let junk = dir.path().join("junk.json");
    std::fs::write(&junk, r#"{"hello": "world"}"#).unwrap();
    bazi_cmd(&dir)
        .arg("migrate")
        .arg(&junk)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot migrate"));
}

#[test]
fn validate_record_file() {
    let dir = TempDir::new().unwrap();
    let calc = stdout_json(bazi_cmd(&dir).args(["calc", "--date", "1990-01-01"]));

    let good = dir.path().join("good.json");
    std::fs::write(&good, serde_json::to_string(&calc).unwrap()).unwrap();
    let json = stdout_json(bazi_cmd(&dir).arg("validate").arg(&good));
    assert_eq!(json["summary"]["valid"], 1);

    let mut damaged = calc.clone();
    damaged["numeric"]["year"] = serde_json::json!(6);
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, serde_json::to_string(&vec![calc, damaged.clone()]).unwrap()).unwrap();
    bazi_cmd(&dir)
        .arg("validate")
        .arg(&bad)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"invalid\": 1"))
        .stderr(predicate::str::contains("1 of 2 records invalid"));

    // a label/number disagreement is only a warning when permissive
    let single = dir.path().join("single.json");
    std::fs::write(&single, serde_json::to_string(&damaged).unwrap()).unwrap();
    bazi_cmd(&dir)
        .args(["validate", "--permissive"])
        .arg(&single)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"warnings\""));
}

#[test]
fn export_import_roundtrip() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let export_path = dir_a.path().join("export.json");

    bazi_cmd(&dir_a)
        .args(["calc", "--date", "1990-01-01", "--nickname", "me"])
        .assert()
        .success();
    bazi_cmd(&dir_a)
        .args(["calc", "--date", "1985-10-26", "--time", "09:00"])
        .assert()
        .success();

    bazi_cmd(&dir_a)
        .args(["export"])
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported 2 entries"));

    bazi_cmd(&dir_b)
        .args(["import"])
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported=2"));

    let json = stdout_json(bazi_cmd(&dir_b).args(["get", "me", "--format", "chinese"]));
    assert_eq!(json["dayCn"], "丙寅");
}

#[test]
fn config_file_is_honored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "min_ttl_secs = 100\nmax_ttl_secs = 10\n",
    )
    .unwrap();
    bazi_cmd(&dir)
        .args(["stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load cache config"));
}

#[test]
fn missing_required_args() {
    let dir = TempDir::new().unwrap();

    bazi_cmd(&dir)
        .args(["calc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));

    bazi_cmd(&dir)
        .args(["get"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));

    bazi_cmd(&dir)
        .args(["export"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));

    bazi_cmd(&dir)
        .args(["import"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
