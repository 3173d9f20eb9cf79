use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use mutacov::coverage::{CoverageDatabase, CoverageError, InMemoryCoverage, LineRecord, TestInfo};
use mutacov::probe::{InvokeReceiver, ProbeId, ProbeStore, enter_test};
use mutacov::unit::{ClassLine, UnitName};
use tempfile::TempDir;

fn test(name: &str, time: u64) -> TestInfo {
    TestInfo::new(name, "CalcTest", time, Some(UnitName::new("app.Calc")), 0)
}

fn calc_line(line: u32) -> ClassLine {
    ClassLine::new(UnitName::new("app.Calc"), line)
}

#[test]
fn unknown_keys_have_no_tests() {
    let coverage = InMemoryCoverage::new();
    assert!(coverage.tests_for_class_line(&calc_line(1)).is_empty());
    assert!(coverage.tests_for_class(&UnitName::new("app.Calc")).is_empty());
}

#[test]
fn class_tests_are_the_union_of_line_tests_in_discovery_order() {
    let mut coverage = InMemoryCoverage::new();
    coverage.record(calc_line(3), test("b", 20));
    coverage.record(calc_line(1), test("a", 10));
    coverage.record(calc_line(1), test("b", 20));
    coverage.record(ClassLine::new(UnitName::new("app.Other"), 1), test("c", 5));

    let names: Vec<String> = coverage
        .tests_for_class(&UnitName::new("app.Calc"))
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(coverage.tests_for_class_line(&calc_line(1)).len(), 2);
}

#[test]
fn recording_the_same_test_twice_is_ignored() {
    let mut coverage = InMemoryCoverage::new();
    coverage.record(calc_line(1), test("a", 10));
    coverage.record(calc_line(1), test("a", 10));
    assert_eq!(coverage.tests_for_class_line(&calc_line(1)).len(), 1);
    assert_eq!(coverage.line_count(), 1);
}

#[test]
fn loads_line_records_from_json() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("coverage.json")).unwrap();
    std::fs::write(
        &path,
        r#"[
            {"unit": "app.Calc", "line": 4, "tests": [
                {"name": "adds", "definingClass": "CalcTest", "time": 12},
                {"name": "subtracts", "definingClass": "CalcTest", "time": 3, "classUnderTest": "app.Calc", "order": 1}
            ]}
        ]"#,
    )
    .unwrap();

    let coverage = InMemoryCoverage::from_json_file(&path).unwrap();
    let tests = coverage.tests_for_class_line(&calc_line(4));
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0].name, "adds");
    assert_eq!(tests[0].class_under_test, None);
    assert_eq!(tests[1].class_under_test, Some(UnitName::new("app.Calc")));
}

#[test]
fn records_survive_a_json_round_trip() {
    let mut coverage = InMemoryCoverage::new();
    coverage.record(calc_line(2), test("a", 10));
    coverage.record(calc_line(1), test("b", 20));
    let json = serde_json::to_string(&coverage.to_records()).unwrap();
    let records: Vec<LineRecord> = serde_json::from_str(&json).unwrap();
    assert_eq!(records[0].line, 1);
    let reloaded = InMemoryCoverage::from_records(records);
    assert_eq!(
        reloaded.tests_for_class_line(&calc_line(2)),
        coverage.tests_for_class_line(&calc_line(2))
    );
}

#[test]
fn missing_file_reports_path() {
    let err = InMemoryCoverage::from_json_file(Utf8Path::new("/nonexistent/coverage.json")).unwrap_err();
    assert!(matches!(err, CoverageError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/coverage.json"));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("coverage.json")).unwrap();
    std::fs::write(&path, "{ not json").unwrap();
    let err = InMemoryCoverage::from_json_file(&path).unwrap_err();
    assert!(matches!(err, CoverageError::Parse { .. }));
}

#[test]
fn builds_from_probe_hits() {
    let store = ProbeStore::new();
    let hit = ProbeId::new(1, 0);
    let unmapped = ProbeId::new(1, 1);
    {
        let _test = enter_test("adds");
        store.report(hit);
        store.report(unmapped);
    }
    {
        let _test = enter_test("unknown_test");
        store.report(ProbeId::new(1, 2));
    }

    let sites = HashMap::from([(hit, calc_line(7)), (ProbeId::new(1, 2), calc_line(8))]);
    let tests = HashMap::from([("adds".to_string(), test("adds", 12))]);
    let coverage = InMemoryCoverage::from_probe_hits(&store.snapshot(), &sites, &tests);

    assert_eq!(coverage.tests_for_class_line(&calc_line(7)), vec![test("adds", 12)]);
    assert!(coverage.tests_for_class_line(&calc_line(8)).is_empty());
    assert_eq!(coverage.line_count(), 1);
}

#[test]
fn shared_database_answers_through_arc() {
    let mut coverage = InMemoryCoverage::new();
    coverage.record(calc_line(1), test("a", 10));
    let shared: Arc<dyn CoverageDatabase> = Arc::new(coverage);
    assert_eq!(shared.tests_for_class_line(&calc_line(1)).len(), 1);
}
