//! Integration tests for scripted scenario runs

use pretty_assertions::assert_eq;
use std::io::Write;
use window_async::{Error, Scenario};

fn write_scenario(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_run_from_file() {
    let file = write_scenario(
        r#"{
            "config": { "start_time_ms": 100, "frame_interval_ms": 10 },
            "timeouts": [0, 25],
            "frames": 3,
            "routes": [{ "method": "POST", "url": "http://api.test/save", "status": 201, "body": {} }],
            "fetches": [{ "method": "POST", "url": "http://api.test/save" }]
        }"#,
    );
    let report = Scenario::from_file(file.path()).unwrap().run().unwrap();
    assert_eq!(report.callbacks_run, 5);
    assert_eq!(report.fetches_ok, 1);
    assert_eq!(report.fetches_failed, 0);
    assert_eq!(report.run.frames_run, 3);
    assert_eq!(report.run.final_time, 125);
    assert!(report.drained);
    assert_eq!(report.pending_after, 0);
}

#[test]
fn test_report_serializes() {
    let report = Scenario::from_json(r#"{ "timeouts": [1] }"#).unwrap().run().unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["callbacks_run"], 1);
    assert_eq!(value["tracker"]["registered"], 1);
    assert_eq!(value["event_loop"]["timers_fired"], 1);
}

#[test]
fn test_endless_interval_hits_run_limit() {
    let scenario = Scenario::from_json(
        r#"{ "config": { "max_run_iterations": 50 }, "intervals": [{ "delay_ms": 1, "ticks": 1000 }] }"#,
    )
    .unwrap();
    assert!(matches!(scenario.run(), Err(Error::RunLimit { iterations: 50 })));
}

#[test]
fn test_missing_file() {
    let err = Scenario::from_file("/nonexistent/scenario.json").unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_delay_past_end_of_clock_does_not_fire() {
    let scenario = Scenario::from_json(
        r#"{ "config": { "start_time_ms": 5 }, "timeouts": [18446744073709551615, 3] }"#,
    )
    .unwrap();
    let report = scenario.run().unwrap();
    assert_eq!(report.callbacks_run, 1);
    assert_eq!(report.run.final_time, 8);
    assert!(!report.drained);
    assert_eq!(report.pending_after, 1);
}

#[test]
fn test_cancel_at_end_of_clock() {
    let scenario = Scenario::from_json(
        r#"{ "timeouts": [18446744073709551615], "cancel_at_ms": 18446744073709551615 }"#,
    )
    .unwrap();
    let report = scenario.run().unwrap();
    assert_eq!(report.callbacks_run, 0);
    assert!(report.drained);
    assert_eq!(report.pending_after, 0);
}
