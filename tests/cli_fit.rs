use std::fs;
use std::process::Command;

use tempfile::tempdir;

const EVENTS: &str = "# user\titem\tscore\n\
1\t10\t5\n\
1\t11\t3\n\
2\t10\t4\n\
2\t12\t1\n\
3\t11\t2\n\
3\t12\t2\n\
alice\t10\t5\n\
alice\t12\t1\n";

#[test]
fn fit_writes_one_prediction_per_query() {
    let tmp = tempdir().expect("temporary directory");
    let events_path = tmp.path().join("events.tsv");
    let queries_path = tmp.path().join("queries.tsv");
    let output_path = tmp.path().join("predictions.tsv");
    fs::write(&events_path, EVENTS).expect("write events");
    fs::write(&queries_path, "1\t12\nalice\t11\nstranger\t99\n").expect("write queries");

    let exe = env!("CARGO_BIN_EXE_latentrec");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "fit",
            events_path.to_str().expect("path str"),
            "--k",
            "1",
            "--c",
            "0.1",
            "--score-min",
            "1",
            "--score-max",
            "5",
            "--max-iter",
            "200",
            "--clip",
            "--queries",
            queries_path.to_str().expect("path str"),
            "--output",
            output_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run latentrec cli");

    assert!(output.status.success(), "CLI failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("score_prediction_rmse"), "stdout: {stdout}");

    let written = fs::read_to_string(&output_path).expect("read predictions");
    let rows: Vec<Vec<&str>> = written
        .lines()
        .map(|line| line.split('\t').collect())
        .collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][0], "alice");
    assert_eq!(rows[2][..2], ["stranger", "99"]);
    for row in &rows {
        let prediction: f64 = row[2].parse().expect("numeric prediction");
        assert!((1.0..=5.0).contains(&prediction), "prediction {prediction}");
    }
}

#[test]
fn fit_rejects_scores_outside_the_domain() {
    let tmp = tempdir().expect("temporary directory");
    let events_path = tmp.path().join("events.tsv");
    fs::write(&events_path, "1\t10\t5\n1\t11\t6\n").expect("write events");

    let status = Command::new(env!("CARGO_BIN_EXE_latentrec"))
        .args([
            "fit",
            events_path.to_str().expect("path str"),
            "--score-min",
            "0",
            "--score-max",
            "5",
        ])
        .status()
        .expect("run latentrec cli");
    assert!(!status.success());
}

#[test]
fn describe_prints_score_statistics() {
    let tmp = tempdir().expect("temporary directory");
    let events_path = tmp.path().join("events.tsv");
    fs::write(&events_path, EVENTS).expect("write events");

    let output = Command::new(env!("CARGO_BIN_EXE_latentrec"))
        .args(["describe", events_path.to_str().expect("path str")])
        .output()
        .expect("run latentrec cli");
    assert!(output.status.success(), "CLI failed: {output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("score_nos_samples\t8.000000"), "stdout: {stdout}");
    assert!(stdout.contains("events_per_object_type0_mean\t2.000000"), "stdout: {stdout}");
}
