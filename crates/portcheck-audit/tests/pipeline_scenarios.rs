use std::fs;
use std::path::{Path, PathBuf};

use portcheck_audit::{
    AuditConfig, AuditPipeline, AuditRunSummary, FILTER_METADATA_NAME, SUMMARY_NAME,
};
use tempfile::tempdir;

const HEADER: &str = "Created,Issue key,COID,NAP Number,MPT Port Number,Secondary port# check";

fn write_input(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut text = String::from(HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    fs::write(&path, text).expect("test input should write");
    path
}

fn run(config: AuditConfig) -> AuditRunSummary {
    AuditPipeline::new(config)
        .run()
        .expect("pipeline should run")
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).expect("artifact should open");
    reader
        .records()
        .map(|row| {
            row.expect("artifact row should parse")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect()
}

#[test]
fn consensus_and_exclusion_end_to_end() {
    let dir = tempdir().expect("tempdir");
    let input = write_input(
        dir.path(),
        "export.csv",
        &[
            "2024-05-14 09:30:00,NET-1,A,1,100,port# to check",
            "2024-05-14 10:05:00,NET-2,A,1,100,",
            "2024-05-01 09:00:00,NET-3,B,9,7,port# to check",
            "2024-05-02 09:00:00,NET-4,B,9,7,port# to check",
        ],
    );
    let output_dir = dir.path().join("out");

    let summary = run(AuditConfig {
        input,
        output_dir: output_dir.clone(),
        ignored_client_groups: vec!["B".to_string()],
        ..AuditConfig::default()
    });

    assert_eq!(summary.input_rows, 4);
    assert_eq!(summary.ignored_client_rows, 2);
    assert_eq!(summary.eligible_rows, 2);
    assert_eq!(summary.flagged_groups, 1);
    assert_eq!(summary.selected_rows, 1);

    let rows = read_rows(&summary.artifact.path);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row[1], "NET-1");
    assert_eq!(row[6], "100");
    assert_eq!(row[7], "Duplicate MPT ports for COID A, NAP 1: 100");

    // Both accounting documents land next to the artifact.
    let summary_text =
        fs::read_to_string(output_dir.join(SUMMARY_NAME)).expect("summary should read back");
    let parsed: AuditRunSummary =
        serde_json::from_str(&summary_text).expect("summary should parse");
    assert_eq!(parsed.selected_rows, 1);
    assert!(output_dir.join(FILTER_METADATA_NAME).exists());
}

#[test]
fn every_record_of_a_flagged_group_lists_the_same_ports() {
    let dir = tempdir().expect("tempdir");
    let input = write_input(
        dir.path(),
        "export.csv",
        &[
            "2024-05-01 09:00:00,NET-A1,X,5,10,port# to check",
            "2024-05-02 09:00:00,NET-A2,X,5,10,port# to check",
            "2024-05-03 09:00:00,NET-B1,X,5,20,port# to check",
            "2024-05-04 09:00:00,NET-B2,X,5,20,port# to check",
            "2024-05-05 09:00:00,NET-C1,X,5,30,port# to check",
        ],
    );

    let summary = run(AuditConfig {
        input,
        output_dir: dir.path().join("out"),
        ..AuditConfig::default()
    });

    assert_eq!(summary.flagged_groups, 1);
    assert_eq!(summary.selected_rows, 5);

    let rows = read_rows(&summary.artifact.path);
    for row in &rows {
        assert_eq!(row[6], "10, 20", "row {:?} should list the group set", row[1]);
    }

    // Port ascending, then newest first within each port.
    let keys: Vec<&str> = rows.iter().map(|row| row[1].as_str()).collect();
    assert_eq!(keys, vec!["NET-A2", "NET-A1", "NET-B2", "NET-B1", "NET-C1"]);
}

#[test]
fn reruns_on_the_same_input_are_byte_identical() {
    let dir = tempdir().expect("tempdir");
    let input = write_input(
        dir.path(),
        "export.csv",
        &[
            "2024-05-01 09:00:00,NET-1,A,1,10,port# to check",
            "2024-05-02 09:00:00,NET-2,A,1,10,port# to check",
            "2024-05-03 09:00:00,NET-3,A,1,11,port# to check",
        ],
    );

    let first = run(AuditConfig {
        input: input.clone(),
        output_dir: dir.path().join("out-1"),
        ..AuditConfig::default()
    });
    let second = run(AuditConfig {
        input,
        output_dir: dir.path().join("out-2"),
        ..AuditConfig::default()
    });

    assert_eq!(first.artifact.sha256, second.artifact.sha256);
    assert_eq!(first.artifact.byte_size, second.artifact.byte_size);
}

#[test]
fn rerunning_on_the_artifact_selects_the_same_rows() {
    let dir = tempdir().expect("tempdir");
    let input = write_input(
        dir.path(),
        "export.csv",
        &[
            "2024-05-01 09:00:00,NET-A1,X,5,10,port# to check",
            "2024-05-02 09:00:00,NET-A2,X,5,10,port# to check",
            "2024-05-03 09:00:00,NET-B1,X,5,20,port# to check",
            "2024-05-04 09:00:00,NET-B2,X,5,20,port# to check",
        ],
    );

    let first = run(AuditConfig {
        input,
        output_dir: dir.path().join("out-1"),
        ..AuditConfig::default()
    });
    let second = run(AuditConfig {
        input: first.artifact.path.clone(),
        output_dir: dir.path().join("out-2"),
        ..AuditConfig::default()
    });

    assert_eq!(second.selected_rows, first.selected_rows);

    let first_rows = read_rows(&first.artifact.path);
    let second_rows = read_rows(&second.artifact.path);
    assert_eq!(first_rows.len(), second_rows.len());
    for (first_row, second_row) in first_rows.iter().zip(&second_rows) {
        // Original cells, order, and annotations all survive a second pass.
        assert_eq!(first_row[..6], second_row[..6]);
        assert_eq!(first_row[6], second_row[8]);
        assert_eq!(first_row[7], second_row[9]);
    }
}

#[test]
fn missing_columns_abort_before_anything_is_written() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("export.csv");
    fs::write(&input, "Created,COID,NAP Number\n2024-05-01,A,1\n").expect("input should write");
    let output_dir = dir.path().join("out");

    let err = AuditPipeline::new(AuditConfig {
        input,
        output_dir: output_dir.clone(),
        ..AuditConfig::default()
    })
    .run()
    .err()
    .expect("pipeline should fail");

    let message = format!("{err:#}");
    assert!(message.contains("MPT Port Number"));
    assert!(message.contains("Secondary port# check"));
    assert!(!output_dir.exists());
}

#[test]
fn temporal_filter_runs_before_the_duplicate_detector() {
    let dir = tempdir().expect("tempdir");
    let input = write_input(
        dir.path(),
        "export.csv",
        &[
            // The older half of the pair is out of scope, so no duplicate
            // remains to flag.
            "2023-12-01 09:00:00,NET-1,A,1,100,port# to check",
            "2024-05-01 09:00:00,NET-2,A,1,100,port# to check",
            "not a date,NET-3,A,1,100,port# to check",
        ],
    );

    let summary = run(AuditConfig {
        input,
        output_dir: dir.path().join("out"),
        ..AuditConfig::default()
    });

    assert_eq!(summary.before_cutoff_rows, 1);
    assert_eq!(summary.unparseable_created_rows, 1);
    assert_eq!(summary.eligible_rows, 1);
    assert_eq!(summary.flagged_groups, 0);
    assert_eq!(summary.selected_rows, 0);

    // The artifact is still written, header only.
    let rows = read_rows(&summary.artifact.path);
    assert!(rows.is_empty());
}
