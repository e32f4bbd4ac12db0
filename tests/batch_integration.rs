//! Batch isolation, determinism and artifact acceptance

mod common;

use cellstress::batch::{load_assignments, BatchRunner, WellAssignment, WellStatus};
use cellstress::core::error::LabError;
use cellstress::pipeline::Pipeline;
use std::path::Path;

fn assignment(well_id: &str, cell_line: &str, compound: Option<&str>) -> WellAssignment {
    WellAssignment {
        well_id: well_id.to_string(),
        cell_line: cell_line.to_string(),
        compound: compound.map(str::to_string),
        dose_multiplier: 3.0,
        initial_viability: 1.0,
        treat_at_h: 0.0,
        timepoint_h: Some(12.0),
        day: 1,
        operator: "op_a".to_string(),
        replicate: 0,
    }
}

#[test]
fn test_bad_wells_fail_alone() {
    let pipeline = common::pipeline();
    let plate = vec![
        assignment("A01", "A549", Some("cccp")),
        assignment("A02", "A549", Some("mystery")),
        assignment("A03", "NotACellLine", Some("cccp")),
        assignment("A04", "HepG2", Some("tunicamycin")),
    ];
    let report = BatchRunner::new(&pipeline).run(&plate);

    assert_eq!(report.summary.wells, 4);
    assert_eq!(report.summary.failed, 2);
    assert!(report.outcomes[0].result().is_some());
    assert_eq!(report.outcomes[1].error(), Some("Unknown compound: mystery"));
    assert_eq!(report.outcomes[2].error(), Some("Unknown cell line: NotACellLine"));
    assert!(report.outcomes[3].result().is_some());
    assert_eq!(report.results().count(), 2);
}

#[test]
fn test_timepoint_before_treatment_is_rejected() {
    let pipeline = common::pipeline();
    let mut well = assignment("B01", "A549", Some("cccp"));
    well.treat_at_h = 24.0;
    well.timepoint_h = Some(12.0);
    let report = BatchRunner::new(&pipeline).run(&[well]);
    assert!(matches!(report.outcomes[0].status, WellStatus::Failed { .. }));
}

#[test]
fn test_time_budget_counts_from_first_observation() {
    let pipeline = common::pipeline();
    let mut well = assignment("B02", "A549", Some("cccp"));
    well.treat_at_h = 0.0;
    well.timepoint_h = Some(24.0);
    let report = BatchRunner::new(&pipeline).run(&[well]);
    let result = report.outcomes[0].result().unwrap();

    let max_elapsed_h = pipeline.planner().config().max_elapsed_h;
    assert!((result.time_h - (24.0 + result.elapsed_h)).abs() < 1e-9);
    assert!(result.elapsed_h <= max_elapsed_h + 1e-9);
    assert!(result.time_h >= 24.0);
}

#[test]
fn test_same_plate_same_results() {
    let pipeline = common::pipeline();
    let plate = load_assignments(Path::new("data/plate.json")).unwrap();
    let first = BatchRunner::new(&pipeline).run(&plate);
    let second = BatchRunner::new(&pipeline).run(&plate);

    assert_eq!(first.outcomes, second.outcomes);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.log.to_tsv(), second.log.to_tsv());
}

#[test]
fn test_well_result_independent_of_plate_neighbours() {
    let pipeline = common::pipeline();
    let target = assignment("C01", "U2OS", Some("nocodazole"));
    let alone = BatchRunner::new(&pipeline).run(&[target.clone()]);
    let crowded = BatchRunner::new(&pipeline).run(&[
        assignment("C00", "A549", Some("rotenone")),
        target,
        assignment("C02", "HepG2", Some("thapsigargin")),
    ]);
    assert_eq!(alone.outcomes[0], crowded.outcomes[1]);
}

#[test]
fn test_tampered_signatures_refused() {
    let biology = common::biology();
    let mut signatures = common::signatures(&biology);
    signatures.signatures[0].mean[0] += 0.5;

    let err = Pipeline::new(&common::config(), biology, signatures, common::passthrough_calibrator()).unwrap_err();
    assert!(matches!(err, LabError::ArtifactDigestMismatch { .. }));
}

#[test]
fn test_unaccepted_calibrator_version_refused() {
    let biology = common::biology();
    let signatures = common::signatures(&biology);
    let mut config = common::config();
    config.artifacts.accepted_calibrator_versions = vec!["approved-000000000000".to_string()];

    let err = Pipeline::new(&config, biology, signatures, common::passthrough_calibrator()).unwrap_err();
    assert!(matches!(err, LabError::UnrecognizedArtifactVersion { .. }));
}

#[test]
fn test_missing_version_refused() {
    let biology = common::biology();
    let signatures = common::signatures(&biology);
    let mut calibrator = common::passthrough_calibrator();
    calibrator.version = String::new();

    let err = Pipeline::new(&common::config(), biology, signatures, calibrator).unwrap_err();
    assert!(matches!(err, LabError::MissingArtifactVersion { .. }));
}

#[test]
fn test_results_serialize_with_flat_status() {
    let pipeline = common::pipeline();
    let report = BatchRunner::new(&pipeline).run(&[
        assignment("D01", "A549", Some("paclitaxel")),
        assignment("D02", "A549", Some("mystery")),
    ]);
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    let outcomes = json["outcomes"].as_array().unwrap();
    assert_eq!(outcomes[0]["well_id"], "D01");
    assert_eq!(outcomes[0]["status"], "completed");
    assert_eq!(outcomes[1]["status"], "failed");
    assert!(json.get("log").is_none());
}
