//! End-to-end pipeline test
//!
//! Writes a small synthetic CP log to a temp directory and drives the full
//! sequence the `cp-analyzer` binary runs: parse -> clean -> export JSON
//! artifacts -> adjust units -> render the HTML report. Verifies the
//! adjusted artifacts carry LimitU units and that a second adjustment pass
//! is a no-op.

use std::fs;
use std::path::Path;

use cp_analyzer::cleaning::CleaningStrategy;
use cp_analyzer::types::{CleaningFlag, ParamArtifact};
use cp_analyzer::units;
use cp_analyzer::CpLogCleaner;

const LOG: &str = "\
Test program\tPMOS650-CP\n\
Lot number\tFA51-3283\n\
Wafer number\t1\n\
No.U\tBVDSS1\tVTH\tRDSON1\tIDSS1\n\
LimitU\t900.0V\t4.0V\t365.0mOHM\t250nA\n\
LimitL\t660.0V\t3.0V\t100.0mOHM\t0.0nA\n\
1\t735.2\t3.52\t0.335\t1.20E-09\n\
2\t741.8\t3.48\t0.341\t1.40E-09\n\
3\t738.0\t3.55\t0.329\t1.10E-09\n\
4\t736.5\t3.50\t0.338\t1.30E-09\n\
5\t739.1\t3.47\t5.000\t1.25E-09\n";

fn targets() -> Vec<String> {
    ["BVDSS1", "VTH", "RDSON1", "IDSS1"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn read_artifact(path: &Path) -> ParamArtifact {
    let text = fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn full_pipeline_produces_adjusted_artifacts_and_report() {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("data/FA51-3283");
    let out_dir = root.path().join("output/FA51-3283");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("FA51-3283_1.TXT"), LOG).unwrap();

    // Parse, clean and export in raw units.
    let mut cleaner = CpLogCleaner::new(&out_dir, targets());
    cleaner.load_dir(&data_dir).unwrap();
    let report = cleaner.clean(CleaningStrategy::SmartParameter, &[]).unwrap();
    assert_eq!(report.count("RDSON1", CleaningFlag::OutlierFlagged), 1);
    cleaner.export_json(&[]).unwrap();

    let rdson_path = out_dir.join("json/RDSON1_data.json");
    let raw = read_artifact(&rdson_path);
    assert_eq!(raw.unit.as_deref(), Some("Ω"));
    assert!(!raw.adjusted);
    assert_eq!(raw.values[0].value, Some(0.335));

    // First adjustment pass rescales to LimitU units.
    let summary = units::adjust_batch_directory(&out_dir, None, false).unwrap();
    assert!(summary.is_clean());
    assert!(summary.adjusted >= 2, "RDSON1 and IDSS1 must be rescaled");

    let adjusted = read_artifact(&rdson_path);
    assert_eq!(adjusted.unit.as_deref(), Some("mΩ"));
    assert!(adjusted.adjusted);
    assert_eq!(adjusted.values[0].value, Some(335.0));
    // The flagged outlier keeps its flag and is rescaled like any value.
    assert_eq!(adjusted.values[4].flag, CleaningFlag::OutlierFlagged);
    assert_eq!(adjusted.values[4].value, Some(5000.0));

    let idss = read_artifact(&out_dir.join("json/IDSS1_data.json"));
    assert_eq!(idss.unit.as_deref(), Some("nA"));
    let first = idss.values[0].value.unwrap();
    assert!((first - 1.2).abs() < 1e-9, "1.20E-09 A must become 1.2 nA, got {first}");

    // Voltage parameters have no scaling rule and stay untouched.
    let vth = read_artifact(&out_dir.join("json/VTH_data.json"));
    assert_eq!(vth.unit.as_deref(), Some("V"));
    assert!(!vth.adjusted);
    assert_eq!(vth.values[0].value, Some(3.52));

    // Second pass is a no-op.
    let again = units::adjust_batch_directory(&out_dir, None, false).unwrap();
    assert_eq!(again.adjusted, 0);
    assert!(again.is_clean());
    let twice = read_artifact(&rdson_path);
    assert_eq!(twice.values[0].value, Some(335.0));

    // Report regeneration renders from the adjusted artifacts.
    let summary = units::adjust_batch_directory(&out_dir, None, true).unwrap();
    assert!(summary.is_clean());
    let page = fs::read_to_string(out_dir.join("report/index.html")).unwrap();
    assert!(page.contains("RDSON1"));
    assert!(page.contains("mΩ"));
}

#[test]
fn remove_outliers_strategy_drops_values_but_keeps_rows() {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("data/FA51-3283");
    let out_dir = root.path().join("output/FA51-3283");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("FA51-3283_1.TXT"), LOG).unwrap();

    let mut cleaner = CpLogCleaner::new(&out_dir, targets());
    cleaner.load_dir(&data_dir).unwrap();
    cleaner.clean(CleaningStrategy::RemoveOutliers, &[]).unwrap();
    cleaner.export_json(&[]).unwrap();

    let rdson = read_artifact(&out_dir.join("json/RDSON1_data.json"));
    assert_eq!(rdson.values.len(), 5, "rows are never dropped");
    assert_eq!(rdson.values[4].flag, CleaningFlag::OutlierRemoved);
    assert_eq!(rdson.values[4].value, None);
    assert_eq!(rdson.numeric_values().len(), 4);

    // Adjustment ignores removed cells without erroring.
    units::adjust_batch_directory(&out_dir, None, false).unwrap();
    let adjusted = read_artifact(&out_dir.join("json/RDSON1_data.json"));
    assert_eq!(adjusted.values[4].value, None);
    assert_eq!(adjusted.values[0].value, Some(335.0));
}

#[test]
fn malformed_artifact_is_counted_failed_without_aborting_siblings() {
    let root = tempfile::tempdir().unwrap();
    let out_dir = root.path().join("output/FA51-3283");
    let json_dir = out_dir.join("json");
    fs::create_dir_all(&json_dir).unwrap();

    // One valid artifact still in raw units.
    let artifact = ParamArtifact {
        parameter: "RDSON1".to_string(),
        unit: Some("Ω".to_string()),
        limit_upper: Some(365.0),
        limit_lower: Some(100.0),
        adjusted: false,
        values: vec![cp_analyzer::SiteValue {
            lot: "FA51-3283".to_string(),
            wafer: "01".to_string(),
            site: 1,
            value: Some(0.335),
            flag: CleaningFlag::Ok,
        }],
    };
    let rdson_path = json_dir.join("RDSON1_data.json");
    fs::write(&rdson_path, serde_json::to_string_pretty(&artifact).unwrap()).unwrap();
    // And one that is not JSON at all.
    let broken_path = json_dir.join("IDSS1_data.json");
    fs::write(&broken_path, "not json {{{").unwrap();

    let summary = units::adjust_batch_directory(&out_dir, None, false).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.adjusted, 1);
    assert!(!summary.is_clean());

    // The sibling was still rescaled.
    let adjusted = read_artifact(&rdson_path);
    assert_eq!(adjusted.unit.as_deref(), Some("mΩ"));
    assert_eq!(adjusted.values[0].value, Some(335.0));
    // The broken file is left as it was for inspection.
    assert_eq!(fs::read_to_string(&broken_path).unwrap(), "not json {{{");
}

#[test]
fn adjustment_restricted_to_selected_params() {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("data/FA51-3283");
    let out_dir = root.path().join("output/FA51-3283");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("FA51-3283_1.TXT"), LOG).unwrap();

    let mut cleaner = CpLogCleaner::new(&out_dir, targets());
    cleaner.load_dir(&data_dir).unwrap();
    cleaner.clean(CleaningStrategy::Standard, &[]).unwrap();
    cleaner.export_json(&[]).unwrap();

    let only_rdson = vec!["RDSON1".to_string()];
    units::adjust_batch_directory(&out_dir, Some(&only_rdson), false).unwrap();

    let rdson = read_artifact(&out_dir.join("json/RDSON1_data.json"));
    assert_eq!(rdson.unit.as_deref(), Some("mΩ"));

    // IDSS1 was filtered out and is still in raw amps.
    let idss = read_artifact(&out_dir.join("json/IDSS1_data.json"));
    assert_eq!(idss.unit.as_deref(), Some("A"));
    assert!(!idss.adjusted);
}
