use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tree_chain::data::{ChainBuilder, TableChain};
use tree_chain::error::TreeError;
use tree_chain::source::ExtensionEngine;
use tree_chain::utils::logging::LogCapture;
use tree_chain::Value;

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

const RUN_A: &str = r#"{
  "events": {
    "columns": [
      {"name": "pt", "type": "F"},
      {"name": "n_jet", "type": "I"},
      {"name": "jet_e", "type": "D[3]"},
      {"name": "label", "type": "C[8]"}
    ],
    "rows": [
      [12.5, 2, [50.0, 20.0, 0.0], "first"],
      [40.0, 1, [35.0, 0.0, 0.0], "second"]
    ]
  },
  "summary": {"kind": "histogram"}
}"#;

const RUN_B: &str = r#"{
  "events": {
    "columns": [
      {"name": "pt", "type": "F"},
      {"name": "n_jet", "type": "I"},
      {"name": "jet_e", "type": "D[3]"},
      {"name": "label", "type": "C[8]"}
    ],
    "rows": [
      [7.25, 3, [10.0, 30.0, 20.0], "third"]
    ]
  }
}"#;

#[test]
fn test_json_chain_with_collection() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "run_a.json", RUN_A);
    let b = write(dir.path(), "run_b.json", RUN_B);

    let mut chain = TableChain::new("events", [a, b], ExtensionEngine::new()).unwrap();
    chain
        .buffer_mut()
        .unwrap()
        .declare_collection("jets", "jet_", "n_jet")
        .unwrap();

    let mut rows = Vec::new();
    while let Some(row) = chain.next_row().unwrap() {
        let label = row.get_string("label").unwrap();
        let mut jets = row.collection("jets").unwrap();
        jets.sort_by_key(|jet| jet.get_f64("e"), true).unwrap();
        let leading = jets.get(0, "e").unwrap();
        let count = jets.len().unwrap();
        rows.push((label, count, leading));
    }
    assert_eq!(
        rows,
        vec![
            ("first".to_string(), 2, Value::Float(50.0)),
            ("second".to_string(), 1, Value::Float(35.0)),
            ("third".to_string(), 3, Value::Float(30.0)),
        ]
    );
}

#[test]
fn test_json_non_table_object_is_skipped() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "run_a.json", RUN_A);

    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber("warn"));

    let err = TableChain::new("summary", [a], ExtensionEngine::new()).err();
    assert!(matches!(err, Some(TreeError::ChainInit(_))));
    assert_eq!(capture.count("WARN", "is a histogram, not a table (skipping)"), 1);
}

#[test]
fn test_malformed_json_is_skipped() {
    let dir = TempDir::new().unwrap();
    let bad = write(dir.path(), "bad.json", "{ not json");
    let good = write(dir.path(), "run_b.json", RUN_B);

    let mut chain = TableChain::new("events", [bad, good], ExtensionEngine::new()).unwrap();
    let mut pts = Vec::new();
    while let Some(row) = chain.next_row().unwrap() {
        pts.push(row.get_f64("pt").unwrap());
    }
    assert_eq!(pts, vec![7.25]);
    assert_eq!(chain.stats().files_skipped, 1);
}

#[test]
fn test_csv_chain_across_directories() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let a = write(
        first.path(),
        "muons.csv",
        "pt:D,charge:I,hits:I[3]\n10.5,1,1;2;3\n20.0,-1,4;5;6\n",
    );
    let b = write(second.path(), "muons.csv", "pt:D,charge:I,hits:I[3]\n30.0,1,7;8;9\n");

    let mut chain = ChainBuilder::new("muons", ExtensionEngine::new())
        .files([a, b])
        .unwrap();
    let mut seen = Vec::new();
    while let Some(row) = chain.next_row().unwrap() {
        seen.push((
            row.get_f64("pt").unwrap(),
            row.get_i64("charge").unwrap(),
            row.get_element("hits", 2).unwrap(),
        ));
    }
    assert_eq!(
        seen,
        vec![
            (10.5, 1, Value::Int(3)),
            (20.0, -1, Value::Int(6)),
            (30.0, 1, Value::Int(9)),
        ]
    );
    assert_eq!(chain.total_entries(), 3);
}

#[test]
fn test_env_vars_in_file_names() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "run_b.json", RUN_B);
    std::env::set_var("TREE_CHAIN_SOURCES_DIR", dir.path());

    let mut chain = TableChain::new(
        "events",
        ["$TREE_CHAIN_SOURCES_DIR/run_b.json"],
        ExtensionEngine::new(),
    )
    .unwrap();
    assert!(chain.next_row().unwrap().is_some());
    assert!(chain.next_row().unwrap().is_none());
}
