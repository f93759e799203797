use serde_json::{Value, json};

use pbi_catalog::flatten::FlatRecord;
use pbi_catalog::normalize::{
    COLUMN_RENAMES, MEASURE_RENAMES, PARTITION_RENAMES, RELATIONSHIP_RENAMES, TABLE_RENAMES,
};

fn record(pairs: &[(&str, Value)]) -> FlatRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The older tool build emits verbose bracketed titles, the newer one terse
/// ones; both must land on the same canonical schema.
#[test]
fn column_dialects_converge() {
    let verbose = record(&[
        ("[Column Id]", json!("10")),
        ("[Table Id]", json!("1")),
        ("[Column Name]", json!("Amount")),
        ("[Data Type]", json!("Decimal")),
        ("[Is Hidden?]", json!("false")),
        ("[Modified Time]", json!("2024-02-01 10:00:00")),
    ]);
    let terse = record(&[
        ("[ID]", json!("10")),
        ("[TableID]", json!("1")),
        ("[ExplicitName]", json!("Amount")),
        ("[ExplicitDataType]", json!("Decimal")),
        ("[IsHidden]", json!("false")),
        ("[ModifiedTime]", json!("2024-02-01 10:00:00")),
    ]);

    let canonical_verbose = COLUMN_RENAMES.apply(verbose);
    let canonical_terse = COLUMN_RENAMES.apply(terse);
    assert_eq!(canonical_verbose, canonical_terse);
    assert_eq!(canonical_terse.get("column_id"), Some(&json!("10")));
    assert_eq!(canonical_terse.get("table_id"), Some(&json!("1")));
    assert_eq!(canonical_terse.get("name"), Some(&json!("Amount")));
}

#[test]
fn measure_dialects_converge() {
    let verbose = record(&[
        ("[Measure Id]", json!("20")),
        ("[Measure Name]", json!("Total")),
        ("[DAX Expression]", json!("SUM(T[x])")),
    ]);
    let terse = record(&[
        ("[ID]", json!("20")),
        ("[Name]", json!("Total")),
        ("[Expression]", json!("SUM(T[x])")),
    ]);
    assert_eq!(MEASURE_RENAMES.apply(verbose), MEASURE_RENAMES.apply(terse));
}

#[test]
fn relationship_flag_variants_converge() {
    let flagged = record(&[("[is_active_flag]", json!(true))]);
    let plain = record(&[("[IsActive]", json!(true))]);
    let applied_flagged = RELATIONSHIP_RENAMES.apply(flagged);
    let applied_plain = RELATIONSHIP_RENAMES.apply(plain);
    assert_eq!(applied_flagged.get("is_active"), Some(&json!(true)));
    assert_eq!(applied_flagged, applied_plain);
}

#[test]
fn stamped_keys_survive_every_table() {
    let raw = record(&[
        ("workspace_id", json!("w1")),
        ("workspace_name", json!("Finance")),
        ("dataset_id", json!("d1")),
        ("dataset_name", json!("Sales")),
        ("[Type]", json!(4)),
        ("[TableID]", json!("1")),
    ]);
    let canonical = PARTITION_RENAMES.apply(raw);
    assert_eq!(canonical.get("workspace_id"), Some(&json!("w1")));
    assert_eq!(canonical.get("dataset_name"), Some(&json!("Sales")));
    assert_eq!(canonical.get("partition_type"), Some(&json!(4)));
}

#[test]
fn already_canonical_names_pass_through() {
    let raw = record(&[("table_id", json!("1")), ("name", json!("Sales"))]);
    let canonical = TABLE_RENAMES.apply(raw);
    assert_eq!(canonical.get("table_id"), Some(&json!("1")));
    assert_eq!(canonical.get("name"), Some(&json!("Sales")));
}
