use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::dax::{InfoQuery, InfoResultSet};
use crate::domain::DatasetTarget;

/// One flattened row: source fields plus the parent composite key columns.
pub type FlatRecord = BTreeMap<String, Value>;

/// Expand a nested record array into flat rows, carrying the given parent key
/// fields forward as constant columns on every row. Non-object elements are
/// skipped with a warning; the sources only ever emit objects here, so a
/// non-object is drift worth surfacing but not worth aborting over.
pub fn unnest(records: Vec<Value>, parent_keys: &[(&str, &str)]) -> Vec<FlatRecord> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let Value::Object(map) = record else {
            warn!(record = %record, "skipping non-object record during unnesting");
            continue;
        };
        let mut flat: FlatRecord = map.into_iter().collect();
        for (key, value) in parent_keys {
            flat.insert((*key).to_string(), Value::String((*value).to_string()));
        }
        out.push(flat);
    }
    out
}

/// Explode one result table of a CLI response into flat rows stamped with the
/// full (workspace, dataset) composite key.
pub fn explode_info(
    results: &InfoResultSet,
    query: InfoQuery,
    target: &DatasetTarget,
) -> Vec<FlatRecord> {
    unnest(
        results.rows(query).to_vec(),
        &[
            ("workspace_id", target.workspace_id.as_str()),
            ("workspace_name", &target.workspace_name),
            ("dataset_id", target.dataset_id.as_str()),
            ("dataset_name", &target.dataset_name),
        ],
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unnest_stamps_parent_keys_on_every_row() {
        let records = vec![
            json!({"name": "Page 1", "order": 0}),
            json!({"name": "Page 2", "order": 1}),
        ];
        let rows = unnest(records, &[("workspace_id", "w1"), ("report_id", "r1")]);
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get("workspace_id"), Some(&json!("w1")));
            assert_eq!(row.get("report_id"), Some(&json!("r1")));
        }
        assert_eq!(rows[0].get("name"), Some(&json!("Page 1")));
    }

    #[test]
    fn unnest_skips_non_object_records() {
        let rows = unnest(vec![json!("stray"), json!({"id": 1})], &[]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn parent_key_overrides_source_field_of_same_name() {
        let rows = unnest(vec![json!({"workspace_id": "spoofed"})], &[("workspace_id", "w1")]);
        assert_eq!(rows[0].get("workspace_id"), Some(&json!("w1")));
    }
}
