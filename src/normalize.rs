use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::CatalogError;
use crate::flatten::FlatRecord;

/// Columns stamped by the flattening stage. These are already canonical and
/// always survive renaming untouched.
const STAMPED_KEYS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "report_id",
];

/// Raw-to-canonical field mapping for one entity kind.
///
/// Raw labels arrive bracket-decorated (`[Table Id]`) or plain, and each known
/// tool version uses its own titles, so the table carries every observed
/// variant. Drift in a future tool version is a new entry here, not new code.
#[derive(Debug, Clone, Copy)]
pub struct RenameTable {
    pub entity: &'static str,
    entries: &'static [(&'static str, &'static str)],
}

pub const TABLE_RENAMES: RenameTable = RenameTable {
    entity: "table",
    entries: &[
        ("ID", "table_id"),
        ("Table Id", "table_id"),
        ("Name", "name"),
        ("Table Name", "name"),
        ("Description", "description"),
        ("IsHidden", "is_hidden"),
        ("Is Hidden", "is_hidden"),
        ("TableType", "table_type"),
        ("Table Type", "table_type"),
        ("ModifiedTime", "modified_at"),
        ("Modified Time", "modified_at"),
    ],
};

pub const PARTITION_RENAMES: RenameTable = RenameTable {
    entity: "partition",
    entries: &[
        ("TableID", "table_id"),
        ("Table Id", "table_id"),
        ("QueryDefinition", "query_definition"),
        ("Query Definition", "query_definition"),
        ("Type", "partition_type"),
        ("Partition Type", "partition_type"),
    ],
};

pub const COLUMN_RENAMES: RenameTable = RenameTable {
    entity: "column",
    entries: &[
        ("ID", "column_id"),
        ("Column Id", "column_id"),
        ("TableID", "table_id"),
        ("Table Id", "table_id"),
        ("ExplicitName", "name"),
        ("Column Name", "name"),
        ("Type", "column_type"),
        ("Column Type", "column_type"),
        ("ExplicitDataType", "data_type"),
        ("Data Type", "data_type"),
        ("Expression", "dax_expression"),
        ("DAX Expression", "dax_expression"),
        ("Description", "description"),
        ("DisplayFolder", "display_folder"),
        ("Display Folder", "display_folder"),
        ("IsHidden", "is_hidden"),
        ("Is Hidden", "is_hidden"),
        ("Is Hidden?", "is_hidden"),
        ("ModifiedTime", "modified_at"),
        ("Modified Time", "modified_at"),
    ],
};

pub const MEASURE_RENAMES: RenameTable = RenameTable {
    entity: "measure",
    entries: &[
        ("ID", "measure_id"),
        ("Measure Id", "measure_id"),
        ("TableID", "table_id"),
        ("Table Id", "table_id"),
        ("Name", "name"),
        ("Measure Name", "name"),
        ("Expression", "dax_expression"),
        ("DAX Expression", "dax_expression"),
        ("DataType", "data_type"),
        ("Data Type", "data_type"),
        ("Description", "description"),
        ("DisplayFolder", "display_folder"),
        ("Display Folder", "display_folder"),
        ("IsHidden", "is_hidden"),
        ("Is Hidden", "is_hidden"),
        ("ModifiedTime", "modified_at"),
        ("Modified Time", "modified_at"),
    ],
};

pub const RELATIONSHIP_RENAMES: RenameTable = RenameTable {
    entity: "relationship",
    entries: &[
        ("ID", "relationship_id"),
        ("Relationship Id", "relationship_id"),
        ("FromTableID", "from_table_id"),
        ("From Table", "from_table_id"),
        ("FromColumnID", "from_column_id"),
        ("From Column", "from_column_id"),
        ("FromCardinality", "from_cardinality"),
        ("From Cardinality", "from_cardinality"),
        ("ToTableID", "to_table_id"),
        ("To Table", "to_table_id"),
        ("ToColumnID", "to_column_id"),
        ("To Column", "to_column_id"),
        ("ToCardinality", "to_cardinality"),
        ("To Cardinality", "to_cardinality"),
        ("CrossFilteringBehavior", "cross_filtering_behavior"),
        ("Cross Filtering Behavior", "cross_filtering_behavior"),
        ("IsActive", "is_active"),
        ("Is Active", "is_active"),
        ("is_active_flag", "is_active"),
        ("SecurityFilteringBehavior", "security_filtering_behavior"),
        ("Security Filtering Behavior", "security_filtering_behavior"),
        ("ModifiedTime", "modified_at"),
        ("Modified Time", "modified_at"),
    ],
};

pub const CALC_GROUP_RENAMES: RenameTable = RenameTable {
    entity: "calculation group",
    entries: &[
        ("ID", "group_id"),
        ("Calculation Group Id", "group_id"),
        ("TableID", "table_id"),
        ("Table Id", "table_id"),
        ("Precedence", "precedence"),
        ("Description", "description"),
    ],
};

pub const CALC_ITEM_RENAMES: RenameTable = RenameTable {
    entity: "calculation group item",
    entries: &[
        ("Name", "calc_item_name"),
        ("calc_item_name", "calc_item_name"),
        ("CalculationGroupID", "calculation_group_id"),
        ("Calculation Group Id", "calculation_group_id"),
        ("Table", "table_name"),
        ("TableName", "table_name"),
        ("table_name", "table_name"),
        ("Expression", "expression"),
        ("Description", "description"),
        ("calc_group_description", "description"),
    ],
};

impl RenameTable {
    /// Canonicalize one record: strip label decoration, rename known variants,
    /// keep stamped keys and already-canonical names, drop the rest loudly.
    pub fn apply(&self, record: FlatRecord) -> FlatRecord {
        let mut out = FlatRecord::new();
        for (raw_name, value) in record {
            let stripped = strip_label(&raw_name);
            if let Some((_, canonical)) = self
                .entries
                .iter()
                .find(|(variant, _)| *variant == stripped)
            {
                out.insert((*canonical).to_string(), value);
            } else if STAMPED_KEYS.contains(&stripped)
                || self.entries.iter().any(|(_, canonical)| *canonical == stripped)
            {
                out.insert(stripped.to_string(), value);
            } else {
                warn!(
                    entity = self.entity,
                    field = raw_name.as_str(),
                    "dropping unmapped source field"
                );
            }
        }
        out
    }

    pub fn apply_all(&self, records: Vec<FlatRecord>) -> Vec<FlatRecord> {
        records.into_iter().map(|record| self.apply(record)).collect()
    }
}

/// Strip the `[...]` decoration some tool versions wrap field labels in.
pub fn strip_label(raw: &str) -> &str {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let re = LABEL.get_or_init(|| Regex::new(r"^\[(.*)\]$").unwrap());
    match re.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    }
}

/// Fetch a structurally required field as a string, or fail naming the entity
/// and field. Join keys go through this; they are never silently nulled.
pub fn require_str(
    record: &FlatRecord,
    entity: &'static str,
    field: &str,
) -> Result<String, CatalogError> {
    record
        .get(field)
        .and_then(value_to_string)
        .ok_or_else(|| CatalogError::SchemaMismatch {
            entity,
            field: field.to_string(),
        })
}

pub fn opt_string(record: &FlatRecord, field: &str) -> Option<String> {
    record.get(field).and_then(value_to_string)
}

pub fn opt_bool(record: &FlatRecord, field: &str) -> Option<bool> {
    record.get(field).and_then(coerce_bool)
}

pub fn opt_i64(record: &FlatRecord, field: &str) -> Option<i64> {
    record.get(field).and_then(|value| match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn opt_date(record: &FlatRecord, field: &str) -> Option<NaiveDate> {
    record.get(field).and_then(coerce_date)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flag fields arrive as real booleans, "true"/"false" strings, or 0/1.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Date-like fields become a pure calendar date. Sources emit RFC 3339
/// timestamps, naive timestamps with either separator, or bare dates.
pub fn coerce_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(ts.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn record(pairs: &[(&str, Value)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn strip_label_unwraps_brackets_only() {
        assert_eq!(strip_label("[Table Id]"), "Table Id");
        assert_eq!(strip_label("workspace_id"), "workspace_id");
        assert_eq!(strip_label("[unclosed"), "[unclosed");
    }

    #[test]
    fn rename_handles_both_observed_dialects() {
        let old_dialect = record(&[
            ("[Table Id]", json!("12")),
            ("[Table Name]", json!("Sales")),
            ("workspace_id", json!("w1")),
        ]);
        let new_dialect = record(&[
            ("[ID]", json!("12")),
            ("[Name]", json!("Sales")),
            ("workspace_id", json!("w1")),
        ]);

        for raw in [old_dialect, new_dialect] {
            let canonical = TABLE_RENAMES.apply(raw);
            assert_eq!(canonical.get("table_id"), Some(&json!("12")));
            assert_eq!(canonical.get("name"), Some(&json!("Sales")));
            assert_eq!(canonical.get("workspace_id"), Some(&json!("w1")));
        }
    }

    #[test]
    fn unknown_fields_are_dropped_not_guessed() {
        let canonical = TABLE_RENAMES.apply(record(&[
            ("[SomethingNew]", json!("x")),
            ("[Name]", json!("Sales")),
        ]));
        assert!(!canonical.contains_key("SomethingNew"));
        assert!(!canonical.contains_key("[SomethingNew]"));
        assert_eq!(canonical.get("name"), Some(&json!("Sales")));
    }

    #[test]
    fn require_str_names_entity_and_field() {
        let err = require_str(&FlatRecord::new(), "table", "table_id").unwrap_err();
        assert_matches!(
            err,
            CatalogError::SchemaMismatch {
                entity: "table",
                ..
            }
        );
    }

    #[test]
    fn require_str_accepts_numeric_ids() {
        let rec = record(&[("table_id", json!(42))]);
        assert_eq!(require_str(&rec, "table", "table_id").unwrap(), "42");
    }

    #[test]
    fn bool_coercion_variants() {
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!("false")), Some(false));
        assert_eq!(coerce_bool(&json!("True")), Some(true));
        assert_eq!(coerce_bool(&json!(1)), Some(true));
        assert_eq!(coerce_bool(&json!(0)), Some(false));
        assert_eq!(coerce_bool(&json!("maybe")), None);
    }

    #[test]
    fn date_coercion_drops_time_component() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(coerce_date(&json!("2024-03-15T08:30:00Z")), Some(expected));
        assert_eq!(
            coerce_date(&json!("2024-03-15T08:30:00.123")),
            Some(expected)
        );
        assert_eq!(coerce_date(&json!("2024-03-15 08:30:00")), Some(expected));
        assert_eq!(coerce_date(&json!("2024-03-15")), Some(expected));
        assert_eq!(coerce_date(&json!("not a date")), None);
    }
}
