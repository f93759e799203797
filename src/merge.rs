use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;
use tracing::warn;

use crate::catalog::{
    CalcGroupItemRow, ColumnRow, DatasetRow, MeasureRow, PartitionRow, RelationshipRow,
    ReportPageRow, ReportRow, TableRow, WorkspaceRow,
};
use crate::domain::{DatasetId, ReportId, TableId, WorkspaceId};

/// Rows the merger refused to propagate, by entity kind. Orphans are child
/// rows whose parent composite key resolved to nothing; duplicates are repeat
/// composite keys within one relation (first occurrence wins).
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    pub orphans: BTreeMap<&'static str, usize>,
    pub duplicates: BTreeMap<&'static str, usize>,
}

impl MergeStats {
    fn orphan(&mut self, entity: &'static str) {
        *self.orphans.entry(entity).or_default() += 1;
    }

    fn duplicate(&mut self, entity: &'static str) {
        *self.duplicates.entry(entity).or_default() += 1;
    }

    pub fn orphan_total(&self) -> usize {
        self.orphans.values().sum()
    }
}

/// Drop repeated composite keys, preserving source order.
fn dedup_by_key<T, K, F>(rows: Vec<T>, entity: &'static str, stats: &mut MergeStats, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(key(&row)) {
            out.push(row);
        } else {
            stats.duplicate(entity);
        }
    }
    out
}

pub fn dedup_workspaces(rows: Vec<WorkspaceRow>, stats: &mut MergeStats) -> Vec<WorkspaceRow> {
    dedup_by_key(rows, "workspace", stats, |row| row.workspace_id.clone())
}

/// Attach workspace names to datasets; a dataset under an unknown workspace is
/// an orphan and is dropped.
pub fn enrich_datasets(
    datasets: Vec<DatasetRow>,
    workspaces: &[WorkspaceRow],
    stats: &mut MergeStats,
) -> Vec<DatasetRow> {
    let names: HashMap<&WorkspaceId, &str> = workspaces
        .iter()
        .map(|ws| (&ws.workspace_id, ws.name.as_str()))
        .collect();

    let datasets = dedup_by_key(datasets, "dataset", stats, |row| {
        (row.workspace_id.clone(), row.dataset_id.clone())
    });

    datasets
        .into_iter()
        .filter_map(|mut row| match names.get(&row.workspace_id) {
            Some(name) => {
                row.workspace_name = Some((*name).to_string());
                Some(row)
            }
            None => {
                warn!(
                    workspace_id = %row.workspace_id,
                    dataset_id = %row.dataset_id,
                    "dropping dataset under unknown workspace"
                );
                stats.orphan("dataset");
                None
            }
        })
        .collect()
}

/// Reports joined to their dataset and workspace, filtered to the native
/// report kind. Join keys are always the full composite identifier so a
/// dataset id recurring in another workspace can never cross-match.
pub fn merge_reports(
    reports: Vec<ReportRow>,
    datasets: &[DatasetRow],
    workspaces: &[WorkspaceRow],
    stats: &mut MergeStats,
) -> Vec<ReportRow> {
    let workspace_names: HashMap<&WorkspaceId, &str> = workspaces
        .iter()
        .map(|ws| (&ws.workspace_id, ws.name.as_str()))
        .collect();
    let dataset_names: HashMap<(&WorkspaceId, &DatasetId), &str> = datasets
        .iter()
        .map(|ds| ((&ds.workspace_id, &ds.dataset_id), ds.name.as_str()))
        .collect();

    let reports = dedup_by_key(reports, "report", stats, |row| {
        (row.workspace_id.clone(), row.report_id.clone())
    });

    reports
        .into_iter()
        .filter(|row| row.report_type == crate::domain::NATIVE_REPORT_TYPE)
        .filter_map(|mut row| {
            let Some(workspace_name) = workspace_names.get(&row.workspace_id) else {
                warn!(
                    workspace_id = %row.workspace_id,
                    report_id = %row.report_id,
                    "dropping report under unknown workspace"
                );
                stats.orphan("report");
                return None;
            };
            row.workspace_name = Some((*workspace_name).to_string());

            if let Some(dataset_id) = row.dataset_id.clone() {
                match dataset_names.get(&(&row.workspace_id, &dataset_id)) {
                    Some(name) => row.dataset_name = Some((*name).to_string()),
                    None => {
                        warn!(
                            workspace_id = %row.workspace_id,
                            report_id = %row.report_id,
                            dataset_id = %dataset_id,
                            "dropping report bound to unknown dataset"
                        );
                        stats.orphan("report");
                        return None;
                    }
                }
            }
            Some(row)
        })
        .collect()
}

/// Pages joined to their (already merged and filtered) report.
pub fn merge_report_pages(
    pages: Vec<ReportPageRow>,
    reports: &[ReportRow],
    stats: &mut MergeStats,
) -> Vec<ReportPageRow> {
    let report_index: HashMap<(&WorkspaceId, &ReportId), &ReportRow> = reports
        .iter()
        .map(|report| ((&report.workspace_id, &report.report_id), report))
        .collect();

    let pages = dedup_by_key(pages, "report page", stats, |row| {
        (
            row.workspace_id.clone(),
            row.report_id.clone(),
            row.page_id.clone(),
        )
    });

    pages
        .into_iter()
        .filter_map(
            |mut row| match report_index.get(&(&row.workspace_id, &row.report_id)) {
                Some(report) => {
                    row.report_name = Some(report.name.clone());
                    row.workspace_name = report.workspace_name.clone();
                    Some(row)
                }
                None => {
                    warn!(
                        workspace_id = %row.workspace_id,
                        report_id = %row.report_id,
                        page_id = %row.page_id,
                        "dropping page of unknown report"
                    );
                    stats.orphan("report page");
                    None
                }
            },
        )
        .collect()
}

/// Table-level fan-out: one output row per (table, partition) pair, keyed by
/// the full (workspace, dataset, table) composite. Tables without partitions
/// keep a single row with empty partition fields; partitions without a table
/// are orphans.
pub fn merge_tables(
    tables: Vec<TableRow>,
    partitions: Vec<PartitionRow>,
    stats: &mut MergeStats,
) -> Vec<TableRow> {
    let tables = dedup_by_key(tables, "table", stats, |row| {
        (
            row.workspace_id.clone(),
            row.dataset_id.clone(),
            row.table_id.clone(),
        )
    });

    let table_keys: HashSet<(&WorkspaceId, &DatasetId, &TableId)> = tables
        .iter()
        .map(|t| (&t.workspace_id, &t.dataset_id, &t.table_id))
        .collect();

    let mut by_table: HashMap<(WorkspaceId, DatasetId, TableId), Vec<PartitionRow>> =
        HashMap::new();
    for partition in partitions {
        let key = (
            partition.workspace_id.clone(),
            partition.dataset_id.clone(),
            partition.table_id.clone(),
        );
        if !table_keys.contains(&(&key.0, &key.1, &key.2)) {
            warn!(
                workspace_id = %key.0,
                dataset_id = %key.1,
                table_id = %key.2,
                "dropping partition of unknown table"
            );
            stats.orphan("partition");
            continue;
        }
        by_table.entry(key).or_default().push(partition);
    }

    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        let key = (
            table.workspace_id.clone(),
            table.dataset_id.clone(),
            table.table_id.clone(),
        );
        match by_table.remove(&key) {
            Some(parts) => {
                for partition in parts {
                    let mut row = table.clone();
                    row.query_definition = partition.query_definition;
                    row.partition_type = partition.partition_type;
                    out.push(row);
                }
            }
            None => out.push(table),
        }
    }
    out
}

/// Attach table names to columns; a column of an unknown table is an orphan.
pub fn merge_columns(
    columns: Vec<ColumnRow>,
    tables: &[TableRow],
    stats: &mut MergeStats,
) -> Vec<ColumnRow> {
    let table_names = table_name_index(tables);

    let columns = dedup_by_key(columns, "column", stats, |row| {
        (
            row.workspace_id.clone(),
            row.dataset_id.clone(),
            row.table_id.clone(),
            row.column_id.clone(),
        )
    });

    columns
        .into_iter()
        .filter_map(|mut row| {
            match table_names.get(&(&row.workspace_id, &row.dataset_id, &row.table_id)) {
                Some(name) => {
                    row.table_name = Some((*name).to_string());
                    Some(row)
                }
                None => {
                    warn!(
                        workspace_id = %row.workspace_id,
                        dataset_id = %row.dataset_id,
                        table_id = %row.table_id,
                        column_id = %row.column_id,
                        "dropping column of unknown table"
                    );
                    stats.orphan("column");
                    None
                }
            }
        })
        .collect()
}

/// Attach table names to measures; a measure of an unknown table is an orphan.
pub fn merge_measures(
    measures: Vec<MeasureRow>,
    tables: &[TableRow],
    stats: &mut MergeStats,
) -> Vec<MeasureRow> {
    let table_names = table_name_index(tables);

    let measures = dedup_by_key(measures, "measure", stats, |row| {
        (
            row.workspace_id.clone(),
            row.dataset_id.clone(),
            row.table_id.clone(),
            row.measure_id.clone(),
        )
    });

    measures
        .into_iter()
        .filter_map(|mut row| {
            match table_names.get(&(&row.workspace_id, &row.dataset_id, &row.table_id)) {
                Some(name) => {
                    row.table_name = Some((*name).to_string());
                    Some(row)
                }
                None => {
                    warn!(
                        workspace_id = %row.workspace_id,
                        dataset_id = %row.dataset_id,
                        table_id = %row.table_id,
                        measure_id = %row.measure_id,
                        "dropping measure of unknown table"
                    );
                    stats.orphan("measure");
                    None
                }
            }
        })
        .collect()
}

/// Relationships only need dedup and a dataset existence check; their
/// workspace/dataset names were stamped during flattening.
pub fn merge_relationships(
    relationships: Vec<RelationshipRow>,
    datasets: &[DatasetRow],
    stats: &mut MergeStats,
) -> Vec<RelationshipRow> {
    let dataset_keys: HashSet<(&WorkspaceId, &DatasetId)> = datasets
        .iter()
        .map(|ds| (&ds.workspace_id, &ds.dataset_id))
        .collect();

    let relationships = dedup_by_key(relationships, "relationship", stats, |row| {
        (
            row.workspace_id.clone(),
            row.dataset_id.clone(),
            row.relationship_id.clone(),
        )
    });

    relationships
        .into_iter()
        .filter(|row| {
            let known = dataset_keys.contains(&(&row.workspace_id, &row.dataset_id));
            if !known {
                warn!(
                    workspace_id = %row.workspace_id,
                    dataset_id = %row.dataset_id,
                    relationship_id = %row.relationship_id,
                    "dropping relationship of unknown dataset"
                );
                stats.orphan("relationship");
            }
            known
        })
        .collect()
}

pub fn merge_calc_group_items(
    items: Vec<CalcGroupItemRow>,
    datasets: &[DatasetRow],
    stats: &mut MergeStats,
) -> Vec<CalcGroupItemRow> {
    let dataset_keys: HashSet<(&WorkspaceId, &DatasetId)> = datasets
        .iter()
        .map(|ds| (&ds.workspace_id, &ds.dataset_id))
        .collect();

    let items = dedup_by_key(items, "calculation group item", stats, |row| {
        (
            row.workspace_id.clone(),
            row.dataset_id.clone(),
            row.table_name.clone(),
            row.calc_item_name.clone(),
        )
    });

    items
        .into_iter()
        .filter(|row| {
            let known = dataset_keys.contains(&(&row.workspace_id, &row.dataset_id));
            if !known {
                warn!(
                    workspace_id = %row.workspace_id,
                    dataset_id = %row.dataset_id,
                    calc_item = %row.calc_item_name,
                    "dropping calculation item of unknown dataset"
                );
                stats.orphan("calculation group item");
            }
            known
        })
        .collect()
}

fn table_name_index(tables: &[TableRow]) -> HashMap<(&WorkspaceId, &DatasetId, &TableId), &str> {
    // Fanned-out tables repeat their key once per partition; the name is
    // identical across the fan-out so later inserts are harmless.
    tables
        .iter()
        .map(|t| ((&t.workspace_id, &t.dataset_id, &t.table_id), t.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use crate::domain::PartitionType;
    use crate::flatten::FlatRecord;

    use super::*;

    const W1: &str = "a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";
    const W2: &str = "ffe2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";
    const D1: &str = "b7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";

    fn ts() -> DateTime<Utc> {
        "2024-03-15T08:30:00Z".parse().unwrap()
    }

    fn workspace(id: &str, name: &str) -> WorkspaceRow {
        let body = json!({"name": name});
        let serde_json::Value::Object(map) = body else {
            unreachable!()
        };
        WorkspaceRow::from_api(id.parse().unwrap(), &map, ts()).unwrap()
    }

    fn record(pairs: &[(&str, serde_json::Value)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table(ws: &str, ds: &str, table_id: &str, name: &str) -> TableRow {
        TableRow::from_flat(
            &record(&[
                ("workspace_id", json!(ws)),
                ("dataset_id", json!(ds)),
                ("table_id", json!(table_id)),
                ("name", json!(name)),
            ]),
            ts(),
        )
        .unwrap()
    }

    fn partition(ws: &str, ds: &str, table_id: &str, code: i64) -> PartitionRow {
        PartitionRow::from_flat(&record(&[
            ("workspace_id", json!(ws)),
            ("dataset_id", json!(ds)),
            ("table_id", json!(table_id)),
            ("partition_type", json!(code)),
            ("query_definition", json!("let Source = ...")),
        ]))
        .unwrap()
    }

    #[test]
    fn table_partition_merge_yields_one_row_per_partition() {
        let mut stats = MergeStats::default();
        let merged = merge_tables(
            vec![table(W1, D1, "T1", "Sales")],
            vec![partition(W1, D1, "T1", 4)],
            &mut stats,
        );

        assert_eq!(merged.len(), 1);
        let row = &merged[0];
        assert_eq!(row.name, "Sales");
        assert_eq!(row.table_id.as_str(), "T1");
        assert_matches::assert_matches!(row.partition_type, Some(PartitionType::M));
        assert_eq!(row.query_definition.as_deref(), Some("let Source = ..."));
        assert_eq!(stats.orphan_total(), 0);
    }

    #[test]
    fn table_without_partition_survives_with_empty_fields() {
        let mut stats = MergeStats::default();
        let merged = merge_tables(vec![table(W1, D1, "T1", "Sales")], Vec::new(), &mut stats);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].partition_type, None);
    }

    #[test]
    fn orphan_partition_is_dropped_and_counted() {
        let mut stats = MergeStats::default();
        let merged = merge_tables(
            vec![table(W1, D1, "T1", "Sales")],
            vec![partition(W1, D1, "T9", 4)],
            &mut stats,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(stats.orphans.get("partition"), Some(&1));
    }

    #[test]
    fn identical_table_ids_never_cross_workspaces() {
        let mut stats = MergeStats::default();
        // Same dataset id and same table id in two different workspaces.
        let tables = vec![table(W1, D1, "T1", "Sales W1"), table(W2, D1, "T1", "Sales W2")];
        let columns = vec![
            ColumnRow::from_flat(
                &record(&[
                    ("workspace_id", json!(W2)),
                    ("dataset_id", json!(D1)),
                    ("table_id", json!("T1")),
                    ("column_id", json!("C1")),
                    ("name", json!("Amount")),
                ]),
                ts(),
            )
            .unwrap(),
        ];

        let merged = merge_columns(columns, &tables, &mut stats);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].table_name.as_deref(), Some("Sales W2"));
    }

    #[test]
    fn duplicate_composite_keys_are_deduplicated() {
        let mut stats = MergeStats::default();
        let merged = merge_tables(
            vec![table(W1, D1, "T1", "Sales"), table(W1, D1, "T1", "Sales")],
            Vec::new(),
            &mut stats,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(stats.duplicates.get("table"), Some(&1));
    }

    #[test]
    fn non_native_reports_are_filtered_out() {
        let mut stats = MergeStats::default();
        let workspaces = vec![workspace(W1, "Finance")];
        let datasets = Vec::new();
        let reports = vec![
            ReportRow::from_flat(
                &record(&[
                    ("workspace_id", json!(W1)),
                    ("id", json!("c7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c")),
                    ("name", json!("Paginated")),
                    ("reportType", json!("PaginatedReport")),
                ]),
                ts(),
            )
            .unwrap(),
        ];

        let merged = merge_reports(reports, &datasets, &workspaces, &mut stats);
        assert!(merged.is_empty());
        // A filtered report is not an orphan; nothing should be counted.
        assert_eq!(stats.orphan_total(), 0);
    }

    #[test]
    fn pages_of_unknown_reports_are_orphans() {
        let mut stats = MergeStats::default();
        let pages = vec![
            ReportPageRow::from_flat(
                &record(&[
                    ("workspace_id", json!(W1)),
                    ("report_id", json!("c7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c")),
                    ("name", json!("ReportSection1")),
                    ("displayName", json!("Overview")),
                    ("order", json!(0)),
                ]),
                ts(),
            )
            .unwrap(),
        ];

        let merged = merge_report_pages(pages, &[], &mut stats);
        assert!(merged.is_empty());
        assert_eq!(stats.orphans.get("report page"), Some(&1));
    }
}
