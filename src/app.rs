use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::auth::{Audience, BearerToken, TokenProvider};
use crate::catalog::{
    CalcGroupItemRow, CatalogSnapshot, ColumnRow, DatasetRow, MeasureRow, PartitionRow,
    RelationshipRow, ReportPageRow, ReportRow, TableRow, WorkspaceRow,
};
use crate::config::ResolvedConfig;
use crate::dax::{DaxInfoClient, InfoQuery, QueryBatch};
use crate::domain::{DatasetTarget, WorkspaceId};
use crate::error::CatalogError;
use crate::flatten::{self, FlatRecord};
use crate::merge::{self, MergeStats};
use crate::normalize::{
    self, CALC_GROUP_RENAMES, CALC_ITEM_RENAMES, COLUMN_RENAMES, MEASURE_RENAMES,
    PARTITION_RENAMES, RELATIONSHIP_RENAMES, RenameTable, TABLE_RENAMES,
};
use crate::resolver;
use crate::rest::{ApiPayload, PowerBiApi, Resource};

/// One extraction item the run gave up on without aborting anything else.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub stage: &'static str,
    pub workspace: String,
    pub object: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRelation {
    pub kind: &'static str,
    pub reason: String,
}

/// What the run actually produced: built relations, relations that failed
/// structurally, per-item skips, and what the merger refused to propagate.
/// Partial output is distinguishable from success by inspecting this.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub built_relations: Vec<&'static str>,
    pub failed_relations: Vec<FailedRelation>,
    pub skipped: Vec<SkippedItem>,
    pub merge: MergeStats,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed_relations.is_empty()
            && self.skipped.is_empty()
            && self.merge.orphan_total() == 0
    }
}

/// Flat record accumulators for the CLI-side entities, one per result table
/// of the metadata query batch.
#[derive(Debug, Default)]
struct InfoRecords {
    tables: Vec<FlatRecord>,
    partitions: Vec<FlatRecord>,
    columns: Vec<FlatRecord>,
    measures: Vec<FlatRecord>,
    relationships: Vec<FlatRecord>,
    calc_groups: Vec<FlatRecord>,
    calc_items: Vec<FlatRecord>,
}

pub struct App<P: TokenProvider, R: PowerBiApi, Q: DaxInfoClient> {
    auth: P,
    api: R,
    dax: Q,
}

impl<P: TokenProvider, R: PowerBiApi, Q: DaxInfoClient> App<P, R, Q> {
    pub fn new(auth: P, api: R, dax: Q) -> Self {
        Self { auth, api, dax }
    }

    /// Run a full catalog extraction. Authentication failure and an
    /// incomplete workspace spine are fatal; everything else degrades into
    /// the report.
    pub fn run(
        &self,
        config: &ResolvedConfig,
    ) -> Result<(CatalogSnapshot, RunReport), CatalogError> {
        let token = self.auth.get_token(Audience::BiPlatform)?;

        // One timestamp for every row of the run, captured before any fan-out.
        let extracted_at = Utc::now();
        let mut report = RunReport::default();

        let workspace_ids = if config.workspace_ids.is_empty() {
            resolver::enumerate_workspaces(&self.api, &token)?
        } else {
            config.workspace_ids.clone()
        };

        let workspace_rows = self.fetch_workspaces(&token, &workspace_ids, extracted_at)?;
        report.built_relations.push("workspace");

        let children = resolver::resolve(&self.api, &token, &workspace_ids)?;

        let dataset_rows = build_entity("dataset", &mut report, || {
            children
                .dataset_records
                .iter()
                .map(|record| DatasetRow::from_flat(record, extracted_at))
                .collect()
        });
        let report_rows = build_entity("report", &mut report, || {
            children
                .report_records
                .iter()
                .map(|record| ReportRow::from_flat(record, extracted_at))
                .collect()
        });

        // Pages are fetched only for native reports; asking the API for pages
        // of other report kinds just burns failing calls.
        let page_rows = self.fetch_report_pages(
            &token,
            &report_rows,
            extracted_at,
            &mut report,
        );

        let targets = dataset_targets(&dataset_rows, &workspace_rows);
        let info = self.fetch_dataset_info(config, &targets, &mut report);

        let table_rows = build_entity("table", &mut report, || {
            typed_rows(&info.tables, &TABLE_RENAMES, |record| {
                TableRow::from_flat(record, extracted_at)
            })
        });
        let partition_rows = build_entity("partition", &mut report, || {
            typed_rows(&info.partitions, &PARTITION_RENAMES, PartitionRow::from_flat)
        });
        let column_rows = build_entity("column", &mut report, || {
            typed_rows(&info.columns, &COLUMN_RENAMES, |record| {
                ColumnRow::from_flat(record, extracted_at)
            })
        });
        let measure_rows = build_entity("measure", &mut report, || {
            typed_rows(&info.measures, &MEASURE_RENAMES, |record| {
                MeasureRow::from_flat(record, extracted_at)
            })
        });
        let relationship_rows = build_entity("relationship", &mut report, || {
            typed_rows(&info.relationships, &RELATIONSHIP_RENAMES, |record| {
                RelationshipRow::from_flat(record, extracted_at)
            })
        });
        let calc_item_rows = build_entity("calculation group item", &mut report, || {
            build_calc_items(&info, &table_rows, extracted_at)
        });

        let mut stats = MergeStats::default();
        let workspaces = merge::dedup_workspaces(workspace_rows, &mut stats);
        let datasets = merge::enrich_datasets(dataset_rows, &workspaces, &mut stats);
        let reports = merge::merge_reports(report_rows, &datasets, &workspaces, &mut stats);
        let report_pages = merge::merge_report_pages(page_rows, &reports, &mut stats);
        let tables = merge::merge_tables(table_rows, partition_rows, &mut stats);
        let columns = merge::merge_columns(column_rows, &tables, &mut stats);
        let measures = merge::merge_measures(measure_rows, &tables, &mut stats);
        let relationships = merge::merge_relationships(relationship_rows, &datasets, &mut stats);
        let calc_group_items = merge::merge_calc_group_items(calc_item_rows, &datasets, &mut stats);
        report.merge = stats;

        let snapshot = CatalogSnapshot {
            extracted_at,
            workspaces,
            datasets,
            reports,
            report_pages,
            tables,
            columns,
            measures,
            relationships,
            calc_group_items,
        };

        info!(
            workspaces = snapshot.workspaces.len(),
            datasets = snapshot.datasets.len(),
            reports = snapshot.reports.len(),
            tables = snapshot.tables.len(),
            skipped = report.skipped.len(),
            "extraction run finished"
        );
        Ok((snapshot, report))
    }

    /// List accessible workspace ids without building a snapshot.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceId>, CatalogError> {
        let token = self.auth.get_token(Audience::BiPlatform)?;
        resolver::enumerate_workspaces(&self.api, &token)
    }

    fn fetch_workspaces(
        &self,
        token: &BearerToken,
        workspace_ids: &[WorkspaceId],
        extracted_at: DateTime<Utc>,
    ) -> Result<Vec<WorkspaceRow>, CatalogError> {
        let mut rows = Vec::with_capacity(workspace_ids.len());
        for workspace_id in workspace_ids {
            let payload = self
                .api
                .get(token, &Resource::Workspace(workspace_id).path())
                .map_err(|err| match err {
                    CatalogError::ApiStatus { status: 404, .. } => {
                        CatalogError::WorkspaceNotFound(workspace_id.to_string())
                    }
                    other => other,
                })?;
            let ApiPayload::Single(body) = payload else {
                return Err(CatalogError::ApiHttp(format!(
                    "expected a single-object response for workspace {workspace_id}"
                )));
            };
            rows.push(WorkspaceRow::from_api(
                workspace_id.clone(),
                &body,
                extracted_at,
            )?);
        }
        Ok(rows)
    }

    fn fetch_report_pages(
        &self,
        token: &BearerToken,
        reports: &[ReportRow],
        extracted_at: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Vec<ReportPageRow> {
        let mut rows = Vec::new();
        let native = resolver::report_refs(reports)
            .into_iter()
            .filter(|r| r.is_native());

        for report_ref in native {
            let endpoint =
                Resource::ReportPages(&report_ref.workspace_id, &report_ref.report_id).path();
            let records = match self.api.get(token, &endpoint) {
                Ok(payload) => payload.into_records(),
                Err(err) => {
                    warn!(
                        workspace_id = %report_ref.workspace_id,
                        report_id = %report_ref.report_id,
                        error = %err,
                        "skipping pages of unreachable report"
                    );
                    report.skipped.push(SkippedItem {
                        stage: "report pages",
                        workspace: report_ref.workspace_id.to_string(),
                        object: report_ref.report_id.to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let flat = flatten::unnest(
                records,
                &[
                    ("workspace_id", report_ref.workspace_id.as_str()),
                    ("report_id", report_ref.report_id.as_str()),
                ],
            );
            for record in &flat {
                match ReportPageRow::from_flat(record, extracted_at) {
                    Ok(row) => rows.push(row),
                    Err(err) => {
                        warn!(
                            workspace_id = %report_ref.workspace_id,
                            report_id = %report_ref.report_id,
                            error = %err,
                            "skipping malformed report page record"
                        );
                        report.skipped.push(SkippedItem {
                            stage: "report pages",
                            workspace: report_ref.workspace_id.to_string(),
                            object: report_ref.report_id.to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        report.built_relations.push("report page");
        rows
    }

    /// Run the metadata query batch per (workspace, dataset) pair. One
    /// inaccessible dataset must not abort extraction for the rest of the
    /// tenant, so every failure here becomes a skipped-item entry.
    fn fetch_dataset_info(
        &self,
        config: &ResolvedConfig,
        targets: &[DatasetTarget],
        report: &mut RunReport,
    ) -> InfoRecords {
        let batch = QueryBatch::standard();
        let mut info = InfoRecords::default();

        for target in targets {
            let results = match self.dax.query(
                &config.credentials,
                &target.workspace_name,
                &target.dataset_name,
                &batch,
            ) {
                Ok(results) => results,
                Err(err) => {
                    error!(
                        workspace = %target.workspace_name,
                        dataset = %target.dataset_name,
                        error = %err,
                        "dataset metadata extraction failed"
                    );
                    report.skipped.push(SkippedItem {
                        stage: "dataset info",
                        workspace: target.workspace_name.clone(),
                        object: target.dataset_name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            info.tables
                .extend(flatten::explode_info(&results, InfoQuery::Tables, target));
            info.partitions
                .extend(flatten::explode_info(&results, InfoQuery::Partitions, target));
            info.columns
                .extend(flatten::explode_info(&results, InfoQuery::Columns, target));
            info.measures
                .extend(flatten::explode_info(&results, InfoQuery::Measures, target));
            info.relationships.extend(flatten::explode_info(
                &results,
                InfoQuery::Relationships,
                target,
            ));
            info.calc_groups.extend(flatten::explode_info(
                &results,
                InfoQuery::CalculationGroups,
                target,
            ));
            info.calc_items.extend(flatten::explode_info(
                &results,
                InfoQuery::CalculationItems,
                target,
            ));
            info!(
                workspace = %target.workspace_name,
                dataset = %target.dataset_name,
                "dataset metadata extracted"
            );
        }
        info
    }
}

/// Build one entity relation, isolating structural failures: a relation that
/// cannot be built is recorded and yields no rows, and the run carries on.
fn build_entity<T>(
    kind: &'static str,
    report: &mut RunReport,
    build: impl FnOnce() -> Result<Vec<T>, CatalogError>,
) -> Vec<T> {
    match build() {
        Ok(rows) => {
            report.built_relations.push(kind);
            rows
        }
        Err(err) => {
            error!(entity = kind, error = %err, "relation build failed");
            report.failed_relations.push(FailedRelation {
                kind,
                reason: err.to_string(),
            });
            Vec::new()
        }
    }
}

fn typed_rows<T>(
    records: &[FlatRecord],
    renames: &RenameTable,
    f: impl Fn(&FlatRecord) -> Result<T, CatalogError>,
) -> Result<Vec<T>, CatalogError> {
    records
        .iter()
        .map(|record| f(&renames.apply(record.clone())))
        .collect()
}

/// The CLI adapter addresses a model by workspace *name* and dataset *name*;
/// pair every dataset with its workspace's name. A dataset whose workspace is
/// missing from the spine would be orphaned later anyway, so it is not a
/// target.
fn dataset_targets(datasets: &[DatasetRow], workspaces: &[WorkspaceRow]) -> Vec<DatasetTarget> {
    let names: HashMap<&WorkspaceId, &str> = workspaces
        .iter()
        .map(|ws| (&ws.workspace_id, ws.name.as_str()))
        .collect();
    resolver::dataset_refs(datasets)
        .into_iter()
        .filter_map(|ds| {
            names.get(&ds.workspace_id).map(|name| DatasetTarget {
                workspace_name: (*name).to_string(),
                workspace_id: ds.workspace_id,
                dataset_id: ds.dataset_id,
                dataset_name: ds.dataset_name,
            })
        })
        .collect()
}

/// Calculation items carry only their group id; the table name comes from
/// chasing group id → group's table id → table name before typing the row.
fn build_calc_items(
    info: &InfoRecords,
    tables: &[TableRow],
    extracted_at: DateTime<Utc>,
) -> Result<Vec<CalcGroupItemRow>, CatalogError> {
    let group_records = CALC_GROUP_RENAMES.apply_all(info.calc_groups.clone());
    let mut group_tables: HashMap<(String, String, String), String> = HashMap::new();
    for record in &group_records {
        let (Some(ws), Some(ds), Some(group_id), Some(table_id)) = (
            normalize::opt_string(record, "workspace_id"),
            normalize::opt_string(record, "dataset_id"),
            normalize::opt_string(record, "group_id"),
            normalize::opt_string(record, "table_id"),
        ) else {
            continue;
        };
        group_tables.insert((ws, ds, group_id), table_id);
    }

    let table_names: HashMap<(&str, &str, &str), &str> = tables
        .iter()
        .map(|t| {
            (
                (
                    t.workspace_id.as_str(),
                    t.dataset_id.as_str(),
                    t.table_id.as_str(),
                ),
                t.name.as_str(),
            )
        })
        .collect();

    let mut rows = Vec::with_capacity(info.calc_items.len());
    for record in &info.calc_items {
        let mut record = CALC_ITEM_RENAMES.apply(record.clone());
        if !record.contains_key("table_name") {
            let resolved = (
                normalize::opt_string(&record, "workspace_id"),
                normalize::opt_string(&record, "dataset_id"),
                normalize::opt_string(&record, "calculation_group_id"),
            );
            if let (Some(ws), Some(ds), Some(group_id)) = resolved {
                if let Some(table_id) = group_tables.get(&(ws.clone(), ds.clone(), group_id)) {
                    if let Some(name) =
                        table_names.get(&(ws.as_str(), ds.as_str(), table_id.as_str()))
                    {
                        record.insert(
                            "table_name".to_string(),
                            serde_json::Value::String((*name).to_string()),
                        );
                    }
                }
            }
        }
        rows.push(CalcGroupItemRow::from_flat(&record, extracted_at)?);
    }
    Ok(rows)
}
