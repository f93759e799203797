use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{DatasetId, PartitionType, ReportId, TableId, WorkspaceId};
use crate::error::CatalogError;
use crate::flatten::FlatRecord;
use crate::normalize::{opt_bool, opt_date, opt_i64, opt_string, require_str};

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceRow {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub kind: Option<String>,
    pub is_dedicated_capacity: bool,
    pub capacity_id: Option<String>,
    pub storage_format: Option<String>,
    pub extract_timestamp: DateTime<Utc>,
}

impl WorkspaceRow {
    /// Build from the single-object workspace info response.
    pub fn from_api(
        workspace_id: WorkspaceId,
        body: &Map<String, Value>,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        let name = body
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CatalogError::SchemaMismatch {
                entity: "workspace",
                field: "name".to_string(),
            })?
            .to_string();
        Ok(Self {
            workspace_id,
            name,
            kind: str_field(body, "type"),
            is_dedicated_capacity: body
                .get("isOnDedicatedCapacity")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            capacity_id: str_field(body, "capacityId"),
            storage_format: str_field(body, "defaultDatasetStorageFormat"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub name: String,
    pub configured_by: Option<String>,
    pub created_at: Option<NaiveDate>,
    pub web_url: Option<String>,
    pub extract_timestamp: DateTime<Utc>,
}

impl DatasetRow {
    /// Build from one element of the `{workspace}/datasets` collection,
    /// flattened with its stamped workspace id.
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "dataset", "workspace_id")?.parse()?,
            workspace_name: None,
            dataset_id: require_str(record, "dataset", "id")?.parse()?,
            name: opt_string(record, "name").unwrap_or_default(),
            configured_by: opt_string(record, "configuredBy"),
            created_at: opt_date(record, "createdDate"),
            web_url: opt_string(record, "webUrl"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub report_id: ReportId,
    pub name: String,
    pub report_type: String,
    pub dataset_id: Option<DatasetId>,
    pub dataset_name: Option<String>,
    pub web_url: Option<String>,
    pub extract_timestamp: DateTime<Utc>,
}

impl ReportRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        let dataset_id = match opt_string(record, "datasetId") {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        Ok(Self {
            workspace_id: require_str(record, "report", "workspace_id")?.parse()?,
            workspace_name: None,
            report_id: require_str(record, "report", "id")?.parse()?,
            name: opt_string(record, "name").unwrap_or_default(),
            report_type: opt_string(record, "reportType").unwrap_or_default(),
            dataset_id,
            dataset_name: None,
            web_url: opt_string(record, "webUrl"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPageRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub report_id: ReportId,
    pub report_name: Option<String>,
    pub page_id: String,
    pub display_name: String,
    pub order: Option<i64>,
    pub extract_timestamp: DateTime<Utc>,
}

impl ReportPageRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "report page", "workspace_id")?.parse()?,
            workspace_name: None,
            report_id: require_str(record, "report page", "report_id")?.parse()?,
            report_name: None,
            // The API calls the stable page identifier `name` and the human
            // title `displayName`.
            page_id: require_str(record, "report page", "name")?,
            display_name: opt_string(record, "displayName").unwrap_or_default(),
            order: opt_i64(record, "order"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub dataset_name: Option<String>,
    pub table_id: TableId,
    pub name: String,
    pub description: Option<String>,
    pub is_hidden: bool,
    pub table_type: Option<String>,
    pub modified_at: Option<NaiveDate>,
    pub query_definition: Option<String>,
    pub partition_type: Option<PartitionType>,
    pub extract_timestamp: DateTime<Utc>,
}

impl TableRow {
    /// Build from a canonicalized INFO.TABLES() row. Partition fields stay
    /// empty until the merger fans the table out over its partitions.
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "table", "workspace_id")?.parse()?,
            workspace_name: opt_string(record, "workspace_name"),
            dataset_id: require_str(record, "table", "dataset_id")?.parse()?,
            dataset_name: opt_string(record, "dataset_name"),
            table_id: TableId::new(require_str(record, "table", "table_id")?),
            name: opt_string(record, "name").unwrap_or_default(),
            description: opt_string(record, "description"),
            is_hidden: opt_bool(record, "is_hidden").unwrap_or(false),
            table_type: opt_string(record, "table_type"),
            modified_at: opt_date(record, "modified_at"),
            query_definition: None,
            partition_type: None,
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionRow {
    pub workspace_id: WorkspaceId,
    pub dataset_id: DatasetId,
    pub table_id: TableId,
    pub query_definition: Option<String>,
    pub partition_type: Option<PartitionType>,
}

impl PartitionRow {
    pub fn from_flat(record: &FlatRecord) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "partition", "workspace_id")?.parse()?,
            dataset_id: require_str(record, "partition", "dataset_id")?.parse()?,
            table_id: TableId::new(require_str(record, "partition", "table_id")?),
            query_definition: opt_string(record, "query_definition"),
            partition_type: opt_i64(record, "partition_type").map(PartitionType::from_code),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub dataset_name: Option<String>,
    pub table_id: TableId,
    pub table_name: Option<String>,
    pub column_id: String,
    pub name: String,
    pub column_type: Option<String>,
    pub data_type: Option<String>,
    pub dax_expression: Option<String>,
    pub description: Option<String>,
    pub display_folder: Option<String>,
    pub is_hidden: bool,
    pub modified_at: Option<NaiveDate>,
    pub extract_timestamp: DateTime<Utc>,
}

impl ColumnRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "column", "workspace_id")?.parse()?,
            workspace_name: opt_string(record, "workspace_name"),
            dataset_id: require_str(record, "column", "dataset_id")?.parse()?,
            dataset_name: opt_string(record, "dataset_name"),
            table_id: TableId::new(require_str(record, "column", "table_id")?),
            table_name: None,
            column_id: require_str(record, "column", "column_id")?,
            name: opt_string(record, "name").unwrap_or_default(),
            column_type: opt_string(record, "column_type"),
            data_type: opt_string(record, "data_type"),
            dax_expression: opt_string(record, "dax_expression"),
            description: opt_string(record, "description"),
            display_folder: opt_string(record, "display_folder"),
            is_hidden: opt_bool(record, "is_hidden").unwrap_or(false),
            modified_at: opt_date(record, "modified_at"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasureRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub dataset_name: Option<String>,
    pub table_id: TableId,
    pub table_name: Option<String>,
    pub measure_id: String,
    pub name: String,
    pub dax_expression: Option<String>,
    pub data_type: Option<String>,
    pub description: Option<String>,
    pub display_folder: Option<String>,
    pub is_hidden: bool,
    pub modified_at: Option<NaiveDate>,
    pub extract_timestamp: DateTime<Utc>,
}

impl MeasureRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "measure", "workspace_id")?.parse()?,
            workspace_name: opt_string(record, "workspace_name"),
            dataset_id: require_str(record, "measure", "dataset_id")?.parse()?,
            dataset_name: opt_string(record, "dataset_name"),
            table_id: TableId::new(require_str(record, "measure", "table_id")?),
            table_name: None,
            measure_id: require_str(record, "measure", "measure_id")?,
            name: opt_string(record, "name").unwrap_or_default(),
            dax_expression: opt_string(record, "dax_expression"),
            data_type: opt_string(record, "data_type"),
            description: opt_string(record, "description"),
            display_folder: opt_string(record, "display_folder"),
            is_hidden: opt_bool(record, "is_hidden").unwrap_or(false),
            modified_at: opt_date(record, "modified_at"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub dataset_name: Option<String>,
    pub relationship_id: String,
    pub from_table_id: Option<String>,
    pub from_column_id: Option<String>,
    pub from_cardinality: Option<String>,
    pub to_table_id: Option<String>,
    pub to_column_id: Option<String>,
    pub to_cardinality: Option<String>,
    pub cross_filtering_behavior: Option<String>,
    pub is_active: bool,
    pub security_filtering_behavior: Option<String>,
    pub modified_at: Option<NaiveDate>,
    pub extract_timestamp: DateTime<Utc>,
}

impl RelationshipRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "relationship", "workspace_id")?.parse()?,
            workspace_name: opt_string(record, "workspace_name"),
            dataset_id: require_str(record, "relationship", "dataset_id")?.parse()?,
            dataset_name: opt_string(record, "dataset_name"),
            relationship_id: require_str(record, "relationship", "relationship_id")?,
            from_table_id: opt_string(record, "from_table_id"),
            from_column_id: opt_string(record, "from_column_id"),
            from_cardinality: opt_string(record, "from_cardinality"),
            to_table_id: opt_string(record, "to_table_id"),
            to_column_id: opt_string(record, "to_column_id"),
            to_cardinality: opt_string(record, "to_cardinality"),
            cross_filtering_behavior: opt_string(record, "cross_filtering_behavior"),
            is_active: opt_bool(record, "is_active").unwrap_or(true),
            security_filtering_behavior: opt_string(record, "security_filtering_behavior"),
            modified_at: opt_date(record, "modified_at"),
            extract_timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcGroupItemRow {
    pub workspace_id: WorkspaceId,
    pub workspace_name: Option<String>,
    pub dataset_id: DatasetId,
    pub dataset_name: Option<String>,
    pub table_name: Option<String>,
    pub calc_item_name: String,
    pub expression: Option<String>,
    pub description: Option<String>,
    pub extract_timestamp: DateTime<Utc>,
}

impl CalcGroupItemRow {
    pub fn from_flat(
        record: &FlatRecord,
        extract_timestamp: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            workspace_id: require_str(record, "calculation group item", "workspace_id")?.parse()?,
            workspace_name: opt_string(record, "workspace_name"),
            dataset_id: require_str(record, "calculation group item", "dataset_id")?.parse()?,
            dataset_name: opt_string(record, "dataset_name"),
            table_name: opt_string(record, "table_name"),
            calc_item_name: require_str(record, "calculation group item", "calc_item_name")?,
            expression: opt_string(record, "expression"),
            description: opt_string(record, "description"),
            extract_timestamp,
        })
    }
}

/// The final in-memory catalog: one relation per entity kind, every row
/// stamped with the single run timestamp, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub extracted_at: DateTime<Utc>,
    pub workspaces: Vec<WorkspaceRow>,
    pub datasets: Vec<DatasetRow>,
    pub reports: Vec<ReportRow>,
    pub report_pages: Vec<ReportPageRow>,
    pub tables: Vec<TableRow>,
    pub columns: Vec<ColumnRow>,
    pub measures: Vec<MeasureRow>,
    pub relationships: Vec<RelationshipRow>,
    pub calc_group_items: Vec<CalcGroupItemRow>,
}

fn str_field(body: &Map<String, Value>, field: &str) -> Option<String> {
    body.get(field)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-03-15T08:30:00Z".parse().unwrap()
    }

    fn record(pairs: &[(&str, Value)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    const WS: &str = "a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";
    const DS: &str = "b7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";

    #[test]
    fn workspace_row_from_single_object_payload() {
        let body = json!({
            "name": "Finance",
            "type": "Workspace",
            "isOnDedicatedCapacity": true,
            "capacityId": "cap-1"
        });
        let Value::Object(map) = body else { unreachable!() };
        let row = WorkspaceRow::from_api(WS.parse().unwrap(), &map, ts()).unwrap();
        assert_eq!(row.name, "Finance");
        assert!(row.is_dedicated_capacity);
        assert_eq!(row.capacity_id.as_deref(), Some("cap-1"));
        assert_eq!(row.storage_format, None);
    }

    #[test]
    fn table_row_requires_join_keys() {
        let missing_table_id = record(&[
            ("workspace_id", json!(WS)),
            ("dataset_id", json!(DS)),
            ("name", json!("Sales")),
        ]);
        let err = TableRow::from_flat(&missing_table_id, ts()).unwrap_err();
        assert_matches!(
            err,
            CatalogError::SchemaMismatch {
                entity: "table",
                ..
            }
        );
    }

    #[test]
    fn table_row_coerces_flags_and_dates() {
        let rec = record(&[
            ("workspace_id", json!(WS)),
            ("dataset_id", json!(DS)),
            ("table_id", json!(7)),
            ("name", json!("Sales")),
            ("is_hidden", json!("false")),
            ("modified_at", json!("2024-03-15T08:30:00Z")),
        ]);
        let row = TableRow::from_flat(&rec, ts()).unwrap();
        assert_eq!(row.table_id.as_str(), "7");
        assert!(!row.is_hidden);
        assert_eq!(
            row.modified_at,
            Some(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
    }

    #[test]
    fn partition_row_decodes_type_codes() {
        let rec = record(&[
            ("workspace_id", json!(WS)),
            ("dataset_id", json!(DS)),
            ("table_id", json!("7")),
            ("partition_type", json!(4)),
        ]);
        let row = PartitionRow::from_flat(&rec).unwrap();
        assert_matches!(row.partition_type, Some(PartitionType::M));
    }

    #[test]
    fn report_row_without_dataset_keeps_none() {
        let rec = record(&[
            ("workspace_id", json!(WS)),
            ("id", json!("c7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c")),
            ("name", json!("Ops dashboard")),
            ("reportType", json!("PaginatedReport")),
        ]);
        let row = ReportRow::from_flat(&rec, ts()).unwrap();
        assert_eq!(row.dataset_id, None);
        assert_eq!(row.report_type, "PaginatedReport");
    }
}
