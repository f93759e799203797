use std::fs;

use camino::Utf8Path;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::CatalogSnapshot;
use crate::error::CatalogError;

const WORKSPACE_COLUMNS: &[&str] = &[
    "workspace_id",
    "name",
    "kind",
    "is_dedicated_capacity",
    "capacity_id",
    "storage_format",
    "extract_timestamp",
];

const DATASET_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "name",
    "configured_by",
    "created_at",
    "web_url",
    "extract_timestamp",
];

const REPORT_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "report_id",
    "name",
    "report_type",
    "dataset_id",
    "dataset_name",
    "web_url",
    "extract_timestamp",
];

const REPORT_PAGE_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "report_id",
    "report_name",
    "page_id",
    "display_name",
    "order",
    "extract_timestamp",
];

const TABLE_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "table_id",
    "name",
    "description",
    "is_hidden",
    "table_type",
    "modified_at",
    "query_definition",
    "partition_type",
    "extract_timestamp",
];

const COLUMN_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "table_id",
    "table_name",
    "column_id",
    "name",
    "column_type",
    "data_type",
    "dax_expression",
    "description",
    "display_folder",
    "is_hidden",
    "modified_at",
    "extract_timestamp",
];

const MEASURE_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "table_id",
    "table_name",
    "measure_id",
    "name",
    "dax_expression",
    "data_type",
    "description",
    "display_folder",
    "is_hidden",
    "modified_at",
    "extract_timestamp",
];

const RELATIONSHIP_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "relationship_id",
    "from_table_id",
    "from_column_id",
    "from_cardinality",
    "to_table_id",
    "to_column_id",
    "to_cardinality",
    "cross_filtering_behavior",
    "is_active",
    "security_filtering_behavior",
    "modified_at",
    "extract_timestamp",
];

const CALC_ITEM_COLUMNS: &[&str] = &[
    "workspace_id",
    "workspace_name",
    "dataset_id",
    "dataset_name",
    "table_name",
    "calc_item_name",
    "expression",
    "description",
    "extract_timestamp",
];

/// Write one CSV file per relation (UTF-8, `;` separator) into `dir`.
pub fn export_csv(snapshot: &CatalogSnapshot, dir: &Utf8Path) -> Result<(), CatalogError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| CatalogError::Filesystem(err.to_string()))?;

    write_csv(dir.join("workspaces.csv"), &snapshot.workspaces)?;
    write_csv(dir.join("datasets.csv"), &snapshot.datasets)?;
    write_csv(dir.join("reports.csv"), &snapshot.reports)?;
    write_csv(dir.join("report_pages.csv"), &snapshot.report_pages)?;
    write_csv(dir.join("tables.csv"), &snapshot.tables)?;
    write_csv(dir.join("columns.csv"), &snapshot.columns)?;
    write_csv(dir.join("measures.csv"), &snapshot.measures)?;
    write_csv(dir.join("relationships.csv"), &snapshot.relationships)?;
    write_csv(dir.join("calc_group_items.csv"), &snapshot.calc_group_items)?;
    Ok(())
}

fn write_csv<T: Serialize>(
    path: camino::Utf8PathBuf,
    rows: &[T],
) -> Result<(), CatalogError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path.as_std_path())
        .map_err(|err| CatalogError::Export(err.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| CatalogError::Export(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| CatalogError::Export(err.to_string()))?;
    Ok(())
}

/// Write the whole snapshot as one workbook, one sheet per relation.
pub fn export_xlsx(snapshot: &CatalogSnapshot, path: &Utf8Path) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    write_sheet(&mut workbook, "Workspaces", WORKSPACE_COLUMNS, &snapshot.workspaces, &header_format)?;
    write_sheet(&mut workbook, "Semantic Models", DATASET_COLUMNS, &snapshot.datasets, &header_format)?;
    write_sheet(&mut workbook, "Reports", REPORT_COLUMNS, &snapshot.reports, &header_format)?;
    write_sheet(&mut workbook, "Report Pages", REPORT_PAGE_COLUMNS, &snapshot.report_pages, &header_format)?;
    write_sheet(&mut workbook, "Tables", TABLE_COLUMNS, &snapshot.tables, &header_format)?;
    write_sheet(&mut workbook, "Columns", COLUMN_COLUMNS, &snapshot.columns, &header_format)?;
    write_sheet(&mut workbook, "Measures", MEASURE_COLUMNS, &snapshot.measures, &header_format)?;
    write_sheet(&mut workbook, "Relationships", RELATIONSHIP_COLUMNS, &snapshot.relationships, &header_format)?;
    write_sheet(&mut workbook, "Calculation Groups", CALC_ITEM_COLUMNS, &snapshot.calc_group_items, &header_format)?;

    workbook
        .save(path.as_std_path())
        .map_err(|err| CatalogError::Export(err.to_string()))?;
    Ok(())
}

fn write_sheet<T: Serialize>(
    workbook: &mut Workbook,
    name: &str,
    columns: &[&str],
    rows: &[T],
    header_format: &Format,
) -> Result<(), CatalogError> {
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(name)
        .map_err(|err| CatalogError::Export(err.to_string()))?;

    for (col, header) in columns.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *header, header_format)
            .map_err(|err| CatalogError::Export(err.to_string()))?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        let value = serde_json::to_value(row)
            .map_err(|err| CatalogError::Export(err.to_string()))?;
        let Value::Object(map) = value else {
            return Err(CatalogError::Export(format!(
                "relation row for sheet {name} did not serialize to an object"
            )));
        };
        for (col, header) in columns.iter().enumerate() {
            let cell = match map.get(*header) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            sheet
                .write_string((row_idx + 1) as u32, col as u16, &cell)
                .map_err(|err| CatalogError::Export(err.to_string()))?;
        }
    }
    Ok(())
}

/// Pretty-printed JSON of the whole snapshot.
pub fn export_json(snapshot: &CatalogSnapshot, path: &Utf8Path) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    }
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| CatalogError::Export(err.to_string()))?;
    fs::write(path.as_std_path(), json).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    Ok(())
}
