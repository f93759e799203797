use std::collections::HashMap;
use std::fs;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tempfile::Builder;

use crate::config::Credentials;
use crate::error::CatalogError;

/// One INFO sub-query of the metadata batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoQuery {
    Tables,
    Partitions,
    Columns,
    Measures,
    Relationships,
    CalculationGroups,
    CalculationItems,
}

impl InfoQuery {
    pub fn dax(&self) -> &'static str {
        match self {
            InfoQuery::Tables => "EVALUATE INFO.TABLES()",
            InfoQuery::Partitions => "EVALUATE INFO.PARTITIONS()",
            InfoQuery::Columns => "EVALUATE INFO.COLUMNS()",
            InfoQuery::Measures => "EVALUATE INFO.MEASURES()",
            InfoQuery::Relationships => "EVALUATE INFO.RELATIONSHIPS()",
            InfoQuery::CalculationGroups => "EVALUATE INFO.CALCULATIONGROUPS()",
            InfoQuery::CalculationItems => "EVALUATE INFO.CALCULATIONITEMS()",
        }
    }
}

/// Ordered list of sub-queries sent to the tool in one invocation.
///
/// The tool's multi-table response is not self-describing: result table `i`
/// holds the rows of sub-query `i`. The batch therefore owns both the query
/// text and the positional-to-semantic binding, so reordering the batch can
/// never mislabel results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBatch {
    queries: Vec<InfoQuery>,
}

impl QueryBatch {
    pub fn new(queries: Vec<InfoQuery>) -> Self {
        Self { queries }
    }

    /// The full metadata batch in the order the current tool build expects.
    pub fn standard() -> Self {
        Self::new(vec![
            InfoQuery::Tables,
            InfoQuery::Partitions,
            InfoQuery::Columns,
            InfoQuery::Measures,
            InfoQuery::Relationships,
            InfoQuery::CalculationGroups,
            InfoQuery::CalculationItems,
        ])
    }

    pub fn queries(&self) -> &[InfoQuery] {
        &self.queries
    }

    pub fn render(&self) -> String {
        self.queries
            .iter()
            .map(|query| query.dax())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Zip result tables to sub-query labels by position. A count mismatch
    /// means the tool answered a different batch than we issued.
    pub fn bind(&self, tables: Vec<Vec<Value>>) -> Result<InfoResultSet, CatalogError> {
        if tables.len() != self.queries.len() {
            return Err(CatalogError::ResultTableCount {
                expected: self.queries.len(),
                actual: tables.len(),
            });
        }
        let rows = self.queries.iter().copied().zip(tables).collect();
        Ok(InfoResultSet { rows })
    }
}

/// Label-addressed result tables of one CLI invocation.
#[derive(Debug, Clone, Default)]
pub struct InfoResultSet {
    rows: HashMap<InfoQuery, Vec<Value>>,
}

impl InfoResultSet {
    pub fn rows(&self, query: InfoQuery) -> &[Value] {
        self.rows.get(&query).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub trait DaxInfoClient: Send + Sync {
    fn query(
        &self,
        credentials: &Credentials,
        workspace_name: &str,
        dataset_name: &str,
        batch: &QueryBatch,
    ) -> Result<InfoResultSet, CatalogError>;
}

/// Adapter around the DAX Studio portable command-line tool (`dscmd`).
#[derive(Debug, Clone)]
pub struct DsCmdClient {
    exe: Utf8PathBuf,
}

impl DsCmdClient {
    pub fn new(exe: impl Into<Utf8PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn tool_available(&self) -> bool {
        self.exe.as_std_path().exists()
    }

    fn require_tool(&self) -> Result<&Utf8Path, CatalogError> {
        if !self.tool_available() {
            return Err(CatalogError::MissingTool(self.exe.to_string()));
        }
        Ok(self.exe.as_path())
    }

    fn server_uri(workspace_name: &str) -> String {
        format!(
            "powerbi://api.powerbi.com/v1.0/myorg/{}",
            urlencoding::encode(workspace_name)
        )
    }
}

impl DaxInfoClient for DsCmdClient {
    fn query(
        &self,
        credentials: &Credentials,
        workspace_name: &str,
        dataset_name: &str,
        batch: &QueryBatch,
    ) -> Result<InfoResultSet, CatalogError> {
        let exe = self.require_tool()?;

        // Unique per invocation; dropped (and deleted) on every exit path,
        // so concurrent invocations can never cross-talk through the file.
        let out_file = Builder::new()
            .prefix("pbi-catalog-dax")
            .suffix(".json")
            .tempfile()
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let out_path = out_file.path().to_string_lossy().to_string();

        let output = Command::new(exe.as_std_path())
            .arg("csv")
            .arg(&out_path)
            .arg("-s")
            .arg(Self::server_uri(workspace_name))
            .arg("-d")
            .arg(dataset_name)
            .arg("-u")
            .arg(format!(
                "app:{}@{}",
                credentials.client_id, credentials.tenant_id
            ))
            .arg("-p")
            .arg(&credentials.client_secret)
            .arg("-q")
            .arg(batch.render())
            .arg("-t")
            .arg("JSON")
            .output()
            .map_err(|err| CatalogError::DaxTool {
                workspace: workspace_name.to_string(),
                dataset: dataset_name.to_string(),
                message: err.to_string(),
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = match (stdout.is_empty(), stderr.is_empty()) {
                (false, false) => format!("{stdout} {stderr}"),
                (false, true) => stdout,
                (true, false) => stderr,
                (true, true) => format!("exit status {}", output.status),
            };
            return Err(CatalogError::DaxTool {
                workspace: workspace_name.to_string(),
                dataset: dataset_name.to_string(),
                message,
            });
        }

        let content = fs::read_to_string(out_file.path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let document: Value = serde_json::from_str(&content)
            .map_err(|err| CatalogError::DaxOutputParse(err.to_string()))?;

        parse_result_tables(&document).and_then(|tables| batch.bind(tables))
    }
}

/// Pull the `results[0].tables[*].rows` arrays out of the tool's JSON dialect.
pub fn parse_result_tables(document: &Value) -> Result<Vec<Vec<Value>>, CatalogError> {
    let tables = document
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|results| results.first())
        .and_then(|result| result.get("tables"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            CatalogError::DaxOutputParse("missing results[0].tables in tool output".to_string())
        })?;

    Ok(tables
        .iter()
        .map(|table| {
            table
                .get("rows")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn standard_batch_renders_all_info_functions() {
        let rendered = QueryBatch::standard().render();
        assert!(rendered.starts_with("EVALUATE INFO.TABLES()"));
        assert!(rendered.contains("EVALUATE INFO.CALCULATIONITEMS()"));
        assert_eq!(rendered.lines().count(), 7);
    }

    #[test]
    fn bind_follows_batch_order_not_a_fixed_index() {
        let tables_rows = vec![json!({"[ID]": 1})];
        let rel_rows = vec![json!({"[ID]": 9})];

        // Relationships issued first: position 0 must land on Relationships.
        let batch = QueryBatch::new(vec![InfoQuery::Relationships, InfoQuery::Tables]);
        let bound = batch
            .bind(vec![rel_rows.clone(), tables_rows.clone()])
            .unwrap();
        assert_eq!(bound.rows(InfoQuery::Relationships), rel_rows.as_slice());
        assert_eq!(bound.rows(InfoQuery::Tables), tables_rows.as_slice());

        // Same payloads, opposite batch order: the labels follow the batch.
        let batch = QueryBatch::new(vec![InfoQuery::Tables, InfoQuery::Relationships]);
        let bound = batch.bind(vec![rel_rows.clone(), tables_rows]).unwrap();
        assert_eq!(bound.rows(InfoQuery::Tables), rel_rows.as_slice());
    }

    #[test]
    fn bind_rejects_count_mismatch() {
        let batch = QueryBatch::standard();
        let err = batch.bind(vec![Vec::new(); 3]).unwrap_err();
        assert_matches!(
            err,
            CatalogError::ResultTableCount {
                expected: 7,
                actual: 3
            }
        );
    }

    #[test]
    fn parse_result_tables_walks_the_tool_dialect() {
        let document = json!({
            "results": [{
                "tables": [
                    {"rows": [{"[ID]": 1}, {"[ID]": 2}]},
                    {"rows": []}
                ]
            }]
        });
        let tables = parse_result_tables(&document).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].len(), 2);
        assert!(tables[1].is_empty());
    }

    #[test]
    fn parse_result_tables_rejects_foreign_shapes() {
        let err = parse_result_tables(&json!({"rows": []})).unwrap_err();
        assert_matches!(err, CatalogError::DaxOutputParse(_));
    }

    #[test]
    fn server_uri_encodes_workspace_name() {
        assert_eq!(
            DsCmdClient::server_uri("Finance BR"),
            "powerbi://api.powerbi.com/v1.0/myorg/Finance%20BR"
        );
    }
}
