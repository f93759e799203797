use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::CatalogError;

/// Report type tag the REST API uses for native (page-based) reports.
/// Pages exist only for this kind; paginated and other report types have none.
pub const NATIVE_REPORT_TYPE: &str = "PowerBIReport";

fn is_guid(value: &str) -> bool {
    let segments: Vec<&str> = value.split('-').collect();
    segments.len() == 5
        && segments
            .iter()
            .zip([8usize, 4, 4, 4, 12])
            .all(|(seg, len)| seg.len() == len && seg.chars().all(|ch| ch.is_ascii_hexdigit()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_guid(&normalized) {
            return Err(CatalogError::InvalidWorkspaceId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_guid(&normalized) {
            return Err(CatalogError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(String);

impl ReportId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReportId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_guid(&normalized) {
            return Err(CatalogError::InvalidReportId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Table identifier inside a semantic model. The INFO functions emit these as
/// integers; the REST side never sees them. Stored as the stringified value so
/// both sources join on the same representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(String);

impl TableId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition load mechanism, decoded from the numeric `Type` code that
/// INFO.PARTITIONS() emits. The codes are a small closed set; anything outside
/// it maps to `Unknown` and is kept, never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    Dax,
    M,
    Internal,
    Unknown(i64),
}

impl PartitionType {
    pub fn from_code(code: i64) -> Self {
        match code {
            2 => PartitionType::Dax,
            4 => PartitionType::M,
            7 => PartitionType::Internal,
            other => PartitionType::Unknown(other),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            PartitionType::Dax => "DAX",
            PartitionType::M => "M",
            PartitionType::Internal => "Internal",
            PartitionType::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

impl Serialize for PartitionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_label())
    }
}

/// A dataset identifier tagged with its parent workspace, as produced by the
/// identifier resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub workspace_id: WorkspaceId,
    pub dataset_id: DatasetId,
    pub dataset_name: String,
}

/// A report identifier tagged with its parent workspace and type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRef {
    pub workspace_id: WorkspaceId,
    pub report_id: ReportId,
    pub report_type: String,
}

impl ReportRef {
    pub fn is_native(&self) -> bool {
        self.report_type == NATIVE_REPORT_TYPE
    }
}

/// Everything the CLI adapter needs to address one semantic model: the XMLA
/// server is derived from the workspace *name*, not its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetTarget {
    pub workspace_id: WorkspaceId,
    pub workspace_name: String,
    pub dataset_id: DatasetId,
    pub dataset_name: String,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_workspace_id_valid() {
        let id: WorkspaceId = "A7E2B1C3-0D4F-4E5A-9B8C-1D2E3F4A5B6C".parse().unwrap();
        assert_eq!(id.as_str(), "a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c");
    }

    #[test]
    fn parse_workspace_id_invalid() {
        let err = "not-a-guid".parse::<WorkspaceId>().unwrap_err();
        assert_matches!(err, CatalogError::InvalidWorkspaceId(_));
    }

    #[test]
    fn partition_type_codes() {
        assert_eq!(PartitionType::from_code(4).as_label(), "M");
        assert_eq!(PartitionType::from_code(2).as_label(), "DAX");
        assert_eq!(PartitionType::from_code(7).as_label(), "Internal");
        assert_eq!(PartitionType::from_code(99).as_label(), "unknown");
        assert_matches!(PartitionType::from_code(99), PartitionType::Unknown(99));
    }

    #[test]
    fn native_report_detection() {
        let report = ReportRef {
            workspace_id: "a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c".parse().unwrap(),
            report_id: "b7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c".parse().unwrap(),
            report_type: NATIVE_REPORT_TYPE.to_string(),
        };
        assert!(report.is_native());

        let paginated = ReportRef {
            report_type: "PaginatedReport".to_string(),
            ..report
        };
        assert!(!paginated.is_native());
    }
}
