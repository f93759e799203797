use tracing::info;

use crate::auth::BearerToken;
use crate::catalog::{DatasetRow, ReportRow};
use crate::domain::{DatasetRef, ReportRef, WorkspaceId};
use crate::error::CatalogError;
use crate::flatten::{self, FlatRecord};
use crate::rest::{PowerBiApi, Resource};

/// Each workspace's dataset and report child records, tagged with the parent
/// workspace id. One fetch serves both the identifier walk and the relation
/// build, so the two can never disagree.
#[derive(Debug, Clone, Default)]
pub struct ResolvedChildren {
    pub dataset_records: Vec<FlatRecord>,
    pub report_records: Vec<FlatRecord>,
}

/// Enumerate every workspace id the principal can access.
pub fn enumerate_workspaces<R: PowerBiApi>(
    api: &R,
    token: &BearerToken,
) -> Result<Vec<WorkspaceId>, CatalogError> {
    let records = api.get(token, &Resource::Workspaces.path())?.into_records();
    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        let raw = record
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CatalogError::SchemaMismatch {
                entity: "workspace",
                field: "id".to_string(),
            })?;
        ids.push(raw.parse()?);
    }
    info!(count = ids.len(), "enumerated accessible workspaces");
    Ok(ids)
}

/// Walk the identifier hierarchy one level down. Source order is preserved
/// within each workspace; a workspace id that does not resolve is propagated,
/// because downstream joins depend on the child set being complete.
pub fn resolve<R: PowerBiApi>(
    api: &R,
    token: &BearerToken,
    workspace_ids: &[WorkspaceId],
) -> Result<ResolvedChildren, CatalogError> {
    let mut resolved = ResolvedChildren::default();

    for workspace_id in workspace_ids {
        let datasets = api
            .get(token, &Resource::Datasets(workspace_id).path())
            .map_err(|err| not_found_as_lookup(err, workspace_id))?
            .into_records();
        resolved.dataset_records.extend(flatten::unnest(
            datasets,
            &[("workspace_id", workspace_id.as_str())],
        ));

        let reports = api
            .get(token, &Resource::Reports(workspace_id).path())
            .map_err(|err| not_found_as_lookup(err, workspace_id))?
            .into_records();
        resolved.report_records.extend(flatten::unnest(
            reports,
            &[("workspace_id", workspace_id.as_str())],
        ));
    }

    info!(
        datasets = resolved.dataset_records.len(),
        reports = resolved.report_records.len(),
        "resolved child identifiers"
    );
    Ok(resolved)
}

/// Identifier projection of the dataset relation.
pub fn dataset_refs(rows: &[DatasetRow]) -> Vec<DatasetRef> {
    rows.iter()
        .map(|row| DatasetRef {
            workspace_id: row.workspace_id.clone(),
            dataset_id: row.dataset_id.clone(),
            dataset_name: row.name.clone(),
        })
        .collect()
}

/// Identifier projection of the report relation.
pub fn report_refs(rows: &[ReportRow]) -> Vec<ReportRef> {
    rows.iter()
        .map(|row| ReportRef {
            workspace_id: row.workspace_id.clone(),
            report_id: row.report_id.clone(),
            report_type: row.report_type.clone(),
        })
        .collect()
}

fn not_found_as_lookup(err: CatalogError, workspace_id: &WorkspaceId) -> CatalogError {
    match err {
        CatalogError::ApiStatus { status: 404, .. } => {
            CatalogError::WorkspaceNotFound(workspace_id.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::rest::ApiPayload;

    use super::*;

    const W1: &str = "a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c";

    struct FakeApi;

    impl PowerBiApi for FakeApi {
        fn get(&self, _token: &BearerToken, endpoint: &str) -> Result<ApiPayload, CatalogError> {
            if endpoint.ends_with("/datasets") {
                Ok(ApiPayload::Collection(vec![json!({
                    "id": "b7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c",
                    "name": "Sales Model"
                })]))
            } else if endpoint.ends_with("/reports") {
                Ok(ApiPayload::Collection(vec![json!({
                    "id": "c7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c",
                    "reportType": "PowerBIReport"
                })]))
            } else {
                Err(CatalogError::ApiStatus {
                    status: 404,
                    endpoint: endpoint.to_string(),
                    message: "not found".to_string(),
                })
            }
        }
    }

    #[test]
    fn resolve_tags_children_with_parent_workspace() {
        let token = BearerToken::new("t");
        let ids = vec![W1.parse().unwrap()];
        let resolved = resolve(&FakeApi, &token, &ids).unwrap();
        assert_eq!(resolved.dataset_records.len(), 1);
        assert_eq!(
            resolved.dataset_records[0].get("workspace_id"),
            Some(&json!(W1))
        );
        assert_eq!(
            resolved.dataset_records[0].get("name"),
            Some(&json!("Sales Model"))
        );
        assert_eq!(resolved.report_records.len(), 1);
    }

    struct NotFoundApi;

    impl PowerBiApi for NotFoundApi {
        fn get(&self, _token: &BearerToken, endpoint: &str) -> Result<ApiPayload, CatalogError> {
            Err(CatalogError::ApiStatus {
                status: 404,
                endpoint: endpoint.to_string(),
                message: "not found".to_string(),
            })
        }
    }

    #[test]
    fn unresolvable_workspace_propagates() {
        let token = BearerToken::new("t");
        let ids = vec![W1.parse().unwrap()];
        let err = resolve(&NotFoundApi, &token, &ids).unwrap_err();
        assert_matches!(err, CatalogError::WorkspaceNotFound(_));
    }
}
