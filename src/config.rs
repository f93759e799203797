use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::WorkspaceId;
use crate::error::CatalogError;

/// On-disk config shape (`pbi-catalog.json`). Every field can also come from
/// the environment; the file may be absent entirely when the environment
/// carries the credentials.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub workspace_ids: Vec<String>,
    #[serde(default)]
    pub dscmd_path: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Service-principal credentials shared by the auth provider and the CLI
/// adapter. One instance per run; no module-level state.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    /// Explicit workspace scope. Empty means "enumerate every workspace the
    /// principal can access".
    pub workspace_ids: Vec<WorkspaceId>,
    pub dscmd_path: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("pbi-catalog.json"),
        };

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| CatalogError::ConfigParse(err.to_string()))?
        } else if path.is_some() {
            return Err(CatalogError::ConfigRead(config_path));
        } else {
            Config::default()
        };

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CatalogError> {
        let tenant_id = env_or("PBI_TENANT_ID", config.tenant_id)
            .ok_or(CatalogError::MissingCredential("PBI_TENANT_ID"))?;
        let client_id = env_or("PBI_CLIENT_ID", config.client_id)
            .ok_or(CatalogError::MissingCredential("PBI_CLIENT_ID"))?;
        let client_secret = env_or("PBI_CLIENT_SECRET", config.client_secret)
            .ok_or(CatalogError::MissingCredential("PBI_CLIENT_SECRET"))?;

        let workspace_ids = match std::env::var("PBI_WORKSPACES_IDS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|item| item.trim().parse())
                .collect::<Result<Vec<WorkspaceId>, CatalogError>>()?,
            _ => config
                .workspace_ids
                .iter()
                .map(|item| item.parse())
                .collect::<Result<Vec<WorkspaceId>, CatalogError>>()?,
        };

        let dscmd_path = config
            .dscmd_path
            .map(Utf8PathBuf::from)
            .unwrap_or_else(default_dscmd_path);
        let output_dir = config
            .output_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from("output"));

        Ok(ResolvedConfig {
            credentials: Credentials {
                tenant_id,
                client_id,
                client_secret,
            },
            workspace_ids,
            dscmd_path,
            output_dir,
        })
    }
}

fn env_or(key: &str, fallback: Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => fallback.filter(|value| !value.trim().is_empty()),
    }
}

pub fn default_dscmd_path() -> Utf8PathBuf {
    Utf8PathBuf::from("tools").join("dax_studio").join("dscmd.exe")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn resolve_config_from_file_values() {
        let config = Config {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            workspace_ids: vec!["a7e2b1c3-0d4f-4e5a-9b8c-1d2e3f4a5b6c".to_string()],
            dscmd_path: None,
            output_dir: None,
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.credentials.tenant_id, "tenant");
        assert_eq!(resolved.workspace_ids.len(), 1);
        assert_eq!(resolved.dscmd_path, default_dscmd_path());
        assert_eq!(resolved.output_dir, Utf8PathBuf::from("output"));
    }

    #[test]
    fn resolve_config_rejects_bad_workspace_id() {
        let config = Config {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            workspace_ids: vec!["nope".to_string()],
            dscmd_path: None,
            output_dir: None,
        };

        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, CatalogError::InvalidWorkspaceId(_));
    }
}
